//! Session-level query behaviour against the in-memory driver.

use rand::RngCore;

use relay_core::bind::DYNAMIC_BUFFER_INIT_SIZE;
use relay_core::codes;
use relay_core::config::ConnOption;
use relay_core::field::{ColumnMeta, FieldType};
use relay_core::params;
use relay_core::results::{Exec, RawRows, SqlResults};
use relay_core::value::{Blob, TimeValue};

use relay_executor::driver::mock::{MockCell, MockServer};
use relay_executor::driver::DriverError;
use relay_executor::query::{execute_only, query_raw, query_typed};
use relay_executor::Executor;

fn connected_executor(server: &MockServer) -> Executor {
    let mut exec = Executor::new(ConnOption::default(), &server.factory());
    assert!(exec.connect());
    exec
}

#[test]
fn typed_query_returns_declared_tuple() {
    let server = MockServer::new();
    let sql = "select id, username from users where id = ? and username = ?";
    server.on_prepared(
        sql,
        vec![
            ColumnMeta::new("id", FieldType::Long),
            ColumnMeta::new("username", FieldType::VarString),
        ],
        vec![vec![MockCell::Int(3), MockCell::Text("carol".to_string())]],
    );
    let mut exec = connected_executor(&server);

    let mut res = SqlResults::<(i32, String)>::new();
    assert!(query_typed(&mut exec, &mut res, sql, &params![3, "carol"]));
    assert!(res.ok());
    assert_eq!(res.rows().len(), 1);
    assert_eq!(res.rows()[0], (3, "carol".to_string()));
    assert_eq!(res.field_names().to_vec(), ["id", "username"]);
    assert!(res.has_value());
    assert!(!res.is_value_null(0, 0));
}

#[test]
fn datetime_column_reads_back_as_canonical_string() {
    let server = MockServer::new();
    let mut stamp = TimeValue::new();
    stamp.set_year(2024).set_month(9).set_day(10);

    let sql = "select created_at from users where id = ?";
    server.on_prepared(
        sql,
        vec![ColumnMeta::new("created_at", FieldType::DateTime)],
        vec![vec![MockCell::Time(stamp)]],
    );
    let mut exec = connected_executor(&server);

    // Read as a string: the buffer type is forced to STRING.
    let mut as_text = SqlResults::<(String,)>::new();
    assert!(query_typed(&mut exec, &mut as_text, sql, &params![1]));
    assert_eq!(as_text.rows()[0].0, "2024-09-10 00:00:00");

    // Read as a TimeValue: the binary image round-trips.
    let mut as_time = SqlResults::<(TimeValue,)>::new();
    assert!(query_typed(&mut exec, &mut as_time, sql, &params![1]));
    assert_eq!(as_time.rows()[0].0.to_string(), "2024-09-10 00:00:00");
}

#[test]
fn blob_reads_back_identically_in_all_three_shapes() {
    let server = MockServer::new();
    let mut payload = vec![0u8; 1024];
    rand::thread_rng().fill_bytes(&mut payload);

    let prepared_sql = "select body from attachments where id = ?";
    server.on_prepared(
        prepared_sql,
        vec![ColumnMeta::new("body", FieldType::Blob)],
        vec![vec![MockCell::Bytes(payload.clone())]],
    );
    let raw_sql = "select body from attachments where id = 9";
    server.on_text(raw_sql, vec!["body"], vec![vec![Some(&payload[..])]]);

    let mut exec = connected_executor(&server);

    let mut as_blob = SqlResults::<(Blob,)>::new();
    assert!(query_typed(&mut exec, &mut as_blob, prepared_sql, &params![9]));
    assert_eq!(as_blob.rows()[0].0, Blob::new(payload.clone()));

    let mut as_text = SqlResults::<(String,)>::new();
    assert!(query_typed(&mut exec, &mut as_text, prepared_sql, &params![9]));
    assert_eq!(as_text.rows()[0].0.as_bytes(), &payload[..]);

    let mut as_raw = SqlResults::<RawRows>::new();
    assert!(query_raw(&mut exec, &mut as_raw, "select body from attachments where id = ?", &params![9]));
    assert_eq!(Blob::from(&as_raw.rows()[0][0][..]), Blob::new(payload));
}

#[test]
fn cell_at_initial_buffer_size_fetches_without_regrowth() {
    let server = MockServer::new();
    let exact = "x".repeat(DYNAMIC_BUFFER_INIT_SIZE);
    let sql = "select note from t where id = ?";
    server.on_prepared(
        sql,
        vec![ColumnMeta::new("note", FieldType::VarString)],
        vec![vec![MockCell::Text(exact.clone())]],
    );
    let mut exec = connected_executor(&server);

    let mut res = SqlResults::<(String,)>::new();
    assert!(query_typed(&mut exec, &mut res, sql, &params![1]));
    assert_eq!(res.rows()[0].0, exact);
}

#[test]
fn cell_one_past_initial_buffer_size_regrows_and_completes() {
    let server = MockServer::new();
    let long = "y".repeat(DYNAMIC_BUFFER_INIT_SIZE + 1);
    let sql = "select note from t where id = ?";
    server.on_prepared(
        sql,
        vec![ColumnMeta::new("note", FieldType::VarString)],
        vec![vec![MockCell::Text(long.clone())]],
    );
    let mut exec = connected_executor(&server);

    let mut res = SqlResults::<(String,)>::new();
    assert!(query_typed(&mut exec, &mut res, sql, &params![1]));
    assert_eq!(res.rows()[0].0, long);
}

#[test]
fn shape_mismatch_fails_fast_with_stmt_params_error() {
    let server = MockServer::new();
    let sql = "select id, username from users";
    server.on_prepared(
        sql,
        vec![
            ColumnMeta::new("id", FieldType::Long),
            ColumnMeta::new("username", FieldType::VarString),
        ],
        vec![vec![MockCell::Int(1), MockCell::Text("a".to_string())]],
    );
    let mut exec = connected_executor(&server);

    // Wrong arity.
    let mut narrow = SqlResults::<(i32,)>::new();
    assert!(!query_typed(&mut exec, &mut narrow, sql, &[]));
    assert_eq!(narrow.error_code(), codes::STMT_PARAMS_ERROR);

    // Wrong column type: username cannot decode into an integer.
    let mut wrong = SqlResults::<(i32, i64)>::new();
    assert!(!query_typed(&mut exec, &mut wrong, sql, &[]));
    assert_eq!(wrong.error_code(), codes::STMT_PARAMS_ERROR);
    assert!(wrong.error_message().contains("username"));
}

#[test]
fn input_count_mismatch_is_rejected_before_binding() {
    let server = MockServer::new();
    let sql = "select id from users where id = ? and age > ?";
    server.on_prepared(
        sql,
        vec![ColumnMeta::new("id", FieldType::Long)],
        vec![],
    );
    let mut exec = connected_executor(&server);

    let mut res = SqlResults::<(i32,)>::new();
    assert!(!query_typed(&mut exec, &mut res, sql, &params![1]));
    assert_eq!(res.error_code(), codes::STMT_PARAMS_ERROR);
    assert!(res.error_message().contains("placeholders"));
}

#[test]
fn raw_rows_carry_null_flags_and_field_names() {
    let server = MockServer::new();
    server.on_text(
        "select id, nickname from users",
        vec!["id", "nickname"],
        vec![
            vec![Some(&b"1"[..]), Some(&b"ann"[..])],
            vec![Some(&b"2"[..]), None],
        ],
    );
    let mut exec = connected_executor(&server);

    let mut res = SqlResults::<RawRows>::new();
    assert!(query_raw(&mut exec, &mut res, "select id, nickname from users", &[]));
    assert_eq!(res.field_names().to_vec(), ["id", "nickname"]);
    assert_eq!(&res.rows()[0][1][..], b"ann");
    assert!(res.rows()[1][1].is_empty());
    assert!(res.is_value_null(1, 1));
    assert!(!res.is_value_null(0, 1));
}

#[test]
fn execute_fills_affected_rows() {
    let server = MockServer::new();
    server.on_exec("delete from sessions", 17);
    server.on_exec("insert into users (username) values (?)", 1);
    let mut exec = connected_executor(&server);

    // Text path: no bound inputs.
    let mut res = SqlResults::<Exec>::new();
    assert!(execute_only(&mut exec, &mut res, "delete from sessions", &[]));
    assert_eq!(res.affected_rows(), 17);

    // Prepared path: bound inputs.
    let mut res = SqlResults::<Exec>::new();
    assert!(execute_only(
        &mut exec,
        &mut res,
        "insert into users (username) values (?)",
        &params!["jack"],
    ));
    assert_eq!(res.affected_rows(), 1);
}

#[test]
fn statement_error_is_propagated_into_results() {
    let server = MockServer::new();
    server.fail_sql(
        "select * from unknown_table",
        DriverError::new(1146, "Table 'unknown_table' doesn't exist"),
    );
    let mut exec = connected_executor(&server);

    let mut res = SqlResults::<RawRows>::new();
    assert!(!query_raw(&mut exec, &mut res, "select * from unknown_table", &[]));
    assert_eq!(res.error_code(), 1146);
    assert!(res.error_message().contains("unknown_table"));
}

#[test]
fn dead_session_reconnects_before_the_statement_runs() {
    let server = MockServer::new();
    let sql = "select id from users";
    server.on_prepared(
        sql,
        vec![ColumnMeta::new("id", FieldType::Long)],
        vec![vec![MockCell::Int(1)]],
    );
    let mut exec = connected_executor(&server);

    // Break the connection; the next query must transparently reconnect.
    server.fail_pings(1);

    let mut res = SqlResults::<(i32,)>::new();
    assert!(query_typed(&mut exec, &mut res, sql, &[]));
    assert!(res.ok());
    assert!(exec.is_connected());
}

#[test]
fn unreachable_server_surfaces_connection_error() {
    let server = MockServer::new();
    let mut exec = connected_executor(&server);

    server.fail_pings(1);
    server.fail_connects(u32::MAX);

    let mut res = SqlResults::<Exec>::new();
    assert!(!execute_only(&mut exec, &mut res, "delete from t", &[]));
    assert!(!res.ok());
    assert_eq!(res.error_code(), 2003);
}
