//! Future-returning proxy shapes.

use relay_core::config::ClientConf;
use relay_core::field::{ColumnMeta, FieldType};
use relay_core::params;
use relay_core::results::{RawRows, SqlResults};

use relay_executor::driver::mock::{MockCell, MockServer};
use relay_executor::DriverError;

use relay_client::{init_plugin, ClientContext, MysqlProxy, ProxyOption, TxState};

fn proxy_with(server: &MockServer) -> MysqlProxy {
    init_plugin();
    let conf = ClientConf {
        thread_num: 2,
        num_shard_group: 1,
        ..ClientConf::default()
    };
    MysqlProxy::new(ProxyOption::default(), conf, server.factory())
}

fn target_ctx() -> ClientContext {
    let mut ctx = ClientContext::new();
    ctx.set_target("127.0.0.1", 3306);
    ctx
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_query_resolves_with_typed_rows() {
    let server = MockServer::new();
    let sql = "select id, username from users where id = ?";
    server.on_prepared(
        sql,
        vec![
            ColumnMeta::new("id", FieldType::Long),
            ColumnMeta::new("username", FieldType::VarString),
        ],
        vec![vec![MockCell::Int(3), MockCell::Text("carol".to_string())]],
    );
    let proxy = proxy_with(&server);

    let mut ctx = target_ctx();
    let res = proxy
        .async_query::<(i32, String)>(&mut ctx, sql, &params![3])
        .await
        .expect("query succeeds");

    assert_eq!(res.rows()[0], (3, "carol".to_string()));
    assert!(ctx.status().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_error_carries_code_and_message() {
    let server = MockServer::new();
    server.fail_sql(
        "select * from unknown_table",
        DriverError::new(1146, "Table 'unknown_table' doesn't exist"),
    );
    let proxy = proxy_with(&server);

    let mut ctx = target_ctx();
    let error = proxy
        .async_query::<RawRows>(&mut ctx, "select * from unknown_table", &[])
        .await
        .expect_err("query fails");

    assert_eq!(error.code, 1146);
    assert!(error.message.contains("unknown_table"));
    assert_eq!(ctx.status().code(), 1146);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_statement_in_async_transaction_chains_into_rollback() {
    let server = MockServer::new();
    let update = "update users set age = age + 1 where username = 'jack'";
    server.on_exec(update, 1);
    server.fail_sql(
        "select * from unknown_table",
        DriverError::new(1146, "Table 'unknown_table' doesn't exist"),
    );
    let proxy = proxy_with(&server);

    let mut ctx = target_ctx();
    let handle = proxy.async_begin(&mut ctx).await.expect("begin succeeds");
    assert_eq!(handle.state(), TxState::Started);

    let mut ctx = target_ctx();
    proxy
        .async_tx_execute::<relay_core::results::Exec>(&mut ctx, &handle, update, &[])
        .await
        .expect("update succeeds");

    let mut ctx = target_ctx();
    let error = proxy
        .async_tx_query::<RawRows>(&mut ctx, &handle, "select * from unknown_table", &[])
        .await
        .expect_err("select on a missing table fails");
    assert_eq!(error.code, 1146);

    // The failure was a statement error, not a lost connection: the
    // transaction is still open and must be rolled back explicitly.
    assert_eq!(handle.state(), TxState::Started);
    let mut ctx = target_ctx();
    proxy
        .async_rollback(&mut ctx, &handle)
        .await
        .expect("rollback succeeds");

    assert_eq!(handle.state(), TxState::RolledBack);
    assert!(!handle.has_executor());
    assert_eq!(
        server.journal(),
        vec![
            "begin",
            update,
            "select * from unknown_table",
            "rollback"
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_begin_fails_when_the_server_is_down() {
    let server = MockServer::new();
    server.fail_connects(u32::MAX);
    let proxy = proxy_with(&server);

    let mut ctx = target_ctx();
    let error = proxy.async_begin(&mut ctx).await.expect_err("begin fails");
    assert_eq!(error.code, 2003);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_commit_reclaims_the_session_for_reuse() {
    let server = MockServer::new();
    let proxy = proxy_with(&server);

    let mut ctx = target_ctx();
    let handle = proxy.async_begin(&mut ctx).await.expect("begin succeeds");

    let mut ctx = target_ctx();
    proxy
        .async_commit(&mut ctx, &handle)
        .await
        .expect("commit succeeds");
    assert_eq!(handle.state(), TxState::Committed);

    // Reuse the reclaimed session on the plain path.
    server.on_exec("delete from t", 1);
    let mut ctx = target_ctx();
    let res = proxy
        .async_execute::<relay_core::results::Exec>(&mut ctx, "delete from t", &[])
        .await
        .expect("execute succeeds");
    assert_eq!(res.affected_rows(), 1);
    assert_eq!(server.connections_opened(), 1);
}
