//! Blocking proxy dispatch against the in-memory driver.

use std::sync::Arc;

use relay_core::codes;
use relay_core::config::{ClientConf, NodeAddr};
use relay_core::field::{ColumnMeta, FieldType};
use relay_core::params;
use relay_core::results::{Exec, RawRows, SqlResults};

use relay_executor::driver::mock::{MockCell, MockServer};

use relay_client::{
    init_plugin, ClientContext, Filter, FilterPoint, FilterStatus, MysqlProxy, ProxyOption,
    Selector, Status,
};

fn test_conf() -> ClientConf {
    ClientConf {
        user_name: "tester".to_string(),
        dbname: "testdb".to_string(),
        thread_num: 2,
        num_shard_group: 1,
        ..ClientConf::default()
    }
}

fn proxy_with(server: &MockServer) -> MysqlProxy {
    init_plugin();
    MysqlProxy::new(ProxyOption::default(), test_conf(), server.factory())
}

fn target_ctx() -> ClientContext {
    let mut ctx = ClientContext::new();
    ctx.set_target("127.0.0.1", 3306);
    ctx
}

#[test]
fn typed_query_round_trip_through_the_pool() {
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
    let proxy = proxy_with(&server);

    let mut ctx = target_ctx();
    let mut res = SqlResults::<(i32, String)>::new();
    let status = proxy.query(&mut ctx, &mut res, sql, &params![3, "carol"]);

    assert!(status.is_ok(), "status: {status}");
    assert!(res.ok());
    assert_eq!(res.rows()[0], (3, "carol".to_string()));

    // A second call on the same endpoint reuses the pooled session.
    let mut ctx = target_ctx();
    let mut res = SqlResults::<(i32, String)>::new();
    assert!(proxy.query(&mut ctx, &mut res, sql, &params![3, "carol"]).is_ok());
    assert_eq!(server.connections_opened(), 1);

    proxy.stop();
    proxy.destroy();
}

#[test]
fn mysql_error_lands_in_results_and_status() {
    let server = MockServer::new();
    server.fail_sql(
        "select * from unknown_table",
        relay_executor::DriverError::new(1146, "Table 'unknown_table' doesn't exist"),
    );
    let proxy = proxy_with(&server);

    let mut ctx = target_ctx();
    let mut res = SqlResults::<RawRows>::new();
    let status = proxy.query(&mut ctx, &mut res, "select * from unknown_table", &[]);

    assert_eq!(res.error_code(), 1146);
    assert_eq!(status.code(), 1146);
    assert!(status.message().contains("unknown_table"));
}

#[test]
fn connect_failure_surfaces_session_error_in_status() {
    let server = MockServer::new();
    server.fail_connects(u32::MAX);
    let proxy = proxy_with(&server);

    let mut ctx = target_ctx();
    let mut res = SqlResults::<Exec>::new();
    let status = proxy.query(&mut ctx, &mut res, "delete from t", &[]);

    assert!(!status.is_ok());
    assert_eq!(status.code(), 2003);
    assert!(status.message().contains("connection failed"));
    // No statement ever ran.
    assert!(server.journal().is_empty());
}

struct RejectPreInvoke;

impl Filter for RejectPreInvoke {
    fn run(&self, point: FilterPoint, ctx: &mut ClientContext) -> FilterStatus {
        if point == FilterPoint::PreRpcInvoke {
            ctx.set_status(Status::error(1, "blocked by policy"));
            return FilterStatus::Reject;
        }
        FilterStatus::Continue
    }
}

#[test]
fn rejected_filter_short_circuits_dispatch() {
    let server = MockServer::new();
    init_plugin();
    let mut proxy = MysqlProxy::new(ProxyOption::default(), test_conf(), server.factory());
    proxy.add_filter(Arc::new(RejectPreInvoke));

    let mut ctx = target_ctx();
    let mut res = SqlResults::<Exec>::new();
    let status = proxy.query(&mut ctx, &mut res, "delete from t", &[]);

    assert_eq!(status.code(), 1);
    assert!(server.journal().is_empty());
    assert_eq!(server.connections_opened(), 0);
}

#[test]
fn expired_deadline_returns_timeout_without_touching_the_pool() {
    let server = MockServer::new();
    let proxy = proxy_with(&server);

    let mut ctx = target_ctx();
    ctx.set_timeout(std::time::Duration::from_millis(0));
    std::thread::sleep(std::time::Duration::from_millis(2));

    let mut res = SqlResults::<Exec>::new();
    let status = proxy.query(&mut ctx, &mut res, "delete from t", &[]);

    assert_eq!(status.code(), codes::CLIENT_INVOKE_TIMEOUT);
    assert_eq!(server.connections_opened(), 0);
}

struct FixedSelector(NodeAddr);

impl Selector for FixedSelector {
    fn select(&self, _service_name: &str) -> Option<NodeAddr> {
        Some(self.0.clone())
    }
}

#[test]
fn empty_target_consults_the_selector() {
    let server = MockServer::new();
    server.on_exec("delete from sessions", 2);
    let proxy = proxy_with(&server);
    proxy.set_selector(Arc::new(FixedSelector(NodeAddr::new("10.9.9.9", 3306))));

    let mut ctx = ClientContext::new();
    let mut res = SqlResults::<Exec>::new();
    let status = proxy.query(&mut ctx, &mut res, "delete from sessions", &[]);

    assert!(status.is_ok(), "status: {status}");
    assert_eq!(res.affected_rows(), 2);
}

#[test]
fn missing_selector_and_target_is_a_connect_error() {
    let server = MockServer::new();
    let proxy = proxy_with(&server);

    let mut ctx = ClientContext::new();
    let mut res = SqlResults::<Exec>::new();
    let status = proxy.query(&mut ctx, &mut res, "delete from t", &[]);

    assert_eq!(status.code(), codes::CLIENT_CONNECT_ERROR);
}

#[test]
fn stopped_proxy_refuses_new_work() {
    let server = MockServer::new();
    let proxy = proxy_with(&server);
    proxy.stop();
    proxy.destroy();

    let mut ctx = target_ctx();
    let mut res = SqlResults::<Exec>::new();
    let status = proxy.query(&mut ctx, &mut res, "delete from t", &[]);
    assert_eq!(status.code(), codes::CLIENT_CONNECT_ERROR);
}

#[test]
fn runtime_reconfiguration_reboots_the_stack() {
    let server = MockServer::new();
    server.on_exec("delete from t", 1);
    let proxy = proxy_with(&server);

    let mut ctx = target_ctx();
    let mut res = SqlResults::<Exec>::new();
    assert!(proxy.query(&mut ctx, &mut res, "delete from t", &[]).is_ok());

    let mut conf = test_conf();
    conf.thread_num = 1;
    proxy.set_client_conf(conf);
    assert_eq!(proxy.client_conf().thread_num, 1);

    // The rebooted worker pool still dispatches.
    let mut ctx = target_ctx();
    let mut res = SqlResults::<Exec>::new();
    assert!(proxy.query(&mut ctx, &mut res, "delete from t", &[]).is_ok());
    assert_eq!(res.affected_rows(), 1);
}
