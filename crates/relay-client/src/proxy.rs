//! The MySQL service proxy.
//!
//! Entry points come in blocking and future-returning shapes. Blocking
//! driver work always runs on the worker pool; the sync path parks on a
//! rendezvous channel, the async path completes a oneshot. Errors never
//! unwind across the worker boundary: they travel inside the results and
//! surface as a [`Status`] on the context or a [`ClientError`] in the
//! future.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::oneshot;

use relay_core::codes;
use relay_core::config::{ClientConf, NodeAddr};
use relay_core::param::SqlParam;
use relay_core::results::{Exec, ResultMode, SqlResults};
use relay_executor::driver::DriverFactory;
use relay_executor::Fetchable;
use relay_pool::{PoolManager, PoolOption};

use crate::context::{ClientContext, ClientError, Status};
use crate::filter::{FilterChain, FilterPoint, FilterStatus};
use crate::transaction::{TransactionHandle, TxHandle, TxState};
use crate::workers::{WorkerPool, WorkerPoolOption};

/// Endpoint selection when the context does not pin a target.
pub trait Selector: Send + Sync {
    fn select(&self, service_name: &str) -> Option<NodeAddr>;
}

/// Service-level proxy settings. Pool bounds live here; authentication
/// and worker sizing come from [`ClientConf`].
#[derive(Debug, Clone)]
pub struct ProxyOption {
    pub service_name: String,
    /// Pool-wide session bound per endpoint.
    pub max_size: u32,
    /// Idle eviction age, in milliseconds. Zero disables expiry.
    pub max_idle_time_ms: u64,
    /// Default call timeout applied to contexts without a deadline.
    /// Zero leaves calls unbounded.
    pub timeout_ms: u64,
}

impl Default for ProxyOption {
    fn default() -> Self {
        Self {
            service_name: "mysql".to_string(),
            max_size: 64,
            max_idle_time_ms: 50_000,
            timeout_ms: 0,
        }
    }
}

/// Where a call's session comes from: the endpoint's pool, or the session
/// pinned by a transaction handle.
enum Target {
    Pool(NodeAddr),
    Pinned(TxHandle),
}

/// What a worker task reports back.
struct TaskReply<T: ResultMode> {
    results: SqlResults<T>,
    /// Set when the acquired session was not connected; carries the
    /// session's error code and message.
    connect_error: Option<(i32, String)>,
}

pub struct MysqlProxy {
    option: ProxyOption,
    conf: RwLock<ClientConf>,
    factory: DriverFactory,
    workers: RwLock<Arc<WorkerPool>>,
    manager: RwLock<Arc<PoolManager>>,
    filters: FilterChain,
    selector: RwLock<Option<Arc<dyn Selector>>>,
}

impl MysqlProxy {
    /// Build the proxy: worker pool first, then the pool manager.
    pub fn new(option: ProxyOption, conf: ClientConf, factory: DriverFactory) -> Self {
        conf.display();
        let workers = Arc::new(Self::build_workers(&conf));
        let manager = Arc::new(Self::build_manager(&option, &conf, &factory));
        Self {
            option,
            conf: RwLock::new(conf),
            factory,
            workers: RwLock::new(workers),
            manager: RwLock::new(manager),
            filters: FilterChain::new(),
            selector: RwLock::new(None),
        }
    }

    fn build_workers(conf: &ClientConf) -> WorkerPool {
        WorkerPool::new(WorkerPoolOption {
            thread_num: conf.thread_num,
            bind_core: conf.thread_bind_core.clone(),
        })
    }

    fn build_manager(option: &ProxyOption, conf: &ClientConf, factory: &DriverFactory) -> PoolManager {
        PoolManager::new(
            PoolOption {
                max_size: option.max_size,
                max_idle_time_ms: option.max_idle_time_ms,
                num_shard_group: conf.num_shard_group,
                username: conf.user_name.clone(),
                password: conf.password.clone(),
                dbname: conf.dbname.clone(),
                char_set: conf.char_set.clone(),
            },
            Arc::clone(factory),
        )
    }

    pub fn add_filter(&mut self, filter: Arc<dyn crate::filter::Filter>) {
        self.filters.add(filter);
    }

    pub fn client_conf(&self) -> ClientConf {
        self.conf.read().clone()
    }

    pub fn set_selector(&self, selector: Arc<dyn Selector>) {
        *self.selector.write() = Some(selector);
    }

    /// Replace the client configuration at runtime. Tears down and reboots
    /// the worker pool and the pool manager.
    pub fn set_client_conf(&self, conf: ClientConf) {
        conf.display();

        let old_workers = Arc::clone(&self.workers.read());
        old_workers.stop();
        old_workers.join();

        let old_manager = Arc::clone(&self.manager.read());
        old_manager.stop();
        old_manager.destroy();

        *self.workers.write() = Arc::new(Self::build_workers(&conf));
        *self.manager.write() = Arc::new(Self::build_manager(&self.option, &conf, &self.factory));
        *self.conf.write() = conf;
    }

    /// Stop accepting work: worker pool first, then the pools.
    pub fn stop(&self) {
        self.workers.read().stop();
        self.manager.read().stop();
    }

    /// Tear everything down. Call after [`stop`](MysqlProxy::stop).
    pub fn destroy(&self) {
        self.workers.read().join();
        self.manager.read().destroy();
    }

    // ---- sync entry points ----

    /// Run a query and fill `results` with the declared output shape.
    ///
    /// The returned [`Status`] and the error fields inside the results are
    /// independent: a MySQL-level error lands in both, a framework-level
    /// failure (timeout, rejection) only in the status.
    pub fn query<T: Fetchable>(
        &self,
        ctx: &mut ClientContext,
        results: &mut SqlResults<T>,
        sql: &str,
        params: &[SqlParam],
    ) -> Status {
        self.fill_context(ctx);

        if self.filters.run(FilterPoint::PreRpcInvoke, ctx) == FilterStatus::Reject {
            tracing::error!(service = %self.option.service_name, "pre-invoke filter rejected the call");
        } else if let Some(addr) = self.resolve_target(ctx) {
            *results =
                self.unary_invoke(ctx, Target::Pool(addr), results.option().clone(), sql, params);
        }

        self.filters.run(FilterPoint::PostRpcInvoke, ctx);
        ctx.status().clone()
    }

    /// Alias of [`query`](MysqlProxy::query) for statements without a
    /// result set.
    pub fn execute<T: Fetchable>(
        &self,
        ctx: &mut ClientContext,
        results: &mut SqlResults<T>,
        sql: &str,
        params: &[SqlParam],
    ) -> Status {
        self.query(ctx, results, sql, params)
    }

    /// Run a query on the session pinned by `handle`.
    pub fn tx_query<T: Fetchable>(
        &self,
        ctx: &mut ClientContext,
        handle: &TxHandle,
        results: &mut SqlResults<T>,
        sql: &str,
        params: &[SqlParam],
    ) -> Status {
        self.fill_context(ctx);

        if self.filters.run(FilterPoint::PreRpcInvoke, ctx) == FilterStatus::Reject {
            tracing::error!(service = %self.option.service_name, "pre-invoke filter rejected the call");
        } else if let Some(status) = self.tx_handle_error(handle) {
            ctx.set_status(status);
        } else {
            *results = self.unary_invoke(
                ctx,
                Target::Pinned(Arc::clone(handle)),
                results.option().clone(),
                sql,
                params,
            );
        }

        self.filters.run(FilterPoint::PostRpcInvoke, ctx);
        ctx.status().clone()
    }

    /// Alias of [`tx_query`](MysqlProxy::tx_query).
    pub fn tx_execute<T: Fetchable>(
        &self,
        ctx: &mut ClientContext,
        handle: &TxHandle,
        results: &mut SqlResults<T>,
        sql: &str,
        params: &[SqlParam],
    ) -> Status {
        self.tx_query(ctx, handle, results, sql, params)
    }

    /// Start a transaction: acquire a session, run `begin` on it, and pin
    /// it to the returned handle. `None` when anything failed; the reason
    /// is on the context status.
    pub fn begin(&self, ctx: &mut ClientContext) -> Option<TxHandle> {
        self.fill_context(ctx);

        if self.filters.run(FilterPoint::PreRpcInvoke, ctx) == FilterStatus::Reject {
            tracing::error!(service = %self.option.service_name, "pre-invoke filter rejected the call");
            self.filters.run(FilterPoint::PostRpcInvoke, ctx);
            return None;
        }

        let handle = match self.resolve_target(ctx) {
            Some(addr) => self.pin_fresh_session(ctx, &addr),
            None => None,
        };

        let handle = match handle {
            Some(handle) => handle,
            None => {
                self.filters.run(FilterPoint::PostRpcInvoke, ctx);
                return None;
            }
        };

        let results = self.unary_invoke::<Exec>(
            ctx,
            Target::Pinned(Arc::clone(&handle)),
            Default::default(),
            "begin",
            &[],
        );

        let handle = if ctx.status().is_ok() && results.ok() {
            handle.set_state(TxState::Started);
            Some(handle)
        } else {
            // The pinned session never entered the transaction; close it
            // rather than return it dirty.
            self.release_handle(&handle, -1);
            None
        };

        self.filters.run(FilterPoint::PostRpcInvoke, ctx);
        handle
    }

    /// Commit and reclaim the pinned session.
    pub fn commit(&self, ctx: &mut ClientContext, handle: &TxHandle) -> Status {
        let mut results = SqlResults::<Exec>::new();
        self.tx_execute(ctx, handle, &mut results, "commit", &[]);
        if ctx.status().is_ok() && results.ok() {
            self.end_transaction(handle, false);
        }
        ctx.status().clone()
    }

    /// Roll back and reclaim the pinned session.
    pub fn rollback(&self, ctx: &mut ClientContext, handle: &TxHandle) -> Status {
        let mut results = SqlResults::<Exec>::new();
        self.tx_execute(ctx, handle, &mut results, "rollback", &[]);
        if ctx.status().is_ok() && results.ok() {
            self.end_transaction(handle, true);
        }
        ctx.status().clone()
    }

    // ---- async entry points ----

    /// Future-returning shape of [`query`](MysqlProxy::query).
    pub async fn async_query<T: Fetchable>(
        &self,
        ctx: &mut ClientContext,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<SqlResults<T>, ClientError> {
        self.fill_context(ctx);

        if self.filters.run(FilterPoint::PreRpcInvoke, ctx) == FilterStatus::Reject {
            tracing::error!(service = %self.option.service_name, "pre-invoke filter rejected the call");
            let error = ClientError::from(ctx.status());
            self.filters.run(FilterPoint::PostRpcInvoke, ctx);
            return Err(error);
        }

        let outcome = match self.resolve_target(ctx) {
            Some(addr) => self.async_unary_invoke(ctx, Target::Pool(addr), sql, params).await,
            None => Err(ClientError::from(ctx.status())),
        };

        self.filters.run(FilterPoint::PostRpcInvoke, ctx);
        outcome
    }

    /// Future-returning shape of [`execute`](MysqlProxy::execute).
    pub async fn async_execute<T: Fetchable>(
        &self,
        ctx: &mut ClientContext,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<SqlResults<T>, ClientError> {
        self.async_query(ctx, sql, params).await
    }

    /// Future-returning shape of [`tx_query`](MysqlProxy::tx_query).
    pub async fn async_tx_query<T: Fetchable>(
        &self,
        ctx: &mut ClientContext,
        handle: &TxHandle,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<SqlResults<T>, ClientError> {
        self.fill_context(ctx);

        if self.filters.run(FilterPoint::PreRpcInvoke, ctx) == FilterStatus::Reject {
            tracing::error!(service = %self.option.service_name, "pre-invoke filter rejected the call");
            let error = ClientError::from(ctx.status());
            self.filters.run(FilterPoint::PostRpcInvoke, ctx);
            return Err(error);
        }

        if let Some(status) = self.tx_handle_error(handle) {
            ctx.set_status(status.clone());
            self.filters.run(FilterPoint::PostRpcInvoke, ctx);
            return Err(ClientError::from(&status));
        }

        let outcome = self
            .async_unary_invoke(ctx, Target::Pinned(Arc::clone(handle)), sql, params)
            .await;

        self.filters.run(FilterPoint::PostRpcInvoke, ctx);
        outcome
    }

    /// Future-returning shape of [`tx_execute`](MysqlProxy::tx_execute).
    pub async fn async_tx_execute<T: Fetchable>(
        &self,
        ctx: &mut ClientContext,
        handle: &TxHandle,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<SqlResults<T>, ClientError> {
        self.async_tx_query(ctx, handle, sql, params).await
    }

    /// Future-returning shape of [`begin`](MysqlProxy::begin).
    pub async fn async_begin(&self, ctx: &mut ClientContext) -> Result<TxHandle, ClientError> {
        self.fill_context(ctx);

        if self.filters.run(FilterPoint::PreRpcInvoke, ctx) == FilterStatus::Reject {
            tracing::error!(service = %self.option.service_name, "pre-invoke filter rejected the call");
            let error = ClientError::from(ctx.status());
            self.filters.run(FilterPoint::PostRpcInvoke, ctx);
            return Err(error);
        }

        let pinned = self
            .resolve_target(ctx)
            .and_then(|addr| self.pin_fresh_session(ctx, &addr));
        let handle = match pinned {
            Some(handle) => handle,
            None => {
                let error = ClientError::from(ctx.status());
                self.filters.run(FilterPoint::PostRpcInvoke, ctx);
                return Err(error);
            }
        };

        let outcome = self
            .async_unary_invoke::<Exec>(ctx, Target::Pinned(Arc::clone(&handle)), "begin", &[])
            .await;

        let outcome = match outcome {
            Ok(_) => {
                handle.set_state(TxState::Started);
                Ok(handle)
            }
            Err(error) => {
                self.release_handle(&handle, -1);
                Err(error)
            }
        };

        self.filters.run(FilterPoint::PostRpcInvoke, ctx);
        outcome
    }

    /// Future-returning shape of [`commit`](MysqlProxy::commit).
    pub async fn async_commit(
        &self,
        ctx: &mut ClientContext,
        handle: &TxHandle,
    ) -> Result<(), ClientError> {
        self.async_tx_query::<Exec>(ctx, handle, "commit", &[]).await?;
        self.end_transaction(handle, false);
        Ok(())
    }

    /// Future-returning shape of [`rollback`](MysqlProxy::rollback).
    pub async fn async_rollback(
        &self,
        ctx: &mut ClientContext,
        handle: &TxHandle,
    ) -> Result<(), ClientError> {
        self.async_tx_query::<Exec>(ctx, handle, "rollback", &[]).await?;
        self.end_transaction(handle, true);
        Ok(())
    }

    // ---- internals ----

    fn fill_context(&self, ctx: &mut ClientContext) {
        if ctx.service_name().is_empty() {
            ctx.set_service_name(self.option.service_name.clone());
        }
        if !ctx.has_deadline() && self.option.timeout_ms > 0 {
            ctx.set_timeout(std::time::Duration::from_millis(self.option.timeout_ms));
        }
    }

    /// The endpoint for this call: the context's target when set,
    /// otherwise whatever the selector picks.
    fn resolve_target(&self, ctx: &mut ClientContext) -> Option<NodeAddr> {
        if !ctx.ip().is_empty() {
            return Some(ctx.node_addr());
        }

        let selector = self.selector.read().clone();
        match selector.and_then(|s| s.select(ctx.service_name())) {
            Some(addr) => Some(addr),
            None => {
                tracing::error!(service = %ctx.service_name(), "endpoint selection failed");
                ctx.set_status(Status::error(
                    codes::CLIENT_CONNECT_ERROR,
                    "no target endpoint available",
                ));
                None
            }
        }
    }

    /// Why a transaction handle cannot run a statement, if anything.
    fn tx_handle_error(&self, handle: &TxHandle) -> Option<Status> {
        if handle.state() != TxState::Started {
            tracing::error!(
                service = %self.option.service_name,
                state = ?handle.state(),
                "statement on a transaction that is not started"
            );
            return Some(Status::error(
                codes::INVALID_TX_HANDLE,
                format!("invalid transaction state: {:?}", handle.state()),
            ));
        }

        if !handle.check_alive() {
            // The server rolls the transaction back when the connection
            // dies; reflect that in the handle and retire the session.
            tracing::error!(
                service = %self.option.service_name,
                "transaction connection lost"
            );
            handle.set_state(TxState::RolledBack);
            self.release_handle(handle, -1);
            return Some(Status::error(
                codes::CLIENT_CONNECT_ERROR,
                "connection lost, transaction rolled back",
            ));
        }

        None
    }

    /// Acquire a session for a new transaction and pin it to a fresh
    /// handle. On connect failure the session error lands on the context.
    fn pin_fresh_session(&self, ctx: &mut ClientContext, addr: &NodeAddr) -> Option<TxHandle> {
        let manager = Arc::clone(&self.manager.read());
        let pool = manager.get(addr);
        let executor = pool.get();

        if !executor.is_connected() {
            let message = format!(
                "service name:{}, connection failed. {}",
                self.option.service_name,
                executor.error_message()
            );
            tracing::error!("{message}");
            let code = match executor.error_code() {
                0 => codes::DB_CONNECTION_ERROR,
                code => code,
            };
            ctx.set_status(Status::error(code, message));
            return None;
        }

        let handle = TransactionHandle::new();
        handle.set_executor(executor);
        Some(handle)
    }

    /// Detach the pinned session and hand it back to its pool with the
    /// given return code.
    fn release_handle(&self, handle: &TxHandle, ret: i32) {
        if let Some(executor) = handle.take_executor() {
            let addr = NodeAddr::new(executor.ip().to_string(), executor.port());
            let manager = Arc::clone(&self.manager.read());
            manager.get(&addr).reclaim(ret, executor);
        }
    }

    /// Terminate the transaction and reclaim its session.
    fn end_transaction(&self, handle: &TxHandle, rollback: bool) {
        handle.set_state(if rollback {
            TxState::RolledBack
        } else {
            TxState::Committed
        });
        self.release_handle(handle, 0);
    }

    /// Deadline gate; on expiry the status is set and the pool untouched.
    fn check_timeout(&self, ctx: &mut ClientContext) -> bool {
        if ctx.deadline_exceeded() {
            ctx.set_status(Status::error(
                codes::CLIENT_INVOKE_TIMEOUT,
                "request deadline exceeded",
            ));
            return true;
        }
        false
    }

    /// The worker task shared by every call shape: acquire (or reuse) the
    /// session, run the statement, reclaim when not pinned.
    fn run_on_worker<T: Fetchable>(
        target: Target,
        manager: Arc<PoolManager>,
        option: relay_core::results::ResultsOption,
        sql: String,
        params: Vec<SqlParam>,
    ) -> TaskReply<T> {
        let mut results = SqlResults::<T>::with_option(option);

        match target {
            Target::Pool(addr) => {
                let pool = manager.get(&addr);
                let mut executor = pool.get();
                if !executor.is_connected() {
                    let reply = TaskReply {
                        connect_error: Some((
                            match executor.error_code() {
                                0 => codes::DB_CONNECTION_ERROR,
                                code => code,
                            },
                            executor.error_message(),
                        )),
                        results,
                    };
                    pool.reclaim(-1, executor);
                    return reply;
                }

                T::run(&mut executor, &mut results, &sql, &params);
                pool.reclaim(0, executor);
            }
            Target::Pinned(handle) => {
                let ran = handle.with_executor(|executor| {
                    T::run(executor, &mut results, &sql, &params);
                });
                if ran.is_none() {
                    results.set_error(
                        codes::INVALID_TX_HANDLE,
                        "transaction handle has no pinned session",
                    );
                }
            }
        }

        TaskReply {
            results,
            connect_error: None,
        }
    }

    /// Blocking dispatch: submit to the worker pool and park on a
    /// rendezvous channel until the task signals completion.
    fn unary_invoke<T: Fetchable>(
        &self,
        ctx: &mut ClientContext,
        target: Target,
        option: relay_core::results::ResultsOption,
        sql: &str,
        params: &[SqlParam],
    ) -> SqlResults<T> {
        let results = SqlResults::<T>::with_option(option.clone());

        if self.check_timeout(ctx) {
            return results;
        }

        if self.filters.run(FilterPoint::PreSendMsg, ctx) == FilterStatus::Reject {
            self.filters.run(FilterPoint::PostRecvMsg, ctx);
            return results;
        }

        if self.check_timeout(ctx) {
            return results;
        }

        let manager = Arc::clone(&self.manager.read());
        let workers = Arc::clone(&self.workers.read());
        let (reply_tx, reply_rx) = std::sync::mpsc::sync_channel::<TaskReply<T>>(1);
        let sql = sql.to_string();
        let params = params.to_vec();

        let submitted = workers.spawn(move || {
            let reply = Self::run_on_worker::<T>(target, manager, option, sql, params);
            let _ = reply_tx.send(reply);
        });

        if !submitted {
            ctx.set_status(Status::error(
                codes::CLIENT_CONNECT_ERROR,
                "worker pool is stopped",
            ));
            return results;
        }

        let reply = match reply_rx.recv() {
            Ok(reply) => reply,
            Err(_) => {
                ctx.set_status(Status::error(
                    codes::CLIENT_CONNECT_ERROR,
                    "worker task was dropped",
                ));
                return results;
            }
        };

        self.apply_reply_status(ctx, &reply);
        self.filters.run(FilterPoint::PostRecvMsg, ctx);
        reply.results
    }

    /// Future-returning dispatch: identical up to the worker task, which
    /// completes a oneshot instead of a rendezvous channel.
    async fn async_unary_invoke<T: Fetchable>(
        &self,
        ctx: &mut ClientContext,
        target: Target,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<SqlResults<T>, ClientError> {
        if self.check_timeout(ctx) {
            self.filters.run(FilterPoint::PostRecvMsg, ctx);
            return Err(ClientError::from(ctx.status()));
        }

        if self.filters.run(FilterPoint::PreSendMsg, ctx) == FilterStatus::Reject {
            self.filters.run(FilterPoint::PostRecvMsg, ctx);
            return Err(ClientError::from(ctx.status()));
        }

        let manager = Arc::clone(&self.manager.read());
        let workers = Arc::clone(&self.workers.read());
        let (reply_tx, reply_rx) = oneshot::channel::<TaskReply<T>>();
        let sql = sql.to_string();
        let params = params.to_vec();

        let submitted = workers.spawn(move || {
            let reply = Self::run_on_worker::<T>(target, manager, Default::default(), sql, params);
            let _ = reply_tx.send(reply);
        });

        if !submitted {
            let status = Status::error(codes::CLIENT_CONNECT_ERROR, "worker pool is stopped");
            ctx.set_status(status.clone());
            self.filters.run(FilterPoint::PostRecvMsg, ctx);
            return Err(ClientError::from(&status));
        }

        let reply = match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => {
                let status = Status::error(codes::CLIENT_CONNECT_ERROR, "worker task was dropped");
                ctx.set_status(status.clone());
                self.filters.run(FilterPoint::PostRecvMsg, ctx);
                return Err(ClientError::from(&status));
            }
        };

        self.apply_reply_status(ctx, &reply);
        self.filters.run(FilterPoint::PostRecvMsg, ctx);

        if !ctx.status().is_ok() {
            return Err(ClientError::from(ctx.status()));
        }
        if !reply.results.ok() {
            return Err(ClientError::new(
                reply.results.error_code(),
                reply.results.error_message().to_string(),
            ));
        }
        Ok(reply.results)
    }

    /// Copy a task's error, if any, into the context status.
    fn apply_reply_status<T: ResultMode>(&self, ctx: &mut ClientContext, reply: &TaskReply<T>) {
        if let Some((code, message)) = &reply.connect_error {
            let message = format!(
                "service name:{}, connection failed. {}",
                self.option.service_name, message
            );
            tracing::error!("{message}");
            ctx.set_status(Status::error(*code, message));
        } else if !reply.results.ok() {
            ctx.set_status(Status::error(
                reply.results.error_code(),
                reply.results.error_message().to_string(),
            ));
        }
    }
}

impl Drop for MysqlProxy {
    fn drop(&mut self) {
        self.workers.read().stop();
    }
}
