//! Client layer for mysql-relay.
//!
//! [`MysqlProxy`] multiplexes blocking and future-returning MySQL calls
//! over a sharded session pool. Blocking driver work runs on a dedicated
//! worker thread pool; transactions pin one session through a refcounted
//! [`TransactionHandle`].

pub mod context;
pub mod filter;
pub mod plugin;
pub mod proxy;
pub mod transaction;
pub mod workers;

pub use context::{ClientContext, ClientError, Status};
pub use filter::{Filter, FilterChain, FilterPoint, FilterStatus};
pub use plugin::init_plugin;
pub use proxy::{MysqlProxy, ProxyOption, Selector};
pub use transaction::{TransactionHandle, TxHandle, TxState};
pub use workers::{WorkerPool, WorkerPoolOption};
