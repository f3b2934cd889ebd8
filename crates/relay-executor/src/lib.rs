//! Session layer for mysql-relay.
//!
//! Wraps one driver connection ([`Executor`]) with connect / ping /
//! reconnect lifecycle, prepared statements ([`Statement`]), typed and raw
//! fetch loops ([`Fetchable`]), and the text-protocol formatter. The wire
//! protocol itself stays behind the [`driver::Driver`] capability.

pub mod driver;
pub mod executor;
pub mod formatter;
pub mod query;
pub mod statement;

pub use driver::{Driver, DriverError, DriverFactory, FetchOutcome, StmtHandle, TextRowSet};
pub use executor::Executor;
pub use query::Fetchable;
pub use statement::Statement;
