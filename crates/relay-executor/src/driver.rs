//! The narrow capability the native MySQL client library must provide.
//!
//! The session layer owns lifecycle and semantics *around* the wire
//! protocol; the protocol itself stays behind this trait. Production
//! deployments plug in a native-library-backed implementation through a
//! [`DriverFactory`]; the test-suite plugs in [`mock`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use relay_core::bind::OutputSlot;
use relay_core::config::ConnOption;
use relay_core::field::ColumnMeta;
use relay_core::param::SqlParam;

pub mod mock;

/// A driver-level error: MySQL numeric code plus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mysql error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for DriverError {}

/// Opaque prepared-statement handle, valid until `stmt_close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtHandle(pub u64);

/// One fetch step of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A row was fetched into the output slots.
    Row,
    /// A row was fetched but at least one variable-length cell exceeded
    /// its buffer; `OutputSlot::length` carries the real size.
    Truncated,
    /// The result set is exhausted.
    NoData,
    /// The fetch failed.
    Err(DriverError),
}

/// A text-protocol result set. Cells are reference-counted byte views;
/// NULL cells are `None`.
#[derive(Debug, Clone, Default)]
pub struct TextRowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<Bytes>>>,
}

/// The session capability of the native client library.
///
/// Handle-based like the C API it stands in for: statements are addressed
/// by [`StmtHandle`] and must be closed explicitly.
pub trait Driver: Send {
    /// Open the connection. Implementations apply the option's charset and
    /// connect/read/write timeouts before dialling.
    fn connect(&mut self, option: &ConnOption) -> Result<(), DriverError>;

    /// Close the connection. Idempotent.
    fn close(&mut self);

    /// Liveness probe.
    fn ping(&mut self) -> bool;

    /// Toggle server-side auto-commit.
    fn set_auto_commit(&mut self, enable: bool) -> Result<(), DriverError>;

    /// Text-protocol query producing a stored result set.
    fn query_text(&mut self, sql: &str) -> Result<TextRowSet, DriverError>;

    /// Text-protocol statement with no result set; returns affected rows.
    fn execute_text(&mut self, sql: &str) -> Result<u64, DriverError>;

    /// Parse and prepare a statement.
    fn prepare(&mut self, sql: &str) -> Result<StmtHandle, DriverError>;

    /// Number of `?` placeholders in the prepared statement.
    fn stmt_param_count(&self, stmt: StmtHandle) -> usize;

    /// Result metadata of the prepared statement (empty for exec-only).
    fn stmt_result_meta(&self, stmt: StmtHandle) -> Vec<ColumnMeta>;

    /// Bind input parameters.
    fn stmt_bind_params(&mut self, stmt: StmtHandle, params: &[SqlParam])
        -> Result<(), DriverError>;

    /// Execute the prepared statement.
    fn stmt_execute(&mut self, stmt: StmtHandle) -> Result<(), DriverError>;

    /// Buffer the full result set client-side.
    fn stmt_store_result(&mut self, stmt: StmtHandle) -> Result<(), DriverError>;

    /// Fetch the next row into the output slots.
    fn stmt_fetch(&mut self, stmt: StmtHandle, outputs: &mut [OutputSlot]) -> FetchOutcome;

    /// Re-fetch one column of the current row starting at `offset` bytes
    /// into the cell, after the slot's buffer has been grown.
    fn stmt_fetch_column(
        &mut self,
        stmt: StmtHandle,
        column: usize,
        slot: &mut OutputSlot,
        offset: usize,
    ) -> Result<(), DriverError>;

    /// Affected rows of the last executed statement.
    fn stmt_affected_rows(&self, stmt: StmtHandle) -> u64;

    /// Free the statement and any pending result. Idempotent on unknown
    /// handles.
    fn stmt_close(&mut self, stmt: StmtHandle) -> Result<(), DriverError>;

    /// Code of the last connection-level error (0 when none).
    fn error_code(&self) -> i32;

    /// Message of the last connection-level error.
    fn error_message(&self) -> String;
}

/// Produces one driver per session.
pub type DriverFactory = Arc<dyn Fn() -> Box<dyn Driver> + Send + Sync>;
