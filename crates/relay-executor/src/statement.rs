//! Prepared-statement handle.

use relay_core::bind::OutputSlot;
use relay_core::field::ColumnMeta;
use relay_core::param::SqlParam;

use crate::driver::{Driver, DriverError, FetchOutcome, StmtHandle};

/// A short-lived prepared statement bound to one session's driver.
///
/// Lifecycle: [`init`](Statement::init) → [`bind_params`](Statement::bind_params)
/// → execute → fetch → [`close`](Statement::close). Dropping an open
/// statement is a programmer error; it is closed with an error log.
pub struct Statement<'a> {
    driver: &'a mut dyn Driver,
    handle: Option<StmtHandle>,
    field_count: usize,
    params_count: usize,
}

impl<'a> Statement<'a> {
    pub fn new(driver: &'a mut dyn Driver) -> Self {
        Self {
            driver,
            handle: None,
            field_count: 0,
            params_count: 0,
        }
    }

    /// Prepare `sql` and capture its placeholder and column counts.
    pub fn init(&mut self, sql: &str) -> Result<(), DriverError> {
        let handle = self.driver.prepare(sql)?;
        self.params_count = self.driver.stmt_param_count(handle);
        self.field_count = self.driver.stmt_result_meta(handle).len();
        self.handle = Some(handle);
        Ok(())
    }

    pub fn field_count(&self) -> usize {
        self.field_count
    }

    pub fn params_count(&self) -> usize {
        self.params_count
    }

    /// Result metadata of the prepared statement.
    pub fn result_meta(&self) -> Vec<ColumnMeta> {
        match self.handle {
            Some(handle) => self.driver.stmt_result_meta(handle),
            None => Vec::new(),
        }
    }

    pub fn bind_params(&mut self, params: &[SqlParam]) -> Result<(), DriverError> {
        let handle = self.expect_handle()?;
        self.driver.stmt_bind_params(handle, params)
    }

    pub fn execute(&mut self) -> Result<(), DriverError> {
        let handle = self.expect_handle()?;
        self.driver.stmt_execute(handle)
    }

    pub fn store_result(&mut self) -> Result<(), DriverError> {
        let handle = self.expect_handle()?;
        self.driver.stmt_store_result(handle)
    }

    pub fn fetch(&mut self, outputs: &mut [OutputSlot]) -> FetchOutcome {
        match self.handle {
            Some(handle) => self.driver.stmt_fetch(handle, outputs),
            None => FetchOutcome::Err(not_prepared()),
        }
    }

    pub fn fetch_column(
        &mut self,
        column: usize,
        slot: &mut OutputSlot,
        offset: usize,
    ) -> Result<(), DriverError> {
        let handle = self.expect_handle()?;
        self.driver.stmt_fetch_column(handle, column, slot, offset)
    }

    pub fn affected_rows(&self) -> u64 {
        match self.handle {
            Some(handle) => self.driver.stmt_affected_rows(handle),
            None => 0,
        }
    }

    /// Free the statement and any pending result. A no-op when nothing was
    /// prepared.
    pub fn close(&mut self) -> Result<(), DriverError> {
        if let Some(handle) = self.handle.take() {
            self.driver.stmt_close(handle)?;
        }
        Ok(())
    }

    fn expect_handle(&self) -> Result<StmtHandle, DriverError> {
        self.handle.ok_or_else(not_prepared)
    }
}

fn not_prepared() -> DriverError {
    DriverError::new(2030, "statement was not prepared")
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::error!("statement dropped while still open, closing it");
            let _ = self.close();
        }
    }
}
