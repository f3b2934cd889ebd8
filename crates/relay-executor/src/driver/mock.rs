//! In-memory driver used by the test-suite.
//!
//! A [`MockServer`] scripts result sets, failures and liveness behaviour,
//! and every driver it spawns shares that state. The mock reproduces the
//! behaviours the session layer depends on: per-buffer-type cell encoding
//! (including text rendering when a column is read as a string), truncated
//! fetches with tail re-reads, scripted connect and ping failures, and an
//! executed-SQL journal.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use relay_core::bind::OutputSlot;
use relay_core::config::ConnOption;
use relay_core::field::{ColumnMeta, FieldType};
use relay_core::param::SqlParam;
use relay_core::value::TimeValue;

use super::{Driver, DriverError, DriverFactory, FetchOutcome, StmtHandle, TextRowSet};
use crate::formatter::count_placeholders;

/// One scripted cell.
#[derive(Debug, Clone)]
pub enum MockCell {
    Null,
    Int(i64),
    Uint(u64),
    Float(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Time(TimeValue),
}

impl MockCell {
    /// Encode the cell the way the native library would for the slot's
    /// buffer type: binary at the column's wire width, or rendered as text
    /// when the output forced a STRING read.
    fn encode(&self, buffer_type: FieldType) -> Option<Vec<u8>> {
        if buffer_type == FieldType::String || buffer_type.is_text() {
            return self.render_text();
        }

        match self {
            MockCell::Null => None,
            MockCell::Int(v) => Some(match buffer_type.fixed_width() {
                Some(1) => vec![*v as u8],
                Some(2) => (*v as i16).to_le_bytes().to_vec(),
                Some(4) => (*v as i32).to_le_bytes().to_vec(),
                _ => v.to_le_bytes().to_vec(),
            }),
            MockCell::Uint(v) => Some(match buffer_type.fixed_width() {
                Some(1) => vec![*v as u8],
                Some(2) => (*v as u16).to_le_bytes().to_vec(),
                Some(4) => (*v as u32).to_le_bytes().to_vec(),
                _ => v.to_le_bytes().to_vec(),
            }),
            MockCell::Float(v) => Some(v.to_le_bytes().to_vec()),
            MockCell::Double(v) => Some(v.to_le_bytes().to_vec()),
            MockCell::Text(v) => Some(v.as_bytes().to_vec()),
            MockCell::Bytes(v) => Some(v.clone()),
            MockCell::Time(v) => Some(v.to_wire_bytes().to_vec()),
        }
    }

    fn render_text(&self) -> Option<Vec<u8>> {
        match self {
            MockCell::Null => None,
            MockCell::Int(v) => Some(v.to_string().into_bytes()),
            MockCell::Uint(v) => Some(v.to_string().into_bytes()),
            MockCell::Float(v) => Some(v.to_string().into_bytes()),
            MockCell::Double(v) => Some(v.to_string().into_bytes()),
            MockCell::Text(v) => Some(v.as_bytes().to_vec()),
            MockCell::Bytes(v) => Some(v.clone()),
            MockCell::Time(v) => Some(v.to_string().into_bytes()),
        }
    }
}

#[derive(Debug, Clone)]
struct PreparedFixture {
    meta: Vec<ColumnMeta>,
    rows: Vec<Vec<MockCell>>,
}

#[derive(Debug, Clone)]
struct TextFixture {
    columns: Vec<String>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
}

#[derive(Debug, Default)]
struct ServerState {
    prepared: HashMap<String, PreparedFixture>,
    text: HashMap<String, TextFixture>,
    exec_affected: HashMap<String, u64>,
    failures: HashMap<String, DriverError>,
    connect_failures: u32,
    ping_failures: u32,
    journal: Vec<String>,
    /// Statements made durable by a `commit`; rollbacks discard their
    /// transaction's statements instead.
    committed: Vec<String>,
    connections_opened: usize,
    live_connections: usize,
}

/// Shared scripting state for a family of mock connections. Cloning the
/// server shares its state.
#[derive(Default, Clone)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a prepared-statement result set for an exact SQL text.
    pub fn on_prepared(
        &self,
        sql: impl Into<String>,
        meta: Vec<ColumnMeta>,
        rows: Vec<Vec<MockCell>>,
    ) {
        self.state
            .lock()
            .prepared
            .insert(sql.into(), PreparedFixture { meta, rows });
    }

    /// Script a text-protocol result set for an exact SQL text.
    pub fn on_text(
        &self,
        sql: impl Into<String>,
        columns: Vec<&str>,
        rows: Vec<Vec<Option<&[u8]>>>,
    ) {
        let fixture = TextFixture {
            columns: columns.into_iter().map(str::to_string).collect(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|c| c.map(<[u8]>::to_vec)).collect())
                .collect(),
        };
        self.state.lock().text.insert(sql.into(), fixture);
    }

    /// Script the affected-row count of an exec-only statement.
    pub fn on_exec(&self, sql: impl Into<String>, affected: u64) {
        self.state.lock().exec_affected.insert(sql.into(), affected);
    }

    /// Script a failure for an exact SQL text (any protocol).
    pub fn fail_sql(&self, sql: impl Into<String>, error: DriverError) {
        self.state.lock().failures.insert(sql.into(), error);
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Make the next `count` pings fail.
    pub fn fail_pings(&self, count: u32) {
        self.state.lock().ping_failures = count;
    }

    /// Every statement executed so far, across all connections.
    pub fn journal(&self) -> Vec<String> {
        self.state.lock().journal.clone()
    }

    /// Statements whose transaction committed, across all connections.
    pub fn committed_statements(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    pub fn connections_opened(&self) -> usize {
        self.state.lock().connections_opened
    }

    pub fn live_connections(&self) -> usize {
        self.state.lock().live_connections
    }

    /// A factory producing drivers bound to this server.
    pub fn factory(&self) -> DriverFactory {
        let server = self.clone();
        Arc::new(move || Box::new(MockDriver::new(server.clone())) as Box<dyn Driver>)
    }
}

#[derive(Debug)]
struct MockStmt {
    sql: String,
    param_count: usize,
    meta: Vec<ColumnMeta>,
    rows: Vec<Vec<MockCell>>,
    cursor: usize,
    /// Encoded cells of the most recently fetched row, for tail re-reads.
    current_row: Vec<Option<Vec<u8>>>,
    affected: u64,
    executed: bool,
}

/// One mock connection.
pub struct MockDriver {
    server: MockServer,
    connected: bool,
    auto_commit: bool,
    in_transaction: bool,
    pending: Vec<String>,
    stmts: HashMap<u64, MockStmt>,
    next_stmt: u64,
    last_error: Option<DriverError>,
}

impl MockDriver {
    fn new(server: MockServer) -> Self {
        Self {
            server,
            connected: false,
            auto_commit: true,
            in_transaction: false,
            pending: Vec::new(),
            stmts: HashMap::new(),
            next_stmt: 1,
            last_error: None,
        }
    }

    fn scripted_failure(&self, sql: &str) -> Option<DriverError> {
        self.server.state.lock().failures.get(sql).cloned()
    }

    fn journal(&self, sql: &str) {
        self.server.state.lock().journal.push(sql.to_string());
    }

    /// Track transaction visibility for a successfully executed statement:
    /// statements between `begin` and `commit` become durable only on
    /// commit.
    fn apply_visibility(&mut self, sql: &str) {
        match sql.trim().to_ascii_lowercase().as_str() {
            "begin" => {
                self.in_transaction = true;
                self.pending.clear();
            }
            "commit" => {
                let committed = std::mem::take(&mut self.pending);
                self.server.state.lock().committed.extend(committed);
                self.in_transaction = false;
            }
            "rollback" => {
                self.pending.clear();
                self.in_transaction = false;
            }
            _ => {
                if self.in_transaction {
                    self.pending.push(sql.to_string());
                } else {
                    self.server.state.lock().committed.push(sql.to_string());
                }
            }
        }
    }

    fn fail(&mut self, error: DriverError) -> DriverError {
        self.last_error = Some(error.clone());
        error
    }
}

impl Driver for MockDriver {
    fn connect(&mut self, _option: &ConnOption) -> Result<(), DriverError> {
        let mut state = self.server.state.lock();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            drop(state);
            return Err(self.fail(DriverError::new(
                2003,
                "Can't connect to MySQL server on mock",
            )));
        }
        state.connections_opened += 1;
        state.live_connections += 1;
        drop(state);

        self.connected = true;
        self.in_transaction = false;
        self.pending.clear();
        self.last_error = None;
        Ok(())
    }

    fn close(&mut self) {
        if self.connected {
            self.server.state.lock().live_connections -= 1;
            self.connected = false;
        }
        // Losing the connection rolls an open transaction back.
        self.in_transaction = false;
        self.pending.clear();
        self.stmts.clear();
    }

    fn ping(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        let mut state = self.server.state.lock();
        if state.ping_failures > 0 {
            state.ping_failures -= 1;
            drop(state);
            self.connected = false;
            self.server.state.lock().live_connections -= 1;
            return false;
        }
        true
    }

    fn set_auto_commit(&mut self, enable: bool) -> Result<(), DriverError> {
        self.auto_commit = enable;
        self.journal(if enable {
            "set autocommit=1"
        } else {
            "set autocommit=0"
        });
        Ok(())
    }

    fn query_text(&mut self, sql: &str) -> Result<TextRowSet, DriverError> {
        self.journal(sql);
        if let Some(err) = self.scripted_failure(sql) {
            return Err(self.fail(err));
        }
        self.apply_visibility(sql);

        let state = self.server.state.lock();
        let Some(fixture) = state.text.get(sql).cloned() else {
            drop(state);
            return Err(self.fail(DriverError::new(
                1146,
                format!("no text fixture for: {sql}"),
            )));
        };
        drop(state);

        Ok(TextRowSet {
            columns: fixture.columns,
            rows: fixture
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(|c| c.map(Bytes::from)).collect())
                .collect(),
        })
    }

    fn execute_text(&mut self, sql: &str) -> Result<u64, DriverError> {
        self.journal(sql);
        if let Some(err) = self.scripted_failure(sql) {
            return Err(self.fail(err));
        }
        self.apply_visibility(sql);
        Ok(self
            .server
            .state
            .lock()
            .exec_affected
            .get(sql)
            .copied()
            .unwrap_or(0))
    }

    fn prepare(&mut self, sql: &str) -> Result<StmtHandle, DriverError> {
        if let Some(err) = self.scripted_failure(sql) {
            return Err(self.fail(err));
        }

        let state = self.server.state.lock();
        let fixture = state.prepared.get(sql).cloned();
        let affected = state.exec_affected.get(sql).copied().unwrap_or(0);
        drop(state);

        let (meta, rows) = match fixture {
            Some(f) => (f.meta, f.rows),
            // Statements without a scripted result set prepare as exec-only.
            None => (Vec::new(), Vec::new()),
        };

        let id = self.next_stmt;
        self.next_stmt += 1;
        self.stmts.insert(
            id,
            MockStmt {
                sql: sql.to_string(),
                param_count: count_placeholders(sql),
                meta,
                rows,
                cursor: 0,
                current_row: Vec::new(),
                affected,
                executed: false,
            },
        );
        Ok(StmtHandle(id))
    }

    fn stmt_param_count(&self, stmt: StmtHandle) -> usize {
        self.stmts.get(&stmt.0).map_or(0, |s| s.param_count)
    }

    fn stmt_result_meta(&self, stmt: StmtHandle) -> Vec<ColumnMeta> {
        self.stmts.get(&stmt.0).map_or(Vec::new(), |s| s.meta.clone())
    }

    fn stmt_bind_params(
        &mut self,
        stmt: StmtHandle,
        params: &[SqlParam],
    ) -> Result<(), DriverError> {
        let Some(s) = self.stmts.get_mut(&stmt.0) else {
            return Err(DriverError::new(2030, "statement not prepared"));
        };
        if params.len() != s.param_count {
            return Err(DriverError::new(
                2031,
                "parameter count does not match statement",
            ));
        }
        Ok(())
    }

    fn stmt_execute(&mut self, stmt: StmtHandle) -> Result<(), DriverError> {
        let Some(s) = self.stmts.get_mut(&stmt.0) else {
            return Err(DriverError::new(2030, "statement not prepared"));
        };
        s.executed = true;
        s.cursor = 0;
        let sql = s.sql.clone();
        self.journal(&sql);
        self.apply_visibility(&sql);
        Ok(())
    }

    fn stmt_store_result(&mut self, stmt: StmtHandle) -> Result<(), DriverError> {
        match self.stmts.get(&stmt.0) {
            Some(s) if s.executed => Ok(()),
            Some(_) => Err(DriverError::new(2030, "statement not executed")),
            None => Err(DriverError::new(2030, "statement not prepared")),
        }
    }

    fn stmt_fetch(&mut self, stmt: StmtHandle, outputs: &mut [OutputSlot]) -> FetchOutcome {
        let Some(s) = self.stmts.get_mut(&stmt.0) else {
            return FetchOutcome::Err(DriverError::new(2030, "statement not prepared"));
        };
        let row = match s.rows.get(s.cursor) {
            Some(row) => row.clone(),
            None => return FetchOutcome::NoData,
        };
        s.cursor += 1;

        if row.len() != outputs.len() {
            return FetchOutcome::Err(DriverError::new(
                2036,
                "output binding does not match column count",
            ));
        }

        s.current_row = row
            .iter()
            .zip(outputs.iter())
            .map(|(cell, slot)| cell.encode(slot.buffer_type))
            .collect();

        let mut truncated = false;
        for (slot, encoded) in outputs.iter_mut().zip(&s.current_row) {
            match encoded {
                None => {
                    slot.is_null = true;
                    slot.length = 0;
                }
                Some(data) => {
                    slot.is_null = false;
                    slot.length = data.len();
                    let n = data.len().min(slot.buffer.len());
                    slot.buffer[..n].copy_from_slice(&data[..n]);
                    if data.len() > slot.buffer.len() {
                        truncated = true;
                    }
                }
            }
        }

        if truncated {
            FetchOutcome::Truncated
        } else {
            FetchOutcome::Row
        }
    }

    fn stmt_fetch_column(
        &mut self,
        stmt: StmtHandle,
        column: usize,
        slot: &mut OutputSlot,
        offset: usize,
    ) -> Result<(), DriverError> {
        let Some(s) = self.stmts.get(&stmt.0) else {
            return Err(DriverError::new(2030, "statement not prepared"));
        };
        let Some(Some(data)) = s.current_row.get(column) else {
            return Err(DriverError::new(2032, "no current cell for column"));
        };
        if offset > data.len() || slot.buffer.len() < data.len() {
            return Err(DriverError::new(2032, "fetch_column out of range"));
        }
        slot.buffer[offset..data.len()].copy_from_slice(&data[offset..]);
        slot.length = data.len();
        Ok(())
    }

    fn stmt_affected_rows(&self, stmt: StmtHandle) -> u64 {
        self.stmts.get(&stmt.0).map_or(0, |s| s.affected)
    }

    fn stmt_close(&mut self, stmt: StmtHandle) -> Result<(), DriverError> {
        self.stmts.remove(&stmt.0);
        Ok(())
    }

    fn error_code(&self) -> i32 {
        self.last_error.as_ref().map_or(0, |e| e.code)
    }

    fn error_message(&self) -> String {
        self.last_error
            .as_ref()
            .map_or(String::new(), |e| e.message.clone())
    }
}
