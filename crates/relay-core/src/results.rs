//! Query result containers.
//!
//! A [`SqlResults`] is parameterised by its output shape:
//!
//! - [`Exec`] for statements with no result set (INSERT/UPDATE/...),
//! - [`RawRows`] for text-protocol rows exposed as byte views,
//! - any tuple of output scalars for typed rows.

use bytes::Bytes;

use crate::bind::DYNAMIC_BUFFER_INIT_SIZE;

/// Tuning knobs carried by a result container.
#[derive(Debug, Clone)]
pub struct ResultsOption {
    /// Initial buffer size for variable-length output columns.
    pub dynamic_buffer_init_size: usize,
}

impl Default for ResultsOption {
    fn default() -> Self {
        Self {
            dynamic_buffer_init_size: DYNAMIC_BUFFER_INIT_SIZE,
        }
    }
}

/// Maps an output shape to its row storage.
pub trait ResultMode: Send + Sized + 'static {
    type RowSet: Default + Send;
}

/// Exec-only mode: no rows, only the affected-row count.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exec;

impl ResultMode for Exec {
    type RowSet = ();
}

/// Raw-row mode: each cell is a byte view into reference-counted result
/// storage, so views never outlive their backing buffer. NULL cells are
/// empty views paired with a set null flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawRows;

impl ResultMode for RawRows {
    type RowSet = Vec<Vec<Bytes>>;
}

/// The outcome of one query or execute call.
pub struct SqlResults<T: ResultMode> {
    option: ResultsOption,
    rows: T::RowSet,
    field_names: Vec<String>,
    null_flags: Vec<Vec<bool>>,
    error_code: i32,
    error_message: String,
    affected_rows: u64,
    has_value: bool,
}

impl<T: ResultMode> std::fmt::Debug for SqlResults<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlResults")
            .field("error_code", &self.error_code)
            .field("affected_rows", &self.affected_rows)
            .field("columns", &self.field_names.len())
            .field("has_value", &self.has_value)
            .finish_non_exhaustive()
    }
}

impl<T: ResultMode> Default for SqlResults<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ResultMode> SqlResults<T> {
    pub fn new() -> Self {
        Self::with_option(ResultsOption::default())
    }

    pub fn with_option(option: ResultsOption) -> Self {
        Self {
            option,
            rows: T::RowSet::default(),
            field_names: Vec::new(),
            null_flags: Vec::new(),
            error_code: 0,
            error_message: String::new(),
            affected_rows: 0,
            has_value: false,
        }
    }

    pub fn option(&self) -> &ResultsOption {
        &self.option
    }

    /// `true` iff no error has been recorded.
    pub fn ok(&self) -> bool {
        self.error_code == 0
    }

    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn set_error(&mut self, code: i32, message: impl Into<String>) {
        self.error_code = code;
        self.error_message = message.into();
    }

    pub fn rows(&self) -> &T::RowSet {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut T::RowSet {
        &mut self.rows
    }

    /// Move the rows out, clearing the value sentinel. Returns `None` when
    /// no result set has been produced.
    pub fn take_rows(&mut self) -> Option<T::RowSet> {
        if !self.has_value {
            return None;
        }
        self.has_value = false;
        Some(std::mem::take(&mut self.rows))
    }

    pub fn has_value(&self) -> bool {
        self.has_value
    }

    pub fn set_has_value(&mut self, has_value: bool) {
        self.has_value = has_value;
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn set_affected_rows(&mut self, affected_rows: u64) {
        self.affected_rows = affected_rows;
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    pub fn set_field_names(&mut self, names: Vec<String>) {
        self.field_names = names;
    }

    pub fn null_flags(&self) -> &[Vec<bool>] {
        &self.null_flags
    }

    pub fn null_flags_mut(&mut self) -> &mut Vec<Vec<bool>> {
        &mut self.null_flags
    }

    /// NULL flag for one cell; out-of-range coordinates read as not-NULL.
    pub fn is_value_null(&self, row: usize, column: usize) -> bool {
        self.null_flags
            .get(row)
            .and_then(|flags| flags.get(column))
            .copied()
            .unwrap_or(false)
    }

    /// Reset to the pristine state, keeping only the options.
    pub fn clear(&mut self) {
        self.rows = T::RowSet::default();
        self.field_names.clear();
        self.null_flags.clear();
        self.error_code = 0;
        self.error_message.clear();
        self.affected_rows = 0;
        self.has_value = false;
    }
}
