//! Core types for mysql-relay.
//!
//! This crate holds everything the session, pool and proxy layers share:
//!
//! - `TimeValue`/`Blob` column values
//! - the server type space and result metadata
//! - input parameters and the typed output-binding machinery
//! - the three result modes and their container
//! - the error-code space and client configuration

pub mod bind;
pub mod codes;
pub mod config;
pub mod field;
pub mod param;
pub mod results;
pub mod value;

pub use bind::{
    BufferKind, ColumnOut, OutputBinding, OutputSlot, RowOut, DYNAMIC_BUFFER_INIT_SIZE,
};
pub use config::{ClientConf, ConnOption, NodeAddr};
pub use field::{ColumnMeta, FieldType};
pub use param::SqlParam;
pub use results::{Exec, RawRows, ResultMode, ResultsOption, SqlResults};
pub use value::{Blob, TimeKind, TimeValue};
