//! Error-code space.
//!
//! Statement and connection errors re-use MySQL's numeric error space as
//! reported by the server. Framework-reserved codes live in a range that
//! does not collide with it.

/// No error.
pub const OK: i32 = 0;

/// Deadline exceeded before or after dispatch.
pub const CLIENT_INVOKE_TIMEOUT: i32 = 101;

/// The client could not reach or keep a connection to the server.
pub const CLIENT_CONNECT_ERROR: i32 = 111;

/// Connect or reconnect failed at the session layer.
pub const DB_CONNECTION_ERROR: i32 = 3501;

/// Transaction handle used in the wrong state.
pub const INVALID_TX_HANDLE: i32 = 3502;

/// Prepared-statement output shape does not match the result metadata.
pub const STMT_PARAMS_ERROR: i32 = 3503;
