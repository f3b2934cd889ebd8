//! Per-call client context and status.

use std::fmt;
use std::time::{Duration, Instant};

use relay_core::codes;
use relay_core::config::NodeAddr;

/// The outcome of one proxy call. Framework and MySQL error codes share
/// the numeric space described in `relay_core::codes`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    code: i32,
    message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == codes::OK
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            write!(f, "ok")
        } else {
            write!(f, "error {}: {}", self.code, self.message)
        }
    }
}

/// The error value carried by failed futures. Derived from the results'
/// error fields; the code is never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    pub code: i32,
    pub message: String,
}

impl ClientError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mysql client error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ClientError {}

impl From<&Status> for ClientError {
    fn from(status: &Status) -> Self {
        Self {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

/// Per-call state: target endpoint, deadline and resulting status.
///
/// An empty `ip` asks the proxy to consult its endpoint selector; a set
/// target bypasses selection, which keeps direct-target testing possible.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    service_name: String,
    ip: String,
    port: u16,
    deadline: Option<Instant>,
    status: Status,
}

impl ClientContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn set_service_name(&mut self, name: impl Into<String>) {
        self.service_name = name.into();
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Pin the call to one endpoint, skipping selection.
    pub fn set_target(&mut self, ip: impl Into<String>, port: u16) {
        self.ip = ip.into();
        self.port = port;
    }

    pub fn node_addr(&self) -> NodeAddr {
        NodeAddr::new(self.ip.clone(), self.port)
    }

    /// Arm the call deadline `timeout` from now.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    pub fn has_deadline(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn reset_status(&mut self) {
        self.status = Status::ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ok_semantics() {
        assert!(Status::ok().is_ok());
        let s = Status::error(codes::CLIENT_CONNECT_ERROR, "down");
        assert!(!s.is_ok());
        assert_eq!(s.code(), codes::CLIENT_CONNECT_ERROR);
        assert_eq!(ClientError::from(&s).code, codes::CLIENT_CONNECT_ERROR);
    }

    #[test]
    fn deadline_tracking() {
        let mut ctx = ClientContext::new();
        assert!(!ctx.deadline_exceeded());

        ctx.set_timeout(Duration::from_secs(60));
        assert!(!ctx.deadline_exceeded());

        ctx.set_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(ctx.deadline_exceeded());
    }

    #[test]
    fn target_bypass() {
        let mut ctx = ClientContext::new();
        assert!(ctx.ip().is_empty());
        ctx.set_target("127.0.0.1", 3306);
        assert_eq!(ctx.node_addr(), NodeAddr::new("127.0.0.1", 3306));
    }
}
