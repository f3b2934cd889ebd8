//! Transaction handles.
//!
//! A handle pins one session for the span of a `BEGIN … COMMIT|ROLLBACK`
//! sequence. The session is returned to its pool exactly once, by the
//! proxy's end-of-transaction path; a handle dropped while still holding
//! its session closes it and logs the leak.

use parking_lot::Mutex;
use std::sync::Arc;

use relay_executor::Executor;

/// Transaction state machine.
///
/// ```text
/// NotInited --begin ok--> Started --commit ok----> Committed
///                               \--rollback ok---> RolledBack
///                               \--conn lost-----> RolledBack (implicit)
/// detached ----------------------------------------> Invalid
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    NotInited,
    Started,
    RolledBack,
    Committed,
    Invalid,
}

#[derive(Debug)]
struct TxInner {
    state: TxState,
    executor: Option<Executor>,
}

/// Shared, refcounted transaction handle.
#[derive(Debug)]
pub struct TransactionHandle {
    inner: Mutex<TxInner>,
}

pub type TxHandle = Arc<TransactionHandle>;

impl TransactionHandle {
    pub fn new() -> TxHandle {
        Arc::new(Self {
            inner: Mutex::new(TxInner {
                state: TxState::NotInited,
                executor: None,
            }),
        })
    }

    pub fn state(&self) -> TxState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: TxState) {
        self.inner.lock().state = state;
    }

    /// Pin a session. Fails when one is already pinned.
    pub fn set_executor(&self, executor: Executor) -> bool {
        let mut inner = self.inner.lock();
        if inner.executor.is_some() {
            return false;
        }
        inner.executor = Some(executor);
        true
    }

    /// Unpin the session for reclamation.
    pub fn take_executor(&self) -> Option<Executor> {
        self.inner.lock().executor.take()
    }

    pub fn has_executor(&self) -> bool {
        self.inner.lock().executor.is_some()
    }

    /// Run `f` against the pinned session under the handle lock, which
    /// also serialises transactional statements.
    pub fn with_executor<R>(&self, f: impl FnOnce(&mut Executor) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.executor.as_mut().map(f)
    }

    /// Liveness of the pinned session; `false` when nothing is pinned.
    pub fn check_alive(&self) -> bool {
        self.with_executor(Executor::check_alive).unwrap_or(false)
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(mut executor) = inner.executor.take() {
            // Data-integrity fallback. The session must never leak silently.
            tracing::error!(
                executor_id = executor.executor_id(),
                "transaction handle dropped with its session still pinned, closing it"
            );
            executor.close();
        }
        inner.state = TxState::Invalid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::config::ConnOption;
    use relay_executor::driver::mock::MockServer;

    fn connected_executor(server: &MockServer) -> Executor {
        let mut executor = Executor::new(ConnOption::default(), &server.factory());
        assert!(executor.connect());
        executor
    }

    #[test]
    fn pin_take_cycle() {
        let server = MockServer::new();
        let handle = TransactionHandle::new();
        assert_eq!(handle.state(), TxState::NotInited);
        assert!(!handle.check_alive());

        assert!(handle.set_executor(connected_executor(&server)));
        assert!(!handle.set_executor(connected_executor(&server)));
        handle.set_state(TxState::Started);
        assert!(handle.check_alive());

        let executor = handle.take_executor().expect("was pinned");
        assert!(executor.is_connected());
        assert!(!handle.has_executor());
    }

    #[test]
    fn dropping_a_pinned_handle_closes_the_session() {
        let server = MockServer::new();
        let handle = TransactionHandle::new();
        assert!(handle.set_executor(connected_executor(&server)));
        assert_eq!(server.live_connections(), 1);

        drop(handle);
        assert_eq!(server.live_connections(), 0);
    }
}
