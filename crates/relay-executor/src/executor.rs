//! One MySQL session and its lifecycle.
//!
//! An [`Executor`] owns a single driver connection plus the bookkeeping the
//! pool needs: liveness, idle age, an id whose high half names its shard.
//! A session is single-owner at any instant; it lives either in a pool's
//! free list or with exactly one caller.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use relay_core::config::ConnOption;

use crate::driver::{Driver, DriverFactory};

/// Reconnect schedule: capped exponential backoff.
const RECONNECT_MAX_RETRIES: u32 = 5;
const RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_millis(3000);

/// The native client's init routine is not thread-safe; driver construction
/// is serialised process-wide.
static DRIVER_INIT_LOCK: Mutex<()> = Mutex::new(());

pub struct Executor {
    option: ConnOption,
    driver: Box<dyn Driver>,
    connected: bool,
    auto_commit: bool,
    alive_at: Instant,
    executor_id: u64,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("host", &self.option.host)
            .field("port", &self.option.port)
            .field("connected", &self.connected)
            .field("executor_id", &self.executor_id)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Build a disconnected session. The driver is created under the
    /// process-wide init lock.
    pub fn new(option: ConnOption, factory: &DriverFactory) -> Self {
        let driver = {
            let _guard = DRIVER_INIT_LOCK.lock();
            factory()
        };
        Self {
            option,
            driver,
            connected: false,
            auto_commit: true,
            alive_at: Instant::now(),
            executor_id: 0,
        }
    }

    /// Open the connection. Returns `true` when already connected. On
    /// failure the session stays disconnected and the driver keeps the
    /// error for [`error_code`](Executor::error_code) /
    /// [`error_message`](Executor::error_message).
    pub fn connect(&mut self) -> bool {
        if self.connected {
            return true;
        }
        match self.driver.connect(&self.option) {
            Ok(()) => {
                self.connected = true;
                true
            }
            Err(error) => {
                tracing::error!(
                    endpoint = %format!("{}:{}", self.option.host, self.option.port),
                    code = error.code,
                    message = %error.message,
                    "mysql connect failed"
                );
                false
            }
        }
    }

    pub fn close(&mut self) {
        self.driver.close();
        self.connected = false;
    }

    /// The local connection flag only; no network round-trip.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Ping the server. A failed ping marks the session disconnected.
    pub fn check_alive(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        if self.driver.ping() {
            true
        } else {
            self.connected = false;
            false
        }
    }

    pub fn reconnect(&mut self) -> bool {
        self.connect()
    }

    /// Retry [`connect`](Executor::connect) with capped exponential
    /// backoff. Runs at the head of every statement execution when the
    /// session is not alive.
    pub fn start_reconnect(&mut self) -> bool {
        let mut backoff = RECONNECT_INITIAL_BACKOFF;
        for attempt in 1..=RECONNECT_MAX_RETRIES {
            if self.reconnect() {
                tracing::info!(attempt, "mysql reconnect succeeded");
                return true;
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF);
        }
        false
    }

    /// Toggle server-side auto-commit and mirror it locally.
    pub fn auto_commit(&mut self, mode: bool) -> bool {
        if self.driver.set_auto_commit(mode).is_err() {
            return false;
        }
        self.auto_commit = mode;
        true
    }

    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub fn error_code(&self) -> i32 {
        self.driver.error_code()
    }

    pub fn error_message(&self) -> String {
        self.driver.error_message()
    }

    /// Stamp the session as just-used; the pool compares against this on
    /// acquisition.
    pub fn refresh_alive_time(&mut self) {
        self.alive_at = Instant::now();
    }

    /// Milliseconds since the last reclaim.
    pub fn alive_time_ms(&self) -> u64 {
        self.alive_at.elapsed().as_millis() as u64
    }

    pub fn set_executor_id(&mut self, id: u64) {
        self.executor_id = id;
    }

    /// 64-bit id: shard in the high half, a monotonic counter in the low.
    pub fn executor_id(&self) -> u64 {
        self.executor_id
    }

    pub fn ip(&self) -> &str {
        &self.option.host
    }

    pub fn port(&self) -> u16 {
        self.option.port
    }

    pub(crate) fn driver_mut(&mut self) -> &mut dyn Driver {
        self.driver.as_mut()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.close();
    }
}
