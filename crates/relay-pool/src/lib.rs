//! Session pooling for mysql-relay.
//!
//! Each endpoint owns an [`ExecutorPool`]: a free list of idle sessions
//! partitioned into lock-striped shards. The [`PoolManager`] maps
//! `host:port` endpoint keys to pools and drives their shutdown.

pub mod manager;

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use relay_core::config::{ConnOption, NodeAddr, DEFAULT_API_TIMEOUT};
use relay_executor::driver::DriverFactory;
use relay_executor::Executor;

pub use manager::PoolManager;

/// How many idle candidates one acquisition probes on its shard before
/// creating a fresh session.
const ACQUIRE_PROBES: u32 = 3;

/// Per-endpoint pool settings plus the credentials its sessions connect
/// with.
#[derive(Debug, Clone)]
pub struct PoolOption {
    /// Upper bound on live sessions for the whole pool.
    pub max_size: u32,
    /// Idle age after which a pooled session is evicted, in milliseconds.
    /// Zero disables expiry.
    pub max_idle_time_ms: u64,
    /// Number of free-list shards.
    pub num_shard_group: u32,
    pub username: String,
    pub password: String,
    pub dbname: String,
    pub char_set: String,
}

impl Default for PoolOption {
    fn default() -> Self {
        Self {
            max_size: 64,
            max_idle_time_ms: 50_000,
            num_shard_group: 4,
            username: String::new(),
            password: String::new(),
            dbname: String::new(),
            char_set: "utf8mb4".to_string(),
        }
    }
}

impl PoolOption {
    fn conn_option(&self, target: &NodeAddr) -> ConnOption {
        ConnOption {
            host: target.ip.clone(),
            port: target.port,
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.dbname.clone(),
            char_set: self.char_set.clone(),
            api_timeout: DEFAULT_API_TIMEOUT,
        }
    }
}

/// A sharded free list of idle sessions for one endpoint.
///
/// Sessions are single-owner: they live either in a shard's free list or
/// with the caller that acquired them. Reclaim is mandatory on every exit
/// path.
pub struct ExecutorPool {
    option: PoolOption,
    target: NodeAddr,
    shards: Vec<Mutex<Vec<Executor>>>,
    max_per_shard: usize,
    executor_num: AtomicU32,
    shard_id_gen: AtomicU32,
    executor_id_gen: AtomicU32,
    factory: DriverFactory,
}

impl ExecutorPool {
    pub fn new(option: PoolOption, target: NodeAddr, factory: DriverFactory) -> Self {
        let shard_count = option.num_shard_group.max(1);
        let max_per_shard = option.max_size.div_ceil(shard_count) as usize;
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Vec::new())).collect(),
            max_per_shard,
            executor_num: AtomicU32::new(0),
            shard_id_gen: AtomicU32::new(0),
            executor_id_gen: AtomicU32::new(0),
            option: PoolOption {
                num_shard_group: shard_count,
                ..option
            },
            target,
            factory,
        }
    }

    pub fn target(&self) -> &NodeAddr {
        &self.target
    }

    /// Live sessions currently accounted to this pool.
    pub fn executor_num(&self) -> u32 {
        self.executor_num.load(Ordering::Relaxed)
    }

    /// Acquire a session: recycle an idle one from the probed shard when it
    /// is alive and not idle-expired, otherwise connect a fresh one.
    ///
    /// A session is returned even when the fresh connect failed; callers
    /// must check `is_connected()` before issuing a query, and can read the
    /// error code and message off the session.
    pub fn get(&self) -> Executor {
        let shard_id = self.shard_id_gen.fetch_add(1, Ordering::Relaxed);
        let shard = &self.shards[(shard_id % self.option.num_shard_group) as usize];

        let mut probes = ACQUIRE_PROBES;
        while probes > 0 {
            // Pop under the lock, validate outside it: the liveness probe
            // is a blocking call.
            let candidate = shard.lock().pop();
            let Some(mut executor) = candidate else {
                break;
            };

            if executor.check_alive() && !self.is_idle_expired(&executor) {
                return executor;
            }

            self.discard(&mut executor);
            probes -= 1;
        }

        self.create(shard_id)
    }

    fn create(&self, shard_id: u32) -> Executor {
        let executor_id = (u64::from(shard_id) << 32)
            | u64::from(self.executor_id_gen.fetch_add(1, Ordering::Relaxed));

        let mut executor = Executor::new(self.option.conn_option(&self.target), &self.factory);
        executor.set_executor_id(executor_id);

        if executor.connect() {
            self.executor_num.fetch_add(1, Ordering::Relaxed);
        }
        executor
    }

    /// Return a session to its origin shard. A non-zero `ret`, an
    /// over-quota shard or an over-quota pool closes the session instead.
    pub fn reclaim(&self, ret: i32, mut executor: Executor) {
        if ret == 0 {
            let shard_id = (executor.executor_id() >> 32) as u32;
            let shard = &self.shards[(shard_id % self.option.num_shard_group) as usize];

            let mut list = shard.lock();
            if list.len() <= self.max_per_shard
                && self.executor_num.load(Ordering::Relaxed) <= self.option.max_size
            {
                executor.refresh_alive_time();
                list.push(executor);
                return;
            }
        }

        self.discard(&mut executor);
    }

    /// Close every idle session. The pool stays usable; later acquisitions
    /// connect fresh sessions.
    pub fn stop(&self) {
        tracing::debug!(endpoint = %self.target, "closing idle sessions");
        for shard in &self.shards {
            let drained: Vec<Executor> = {
                let mut list = shard.lock();
                list.drain(..).collect()
            };
            for mut executor in drained {
                self.discard(&mut executor);
            }
        }
    }

    /// Empty the free lists; dropping a session closes its connection.
    pub fn destroy(&self) {
        self.stop();
    }

    fn is_idle_expired(&self, executor: &Executor) -> bool {
        self.option.max_idle_time_ms != 0
            && executor.alive_time_ms() >= self.option.max_idle_time_ms
    }

    /// Close a session the pool had accounted for and drop it from the
    /// live count.
    fn discard(&self, executor: &mut Executor) {
        executor.close();
        let _ = self
            .executor_num
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }
}
