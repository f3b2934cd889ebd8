//! Endpoint to pool mapping.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use relay_core::config::NodeAddr;
use relay_executor::driver::DriverFactory;

use crate::{ExecutorPool, PoolOption};

/// Owns one [`ExecutorPool`] per `host:port` endpoint.
///
/// Lookups are lock-light; insertion races resolve to a single winner.
/// [`stop`](PoolManager::stop) snapshots the live map into a destruction
/// staging area so [`destroy`](PoolManager::destroy) can tear pools down
/// after the owning proxy has quiesced.
pub struct PoolManager {
    option: PoolOption,
    factory: DriverFactory,
    pools: DashMap<String, Arc<ExecutorPool>>,
    staged: Mutex<HashMap<String, Arc<ExecutorPool>>>,
}

impl PoolManager {
    pub fn new(option: PoolOption, factory: DriverFactory) -> Self {
        Self {
            option,
            factory,
            pools: DashMap::new(),
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// The pool for `addr`, created on first use.
    pub fn get(&self, addr: &NodeAddr) -> Arc<ExecutorPool> {
        let endpoint = addr.endpoint();
        if let Some(pool) = self.pools.get(&endpoint) {
            return Arc::clone(pool.value());
        }

        Arc::clone(
            self.pools
                .entry(endpoint)
                .or_insert_with(|| {
                    Arc::new(ExecutorPool::new(
                        self.option.clone(),
                        addr.clone(),
                        Arc::clone(&self.factory),
                    ))
                })
                .value(),
        )
    }

    /// Number of live pools.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Snapshot every pool into the staging map and stop it.
    pub fn stop(&self) {
        let mut staged = self.staged.lock();
        for entry in self.pools.iter() {
            staged.insert(entry.key().clone(), Arc::clone(entry.value()));
        }
        drop(staged);

        for entry in self.staged.lock().values() {
            entry.stop();
        }
    }

    /// Tear down every staged pool and clear both maps.
    pub fn destroy(&self) {
        let staged: Vec<Arc<ExecutorPool>> = {
            let mut map = self.staged.lock();
            let pools = map.values().cloned().collect();
            map.clear();
            pools
        };
        for pool in staged {
            pool.destroy();
        }
        self.pools.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_executor::driver::mock::MockServer;

    fn manager(server: &MockServer) -> PoolManager {
        PoolManager::new(PoolOption::default(), server.factory())
    }

    #[test]
    fn same_endpoint_resolves_to_the_same_pool() {
        let server = MockServer::new();
        let manager = manager(&server);

        let a = manager.get(&NodeAddr::new("10.0.0.1", 3306));
        let b = manager.get(&NodeAddr::new("10.0.0.1", 3306));
        let c = manager.get(&NodeAddr::new("10.0.0.1", 3307));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn stop_then_destroy_clears_everything() {
        let server = MockServer::new();
        let manager = manager(&server);

        let addr = NodeAddr::new("10.0.0.1", 3306);
        let pool = manager.get(&addr);
        let executor = pool.get();
        pool.reclaim(0, executor);
        assert_eq!(server.live_connections(), 1);

        manager.stop();
        assert_eq!(server.live_connections(), 0);

        manager.destroy();
        assert!(manager.is_empty());
    }

    #[test]
    fn pools_carry_their_target() {
        let server = MockServer::new();
        let manager = manager(&server);
        let addr = NodeAddr::new("db.internal", 3310);
        let pool = manager.get(&addr);
        assert_eq!(pool.target(), &addr);
    }
}
