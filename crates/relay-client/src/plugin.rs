//! Process-wide bootstrap.

use std::sync::Once;

static PLUGIN_INIT: Once = Once::new();

/// Initialise the plugin once per process. Must run before any proxy is
/// constructed; subsequent calls are no-ops. Teardown is LIFO: stop and
/// destroy each proxy, which stops and destroys its pool manager.
pub fn init_plugin() -> bool {
    PLUGIN_INIT.call_once(|| {
        tracing::info!("mysql relay plugin initialised");
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        assert!(init_plugin());
        assert!(init_plugin());
    }
}
