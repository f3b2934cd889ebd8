//! Client configuration and connection options.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Default connect/read/write timeout applied to every session.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(5);

/// One resolved endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodeAddr {
    pub ip: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// The `host:port` key used by the pool manager.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Everything a driver needs to open one session.
#[derive(Debug, Clone)]
pub struct ConnOption {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub char_set: String,
    /// Applied to connect, read and write.
    pub api_timeout: Duration,
}

impl Default for ConnOption {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
            database: String::new(),
            char_set: "utf8mb4".to_string(),
            api_timeout: DEFAULT_API_TIMEOUT,
        }
    }
}

fn default_char_set() -> String {
    "utf8mb4".to_string()
}

fn default_thread_num() -> usize {
    4
}

fn default_num_shard_group() -> u32 {
    4
}

/// MySQL client configuration block, loaded from YAML. Unknown keys are
/// ignored; absent keys take their defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConf {
    #[serde(default)]
    pub user_name: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub dbname: String,

    #[serde(default = "default_char_set")]
    pub char_set: String,

    /// Worker pool size for blocking driver calls.
    #[serde(default = "default_thread_num")]
    pub thread_num: usize,

    /// CPU affinity spec, e.g. `"1,5-7"`. Empty disables pinning.
    #[serde(default)]
    pub thread_bind_core: String,

    /// Shard count of each endpoint's session pool.
    #[serde(default = "default_num_shard_group")]
    pub num_shard_group: u32,
}

impl Default for ClientConf {
    fn default() -> Self {
        Self {
            user_name: String::new(),
            password: String::new(),
            dbname: String::new(),
            char_set: default_char_set(),
            thread_num: default_thread_num(),
            thread_bind_core: String::new(),
            num_shard_group: default_num_shard_group(),
        }
    }
}

impl ClientConf {
    /// Parse a YAML document containing the client configuration block.
    pub fn from_yaml_str(input: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(input)
    }

    /// Log the effective configuration. The password is not printed.
    pub fn display(&self) {
        tracing::info!(
            user_name = %self.user_name,
            dbname = %self.dbname,
            char_set = %self.char_set,
            thread_num = self.thread_num,
            thread_bind_core = %self.thread_bind_core,
            num_shard_group = self.num_shard_group,
            "mysql client configuration"
        );
    }

    /// Build connection options for one endpoint.
    pub fn conn_option(&self, addr: &NodeAddr) -> ConnOption {
        ConnOption {
            host: addr.ip.clone(),
            port: addr.port,
            username: self.user_name.clone(),
            password: self.password.clone(),
            database: self.dbname.clone(),
            char_set: self.char_set.clone(),
            api_timeout: DEFAULT_API_TIMEOUT,
        }
    }
}
