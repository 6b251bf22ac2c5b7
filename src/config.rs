use std::path::PathBuf;

use crate::aof::FsyncPolicy;

pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_AOF_PATH: &str = "database.aof";

#[derive(Clone, Debug)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// Where mutating commands are logged. `None` runs without durability.
    pub aof_path: Option<PathBuf>,
    pub appendfsync: FsyncPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            aof_path: Some(PathBuf::from(DEFAULT_AOF_PATH)),
            appendfsync: FsyncPolicy::default(),
        }
    }
}
