#![forbid(unsafe_code)]

use std::path::PathBuf;

pub const DEFAULT_PUBLIC_WORKSPACE_NAME: &str = "shared";
pub const DEFAULT_LEASE_TTL_MS: i64 = 30_000;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub storage_dir: PathBuf,
    pub public_workspace_name: String,
    pub lease_ttl_ms: i64,
}

impl EngineConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            public_workspace_name: DEFAULT_PUBLIC_WORKSPACE_NAME.to_string(),
            lease_ttl_ms: DEFAULT_LEASE_TTL_MS,
        }
    }
}
