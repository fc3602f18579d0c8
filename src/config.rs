use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ReplayError, ReplayResult};

pub const DEFAULT_MAX_PACKETS: u64 = 1_000_000_000_000;
pub const DEFAULT_MAX_SECONDS: u64 = 1_000_000;

/// Settings for one replay run.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Live destination; every stream is sent here on its remapped port.
    pub target: Option<Ipv4Addr>,
    /// Directory receiving one `.ts` file per stream.
    pub output_dir: Option<PathBuf>,
    pub gap_threshold: Option<Duration>,
    pub max_packets: u64,
    pub max_seconds: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            target: None,
            output_dir: None,
            gap_threshold: None,
            max_packets: DEFAULT_MAX_PACKETS,
            max_seconds: DEFAULT_MAX_SECONDS,
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> ReplayResult<()> {
        if self.target.is_none() && self.output_dir.is_none() {
            return Err(ReplayError::Config(
                "either a destination address or an output directory must be specified".into(),
            ));
        }
        if self.max_packets == 0 {
            return Err(ReplayError::Config("max packets must be positive".into()));
        }
        if self.max_seconds == 0 {
            return Err(ReplayError::Config("max seconds must be positive".into()));
        }
        Ok(())
    }
}
