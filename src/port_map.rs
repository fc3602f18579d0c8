use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ReplayError;

/// Destination port rewrites, e.g. `1234:5678,2345:6789`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMap {
    ports: HashMap<u16, u16>,
}

impl PortMap {
    /// Mapped port, or `port` itself when no rule exists.
    pub fn remap(&self, port: u16) -> u16 {
        self.ports.get(&port).copied().unwrap_or(port)
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }
}

impl FromStr for PortMap {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ports = HashMap::new();
        if s.trim().is_empty() {
            return Ok(Self { ports });
        }

        for entry in s.split(',') {
            let entry = entry.trim();
            let parts: Vec<&str> = entry.split(':').collect();
            if parts.len() != 2 {
                return Err(ReplayError::Config(format!(
                    "invalid port mapping, not two parts: {entry}"
                )));
            }
            let src = parts[0].trim().parse::<u16>().map_err(|_| {
                ReplayError::Config(format!("first port map entry not a port number: {entry}"))
            })?;
            let dst = parts[1].trim().parse::<u16>().map_err(|_| {
                ReplayError::Config(format!("second port map entry not a port number: {entry}"))
            })?;
            ports.insert(src, dst);
        }

        Ok(Self { ports })
    }
}
