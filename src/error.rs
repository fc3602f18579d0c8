use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::packet::StreamKey;

/// Fatal conditions raised by the replay and unpack pipelines.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("udp payload size {size} is larger than capacity {capacity}")]
    Capacity { size: usize, capacity: usize },

    #[error("error sending UDP packet for stream {dst}: {source}")]
    Send {
        dst: StreamKey,
        #[source]
        source: io::Error,
    },

    #[error("stream {dst}: sent {sent} bytes, expected {expected}")]
    ShortWrite {
        dst: StreamKey,
        sent: usize,
        expected: usize,
    },

    #[error("failed to read capture {}: {source}", path.display())]
    Capture {
        path: PathBuf,
        #[source]
        source: pcap::Error,
    },
}

impl ReplayError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        ReplayError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type ReplayResult<T> = Result<T, ReplayError>;
