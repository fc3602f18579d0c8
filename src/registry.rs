use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{ReplayError, ReplayResult};
use crate::packet::StreamKey;

#[derive(Debug)]
struct StreamState {
    is_transport_stream: bool,
    output: Option<BufWriter<File>>,
}

/// Per-destination bookkeeping for one run. Owns every output file it opens.
#[derive(Debug)]
pub struct StreamRegistry {
    output_dir: Option<PathBuf>,
    file_prefix: Option<String>,
    streams: HashMap<StreamKey, StreamState>,
}

impl StreamRegistry {
    /// Registry without file output when `output_dir` is `None`.
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self {
            output_dir,
            file_prefix: None,
            streams: HashMap::new(),
        }
    }

    /// Files are named `<prefix>_<stream>.ts`.
    pub fn with_prefix(output_dir: PathBuf, prefix: impl Into<String>) -> Self {
        Self {
            output_dir: Some(output_dir),
            file_prefix: Some(prefix.into()),
            streams: HashMap::new(),
        }
    }

    pub fn output_path(&self, key: &StreamKey) -> Option<PathBuf> {
        let dir = self.output_dir.as_ref()?;
        let name = match &self.file_prefix {
            Some(prefix) => format!("{}_{}.ts", prefix, key.file_stem()),
            None => format!("{}.ts", key.file_stem()),
        };
        Some(dir.join(name))
    }

    /// Registers `key` on first sight, creating its output file if file
    /// output is enabled. Returns true for a new stream.
    pub fn register(&mut self, key: StreamKey) -> ReplayResult<bool> {
        if self.streams.contains_key(&key) {
            return Ok(false);
        }

        let output = match self.output_path(&key) {
            Some(path) => Some(create_output(&path)?),
            None => None,
        };
        self.streams.insert(
            key,
            StreamState {
                is_transport_stream: true,
                output,
            },
        );
        Ok(true)
    }

    /// Flags `key` as carrying something other than TS. Returns true only the
    /// first time, so callers can log once per stream.
    pub fn mark_not_transport_stream(&mut self, key: &StreamKey) -> bool {
        match self.streams.get_mut(key) {
            Some(state) if state.is_transport_stream => {
                state.is_transport_stream = false;
                true
            }
            _ => false,
        }
    }

    /// Appends to the stream's file. No-op when file output is disabled.
    pub fn write(&mut self, key: &StreamKey, payload: &[u8]) -> ReplayResult<()> {
        let Some(writer) = self.streams.get_mut(key).and_then(|s| s.output.as_mut()) else {
            return Ok(());
        };
        writer
            .write_all(payload)
            .map_err(|e| ReplayError::io(format!("write to output file for stream {key}"), e))
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn non_transport_stream_count(&self) -> usize {
        self.streams.values().filter(|s| !s.is_transport_stream).count()
    }

    /// Flushes and closes every output file. All files are closed even when
    /// one of them fails; the first failure is returned.
    pub fn finish(&mut self) -> ReplayResult<()> {
        let mut first_err = None;
        for (key, state) in self.streams.iter_mut() {
            if let Some(mut writer) = state.output.take() {
                if let Err(e) = writer.flush() {
                    warn!("Failed to flush output for stream {}: {}", key, e);
                    if first_err.is_none() {
                        first_err = Some(ReplayError::io(
                            format!("flush output file for stream {key}"),
                            e,
                        ));
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn create_output(path: &Path) -> ReplayResult<BufWriter<File>> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| ReplayError::io(format!("create directory {}", dir.display()), e))?;
    }
    let file = File::create(path)
        .map_err(|e| ReplayError::io(format!("create file {}", path.display()), e))?;
    info!("Created {}", path.display());
    Ok(BufWriter::new(file))
}
