//! Best-effort latency sample logging.
//!
//! Samples are whole milliseconds, one per line, appended to a text file. The
//! writer lives on its own thread behind a bounded channel so recording never
//! blocks the pipeline; a full queue or a failed write loses the sample and
//! nothing else.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::{Sender, TrySendError};
use tracing::{debug, warn};

/// Sink for timing samples. Implementations must not fail or block.
pub trait LatencyRecorder: Send + Sync {
    fn record(&self, elapsed: Duration);
}

/// Discards every sample
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl LatencyRecorder for NoopRecorder {
    fn record(&self, _elapsed: Duration) {}
}

/// Appends millisecond samples to a file from a background thread
pub struct FileLatencyLog {
    path: PathBuf,
    tx: Option<Sender<u64>>,
    writer: Option<JoinHandle<()>>,
}

impl FileLatencyLog {
    /// Queue depth before samples start being dropped
    pub const QUEUE_DEPTH: usize = 256;

    /// Start the writer thread. The file is created lazily on the first sample.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = flume::bounded::<u64>(Self::QUEUE_DEPTH);

        let thread_path = path.clone();
        let writer = std::thread::Builder::new()
            .name("latency-log".into())
            .spawn(move || {
                let mut sink: Option<BufWriter<File>> = None;
                for millis in rx.iter() {
                    append(&thread_path, &mut sink, millis);
                }
                debug!(path = %thread_path.display(), "latency log closed");
            });

        let writer = match writer {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to start latency log writer: {}", e);
                None
            }
        };

        Self {
            path,
            tx: writer.as_ref().map(|_| tx),
            writer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn append(path: &Path, sink: &mut Option<BufWriter<File>>, millis: u64) {
    if sink.is_none() {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => *sink = Some(BufWriter::new(file)),
            Err(e) => {
                warn!(path = %path.display(), "Failed to open latency log: {}", e);
                return;
            }
        }
    }

    if let Some(writer) = sink.as_mut() {
        let written = writeln!(writer, "{}", millis).and_then(|_| writer.flush());
        if let Err(e) = written {
            warn!(path = %path.display(), "Failed to append latency sample: {}", e);
            // Reopen on the next sample
            *sink = None;
        }
    }
}

impl LatencyRecorder for FileLatencyLog {
    fn record(&self, elapsed: Duration) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(elapsed.as_millis() as u64) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(path = %self.path.display(), "Latency log queue full, sample dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for FileLatencyLog {
    fn drop(&mut self) {
        // Closing the channel lets the writer drain and exit
        self.tx.take();
        let Some(writer) = self.writer.take() else {
            return;
        };
        // Inside the runtime the writer is left to finish on its own
        if tokio::runtime::Handle::try_current().is_ok() {
            return;
        }
        let _ = writer.join();
    }
}
