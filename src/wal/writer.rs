//! WAL Writer
//!
//! Handles appending frames to the WAL file.
//!
//! In sync mode every append writes (and optionally fsyncs) inline. In async
//! mode appends land in an in-memory buffer that a supervised flusher thread
//! drains on a timer, or immediately once the buffer crosses its size
//! threshold.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;

use crate::config::WalMode;
use crate::error::{QuillError, Result};
use crate::memtable::MutationLog;
use crate::record::Record;
use crate::supervisor::{spawn_supervised, RestartPolicy, Shutdown, ShutdownListener};

use super::WalCommand;

/// First retry delay of the async flusher; doubles per attempt
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Frames appended but not yet handed to the file
struct Pending {
    buf: Vec<u8>,
    /// Bumped by every rotation; batches from an older epoch are discarded
    epoch: u64,
}

/// The operations a log file needs for an all-or-nothing append
trait LogFile: Write {
    fn len(&self) -> std::io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()>;
}

impl LogFile for File {
    fn len(&self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }
}

/// Write `bytes` at the end of `file`. On failure the file is cut back to
/// its previous length so no partial frame is left behind.
fn append_or_roll_back<F: LogFile>(file: &mut F, bytes: &[u8]) -> std::io::Result<()> {
    let start = file.len()?;
    if let Err(e) = file.write_all(bytes) {
        if let Err(undo) = file.truncate_to(start) {
            tracing::error!(error = %undo, "failed to roll back partial WAL write");
        }
        return Err(e);
    }
    Ok(())
}

struct Sink {
    file: File,
    epoch: u64,
    flushes_since_sync: u32,
}

struct Shared {
    pending: Mutex<Pending>,
    sink: Mutex<Sink>,
}

impl Shared {
    /// Write `batch` if no rotation happened since it was taken
    fn write_batch(&self, batch: &[u8], epoch: u64, sync_every: u32) -> std::io::Result<()> {
        let mut sink = self.sink.lock();
        if sink.epoch != epoch {
            return Ok(());
        }
        append_or_roll_back(&mut sink.file, batch)?;
        sink.flushes_since_sync += 1;
        if sink.flushes_since_sync >= sync_every {
            sink.file.sync_data()?;
            sink.flushes_since_sync = 0;
        }
        Ok(())
    }

    fn take_pending(&self) -> Option<(Vec<u8>, u64)> {
        let mut pending = self.pending.lock();
        if pending.buf.is_empty() {
            return None;
        }
        Some((std::mem::take(&mut pending.buf), pending.epoch))
    }

    /// Drain the buffer, retrying with exponential backoff; gives up (and
    /// drops the batch) after `max_retries` failed attempts.
    fn flush_with_retry(&self, sync_every: u32, max_retries: u32) {
        let Some((batch, epoch)) = self.take_pending() else {
            return;
        };
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 1..=max_retries.max(1) {
            match self.write_batch(&batch, epoch, sync_every) {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "WAL flush failed, backing off");
                    std::thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
        tracing::error!(
            bytes = batch.len(),
            "WAL flush retries exhausted, dropping buffered frames"
        );
    }
}

struct Flusher {
    signal: Sender<()>,
    shutdown: Shutdown,
    handle: Option<JoinHandle<()>>,
}

/// Appends frames to the WAL file
pub struct WalWriter {
    path: PathBuf,
    mode: WalMode,
    shared: Arc<Shared>,
    rotate_rx: Option<Receiver<()>>,
    flusher: Mutex<Option<Flusher>>,
    frames: AtomicU64,
}

impl WalWriter {
    /// Open or create a WAL file for appending.
    ///
    /// `rotate_rx` receives rotation requests from the memtable; each append
    /// drains it first.
    pub fn open(path: &Path, mode: WalMode, rotate_rx: Option<Receiver<()>>) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending {
                buf: Vec::new(),
                epoch: 0,
            }),
            sink: Mutex::new(Sink {
                file,
                epoch: 0,
                flushes_since_sync: 0,
            }),
        });

        let flusher = match mode {
            WalMode::Sync { .. } => None,
            WalMode::Async {
                flush_interval,
                sync_every_n_flushes,
                max_flush_retries,
                ..
            } => Some(Self::spawn_flusher(
                Arc::clone(&shared),
                flush_interval,
                sync_every_n_flushes,
                max_flush_retries,
            )?),
        };

        Ok(Self {
            path: path.to_path_buf(),
            mode,
            shared,
            rotate_rx,
            flusher: Mutex::new(flusher),
            frames: AtomicU64::new(0),
        })
    }

    fn spawn_flusher(
        shared: Arc<Shared>,
        interval: Duration,
        sync_every: u32,
        max_retries: u32,
    ) -> Result<Flusher> {
        let (signal, signal_rx) = channel::bounded::<()>(1);
        let shutdown = Shutdown::new();
        let handle = spawn_supervised(
            "wal-flusher",
            RestartPolicy::default(),
            shutdown.listener(),
            move |listener: &ShutdownListener| loop {
                select! {
                    recv(signal_rx) -> msg => {
                        if msg.is_err() {
                            shared.flush_with_retry(sync_every, max_retries);
                            return;
                        }
                    }
                    recv(listener.receiver()) -> _ => {
                        shared.flush_with_retry(sync_every, max_retries);
                        return;
                    }
                    default(interval) => {}
                }
                shared.flush_with_retry(sync_every, max_retries);
            },
        )?;
        Ok(Flusher {
            signal,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Append a command. In sync mode it is on disk (fsynced if configured)
    /// when this returns; in async mode it is buffered.
    pub fn append(&self, command: &WalCommand) -> Result<()> {
        let frame = command.encode_frame()?;
        self.drain_rotation()?;

        match self.mode {
            WalMode::Sync { fsync } => {
                let mut sink = self.shared.sink.lock();
                append_or_roll_back(&mut sink.file, &frame)
                    .map_err(|e| QuillError::WalWriteFailed(e.to_string()))?;
                if fsync {
                    sink.file
                        .sync_data()
                        .map_err(|e| QuillError::WalWriteFailed(e.to_string()))?;
                }
            }
            WalMode::Async { buffer_size, .. } => {
                let buffered = {
                    let mut pending = self.shared.pending.lock();
                    pending.buf.extend_from_slice(&frame);
                    pending.buf.len()
                };
                if buffered >= buffer_size {
                    // Buffer full: ask for a flush instead of blocking the writer.
                    if let Some(flusher) = self.flusher.lock().as_ref() {
                        let _ = flusher.signal.try_send(());
                    }
                }
            }
        }
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Truncate the log (and drop anything still buffered) to zero length
    pub fn rotate(&self) -> Result<()> {
        let mut pending = self.shared.pending.lock();
        pending.buf.clear();
        pending.epoch += 1;

        let mut sink = self.shared.sink.lock();
        sink.file.set_len(0)?;
        sink.file.seek(SeekFrom::Start(0))?;
        sink.epoch = pending.epoch;
        sink.flushes_since_sync = 0;
        tracing::debug!(path = %self.path.display(), "WAL rotated");
        Ok(())
    }

    fn drain_rotation(&self) -> Result<()> {
        if let Some(rx) = &self.rotate_rx {
            if rx.try_iter().count() > 0 {
                self.rotate()?;
            }
        }
        Ok(())
    }

    /// Write out anything buffered and fsync
    pub fn sync(&self) -> Result<()> {
        if let Some((batch, epoch)) = self.shared.take_pending() {
            self.shared
                .write_batch(&batch, epoch, u32::MAX)
                .map_err(|e| QuillError::WalWriteFailed(e.to_string()))?;
        }
        let mut sink = self.shared.sink.lock();
        sink.file.sync_data()?;
        sink.flushes_since_sync = 0;
        Ok(())
    }

    /// Stop the async flusher after a final flush. Idempotent.
    pub fn close(&self) -> Result<()> {
        let flusher = self.flusher.lock().take();
        if let Some(mut flusher) = flusher {
            flusher.shutdown.trigger();
            if let Some(handle) = flusher.handle.take() {
                let _ = handle.join();
            }
        }
        self.sync()
    }

    /// Frames appended through this writer
    pub fn frames_appended(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Bytes currently in the file (excluding the async buffer)
    pub fn file_len(&self) -> Result<u64> {
        Ok(self.shared.sink.lock().file.metadata()?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MutationLog for WalWriter {
    fn log(&self, key: &str, record: &Record) -> Result<()> {
        self.append(&WalCommand::from_record(key, record))
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "WAL close failed");
        }
    }
}
