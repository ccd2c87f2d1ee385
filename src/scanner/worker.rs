//! Background thread driving the synchronizer.
//!
//! - One dedicated thread owns the `Synchronizer` (and its store handle)
//! - Commands arrive over a flume channel; waiting on it is the sleep
//!   between cycles, so a stop request interrupts the wait immediately
//! - The foreground pauses work through a shared flag without a round trip

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use super::synchronizer::{PurgeMode, Synchronizer};

/// Timing of the synchronizer loop.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Wait between full cycles.
    pub cycle_interval: Duration,
    /// Wait between cycles while queued files remain.
    pub idle_poll: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(5),
            idle_poll: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    ScanNow,
    Purge,
    Stop,
}

/// Spawns the synchronizer thread.
pub struct SyncWorker;

impl SyncWorker {
    pub fn spawn(sync: Synchronizer, config: SyncConfig) -> Result<SyncHandle> {
        let (tx, rx) = flume::unbounded();
        let paused = Arc::new(AtomicBool::new(false));

        let thread_paused = Arc::clone(&paused);
        let thread = thread::Builder::new()
            .name("picdeck-sync".to_string())
            .spawn(move || worker_loop(sync, rx, thread_paused, config))
            .context("Failed to spawn synchronizer thread")?;

        debug!(?config, "Started synchronizer thread");
        Ok(SyncHandle {
            commands: tx,
            paused,
            thread: Some(thread),
        })
    }
}

/// Foreground handle onto the synchronizer thread.
///
/// Dropping the handle stops the thread and waits for it.
pub struct SyncHandle {
    commands: Sender<Command>,
    paused: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl SyncHandle {
    /// Pauses or resumes extraction and purging. The thread stays alive and
    /// keeps answering commands while paused.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Makes the next completed cycle run a hard purge.
    pub fn purge_files(&self) {
        self.send(Command::Purge);
    }

    /// Starts the next cycle without waiting out the interval.
    pub fn scan_now(&self) {
        self.send(Command::ScanNow);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!(?command, "Synchronizer thread is gone");
        }
    }

    /// Stops the thread and blocks until it has finished its current cycle,
    /// checkpointed and closed the store.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // The thread may already have exited on a disconnected channel.
        let _ = self.commands.send(Command::Stop);
        thread
            .join()
            .map_err(|_| anyhow!("Synchronizer thread panicked"))?
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Synchronizer shutdown failed: {:#}", e);
        }
    }
}

fn worker_loop(
    mut sync: Synchronizer,
    commands: Receiver<Command>,
    paused: Arc<AtomicBool>,
    config: SyncConfig,
) -> Result<()> {
    info!("Synchronizer started for {:?}", sync.picture_dir());
    let mut purge = PurgeMode::Soft;

    'outer: loop {
        match sync.run_cycle(&paused, purge) {
            Ok(report) => {
                if report.purged == Some(PurgeMode::Hard) {
                    purge = PurgeMode::Soft;
                }
            }
            Err(e) => error!("Synchronizer cycle failed: {:#}", e),
        }

        let wait = if sync.has_pending_work() {
            config.idle_poll
        } else {
            config.cycle_interval
        };

        let mut next = commands.recv_timeout(wait);
        loop {
            match next {
                Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break 'outer,
                Ok(Command::Purge) => {
                    debug!("Hard purge requested");
                    purge = PurgeMode::Hard;
                }
                Ok(Command::ScanNow) | Err(RecvTimeoutError::Timeout) => {}
            }
            // Handle everything already queued before the next cycle.
            next = match commands.try_recv() {
                Ok(command) => Ok(command),
                Err(flume::TryRecvError::Empty) => break,
                Err(flume::TryRecvError::Disconnected) => Err(RecvTimeoutError::Disconnected),
            };
        }
    }

    info!("Synchronizer stopping");
    sync.close()
}
