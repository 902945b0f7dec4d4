//! A background thread that runs synchronization passes periodically and on demand, so network
//! sends never happen on an application thread.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{RecvTimeoutError, SyncSender, TrySendError},
        Arc, Condvar, Mutex, PoisonError,
    },
    time::Duration,
};

use crate::{
    synchronizer::{jitter, SyncReport, Synchronizer},
    Error, Result,
};

/// Configuration for [`SynchronizerThread`].
#[derive(Debug, Clone)]
pub struct SyncThreadConfig {
    /// Interval between periodic passes.
    ///
    /// Defaults to [`SyncThreadConfig::DEFAULT_INTERVAL`].
    pub interval: Duration,
    /// Randomized duration subtracted from every interval, so that many devices started together
    /// do not synchronize in lockstep.
    ///
    /// Defaults to [`SyncThreadConfig::DEFAULT_JITTER`].
    pub jitter: Duration,
}

impl SyncThreadConfig {
    /// Default value for [`SyncThreadConfig::interval`].
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`SyncThreadConfig::jitter`].
    pub const DEFAULT_JITTER: Duration = Duration::from_secs(3);

    /// Create a new `SyncThreadConfig` using default configuration.
    pub fn new() -> SyncThreadConfig {
        SyncThreadConfig::default()
    }

    /// Update interval with the given value.
    pub fn with_interval(mut self, interval: Duration) -> SyncThreadConfig {
        self.interval = interval;
        self
    }

    /// Update jitter with the given value.
    pub fn with_jitter(mut self, jitter: Duration) -> SyncThreadConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for SyncThreadConfig {
    fn default() -> SyncThreadConfig {
        SyncThreadConfig {
            interval: SyncThreadConfig::DEFAULT_INTERVAL,
            jitter: SyncThreadConfig::DEFAULT_JITTER,
        }
    }
}

enum Command {
    Synchronize,
    Stop,
}

/// Outcome of the latest pass, shared with the thread.
#[derive(Default)]
struct LastOutcome {
    outcome: Mutex<Option<Result<SyncReport>>>,
    changed: Condvar,
}

impl LastOutcome {
    fn set(&self, value: Result<SyncReport>) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        self.changed.notify_all();
    }
}

/// Runs [`Synchronizer`] passes on a dedicated thread.
///
/// Use [`Client::start_synchronizer_thread`](crate::Client::start_synchronizer_thread) to get an
/// instance of it.
pub struct SynchronizerThread {
    join_handle: std::thread::JoinHandle<()>,
    commands: SyncSender<Command>,
    stopping: Arc<AtomicBool>,
    last: Arc<LastOutcome>,
}

impl SynchronizerThread {
    /// Start the thread. The first pass runs after one interval or on the first
    /// [`trigger`](Self::trigger).
    pub fn start(
        synchronizer: Arc<Synchronizer>,
        config: SyncThreadConfig,
    ) -> std::io::Result<SynchronizerThread> {
        // A small buffer is enough: triggers arriving while one is queued are redundant, and the
        // pass they would start is already pending.
        let (commands, receiver) = std::sync::mpsc::sync_channel::<Command>(1);
        let last = Arc::new(LastOutcome::default());
        let stopping = Arc::new(AtomicBool::new(false));

        let join_handle = {
            let last = Arc::clone(&last);
            let stopping = Arc::clone(&stopping);
            std::thread::Builder::new()
                .name("flagtrack-sync".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| loop {
                        let timeout = jitter(config.interval, config.jitter);
                        let command = receiver.recv_timeout(timeout);
                        // Checked after every wakeup: a trigger queued before `stop` must not
                        // start another pass.
                        if stopping.load(Ordering::Acquire) {
                            log::debug!(target: "flagtrack", "synchronizer thread received stop signal");
                            return;
                        }
                        match command {
                            Err(RecvTimeoutError::Timeout) | Ok(Command::Synchronize) => {
                                let outcome = synchronizer.synchronize();
                                if let Err(err) = &outcome {
                                    // Background failures are only visible in logs and in
                                    // `last_outcome`.
                                    log::warn!(target: "flagtrack", "background synchronization failed: {err}");
                                }
                                last.set(outcome);
                            }
                            Ok(Command::Stop) => {
                                log::debug!(target: "flagtrack", "synchronizer thread received stop command");
                                return;
                            }
                            Err(RecvTimeoutError::Disconnected) => {
                                log::debug!(target: "flagtrack", "synchronizer thread disconnected");
                                return;
                            }
                        }
                    }));

                    if result.is_err() {
                        last.set(Err(Error::SynchronizerThreadPanicked));
                    }
                })?
        };

        Ok(SynchronizerThread {
            join_handle,
            commands,
            stopping,
            last,
        })
    }

    /// Request a pass now (timer tick, app foreground/background transition, user action).
    ///
    /// Returns immediately. If a trigger is already waiting, this one is folded into it.
    pub fn trigger(&self) {
        match self.commands.try_send(Command::Synchronize) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                log::debug!(target: "flagtrack", "synchronizer thread is not running, ignoring trigger");
            }
        }
    }

    /// Outcome of the most recent pass, `None` until the first pass finishes.
    pub fn last_outcome(&self) -> Option<Result<SyncReport>> {
        self.last
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Block until the first pass has finished or `timeout` elapses, returning the latest
    /// outcome.
    pub fn wait_for_pass(&self, timeout: Duration) -> Option<Result<SyncReport>> {
        let guard = self
            .last
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .last
            .changed
            .wait_timeout_while(guard, timeout, |outcome| outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Stop the thread.
    ///
    /// This function does not wait for the thread to actually stop. A pass in flight runs to
    /// completion; hits it did not acknowledge stay queued.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        // Wake an idle thread. A full buffer means a command is already waiting, and the thread
        // sees the flag when it takes that one.
        let _ = self.commands.try_send(Command::Stop);
    }

    /// Stop the thread and block waiting for it to exit.
    pub fn shutdown(self) -> Result<()> {
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::SynchronizerThreadPanicked)?;

        Ok(())
    }
}
