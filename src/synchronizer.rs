//! Synchronization passes: drain pending hits per identity group, deliver them, reconcile the
//! queue with the outcome.
use std::{
    sync::{Arc, Mutex, TryLockError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rand::{thread_rng, Rng};

use crate::{
    clock::Clock,
    hit::{HitClass, HitId},
    hit_queue::HitQueue,
    transport::{HitBatch, HitTransport},
    Error, Result,
};

/// Configuration for [`Synchronizer`].
#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    /// Hits younger than this are left for the next pass, as their interaction burst may still be
    /// in progress.
    ///
    /// Defaults to [`SynchronizerConfig::DEFAULT_STALENESS_WINDOW`].
    pub staleness_window: Duration,
    /// Maximum number of hits per delivery request. Clamped to
    /// `MIN_BATCH_SIZE..=MAX_BATCH_SIZE`.
    pub batch_size: usize,
    /// Delivery attempts per batch within one pass, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry. Doubles with every further attempt.
    pub retry_base_delay: Duration,
    /// Upper bound of the delay between two attempts.
    pub max_retry_delay: Duration,
}

impl SynchronizerConfig {
    /// Default value for [`SynchronizerConfig::staleness_window`].
    pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_secs(5);
    /// Default value for [`SynchronizerConfig::batch_size`].
    pub const DEFAULT_BATCH_SIZE: usize = 50;
    /// Smallest effective batch size.
    pub const MIN_BATCH_SIZE: usize = 1;
    /// Largest effective batch size.
    pub const MAX_BATCH_SIZE: usize = 500;
    /// Default value for [`SynchronizerConfig::max_attempts`].
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    /// Default value for [`SynchronizerConfig::retry_base_delay`].
    pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
    /// Default value for [`SynchronizerConfig::max_retry_delay`].
    pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

    /// Create a new `SynchronizerConfig` using default configuration.
    pub fn new() -> SynchronizerConfig {
        SynchronizerConfig::default()
    }

    /// Update staleness window with the given value.
    pub fn with_staleness_window(mut self, window: Duration) -> SynchronizerConfig {
        self.staleness_window = window;
        self
    }

    /// Update batch size with the given value.
    pub fn with_batch_size(mut self, batch_size: usize) -> SynchronizerConfig {
        self.batch_size = batch_size;
        self
    }

    /// Update the number of delivery attempts per batch.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> SynchronizerConfig {
        self.max_attempts = max_attempts;
        self
    }

    /// Update base and maximum retry delays.
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> SynchronizerConfig {
        self.retry_base_delay = base;
        self.max_retry_delay = max;
        self
    }

    fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(Self::MIN_BATCH_SIZE, Self::MAX_BATCH_SIZE)
    }
}

impl Default for SynchronizerConfig {
    fn default() -> SynchronizerConfig {
        SynchronizerConfig {
            staleness_window: SynchronizerConfig::DEFAULT_STALENESS_WINDOW,
            batch_size: SynchronizerConfig::DEFAULT_BATCH_SIZE,
            max_attempts: SynchronizerConfig::DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: SynchronizerConfig::DEFAULT_RETRY_BASE_DELAY,
            max_retry_delay: SynchronizerConfig::DEFAULT_MAX_RETRY_DELAY,
        }
    }
}

/// Outcome of a synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Hits confirmed by the collector and removed from the queue.
    pub delivered: usize,
    /// Hits dropped because the collector rejected their batch as malformed.
    pub discarded: usize,
    /// Identity groups processed.
    pub groups: usize,
    /// Hits left queued because their batch kept failing in this pass.
    pub failed: usize,
    /// The trigger arrived while another pass was running and was folded into it.
    pub coalesced: bool,
}

/// How a delivery attempt ended.
#[derive(Debug)]
enum Outcome {
    Delivered,
    Rejected(u16),
    Retry(Error),
    Stop(Error),
}

fn classify(result: Result<u16>) -> Outcome {
    match result {
        Ok(200..=299) => Outcome::Delivered,
        Ok(401 | 403) => Outcome::Stop(Error::Unauthorized),
        // Request timeout and throttling say nothing about the payload.
        Ok(status @ (408 | 429)) => Outcome::Retry(Error::ServerError(status)),
        Ok(status @ 400..=499) => Outcome::Rejected(status),
        Ok(status) => Outcome::Retry(Error::ServerError(status)),
        Err(err) if err.is_recoverable() => Outcome::Retry(err),
        Err(err) => Outcome::Stop(err),
    }
}

/// Converts queued hits into deliveries.
///
/// Only one pass runs at a time. A pass triggered while another is in flight returns immediately
/// with [`SyncReport::coalesced`] set.
pub struct Synchronizer {
    queue: Arc<HitQueue>,
    transport: Arc<dyn HitTransport>,
    clock: Arc<dyn Clock>,
    config: SynchronizerConfig,
    in_flight: Mutex<()>,
}

impl Synchronizer {
    /// Create a synchronizer delivering hits from `queue` through `transport`.
    pub fn new(
        queue: Arc<HitQueue>,
        transport: Arc<dyn HitTransport>,
        clock: Arc<dyn Clock>,
        config: SynchronizerConfig,
    ) -> Synchronizer {
        Synchronizer {
            queue,
            transport,
            clock,
            config,
            in_flight: Mutex::new(()),
        }
    }

    /// Run one synchronization pass.
    ///
    /// Activation groups are processed before ordinary groups. Hits stay queued on any
    /// recoverable failure. A batch that keeps failing with a server status after `max_attempts`
    /// is left for the next pass and the remaining groups are still delivered; the pass then
    /// returns the first [`Error::RetriesExhausted`]. Connectivity loss and authorization failures
    /// stop the pass right away.
    pub fn synchronize(&self) -> Result<SyncReport> {
        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            // The mutex guards no data, so a pass that panicked leaves nothing to repair.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                log::debug!(target: "flagtrack", "synchronization already in flight, coalescing trigger");
                return Ok(SyncReport {
                    coalesced: true,
                    ..SyncReport::default()
                });
            }
        };

        self.run_pass()
    }

    fn session_start(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        chrono::Duration::from_std(self.config.staleness_window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(now)
    }

    fn run_pass(&self) -> Result<SyncReport> {
        self.queue.sweep_sent()?;

        let session_start = self.session_start();
        let groups = self.queue.pending_groups(session_start)?;
        if groups.is_empty() {
            log::trace!(target: "flagtrack", "nothing to synchronize");
            return Ok(SyncReport::default());
        }
        log::debug!(target: "flagtrack",
                    activation_groups = groups.activation.len(),
                    ordinary_groups = groups.ordinary.len();
                    "starting synchronization pass");

        let mut report = SyncReport::default();
        let mut first_failure = None;
        for (class, identity) in groups.in_priority_order() {
            let hits =
                self.queue
                    .drain(identity, class, session_start, self.config.effective_batch_size())?;
            if hits.is_empty() {
                // Purged or delivered since the groups were listed.
                continue;
            }

            report.groups += 1;
            let batch = HitBatch::new(identity, &hits);
            let ids = batch.ids();
            let delivered = match self.deliver_with_retry(&batch) {
                Ok(delivered) => delivered,
                Err(err) if fails_every_group(&err) => return Err(err),
                Err(err) => {
                    log::warn!(target: "flagtrack",
                               anonymous_id = identity.anonymous_id.as_str(),
                               hits = ids.len();
                               "leaving batch queued, moving on to the next group: {err}");
                    report.failed += ids.len();
                    first_failure.get_or_insert(err);
                    continue;
                }
            };
            match delivered {
                Delivered::Accepted => {
                    self.acknowledge(&ids)?;
                    report.delivered += ids.len();
                    log::info!(target: "flagtrack",
                               anonymous_id = identity.anonymous_id.as_str(),
                               hits = ids.len(),
                               activation = class == HitClass::Activation;
                               "delivered batch");
                }
                Delivered::Rejected(status) => {
                    log::error!(target: "flagtrack",
                                anonymous_id = identity.anonymous_id.as_str(),
                                status,
                                hits = ids.len();
                                "collector rejected batch as malformed, discarding it");
                    self.acknowledge(&ids)?;
                    report.discarded += ids.len();
                }
            }
        }

        log::debug!(target: "flagtrack",
                    delivered = report.delivered,
                    discarded = report.discarded,
                    failed = report.failed,
                    groups = report.groups;
                    "synchronization pass finished");
        match first_failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Mark delivered hits as sent, then remove them. The status update comes first so that a
    /// crash before removal cannot cause the hits to be delivered again.
    fn acknowledge(&self, ids: &[HitId]) -> Result<()> {
        self.queue.mark_sent(ids)?;
        if let Err(err) = self.queue.remove(ids) {
            // Sent hits are swept at the start of the next pass.
            log::warn!(target: "flagtrack", hits = ids.len(); "failed to remove sent hits: {err}");
        }
        Ok(())
    }

    fn deliver_with_retry(&self, batch: &HitBatch<'_>) -> Result<Delivered> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match classify(self.transport.deliver_batch(batch)) {
                Outcome::Delivered => return Ok(Delivered::Accepted),
                Outcome::Rejected(status) => return Ok(Delivered::Rejected(status)),
                Outcome::Stop(err) => {
                    log::warn!(target: "flagtrack", "stopping synchronization pass: {err}");
                    return Err(err);
                }
                Outcome::Retry(err) if attempt >= max_attempts => {
                    log::warn!(target: "flagtrack",
                               anonymous_id = batch.identity.anonymous_id.as_str(),
                               attempts = attempt;
                               "giving up on batch for this pass: {err}");
                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Outcome::Retry(err) => {
                    let delay = backoff(
                        attempt,
                        self.config.retry_base_delay,
                        self.config.max_retry_delay,
                    );
                    log::warn!(target: "flagtrack",
                               attempt,
                               delay_ms = delay.as_millis() as u64;
                               "batch delivery failed, retrying: {err}");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Whether `err` would hit every remaining group as well, so the pass should stop.
///
/// A batch that exhausted its retries on a server status is specific to that batch. Lost
/// connectivity and authorization failures are not.
fn fails_every_group(err: &Error) -> bool {
    match err {
        Error::RetriesExhausted { last, .. } => !matches!(**last, Error::ServerError(_)),
        _ => true,
    }
}

enum Delivered {
    Accepted,
    Rejected(u16),
}

/// Delay after the `attempt`-th failed attempt: exponential in `attempt`, capped at `max`, with
/// up to half of it subtracted at random so that clients recovering together do not retry in
/// lockstep.
fn backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponential = base
        .checked_mul(1u32 << attempt.saturating_sub(1).min(16))
        .unwrap_or(max)
        .min(max);
    jitter(exponential, exponential / 2)
}

/// Apply randomized `jitter` to `interval`.
pub(crate) fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{atomic::Ordering, mpsc, Arc},
        time::Duration,
    };

    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;
    use crate::{
        hit::{HitType, NewHit},
        store::{MemoryStore, RecordStore, SqliteStore},
        testing::{init_logger, FakeTransport, ManualClock, Reply},
        visitor::Identity,
    };

    struct Fixture {
        clock: Arc<ManualClock>,
        queue: Arc<HitQueue>,
        transport: Arc<FakeTransport>,
        synchronizer: Arc<Synchronizer>,
    }

    fn fixture_with(store: Arc<dyn RecordStore>, config: SynchronizerConfig) -> Fixture {
        init_logger();
        let clock = Arc::new(ManualClock::new());
        let queue = Arc::new(HitQueue::new(store, clock.clone()));
        let transport = FakeTransport::ok();
        let synchronizer = Arc::new(Synchronizer::new(
            queue.clone(),
            transport.clone(),
            clock.clone(),
            config,
        ));
        Fixture {
            clock,
            queue,
            transport,
            synchronizer,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            Arc::new(MemoryStore::new()),
            SynchronizerConfig::new()
                .with_staleness_window(Duration::from_secs(5))
                .with_retry_delays(Duration::ZERO, Duration::ZERO),
        )
    }

    fn event() -> NewHit {
        NewHit::new(HitType::Event, json!({"action": "click"}))
    }

    fn activation() -> NewHit {
        NewHit::new(HitType::Activation, json!({"variationId": "var1"}))
    }

    impl Fixture {
        fn age(&self) {
            self.clock.advance(ChronoDuration::seconds(10));
        }
    }

    #[test]
    fn delivers_and_removes_pending_hits() {
        let f = fixture();
        let a1 = Identity::anonymous("a1");
        let ids: Vec<_> = (0..3).map(|_| f.queue.enqueue(&a1, event()).unwrap()).collect();
        f.age();

        let report = f.synchronizer.synchronize().unwrap();

        assert_eq!(report.delivered, 3);
        assert_eq!(report.groups, 1);
        assert_eq!(f.transport.deliveries()[0].hit_ids, ids);
        assert_eq!(f.queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn leaves_fresh_hits_alone() {
        let f = fixture();
        f.queue.enqueue(&Identity::anonymous("a1"), event()).unwrap();

        let report = f.synchronizer.synchronize().unwrap();

        assert_eq!(report, SyncReport::default());
        assert_eq!(f.transport.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(f.queue.pending_count().unwrap(), 1);
    }

    #[test]
    fn server_error_keeps_hits_until_a_later_pass_succeeds() {
        let f = fixture_with(
            Arc::new(SqliteStore::in_memory().unwrap()),
            SynchronizerConfig::new().with_max_attempts(1),
        );
        let a1 = Identity::anonymous("a1");
        f.queue.enqueue(&a1, event()).unwrap();
        f.queue.enqueue(&a1, event()).unwrap();
        f.age();
        f.transport.set_default(Reply::Status(500));

        let err = f.synchronizer.synchronize().unwrap_err();

        assert!(matches!(
            err,
            Error::RetriesExhausted { attempts: 1, ref last } if matches!(**last, Error::ServerError(500))
        ));
        assert_eq!(f.queue.pending_count().unwrap(), 2);

        f.transport.set_default(Reply::Status(200));
        let report = f.synchronizer.synchronize().unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(f.queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn retries_within_a_pass() {
        let f = fixture();
        f.queue.enqueue(&Identity::anonymous("a1"), event()).unwrap();
        f.age();
        f.transport
            .script([Reply::ConnectionRefused, Reply::Status(503)]);

        let report = f.synchronizer.synchronize().unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(f.transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn malformed_batches_are_discarded() {
        let f = fixture();
        f.queue.enqueue(&Identity::anonymous("a1"), event()).unwrap();
        f.age();
        f.transport.script([Reply::Status(400)]);

        let report = f.synchronizer.synchronize().unwrap();

        assert_eq!(report.discarded, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(f.transport.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(f.queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn timeouts_and_throttling_are_retried_not_discarded() {
        for status in [408, 429] {
            let f = fixture();
            let id = f.queue.enqueue(&Identity::anonymous("a1"), event()).unwrap();
            f.age();
            f.transport.script([Reply::Status(status)]);

            let report = f.synchronizer.synchronize().unwrap();

            assert_eq!(report.discarded, 0, "status {status}");
            assert_eq!(report.delivered, 1, "status {status}");
            assert_eq!(f.transport.attempts.load(Ordering::SeqCst), 2);
            assert_eq!(f.transport.deliveries()[0].hit_ids, vec![id]);
        }
    }

    #[test]
    fn throttled_batch_stays_queued_when_retries_run_out() {
        let f = fixture_with(
            Arc::new(MemoryStore::new()),
            SynchronizerConfig::new()
                .with_max_attempts(2)
                .with_retry_delays(Duration::ZERO, Duration::ZERO),
        );
        f.queue.enqueue(&Identity::anonymous("a1"), event()).unwrap();
        f.age();
        f.transport.set_default(Reply::Status(429));

        let err = f.synchronizer.synchronize().unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(f.queue.pending_count().unwrap(), 1);
    }

    #[test]
    fn failing_group_does_not_starve_the_others() {
        let f = fixture_with(
            Arc::new(MemoryStore::new()),
            SynchronizerConfig::new().with_max_attempts(1),
        );
        f.queue.enqueue(&Identity::anonymous("a1"), event()).unwrap();
        let other = f.queue.enqueue(&Identity::anonymous("a2"), event()).unwrap();
        f.age();
        // Groups are visited in identity order, so only a1 gets the 500.
        f.transport.script([Reply::Status(500)]);

        let err = f.synchronizer.synchronize().unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(f.transport.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(f.transport.deliveries().len(), 1);
        assert_eq!(f.transport.deliveries()[0].hit_ids, vec![other]);
        assert_eq!(f.queue.pending_count().unwrap(), 1);

        let report = f.synchronizer.synchronize().unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(f.queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn lost_connectivity_stops_the_pass() {
        let f = fixture_with(
            Arc::new(MemoryStore::new()),
            SynchronizerConfig::new().with_max_attempts(1),
        );
        f.queue.enqueue(&Identity::anonymous("a1"), event()).unwrap();
        f.queue.enqueue(&Identity::anonymous("a2"), event()).unwrap();
        f.age();
        f.transport.set_default(Reply::ConnectionRefused);

        let err = f.synchronizer.synchronize().unwrap_err();

        assert!(matches!(
            err,
            Error::RetriesExhausted { ref last, .. } if matches!(**last, Error::Io(_))
        ));
        assert_eq!(f.transport.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(f.queue.pending_count().unwrap(), 2);
    }

    #[test]
    fn unauthorized_stops_the_pass_and_keeps_hits() {
        let f = fixture();
        f.queue.enqueue(&Identity::anonymous("a1"), event()).unwrap();
        f.queue.enqueue(&Identity::anonymous("a2"), event()).unwrap();
        f.age();
        f.transport.set_default(Reply::Status(401));

        let err = f.synchronizer.synchronize().unwrap_err();

        assert!(matches!(err, Error::Unauthorized));
        assert_eq!(f.transport.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(f.queue.pending_count().unwrap(), 2);
    }

    #[test]
    fn activation_groups_go_first_and_are_never_mixed() {
        let f = fixture();
        let a1 = Identity::anonymous("a1");
        let event_id = f.queue.enqueue(&a1, event()).unwrap();
        let activation_id = f.queue.enqueue(&a1, activation()).unwrap();
        f.age();

        f.synchronizer.synchronize().unwrap();

        let deliveries = f.transport.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].hit_ids, vec![activation_id]);
        assert_eq!(deliveries[1].hit_ids, vec![event_id]);
    }

    #[test]
    fn batches_are_bounded() {
        let f = fixture_with(
            Arc::new(MemoryStore::new()),
            SynchronizerConfig::new().with_batch_size(2),
        );
        let a1 = Identity::anonymous("a1");
        for _ in 0..5 {
            f.queue.enqueue(&a1, event()).unwrap();
        }
        f.age();

        assert_eq!(f.synchronizer.synchronize().unwrap().delivered, 2);
        assert_eq!(f.synchronizer.synchronize().unwrap().delivered, 2);
        assert_eq!(f.synchronizer.synchronize().unwrap().delivered, 1);
        assert_eq!(f.queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn leftover_sent_hits_are_not_delivered_again() {
        let f = fixture();
        let a1 = Identity::anonymous("a1");
        let delivered = f.queue.enqueue(&a1, event()).unwrap();
        let pending = f.queue.enqueue(&a1, event()).unwrap();
        // A previous pass died between marking and removing.
        f.queue.mark_sent(&[delivered]).unwrap();
        f.age();

        f.synchronizer.synchronize().unwrap();

        assert_eq!(f.transport.deliveries()[0].hit_ids, vec![pending]);
        assert_eq!(f.queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn concurrent_triggers_coalesce() {
        let f = fixture();
        f.queue.enqueue(&Identity::anonymous("a1"), event()).unwrap();
        f.queue.enqueue(&Identity::anonymous("a2"), event()).unwrap();
        f.age();

        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        f.transport.on_deliver(move || {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
        });

        let first = {
            let synchronizer = f.synchronizer.clone();
            std::thread::spawn(move || synchronizer.synchronize())
        };
        entered_rx.recv().unwrap();

        // The first pass is blocked inside the transport.
        let second = f.synchronizer.synchronize().unwrap();
        assert!(second.coalesced);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        let first = first.join().unwrap().unwrap();

        assert!(!first.coalesced);
        assert_eq!(first.delivered, 2);
        assert_eq!(f.transport.attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);

        for attempt in 1..10 {
            let delay = backoff(attempt, base, max);
            let ceiling = (base * 2u32.pow(attempt - 1)).min(max);
            assert!(delay <= ceiling, "{delay:?} must be <= {ceiling:?}");
            assert!(delay >= ceiling / 2, "{delay:?} must be >= {:?}", ceiling / 2);
        }
        assert!(backoff(u32::MAX, base, max) <= max);
    }

    #[test]
    fn jitter_stays_within_interval() {
        let interval = Duration::from_secs(30);

        for _ in 0..100 {
            let delay = jitter(interval, Duration::from_secs(10));
            assert!(delay <= interval && delay >= Duration::from_secs(20), "{delay:?}");
        }
        // Jitter larger than the interval saturates instead of underflowing.
        assert!(jitter(Duration::from_secs(1), interval) <= Duration::from_secs(1));
        assert_eq!(jitter(interval, Duration::ZERO), interval);
    }
}
