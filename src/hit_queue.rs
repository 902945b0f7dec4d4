//! Durable queue of hits awaiting delivery.
//!
//! Hits are persisted with status `PENDING` on [`enqueue`](HitQueue::enqueue) and leave the queue
//! in two steps once delivered: [`mark_sent`](HitQueue::mark_sent), then
//! [`remove`](HitQueue::remove). Both are idempotent, and `SENT` hits are never drained again,
//! so a crash between the two steps cannot cause a second delivery.
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    clock::Clock,
    hit::{Hit, HitClass, HitId, HitStatus, NewHit},
    store::{HitQuery, RecordStore},
    visitor::Identity,
    Result,
};

/// Identity groups with pending hits, split by delivery class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingGroups {
    /// Groups with pending activation hits.
    pub activation: Vec<Identity>,
    /// Groups with other pending hits.
    pub ordinary: Vec<Identity>,
}

impl PendingGroups {
    /// Whether no group has pending hits.
    pub fn is_empty(&self) -> bool {
        self.activation.is_empty() && self.ordinary.is_empty()
    }

    /// All groups in processing order: activation groups first.
    pub fn in_priority_order(&self) -> impl Iterator<Item = (HitClass, &Identity)> {
        self.activation
            .iter()
            .map(|identity| (HitClass::Activation, identity))
            .chain(
                self.ordinary
                    .iter()
                    .map(|identity| (HitClass::Ordinary, identity)),
            )
    }
}

/// Durable queue of hits, persisted in a [`RecordStore`].
pub struct HitQueue {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl HitQueue {
    /// Create a queue over `store`, stamping hits with `clock`.
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> HitQueue {
        HitQueue { store, clock }
    }

    /// Persist `hit` as pending for `identity` and return its id.
    ///
    /// Never touches the network. When the store fails, the hit is dropped and the error is
    /// returned.
    pub fn enqueue(&self, identity: &Identity, hit: NewHit) -> Result<HitId> {
        let hit_type = hit.hit_type.as_str();
        let timestamp = self.clock.now();
        let hit = self
            .store
            .insert_hit(identity, hit, timestamp, HitStatus::Pending)
            .inspect_err(|err| {
                log::error!(target: "flagtrack",
                            anonymous_id = identity.anonymous_id.as_str(),
                            hit_type;
                            "failed to persist hit, dropping it: {err}");
            })?;

        log::trace!(target: "flagtrack", hit_id = hit.id, hit_type; "queued hit");
        Ok(hit.id)
    }

    /// Identity groups with at least one pending hit older than `session_start`.
    pub fn pending_groups(&self, session_start: DateTime<Utc>) -> Result<PendingGroups> {
        let groups = |class: HitClass| {
            self.store.hit_groups(
                &HitQuery::new()
                    .with_status(HitStatus::Pending)
                    .older_than(session_start)
                    .with_hit_type(class),
            )
        };

        Ok(PendingGroups {
            activation: groups(HitClass::Activation)?,
            ordinary: groups(HitClass::Ordinary)?,
        })
    }

    /// Up to `limit` pending hits of `class` for `identity` older than `session_start`, oldest
    /// first.
    pub fn drain(
        &self,
        identity: &Identity,
        class: HitClass,
        session_start: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Hit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let hits = self.store.query_hits(
            &HitQuery::new()
                .for_identity(identity.clone())
                .with_status(HitStatus::Pending)
                .older_than(session_start)
                .with_hit_type(class)
                .limit_per_group(limit),
        )?;
        Ok(hits)
    }

    /// Mark hits as delivered. Unknown ids are ignored.
    pub fn mark_sent(&self, ids: &[HitId]) -> Result<()> {
        let updated = self.store.set_hit_status(ids, HitStatus::Sent)?;
        log::trace!(target: "flagtrack", requested = ids.len(), updated; "marked hits as sent");
        Ok(())
    }

    /// Remove hits from the queue. Unknown ids are ignored.
    pub fn remove(&self, ids: &[HitId]) -> Result<()> {
        let removed = self.store.delete_hits(ids)?;
        log::trace!(target: "flagtrack", requested = ids.len(), removed; "removed hits");
        Ok(())
    }

    /// Remove hits that were marked as sent but never removed, e.g. because the process died in
    /// between.
    pub fn sweep_sent(&self) -> Result<usize> {
        let removed = self.store.delete_hits_with_status(HitStatus::Sent)?;
        if removed > 0 {
            log::debug!(target: "flagtrack", removed; "swept leftover sent hits");
        }
        Ok(removed)
    }

    /// Delete every hit recorded under `id`, either as visitor id or anonymous id.
    pub fn purge_visitor(&self, id: &str) -> Result<usize> {
        let removed = self.store.delete_hits_for_visitor(id)?;
        log::debug!(target: "flagtrack", visitor_id = id, removed; "purged hits");
        Ok(removed)
    }

    /// Number of pending hits.
    pub fn pending_count(&self) -> Result<usize> {
        Ok(self
            .store
            .count_hits(&HitQuery::new().with_status(HitStatus::Pending))?)
    }
}
