//! Sticky bucketing cache.
//!
//! Once a visitor is assigned a variation for a variation group, the assignment is recorded here
//! and returned on every subsequent lookup, across restarts and while offline. The cache never
//! decides an allocation itself: it records decisions made by the targeting engine.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{store::RecordStore, Result};

/// An allocation decision for `(visitor_id, variation_group_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRecord {
    /// Key of the visitor the allocation belongs to.
    pub visitor_id: String,
    /// Variation group the allocation was decided for.
    pub variation_group_id: String,
    /// Campaign the variation group belongs to.
    pub campaign_id: String,
    /// Variation the visitor was allocated to.
    pub variation_id: String,
    /// Whether the variation is the experiment's control.
    pub is_reference: bool,
}

/// Write-through allocation cache on top of a [`RecordStore`].
#[derive(Clone)]
pub struct AllocationCache {
    store: Arc<dyn RecordStore>,
}

impl AllocationCache {
    /// Create a cache over `store`.
    pub fn new(store: Arc<dyn RecordStore>) -> AllocationCache {
        AllocationCache { store }
    }

    /// Sticky allocation of `visitor_id` for `variation_group_id`, if one was recorded.
    pub fn get(
        &self,
        visitor_id: &str,
        variation_group_id: &str,
    ) -> Result<Option<AllocationRecord>> {
        let record = self
            .store
            .get_allocation(visitor_id, variation_group_id)
            .inspect_err(|err| {
                log::error!(target: "flagtrack", visitor_id, variation_group_id; "failed to read allocation: {err}");
            })?;

        log::trace!(target: "flagtrack",
                    visitor_id,
                    variation_group_id,
                    allocation:serde = record;
                    "read allocation");
        Ok(record)
    }

    /// Record `record`, replacing any previous allocation for the same key.
    pub fn put(&self, record: &AllocationRecord) -> Result<()> {
        self.store.put_allocation(record).inspect_err(|err| {
            log::error!(target: "flagtrack", allocation:serde = record; "failed to write allocation: {err}");
        })?;
        log::trace!(target: "flagtrack", allocation:serde = record; "recorded allocation");
        Ok(())
    }

    /// Remove every allocation of `visitor_id`. Returns the number of removed records.
    pub fn clear(&self, visitor_id: &str) -> Result<usize> {
        let removed = self.store.delete_allocations(visitor_id)?;
        log::debug!(target: "flagtrack", visitor_id, removed; "cleared allocations");
        Ok(removed)
    }
}
