//! Durable record store.
//!
//! [`RecordStore`] is the only shared mutable resource in the crate. It owns the persisted
//! representation of hits, allocation records and opaque documents (visitor contexts, the
//! installation id). Every method is atomic: a crash during a call leaves the store in either the
//! pre- or the post-state of that call.
//!
//! Two implementations are provided: [`SqliteStore`] for on-device persistence and
//! [`MemoryStore`] for hosts without disk and for tests.
use chrono::{DateTime, Utc};

use crate::{
    allocation_cache::AllocationRecord,
    hit::{Hit, HitClass, HitId, HitStatus, HitType, NewHit},
    visitor::Identity,
    StoreError,
};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Result of a store operation.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Filter on the type of a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HitTypeFilter {
    /// Every hit type.
    #[default]
    Any,
    /// Only the given type.
    Only(HitType),
    /// Every type but the given one.
    Except(HitType),
}

impl HitTypeFilter {
    /// Whether `hit_type` passes the filter.
    pub fn matches(&self, hit_type: HitType) -> bool {
        match *self {
            HitTypeFilter::Any => true,
            HitTypeFilter::Only(t) => hit_type == t,
            HitTypeFilter::Except(t) => hit_type != t,
        }
    }
}

impl From<HitClass> for HitTypeFilter {
    fn from(class: HitClass) -> HitTypeFilter {
        match class {
            HitClass::Activation => HitTypeFilter::Only(HitType::Activation),
            HitClass::Ordinary => HitTypeFilter::Except(HitType::Activation),
        }
    }
}

/// Predicate for hit queries.
///
/// Results are grouped by identity and ordered by timestamp ascending within each group. When
/// `limit_per_group` is set, at most that many hits are returned for every group.
#[derive(Debug, Clone, Default)]
pub struct HitQuery {
    /// Only hits with this status.
    pub status: Option<HitStatus>,
    /// Only hits strictly older than this instant.
    pub older_than: Option<DateTime<Utc>>,
    /// Hit type filter.
    pub hit_type: HitTypeFilter,
    /// Only hits of this identity group.
    pub identity: Option<Identity>,
    /// At most this many hits per group, oldest first.
    pub limit_per_group: Option<usize>,
}

impl HitQuery {
    /// A query matching every hit.
    pub fn new() -> HitQuery {
        HitQuery::default()
    }

    /// Restrict to `status`.
    pub fn with_status(mut self, status: HitStatus) -> HitQuery {
        self.status = Some(status);
        self
    }

    /// Restrict to hits strictly older than `instant`.
    pub fn older_than(mut self, instant: DateTime<Utc>) -> HitQuery {
        self.older_than = Some(instant);
        self
    }

    /// Restrict hit types.
    pub fn with_hit_type(mut self, filter: impl Into<HitTypeFilter>) -> HitQuery {
        self.hit_type = filter.into();
        self
    }

    /// Restrict to one identity group.
    pub fn for_identity(mut self, identity: Identity) -> HitQuery {
        self.identity = Some(identity);
        self
    }

    /// Limit the number of hits per group.
    pub fn limit_per_group(mut self, limit: usize) -> HitQuery {
        self.limit_per_group = Some(limit);
        self
    }

    pub(crate) fn matches(&self, hit: &Hit) -> bool {
        self.status.map_or(true, |status| hit.status == status)
            && self.older_than.map_or(true, |t| hit.timestamp < t)
            && self.hit_type.matches(hit.hit_type)
            && self.identity.as_ref().map_or(true, |id| &hit.identity == id)
    }
}

/// Storage contract for hits, allocations and opaque documents.
pub trait RecordStore: Send + Sync {
    /// Persist a new hit and return it with its assigned id.
    fn insert_hit(
        &self,
        identity: &Identity,
        hit: NewHit,
        timestamp: DateTime<Utc>,
        status: HitStatus,
    ) -> StoreResult<Hit>;

    /// Hit by id.
    fn get_hit(&self, id: HitId) -> StoreResult<Option<Hit>>;

    /// Set `status` on every existing hit in `ids`. Missing ids are ignored. Returns the number of
    /// updated hits.
    fn set_hit_status(&self, ids: &[HitId], status: HitStatus) -> StoreResult<usize>;

    /// Delete hits by id. Missing ids are ignored. Returns the number of deleted hits.
    fn delete_hits(&self, ids: &[HitId]) -> StoreResult<usize>;

    /// Delete every hit with `status`. Payloads are not decoded.
    fn delete_hits_with_status(&self, status: HitStatus) -> StoreResult<usize>;

    /// Delete every hit whose visitor id or anonymous id equals `id`.
    fn delete_hits_for_visitor(&self, id: &str) -> StoreResult<usize>;

    /// Hits matching `query`, grouped by identity and ordered by timestamp within each group.
    fn query_hits(&self, query: &HitQuery) -> StoreResult<Vec<Hit>>;

    /// Distinct identities having at least one hit matching `query`. `limit_per_group` is
    /// ignored.
    fn hit_groups(&self, query: &HitQuery) -> StoreResult<Vec<Identity>>;

    /// Number of hits matching `query`.
    fn count_hits(&self, query: &HitQuery) -> StoreResult<usize>;

    /// Insert or replace the allocation for `(visitor_id, variation_group_id)`.
    fn put_allocation(&self, record: &AllocationRecord) -> StoreResult<()>;

    /// Allocation for `(visitor_id, variation_group_id)`.
    fn get_allocation(
        &self,
        visitor_id: &str,
        variation_group_id: &str,
    ) -> StoreResult<Option<AllocationRecord>>;

    /// Delete every allocation for `visitor_id`.
    fn delete_allocations(&self, visitor_id: &str) -> StoreResult<usize>;

    /// Insert or replace the document stored under `key`.
    fn put_document(&self, key: &str, body: &str) -> StoreResult<()>;

    /// Document stored under `key`.
    fn get_document(&self, key: &str) -> StoreResult<Option<String>>;

    /// Delete the document stored under `key`. Returns whether it existed.
    fn delete_document(&self, key: &str) -> StoreResult<bool>;
}
