use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::{DateTime, Utc};

use super::{HitQuery, RecordStore, StoreResult};
use crate::{
    allocation_cache::AllocationRecord,
    hit::{Hit, HitId, HitStatus, NewHit},
    visitor::Identity,
    StoreError,
};

/// An in-memory [`RecordStore`].
///
/// Hits are indexed by identity and ordered by `(timestamp, id)` within each group, so grouped
/// queries never scan unrelated groups. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    hits: HashMap<HitId, Hit>,
    by_group: BTreeMap<Identity, BTreeSet<(DateTime<Utc>, HitId)>>,
    allocations: BTreeMap<(String, String), AllocationRecord>,
    documents: HashMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Inner {
    fn groups<'a>(
        &'a self,
        query: &'a HitQuery,
    ) -> Box<dyn Iterator<Item = (&'a Identity, &'a BTreeSet<(DateTime<Utc>, HitId)>)> + 'a> {
        match &query.identity {
            Some(identity) => Box::new(self.by_group.get_key_value(identity).into_iter()),
            None => Box::new(self.by_group.iter()),
        }
    }

    fn matching_in_group<'a>(
        &'a self,
        index: &'a BTreeSet<(DateTime<Utc>, HitId)>,
        query: &'a HitQuery,
    ) -> impl Iterator<Item = &'a Hit> + 'a {
        index
            .iter()
            // The index is ordered by timestamp, so nothing past the cutoff can match.
            .take_while(move |(timestamp, _)| query.older_than.map_or(true, |t| *timestamp < t))
            .filter_map(move |(_, id)| self.hits.get(id))
            .filter(move |hit| query.matches(hit))
    }

    fn remove_hit(&mut self, id: HitId) -> bool {
        let Some(hit) = self.hits.remove(&id) else {
            return false;
        };
        if let Some(index) = self.by_group.get_mut(&hit.identity) {
            index.remove(&(hit.timestamp, id));
            if index.is_empty() {
                self.by_group.remove(&hit.identity);
            }
        }
        true
    }
}

impl RecordStore for MemoryStore {
    fn insert_hit(
        &self,
        identity: &Identity,
        hit: NewHit,
        timestamp: DateTime<Utc>,
        status: HitStatus,
    ) -> StoreResult<Hit> {
        let mut inner = self.write()?;
        inner.next_id += 1;
        let id = HitId(inner.next_id);

        let hit = Hit {
            id,
            identity: identity.clone(),
            hit_type: hit.hit_type,
            payload: hit.payload,
            timestamp,
            status,
        };
        inner
            .by_group
            .entry(identity.clone())
            .or_default()
            .insert((timestamp, id));
        inner.hits.insert(id, hit.clone());
        Ok(hit)
    }

    fn get_hit(&self, id: HitId) -> StoreResult<Option<Hit>> {
        Ok(self.read()?.hits.get(&id).cloned())
    }

    fn set_hit_status(&self, ids: &[HitId], status: HitStatus) -> StoreResult<usize> {
        let mut inner = self.write()?;
        let mut updated = 0;
        for id in ids {
            if let Some(hit) = inner.hits.get_mut(id) {
                hit.status = status;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn delete_hits(&self, ids: &[HitId]) -> StoreResult<usize> {
        let mut inner = self.write()?;
        Ok(ids.iter().filter(|id| inner.remove_hit(**id)).count())
    }

    fn delete_hits_with_status(&self, status: HitStatus) -> StoreResult<usize> {
        let mut inner = self.write()?;
        let doomed: Vec<HitId> = inner
            .hits
            .values()
            .filter(|hit| hit.status == status)
            .map(|hit| hit.id)
            .collect();
        Ok(doomed.into_iter().filter(|id| inner.remove_hit(*id)).count())
    }

    fn delete_hits_for_visitor(&self, id: &str) -> StoreResult<usize> {
        let mut inner = self.write()?;
        let doomed: Vec<HitId> = inner
            .hits
            .values()
            .filter(|hit| {
                hit.identity.anonymous_id == id || hit.identity.visitor_id.as_deref() == Some(id)
            })
            .map(|hit| hit.id)
            .collect();
        Ok(doomed.into_iter().filter(|id| inner.remove_hit(*id)).count())
    }

    fn query_hits(&self, query: &HitQuery) -> StoreResult<Vec<Hit>> {
        let inner = self.read()?;
        let limit = query.limit_per_group.unwrap_or(usize::MAX);
        let hits = inner
            .groups(query)
            .flat_map(|(_, index)| inner.matching_in_group(index, query).take(limit))
            .cloned()
            .collect();
        Ok(hits)
    }

    fn hit_groups(&self, query: &HitQuery) -> StoreResult<Vec<Identity>> {
        let inner = self.read()?;
        let groups = inner
            .groups(query)
            .filter(|(_, index)| inner.matching_in_group(index, query).next().is_some())
            .map(|(identity, _)| identity.clone())
            .collect();
        Ok(groups)
    }

    fn count_hits(&self, query: &HitQuery) -> StoreResult<usize> {
        let inner = self.read()?;
        let count = inner
            .groups(query)
            .map(|(_, index)| inner.matching_in_group(index, query).count())
            .sum();
        Ok(count)
    }

    fn put_allocation(&self, record: &AllocationRecord) -> StoreResult<()> {
        let key = (
            record.visitor_id.clone(),
            record.variation_group_id.clone(),
        );
        self.write()?.allocations.insert(key, record.clone());
        Ok(())
    }

    fn get_allocation(
        &self,
        visitor_id: &str,
        variation_group_id: &str,
    ) -> StoreResult<Option<AllocationRecord>> {
        let key = (visitor_id.to_owned(), variation_group_id.to_owned());
        Ok(self.read()?.allocations.get(&key).cloned())
    }

    fn delete_allocations(&self, visitor_id: &str) -> StoreResult<usize> {
        let mut inner = self.write()?;
        let before = inner.allocations.len();
        inner
            .allocations
            .retain(|(visitor, _), _| visitor != visitor_id);
        Ok(before - inner.allocations.len())
    }

    fn put_document(&self, key: &str, body: &str) -> StoreResult<()> {
        self.write()?
            .documents
            .insert(key.to_owned(), body.to_owned());
        Ok(())
    }

    fn get_document(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read()?.documents.get(key).cloned())
    }

    fn delete_document(&self, key: &str) -> StoreResult<bool> {
        Ok(self.write()?.documents.remove(key).is_some())
    }
}
