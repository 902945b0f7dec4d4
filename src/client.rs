use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{
    allocation_cache::{AllocationCache, AllocationRecord},
    clock::{Clock, MonotonicClock},
    config::Storage,
    context::{ContextStore, VisitorContext},
    hit::{Activation, HitData, HitId, NewHit},
    hit_queue::HitQueue,
    modification_store::{Modification, ModificationStore, Modifications},
    store::{MemoryStore, RecordStore, SqliteStore},
    sync_thread::SynchronizerThread,
    synchronizer::{SyncReport, Synchronizer},
    transport::{HitTransport, HttpTransport, HttpTransportConfig},
    visitor::{Identity, VisitorIdentityResolver},
    ClientConfig, Error, Result,
};

/// Entry point for application code.
///
/// Records hits, answers allocation lookups and pushes visitor context. All methods except
/// [`synchronize`](Client::synchronize) and [`synchronize_context`](Client::synchronize_context)
/// only touch local storage and are cheap enough to call from any thread.
///
/// # Examples
/// ```
/// # use flagtrack::{Client, ClientConfig};
/// let client = Client::new(ClientConfig::from_env_id("env-id", "api-key")).unwrap();
/// ```
pub struct Client {
    config: ClientConfig,
    identity: VisitorIdentityResolver,
    queue: Arc<HitQueue>,
    allocations: AllocationCache,
    contexts: ContextStore,
    modifications: ModificationStore,
    transport: Arc<dyn HitTransport>,
    synchronizer: Arc<Synchronizer>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig) -> Result<Client> {
        let store: Arc<dyn RecordStore> = match &config.storage {
            Storage::InMemory => Arc::new(MemoryStore::new()),
            Storage::Sqlite(path) => Arc::new(SqliteStore::open(path)?),
        };
        let transport = HttpTransport::new(HttpTransportConfig {
            base_url: config.base_url.clone(),
            env_id: config.env_id.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
        })?;

        Client::from_parts(config, store, Arc::new(transport))
    }

    /// Create a client over a custom store and transport.
    pub fn from_parts(
        config: ClientConfig,
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn HitTransport>,
    ) -> Result<Client> {
        Client::assemble(config, store, transport, Arc::new(MonotonicClock::new()))
    }

    fn assemble(
        config: ClientConfig,
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn HitTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Client> {
        let identity = VisitorIdentityResolver::load(&store)?;
        let queue = Arc::new(HitQueue::new(store.clone(), clock.clone()));
        let synchronizer = Arc::new(Synchronizer::new(
            queue.clone(),
            transport.clone(),
            clock,
            config.synchronizer.clone(),
        ));

        Ok(Client {
            identity,
            queue,
            allocations: AllocationCache::new(store.clone()),
            contexts: ContextStore::new(store),
            modifications: ModificationStore::new(),
            transport,
            synchronizer,
            config,
        })
    }

    /// Identity that will be stamped on the next hit.
    pub fn identity(&self) -> Identity {
        self.identity.current()
    }

    /// Attach an authenticated visitor id to subsequent hits and lookups.
    pub fn authenticate(&self, visitor_id: impl Into<String>) -> Result<()> {
        self.identity.authenticate(visitor_id)
    }

    /// Drop the authenticated visitor id. Later hits carry the anonymous id only.
    pub fn unauthenticate(&self) {
        self.identity.unauthenticate()
    }

    /// Queue a hit for the current identity.
    pub fn enqueue(&self, hit: NewHit) -> Result<HitId> {
        self.queue.enqueue(&self.identity.current(), hit)
    }

    /// Queue typed hit data for the current identity.
    ///
    /// ```
    /// # use flagtrack::{Client, ClientConfig, Event, EventCategory};
    /// # let client = Client::new(ClientConfig::from_env_id("env-id", "api-key")).unwrap();
    /// client.send_hit(&Event::new(EventCategory::ActionTracking, "checkout")).unwrap();
    /// ```
    pub fn send_hit<T: HitData>(&self, data: &T) -> Result<HitId> {
        self.enqueue(NewHit::from_data(data)?)
    }

    /// Number of hits waiting for delivery.
    pub fn pending_hits(&self) -> Result<usize> {
        self.queue.pending_count()
    }

    /// Record an allocation decided by the targeting engine for the current visitor.
    pub fn record_allocation(
        &self,
        variation_group_id: &str,
        campaign_id: &str,
        variation_id: &str,
        is_reference: bool,
    ) -> Result<()> {
        self.allocations.put(&AllocationRecord {
            visitor_id: self.identity.current().visitor_key().to_owned(),
            variation_group_id: variation_group_id.to_owned(),
            campaign_id: campaign_id.to_owned(),
            variation_id: variation_id.to_owned(),
            is_reference,
        })
    }

    /// Sticky allocation of the current visitor for `variation_group_id`.
    pub fn allocation(&self, variation_group_id: &str) -> Result<Option<AllocationRecord>> {
        self.allocations
            .get(self.identity.current().visitor_key(), variation_group_id)
    }

    /// Replace the modification map computed by the targeting engine.
    pub fn set_modifications(&self, modifications: Modifications) {
        log::debug!(target: "flagtrack", count = modifications.len(); "updating modifications");
        self.modifications.set_modifications(modifications);
    }

    /// Currently active modifications.
    pub fn modifications(&self) -> Arc<Modifications> {
        self.modifications.get_modifications()
    }

    /// Value of modification `key` for the current visitor.
    ///
    /// The first lookup records the modification's variation as the visitor's allocation. A
    /// modification whose variation differs from the recorded allocation is not exposed, as that
    /// would break sticky bucketing; `None` is returned instead. With `activate`, an activation
    /// hit is queued for the returned value.
    pub fn get_modification(&self, key: &str, activate: bool) -> Result<Option<serde_json::Value>> {
        let identity = self.identity.current();
        let Some(modification) = self.resolve_modification(&identity, key)? else {
            return Ok(None);
        };
        if activate {
            self.activate(&identity, &modification)?;
        }
        Ok(Some(modification.value))
    }

    /// Typed value of modification `key`, or `default` when it is missing, not sticky, or of a
    /// different type. Errors are logged and never returned.
    pub fn get_modification_value<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
        activate: bool,
    ) -> T {
        let identity = self.identity.current();
        let modification = match self.resolve_modification(&identity, key) {
            Ok(Some(modification)) => modification,
            Ok(None) => return default,
            Err(err) => {
                log::warn!(target: "flagtrack", key; "error occurred while reading modification: {err}");
                return default;
            }
        };

        let value = match serde_json::from_value(modification.value.clone()) {
            Ok(value) => value,
            Err(err) => {
                log::warn!(target: "flagtrack", key; "modification has unexpected type: {err}");
                return default;
            }
        };

        if activate {
            if let Err(err) = self.activate(&identity, &modification) {
                log::warn!(target: "flagtrack", key; "failed to queue activation: {err}");
            }
        }
        value
    }

    /// Queue an activation hit for modification `key`. Returns `None` when the modification is
    /// unknown or not sticky for the current visitor.
    pub fn activate_modification(&self, key: &str) -> Result<Option<HitId>> {
        let identity = self.identity.current();
        match self.resolve_modification(&identity, key)? {
            Some(modification) => self.activate(&identity, &modification).map(Some),
            None => Ok(None),
        }
    }

    fn resolve_modification(&self, identity: &Identity, key: &str) -> Result<Option<Modification>> {
        let modifications = self.modifications.get_modifications();
        let Some(modification) = modifications.get(key) else {
            log::trace!(target: "flagtrack", key; "modification not found");
            return Ok(None);
        };

        let visitor_id = identity.visitor_key();
        match self
            .allocations
            .get(visitor_id, &modification.variation_group_id)?
        {
            Some(allocation) if allocation.variation_id != modification.variation_id => {
                log::warn!(target: "flagtrack",
                           key,
                           visitor_id,
                           allocated = allocation.variation_id.as_str(),
                           offered = modification.variation_id.as_str();
                           "modification does not match sticky allocation, ignoring it");
                return Ok(None);
            }
            Some(_) => {}
            None => self.allocations.put(&AllocationRecord {
                visitor_id: visitor_id.to_owned(),
                variation_group_id: modification.variation_group_id.clone(),
                campaign_id: modification.campaign_id.clone(),
                variation_id: modification.variation_id.clone(),
                is_reference: modification.is_reference,
            })?,
        }

        Ok(Some(modification.clone()))
    }

    fn activate(&self, identity: &Identity, modification: &Modification) -> Result<HitId> {
        let hit = NewHit::from_data(&Activation {
            campaign_id: modification.campaign_id.clone(),
            variation_group_id: modification.variation_group_id.clone(),
            variation_id: modification.variation_id.clone(),
        })?;
        self.queue.enqueue(identity, hit)
    }

    /// Stored context of the current visitor.
    pub fn context(&self) -> Result<VisitorContext> {
        self.contexts.load(self.identity.current().visitor_key())
    }

    /// Replace the current visitor's context with the JSON `document` and push it to the server.
    ///
    /// A document that fails to parse is rejected with [`Error::Identity`] and the stored context
    /// is left untouched. This call blocks on the network; do not call it from a UI thread.
    pub fn synchronize_context(&self, document: &str) -> Result<()> {
        let context = ContextStore::parse(document).inspect_err(|err| {
            log::warn!(target: "flagtrack", "rejected visitor context: {err}");
        })?;
        self.update_context(context)
    }

    /// Replace the current visitor's context and push it to the server. Blocks on the network.
    pub fn update_context(&self, context: VisitorContext) -> Result<()> {
        let identity = self.identity.current();
        let visitor_id = identity.visitor_key();
        self.contexts.save(visitor_id, &context)?;

        match self.transport.send_context(visitor_id, &context)? {
            200..=299 => {
                log::debug!(target: "flagtrack", visitor_id; "visitor context synchronized");
                Ok(())
            }
            401 | 403 => Err(Error::Unauthorized),
            status @ (408 | 429) => Err(Error::ServerError(status)),
            status @ 400..=499 => Err(Error::PermanentDelivery { status }),
            status => Err(Error::ServerError(status)),
        }
    }

    /// Run a synchronization pass on the calling thread. Blocks on the network.
    pub fn synchronize(&self) -> Result<SyncReport> {
        self.synchronizer.synchronize()
    }

    /// Start a background thread that synchronizes hits periodically.
    pub fn start_synchronizer_thread(&self) -> Result<SynchronizerThread> {
        Ok(SynchronizerThread::start(
            self.synchronizer.clone(),
            self.config.sync_thread.clone(),
        )?)
    }

    /// Delete all local data of `visitor_id`: queued hits recorded under it (as visitor id or
    /// anonymous id), allocations and the context document. Used on consent withdrawal.
    pub fn purge_visitor_data(&self, visitor_id: &str) -> Result<()> {
        let hits = self.queue.purge_visitor(visitor_id)?;
        let allocations = self.allocations.clear(visitor_id)?;
        self.contexts.delete(visitor_id)?;
        log::info!(target: "flagtrack", visitor_id, hits, allocations; "purged visitor data");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use chrono::Duration;
    use serde_json::json;

    use super::Client;
    use crate::{
        hit::{Event, EventCategory, HitClass, HitType, Screen},
        modification_store::Modification,
        store::{HitQuery, MemoryStore, RecordStore},
        testing::{init_logger, FakeTransport, ManualClock, Reply},
        ClientConfig, ContextValue, Error, IdentityError,
    };

    struct Fixture {
        client: Client,
        store: Arc<dyn RecordStore>,
        clock: Arc<ManualClock>,
        transport: Arc<FakeTransport>,
    }

    fn fixture() -> Fixture {
        init_logger();
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new());
        let transport = FakeTransport::ok();
        let client = Client::assemble(
            ClientConfig::from_env_id("env", "key"),
            store.clone(),
            transport.clone(),
            clock.clone(),
        )
        .unwrap();
        Fixture {
            client,
            store,
            clock,
            transport,
        }
    }

    fn modification(key: &str, variation: &str, value: serde_json::Value) -> Modification {
        Modification {
            key: key.to_owned(),
            value,
            campaign_id: "c1".to_owned(),
            variation_group_id: "g1".to_owned(),
            variation_id: variation.to_owned(),
            is_reference: false,
        }
    }

    fn modifications(items: impl IntoIterator<Item = Modification>) -> HashMap<String, Modification> {
        items.into_iter().map(|m| (m.key.clone(), m)).collect()
    }

    #[test]
    fn hits_keep_the_identity_they_were_created_with() {
        let f = fixture();
        let anonymous_id = f.client.identity().anonymous_id;

        let before = f
            .client
            .send_hit(&Screen {
                location: "home".to_owned(),
            })
            .unwrap();
        f.client.authenticate("v1").unwrap();
        let after = f
            .client
            .send_hit(&Event::new(EventCategory::UserEngagement, "login"))
            .unwrap();

        let before = f.store.get_hit(before).unwrap().unwrap();
        let after = f.store.get_hit(after).unwrap().unwrap();
        assert_eq!(before.identity.visitor_id, None);
        assert_eq!(after.identity.visitor_id.as_deref(), Some("v1"));
        assert_eq!(before.identity.anonymous_id, anonymous_id);
        assert_eq!(after.identity.anonymous_id, anonymous_id);
        assert_eq!(f.client.pending_hits().unwrap(), 2);
    }

    #[test]
    fn first_lookup_makes_allocation_sticky() {
        let f = fixture();
        f.client.authenticate("v1").unwrap();
        f.client
            .set_modifications(modifications([modification("color", "var1", json!("red"))]));

        assert_eq!(f.client.get_modification_value("color", "none".to_owned(), false), "red");
        assert_eq!(
            f.client.allocation("g1").unwrap().map(|a| a.variation_id),
            Some("var1".to_owned())
        );

        // The engine now offers another variation of the same group.
        f.client
            .set_modifications(modifications([modification("color", "var2", json!("blue"))]));

        assert_eq!(f.client.get_modification_value("color", "none".to_owned(), false), "none");
        assert_eq!(f.client.get_modification("color", false).unwrap(), None);
    }

    #[test]
    fn missing_or_mistyped_modifications_fall_back_to_default() {
        let f = fixture();
        f.client
            .set_modifications(modifications([modification("size", "var1", json!("large"))]));

        assert_eq!(f.client.get_modification_value("missing", 3, true), 3);
        assert_eq!(f.client.get_modification_value("size", 3, true), 3);
        assert_eq!(f.client.pending_hits().unwrap(), 0);
    }

    #[test]
    fn activation_is_queued_on_request() {
        let f = fixture();
        f.client
            .set_modifications(modifications([modification("enabled", "var1", json!(true))]));

        assert!(f.client.get_modification_value("enabled", false, true));

        let activations = f
            .store
            .query_hits(&HitQuery::new().with_hit_type(HitClass::Activation))
            .unwrap();
        assert_eq!(activations.len(), 1);
        assert_eq!(activations[0].hit_type, HitType::Activation);
        assert_eq!(
            activations[0].payload,
            json!({"campaignId": "c1", "variationGroupId": "g1", "variationId": "var1"})
        );
        assert_eq!(f.client.activate_modification("unknown").unwrap(), None);
    }

    #[test]
    fn synchronize_delivers_activations_first() {
        let f = fixture();
        f.client
            .set_modifications(modifications([modification("enabled", "var1", json!(true))]));
        let event = f
            .client
            .send_hit(&Event::new(EventCategory::ActionTracking, "click"))
            .unwrap();
        let activation = f.client.activate_modification("enabled").unwrap().unwrap();
        f.clock.advance(Duration::seconds(60));

        let report = f.client.synchronize().unwrap();

        assert_eq!(report.delivered, 2);
        let deliveries = f.transport.deliveries();
        assert_eq!(deliveries[0].hit_ids, vec![activation]);
        assert_eq!(deliveries[1].hit_ids, vec![event]);
    }

    #[test]
    fn invalid_context_keeps_previous_document() {
        let f = fixture();
        f.client.authenticate("v1").unwrap();
        f.client
            .synchronize_context(r#"{"plan": "gold"}"#)
            .unwrap();

        let err = f.client.synchronize_context(r#"{"plan": ["gold"]}"#).unwrap_err();

        assert!(matches!(
            err,
            Error::Identity(IdentityError::InvalidContext(_))
        ));
        assert_eq!(
            f.client.context().unwrap()["plan"],
            ContextValue::String("gold".to_owned())
        );
        assert_eq!(f.transport.contexts().len(), 1);
        assert_eq!(f.transport.contexts()[0].0, "v1");
    }

    #[test]
    fn context_push_failure_is_reported() {
        let f = fixture();
        f.transport.script([Reply::Status(503)]);

        let err = f.client.synchronize_context(r#"{"beta": true}"#).unwrap_err();

        assert!(matches!(err, Error::ServerError(503)));
        // The local document is still replaced.
        assert_eq!(f.client.context().unwrap()["beta"], ContextValue::Boolean(true));
    }

    #[test]
    fn throttled_context_push_is_not_reported_as_malformed() {
        let f = fixture();
        f.transport.script([Reply::Status(429), Reply::Status(400)]);

        let throttled = f.client.synchronize_context(r#"{"beta": true}"#).unwrap_err();
        let rejected = f.client.synchronize_context(r#"{"beta": true}"#).unwrap_err();

        assert!(matches!(throttled, Error::ServerError(429)));
        assert!(matches!(rejected, Error::PermanentDelivery { status: 400 }));
    }

    #[test]
    fn purge_removes_all_visitor_data() {
        let f = fixture();
        f.client.authenticate("v1").unwrap();
        f.client.record_allocation("g1", "c1", "var1", true).unwrap();
        f.client.synchronize_context(r#"{"plan": "gold"}"#).unwrap();
        f.client
            .send_hit(&Event::new(EventCategory::ActionTracking, "click"))
            .unwrap();

        f.client.purge_visitor_data("v1").unwrap();

        assert_eq!(f.client.pending_hits().unwrap(), 0);
        assert_eq!(f.client.allocation("g1").unwrap(), None);
        assert!(f.client.context().unwrap().is_empty());
    }

    #[test]
    fn anonymous_id_is_stable_across_clients_on_the_same_store() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let first = Client::from_parts(
            ClientConfig::from_env_id("env", "key"),
            store.clone(),
            FakeTransport::ok(),
        )
        .unwrap();
        let second =
            Client::from_parts(ClientConfig::from_env_id("env", "key"), store, FakeTransport::ok())
                .unwrap();

        assert_eq!(first.identity(), second.identity());
    }
}
