//! Client-side data layer for feature-flagging and A/B-testing SDKs.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`] that records visitor interactions (hits) and the
//! variations visitors were allocated to. Hits are written to a durable [`HitQueue`] first and
//! delivered to the collector later by a [`Synchronizer`], so nothing is lost while the device is
//! offline or when the app is killed.
//!
//! Allocations are sticky: once a visitor has seen a variation of a variation group, the
//! [`AllocationCache`] keeps returning that variation, across restarts and without network.
//!
//! Every hit carries the [`Identity`] that was current when it was recorded. A visitor that logs
//! in later does not rewrite earlier hits.
//!
//! # Storage
//!
//! Data lives in a [`RecordStore`](store::RecordStore). [`SqliteStore`](store::SqliteStore) keeps
//! it on disk; [`MemoryStore`](store::MemoryStore) is useful for tests and hosts without a
//! filesystem.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Recording a hit only fails when local storage fails. Delivery failures are retried and never
//! reach the code that recorded the hit. Background synchronization errors are logged and
//! available through [`SynchronizerThread::last_outcome`].
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages, with
//! target `flagtrack`. Consider integrating a `log`-compatible logger implementation for better
//! visibility into queue and delivery activity.
//!
//! # Examples
//!
//! A runnable example lives in the `demos/simple` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod allocation_cache;
mod client;
mod clock;
mod config;
mod context;
mod error;
mod hit;
mod hit_queue;
mod modification_store;
pub mod store;
mod sync_thread;
mod synchronizer;
mod transport;
mod visitor;

#[cfg(test)]
mod testing;

pub use allocation_cache::{AllocationCache, AllocationRecord};
pub use client::Client;
pub use clock::{Clock, MonotonicClock};
pub use config::{ClientConfig, Storage};
pub use context::{ContextStore, ContextValue, VisitorContext};
pub use error::{Error, IdentityError, Result, StoreError};
pub use hit::{
    Activation, Event, EventCategory, Hit, HitClass, HitData, HitId, HitStatus, HitType, Item,
    NewHit, Page, Screen, Transaction, PAYLOAD_VERSION,
};
pub use hit_queue::{HitQueue, PendingGroups};
pub use modification_store::{Modification, ModificationStore, Modifications};
pub use sync_thread::{SyncThreadConfig, SynchronizerThread};
pub use synchronizer::{SyncReport, Synchronizer, SynchronizerConfig};
pub use transport::{HitBatch, HitTransport, HttpTransport, HttpTransportConfig, WireBatch, WireHit};
pub use visitor::{Identity, VisitorIdentityResolver};
