//! Visitor identity: the anonymous installation id and the optional authenticated visitor id.
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{store::RecordStore, IdentityError, Result};

const ANONYMOUS_ID_DOCUMENT: &str = "installation/anonymous_id";

/// The `(visitor_id, anonymous_id)` pair stamped on every hit and allocation lookup.
///
/// Hits are grouped by this pair for delivery, so the same anonymous id paired with two
/// different visitor ids forms two independent groups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Authenticated visitor id, absent for anonymous visitors.
    pub visitor_id: Option<String>,
    /// Installation id, stable for the lifetime of the install.
    pub anonymous_id: String,
}

impl Identity {
    /// Identity of a visitor that has not logged in.
    pub fn anonymous(anonymous_id: impl Into<String>) -> Identity {
        Identity {
            visitor_id: None,
            anonymous_id: anonymous_id.into(),
        }
    }

    /// Identity of a logged-in visitor.
    pub fn authenticated(visitor_id: impl Into<String>, anonymous_id: impl Into<String>) -> Identity {
        Identity {
            visitor_id: Some(visitor_id.into()),
            anonymous_id: anonymous_id.into(),
        }
    }

    /// The id allocations and context documents are keyed by: the authenticated visitor id when
    /// present, the anonymous id otherwise.
    pub fn visitor_key(&self) -> &str {
        self.visitor_id.as_deref().unwrap_or(&self.anonymous_id)
    }
}

/// Tracks the current visitor identity.
///
/// The anonymous id is generated once per installation and persisted in the record store. The
/// visitor id is set by [`authenticate`](Self::authenticate) and cleared by
/// [`unauthenticate`](Self::unauthenticate); changing it never touches hits that were already
/// recorded.
pub struct VisitorIdentityResolver {
    current: RwLock<Identity>,
}

impl VisitorIdentityResolver {
    /// Load the installation's anonymous id from `store`, generating and persisting one on first
    /// use.
    pub fn load(store: &Arc<dyn RecordStore>) -> Result<VisitorIdentityResolver> {
        let anonymous_id = match store.get_document(ANONYMOUS_ID_DOCUMENT)? {
            Some(anonymous_id) if !anonymous_id.is_empty() => anonymous_id,
            _ => {
                let anonymous_id = generate_anonymous_id();
                log::debug!(target: "flagtrack", anonymous_id = anonymous_id.as_str(); "generated new anonymous id");
                store.put_document(ANONYMOUS_ID_DOCUMENT, &anonymous_id)?;
                anonymous_id
            }
        };

        Ok(VisitorIdentityResolver::new(anonymous_id))
    }

    /// Create a resolver with a known anonymous id.
    pub fn new(anonymous_id: impl Into<String>) -> VisitorIdentityResolver {
        VisitorIdentityResolver {
            current: RwLock::new(Identity::anonymous(anonymous_id)),
        }
    }

    /// Snapshot of the current identity.
    pub fn current(&self) -> Identity {
        // The lock guards plain data that is always left in a consistent state.
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The installation's anonymous id.
    pub fn anonymous_id(&self) -> String {
        self.current().anonymous_id
    }

    /// Set the authenticated visitor id. Replaces any previous visitor id.
    pub fn authenticate(&self, visitor_id: impl Into<String>) -> Result<()> {
        let visitor_id = visitor_id.into();
        if visitor_id.is_empty() {
            return Err(IdentityError::EmptyVisitorId.into());
        }

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        log::debug!(target: "flagtrack", visitor_id = visitor_id.as_str(); "visitor authenticated");
        current.visitor_id = Some(visitor_id);
        Ok(())
    }

    /// Forget the authenticated visitor id. Later hits are recorded under the anonymous id only.
    pub fn unauthenticate(&self) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.visitor_id.take().is_some() {
            log::debug!(target: "flagtrack", "visitor unauthenticated");
        }
    }
}

fn generate_anonymous_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{store::MemoryStore, Error};

    #[test]
    fn anonymous_id_survives_reload() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());

        let first = VisitorIdentityResolver::load(&store).unwrap().anonymous_id();
        let second = VisitorIdentityResolver::load(&store).unwrap().anonymous_id();

        assert_eq!(first, second);
        assert_eq!(Uuid::parse_str(&first).unwrap().get_version_num(), 4);
    }

    #[test]
    fn authenticate_and_unauthenticate() {
        let resolver = VisitorIdentityResolver::new("a1");
        assert_eq!(resolver.current(), Identity::anonymous("a1"));

        resolver.authenticate("v1").unwrap();
        assert_eq!(resolver.current(), Identity::authenticated("v1", "a1"));
        assert_eq!(resolver.current().visitor_key(), "v1");

        resolver.authenticate("v2").unwrap();
        assert_eq!(resolver.current().visitor_id.as_deref(), Some("v2"));

        resolver.unauthenticate();
        assert_eq!(resolver.current(), Identity::anonymous("a1"));
        assert_eq!(resolver.current().visitor_key(), "a1");
    }

    #[test]
    fn empty_visitor_id_is_rejected() {
        let resolver = VisitorIdentityResolver::new("a1");
        resolver.authenticate("v1").unwrap();

        let err = resolver.authenticate("").unwrap_err();

        assert!(matches!(err, Error::Identity(IdentityError::EmptyVisitorId)));
        assert_eq!(resolver.current().visitor_id.as_deref(), Some("v1"));
    }
}
