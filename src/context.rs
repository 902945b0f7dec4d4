//! Visitor context documents: free-form targeting attributes, one document per visitor.
use std::{collections::HashMap, sync::Arc};

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{store::RecordStore, IdentityError, Result};

/// Targeting attributes of a visitor.
///
/// ```
/// # use flagtrack::{ContextValue, VisitorContext};
/// let context = [
///     ("age".to_owned(), 30.0.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("plan".to_owned(), "gold".into()),
/// ].into_iter().collect::<VisitorContext>();
/// ```
pub type VisitorContext = HashMap<String, ContextValue>;

/// A single context attribute value.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum ContextValue {
    /// A string value.
    String(String),
    /// A numeric value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// JSON `null`.
    Null,
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Persists one context document per visitor. Documents are always replaced wholesale.
#[derive(Clone)]
pub struct ContextStore {
    store: Arc<dyn RecordStore>,
}

fn document_key(visitor_id: &str) -> String {
    format!("context/{visitor_id}")
}

impl ContextStore {
    /// Create a context store over `store`.
    pub fn new(store: Arc<dyn RecordStore>) -> ContextStore {
        ContextStore { store }
    }

    /// Parse a JSON context document. Only objects of string, number, boolean and null values are
    /// accepted.
    pub fn parse(document: &str) -> std::result::Result<VisitorContext, IdentityError> {
        let value: serde_json::Value = serde_json::from_str(document)
            .map_err(|err| IdentityError::InvalidContext(err.to_string()))?;

        let serde_json::Value::Object(map) = value else {
            return Err(IdentityError::InvalidContext(
                "document must be a JSON object".to_owned(),
            ));
        };

        map.into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => ContextValue::String(s),
                    serde_json::Value::Bool(b) => ContextValue::Boolean(b),
                    serde_json::Value::Null => ContextValue::Null,
                    serde_json::Value::Number(n) => match n.as_f64() {
                        Some(n) => ContextValue::Number(n),
                        None => {
                            return Err(IdentityError::InvalidContext(format!(
                                "`{key}` is not a representable number"
                            )))
                        }
                    },
                    serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                        return Err(IdentityError::InvalidContext(format!(
                            "`{key}` must be a string, number, boolean or null"
                        )))
                    }
                };
                Ok((key, value))
            })
            .collect()
    }

    /// The stored context of `visitor_id`, empty when none was stored yet.
    pub fn load(&self, visitor_id: &str) -> Result<VisitorContext> {
        let Some(body) = self.store.get_document(&document_key(visitor_id))? else {
            return Ok(VisitorContext::new());
        };
        // Documents are validated before they are written, so a failure here means the row was
        // damaged on disk.
        serde_json::from_str(&body).map_err(|err| {
            log::error!(target: "flagtrack", visitor_id; "stored context is unreadable: {err}");
            crate::StoreError::Corrupted(format!("context of {visitor_id}: {err}")).into()
        })
    }

    /// Replace the stored context of `visitor_id`.
    pub fn save(&self, visitor_id: &str, context: &VisitorContext) -> Result<()> {
        let body = serde_json::to_string(context)
            .map_err(|err| IdentityError::InvalidContext(err.to_string()))?;
        self.store.put_document(&document_key(visitor_id), &body)?;
        log::trace!(target: "flagtrack", visitor_id, attributes = context.len(); "saved visitor context");
        Ok(())
    }

    /// Delete the stored context of `visitor_id`. Returns whether one existed.
    pub fn delete(&self, visitor_id: &str) -> Result<bool> {
        Ok(self.store.delete_document(&document_key(visitor_id))?)
    }
}
