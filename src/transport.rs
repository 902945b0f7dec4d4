//! Delivery of hit batches and context documents to the remote collector.
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;

use crate::{
    context::VisitorContext,
    hit::{Hit, HitId, HitType, PAYLOAD_VERSION},
    visitor::Identity,
    Error, Result,
};

/// One delivery request: pending hits of a single identity group, oldest first.
#[derive(Debug, Clone)]
pub struct HitBatch<'a> {
    /// Identity group all hits belong to.
    pub identity: &'a Identity,
    /// Hits in timestamp order.
    pub hits: &'a [Hit],
}

impl<'a> HitBatch<'a> {
    /// Create a batch.
    pub fn new(identity: &'a Identity, hits: &'a [Hit]) -> HitBatch<'a> {
        HitBatch { identity, hits }
    }

    /// Ids of the batch's hits.
    pub fn ids(&self) -> Vec<HitId> {
        self.hits.iter().map(|hit| hit.id).collect()
    }

    /// Wire representation of the batch.
    pub fn to_wire(&self) -> WireBatch<'a> {
        WireBatch {
            visitor_id: self.identity.visitor_id.as_deref(),
            anonymous_id: &self.identity.anonymous_id,
            hits: self
                .hits
                .iter()
                .map(|hit| WireHit {
                    id: hit.id,
                    hit_type: hit.hit_type,
                    timestamp: hit.timestamp,
                    payload_version: PAYLOAD_VERSION,
                    payload: &hit.payload,
                })
                .collect(),
        }
    }
}

/// JSON body of a batch delivery.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBatch<'a> {
    /// Authenticated visitor id, if any.
    pub visitor_id: Option<&'a str>,
    /// Installation's anonymous id.
    pub anonymous_id: &'a str,
    /// Hits in timestamp order.
    pub hits: Vec<WireHit<'a>>,
}

/// One hit in a [`WireBatch`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireHit<'a> {
    /// Local hit id, used by the collector to drop duplicates.
    pub id: HitId,
    /// Kind of the hit.
    #[serde(rename = "type")]
    pub hit_type: HitType,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Version of the payload format.
    pub payload_version: u32,
    /// Opaque payload.
    pub payload: &'a serde_json::Value,
}

/// Network side of the synchronizer.
///
/// Implementations return the HTTP status code of the response, or an error when no response was
/// received (connection failure, timeout). Classifying status codes is the caller's job.
pub trait HitTransport: Send + Sync {
    /// Deliver one batch and return the response status.
    fn deliver_batch(&self, batch: &HitBatch<'_>) -> Result<u16>;

    /// Push the full context document of `visitor_id` and return the response status.
    fn send_context(&self, visitor_id: &str, context: &VisitorContext) -> Result<u16>;
}

/// Configuration for [`HttpTransport`].
pub struct HttpTransportConfig {
    /// Collector base URL.
    pub base_url: String,
    /// Environment id, part of every endpoint path.
    pub env_id: String,
    /// API key sent in the `x-api-key` header.
    pub api_key: String,
    /// Bound on every request. Required so a degraded connection cannot stall the synchronizer.
    pub timeout: Duration,
}

/// [`HitTransport`] over HTTP.
pub struct HttpTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    events_url: Url,
    env_url: Url,
    api_key: String,
}

const EVENTS_ENDPOINT: &str = "events";

impl HttpTransport {
    /// Create a transport. Fails on an invalid base URL.
    pub fn new(config: HttpTransportConfig) -> Result<HttpTransport> {
        let env_url = Url::parse(&format!(
            "{}/{}/",
            config.base_url.trim_end_matches('/'),
            config.env_id
        ))
        .map_err(Error::InvalidBaseUrl)?;
        let events_url = env_url.join(EVENTS_ENDPOINT).map_err(Error::InvalidBaseUrl)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("flagtrack/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HttpTransport {
            client,
            events_url,
            env_url,
            api_key: config.api_key,
        })
    }

    fn context_url(&self, visitor_id: &str) -> Result<Url> {
        let mut url = self.env_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidBaseUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(["visitors", visitor_id, "context"]);
        Ok(url)
    }
}

impl HitTransport for HttpTransport {
    fn deliver_batch(&self, batch: &HitBatch<'_>) -> Result<u16> {
        log::debug!(target: "flagtrack",
                    anonymous_id = batch.identity.anonymous_id.as_str(),
                    hits = batch.hits.len();
                    "delivering batch");
        let response = self
            .client
            .post(self.events_url.clone())
            .header("x-api-key", &self.api_key)
            .json(&batch.to_wire())
            .send()?;
        Ok(response.status().as_u16())
    }

    fn send_context(&self, visitor_id: &str, context: &VisitorContext) -> Result<u16> {
        log::debug!(target: "flagtrack", visitor_id; "sending visitor context");
        let response = self
            .client
            .put(self.context_url(visitor_id)?)
            .header("x-api-key", &self.api_key)
            .json(context)
            .send()?;
        Ok(response.status().as_u16())
    }
}
