//! Queued-request record for deferred delivery

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::{ApiRequest, HttpMethod};
use crate::serde_util;

/// A request captured while offline, persisted until replayed or purged.
///
/// Serialized as one record in the queue's durable list; the field names
/// here are part of the storage format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: Uuid,
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    #[serde(with = "serde_util::base64_opt", default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedRequest {
    /// Captures a request for later delivery, assigning a fresh id.
    pub fn from_request(request: &ApiRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            enqueued_at: Utc::now(),
        }
    }

    /// Overrides the enqueue timestamp.
    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }

    /// Rebuilds the transport-facing request for replay.
    pub fn to_request(&self) -> ApiRequest {
        ApiRequest {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            created_at: self.enqueued_at,
        }
    }

    /// Age of this record relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.enqueued_at
    }
}
