//! WebSub hubs, subscriptions and parsed feed notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A WebSub hub endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hub {
    pub id: i64,
    pub name: String,
    pub url: String,
}

/// Creation DTO for a hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHub {
    pub name: String,
    pub url: String,
}

/// Sparse edit delta for a hub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditHub {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A persisted subscription pairing a topic with a hub.
///
/// `encrypted_secret` is the per-subscription HMAC secret sealed with
/// [`crate::secret::SecretSealer`]; it never leaves the process in clear.
/// A set `polling_interval` marks the subscription as RSS mode: no hub
/// handshake, a polling loop instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub site: String,
    pub hub_id: i64,
    pub topic_uri: String,
    pub polling_interval: Option<i64>,
    /// Epoch seconds at creation.
    pub created_at: i64,
    /// Requested lease window in seconds; `0` asks the hub for its default.
    pub lease_seconds: i64,
    #[serde(skip_serializing)]
    pub encrypted_secret: String,
}

/// Creation DTO for a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub site: String,
    pub hub_id: i64,
    pub topic_uri: String,
    #[serde(default)]
    pub lease_seconds: Option<i64>,
    #[serde(default)]
    pub polling_interval: Option<i64>,
}

/// Query parameters of the hub's validation GET on the callback URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    #[serde(rename = "hub.mode")]
    pub mode: String,
    #[serde(rename = "hub.topic")]
    pub topic: String,
    #[serde(rename = "hub.challenge")]
    pub challenge: String,
    #[serde(rename = "hub.verify_token", default)]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.lease_seconds", default)]
    pub lease_seconds: Option<String>,
}

/// Body echoed back to the hub on successful validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    #[serde(rename = "hub.challenge")]
    pub challenge: String,
}

/// A parsed notification of new content from an upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub video_id: String,
    pub video_title: String,
    pub video_url: String,
    pub channel_id: String,
    pub channel_title: String,
    pub channel_url: String,
    pub site: String,
    pub update_time: DateTime<Utc>,
}

/// Raw update payload archived on receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedXml {
    pub id: i64,
    pub download_task_id: Option<i64>,
    pub xml: String,
}
