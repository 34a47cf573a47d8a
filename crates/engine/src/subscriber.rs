//! WebSub subscribe/unsubscribe handshake and the RSS polling fallback.
//!
//! The subscribe flow persists the subscription first, POSTs the handshake
//! to the hub, then waits on a pending-validation slot. The hub's async
//! callback resolves the slot on a matching verify token; if the slot times
//! out instead, the subscription is rolled back. Subscriptions created with
//! a `polling_interval` skip the handshake entirely and poll their topic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use hmac::{Hmac, Mac};
use rand::RngCore as _;
use sha1::Sha1;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use repost_core::secret::SecretSealer;
use repost_core::subscription::{Feed, Hub, NewSubscription, Subscription, Validation};
use repost_core::task::NewDownloadTask;

use crate::bus::Event;
use crate::repo::{FeedArchive, HubRepository, StoreError, SubscriptionRepository};

type HmacSha1 = Hmac<Sha1>;

/// Errors from the subscription flows.
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("hub did not validate subscription {0} in time")]
    Timeout(i64),
    #[error("hub {name} rejected the request: {detail}")]
    HubRejected { name: String, detail: String },
    #[error("update signature missing or invalid")]
    SignatureInvalid,
    #[error("no subscriber registered for site {0:?}")]
    UnknownSite(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SubscribeError {
    /// Whether the underlying cause is a repository lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SubscribeError::Store(err) if err.is_not_found())
    }
}

/// Site-specific feed parsing, implemented outside the engine.
pub trait SiteAdapter: Send + Sync {
    /// Parse one raw update payload into a feed notification.
    fn parse_update(&self, xml: &str) -> anyhow::Result<Feed>;
    /// Derive a download task from a parsed feed.
    fn feed_to_task(&self, feed: &Feed) -> NewDownloadTask;
}

/// Events the subscriber emits.
#[derive(Clone)]
pub struct SubscriberEvents {
    pub subscribe_complete: Event<Subscription>,
    pub unsubscribe_complete: Event<Subscription>,
    pub feed_broadcast: Event<Feed>,
    pub new_download: Event<NewDownloadTask>,
}

/// Static configuration for the subscriber.
pub struct SubscriberConfig {
    /// Public base URL the hub can reach this server on.
    pub callback_url: String,
    /// Server-wide verify token echoed by the hub during validation.
    pub subscription_token: String,
    /// How long to wait for the hub's validation callback.
    pub validation_interval: Duration,
}

/// The subscription core: WebSub handshakes, signed update ingestion, and
/// RSS polling loops.
pub struct Subscriber {
    http: reqwest::Client,
    cfg: SubscriberConfig,
    sealer: SecretSealer,
    hubs: Arc<dyn HubRepository>,
    subs: Arc<dyn SubscriptionRepository>,
    archive: Arc<dyn FeedArchive>,
    adapters: HashMap<String, Arc<dyn SiteAdapter>>,
    pending_validations: Mutex<HashMap<i64, oneshot::Sender<()>>>,
    polling_tasks: Mutex<HashMap<i64, JoinHandle<()>>>,
    events: SubscriberEvents,
}

impl Subscriber {
    pub fn new(
        http: reqwest::Client,
        cfg: SubscriberConfig,
        sealer: SecretSealer,
        hubs: Arc<dyn HubRepository>,
        subs: Arc<dyn SubscriptionRepository>,
        archive: Arc<dyn FeedArchive>,
        adapters: HashMap<String, Arc<dyn SiteAdapter>>,
        events: SubscriberEvents,
    ) -> Arc<Self> {
        Arc::new(Self {
            http,
            cfg,
            sealer,
            hubs,
            subs,
            archive,
            adapters,
            pending_validations: Mutex::new(HashMap::new()),
            polling_tasks: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Whether a site adapter is registered.
    pub fn has_site(&self, site: &str) -> bool {
        self.adapters.contains_key(site)
    }

    /// Subscribe to a topic. WebSub mode performs the full handshake;
    /// subscriptions carrying a `polling_interval` go straight to polling.
    pub async fn subscribe(
        self: &Arc<Self>,
        new: NewSubscription,
    ) -> Result<Subscription, SubscribeError> {
        if !self.has_site(&new.site) {
            return Err(SubscribeError::UnknownSite(new.site));
        }
        let secret = generate_secret();
        let sealed = self.sealer.seal(&secret);
        let rss = new.polling_interval.is_some();
        let hub = self.hubs.get(new.hub_id).await?;
        let sub = self.subs.create(new, sealed).await?;

        if rss {
            self.spawn_polling(sub.clone()).await;
            self.events.subscribe_complete.emit(sub.clone());
            return Ok(sub);
        }

        let (resolved_tx, resolved_rx) = oneshot::channel();
        self.pending_validations
            .lock()
            .await
            .insert(sub.id, resolved_tx);

        if let Err(err) = self.send_subscription_request(true, &hub, &sub, &secret).await {
            self.pending_validations.lock().await.remove(&sub.id);
            let _ = self.subs.delete(sub.id).await;
            return Err(err);
        }

        let validated = tokio::time::timeout(self.cfg.validation_interval, resolved_rx)
            .await
            .is_ok_and(|resolved| resolved.is_ok());
        self.pending_validations.lock().await.remove(&sub.id);
        if !validated {
            let _ = self.subs.delete(sub.id).await;
            return Err(SubscribeError::Timeout(sub.id));
        }

        tracing::info!(id = sub.id, topic = %sub.topic_uri, "subscription validated");
        self.events.subscribe_complete.emit(sub.clone());
        Ok(sub)
    }

    /// Handle the hub's validation GET on the callback URL.
    ///
    /// A matching verify token resolves the pending slot, signalling success
    /// to the waiting subscribe call. Returns whether the token matched.
    pub async fn validate(&self, id: i64, validation: &Validation) -> bool {
        let matched =
            validation.verify_token.as_deref() == Some(self.cfg.subscription_token.as_str());
        if matched {
            if let Some(resolved) = self.pending_validations.lock().await.remove(&id) {
                let _ = resolved.send(());
            }
        } else {
            tracing::warn!(id, mode = %validation.mode, "validation with bad verify token");
        }
        matched
    }

    /// Remove a subscription and notify its hub.
    pub async fn unsubscribe(&self, id: i64) -> Result<Subscription, SubscribeError> {
        let sub = self.subs.get(id).await?;
        self.subs.delete(id).await?;
        self.stop_polling(id).await;
        if sub.polling_interval.is_none() {
            let secret = self
                .sealer
                .open(&sub.encrypted_secret)
                .context("open stored subscription secret")?;
            let hub = self.hubs.get(sub.hub_id).await?;
            self.send_subscription_request(false, &hub, &sub, &secret)
                .await?;
        }
        self.events.unsubscribe_complete.emit(sub.clone());
        Ok(sub)
    }

    /// Ingest a signed update from the hub.
    pub async fn receive_update(
        &self,
        site: &str,
        id: i64,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<NewDownloadTask, SubscribeError> {
        let sub = self.subs.get(id).await?;
        let secret = self
            .sealer
            .open(&sub.encrypted_secret)
            .context("open stored subscription secret")?;
        let signature = signature.ok_or(SubscribeError::SignatureInvalid)?;
        verify_signature(&secret, body, signature)?;

        let xml = std::str::from_utf8(body)
            .map_err(|_| SubscribeError::Other(anyhow::anyhow!("update body is not UTF-8")))?;
        self.ingest(site, xml).await
    }

    /// Shared parse-and-emit path for hub pushes and RSS polls.
    async fn ingest(&self, site: &str, xml: &str) -> Result<NewDownloadTask, SubscribeError> {
        let adapter = self
            .adapters
            .get(site)
            .ok_or_else(|| SubscribeError::UnknownSite(site.to_string()))?;
        let feed = adapter.parse_update(xml)?;
        self.events.feed_broadcast.emit(feed.clone());
        let task = adapter.feed_to_task(&feed);
        self.archive.store(None, xml).await?;
        self.events.new_download.emit(task.clone());
        Ok(task)
    }

    /// Spawn polling loops for every persisted RSS-mode subscription.
    pub async fn load_subscriptions(self: &Arc<Self>) -> Result<(), SubscribeError> {
        let subs = self.subs.get_multiple().await?;
        for sub in subs {
            if sub.polling_interval.is_some() {
                self.spawn_polling(sub).await;
            }
        }
        Ok(())
    }

    async fn spawn_polling(self: &Arc<Self>, sub: Subscription) {
        let interval = Duration::from_secs(sub.polling_interval.unwrap_or(300).max(1) as u64);
        let id = sub.id;
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = this.poll_once(&sub).await {
                    tracing::warn!(id = sub.id, error = %err, "feed poll failed");
                }
                tokio::time::sleep(interval).await;
            }
        });
        if let Some(stale) = self.polling_tasks.lock().await.insert(id, handle) {
            stale.abort();
        }
    }

    async fn poll_once(&self, sub: &Subscription) -> Result<(), SubscribeError> {
        let response = self
            .http
            .get(&sub.topic_uri)
            .send()
            .await
            .context("fetch feed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(SubscribeError::Other(anyhow::anyhow!(
                "feed fetch returned http {status}"
            )));
        }
        let xml = response.text().await.context("read feed body")?;
        self.ingest(&sub.site, &xml).await?;
        Ok(())
    }

    async fn stop_polling(&self, id: i64) {
        if let Some(handle) = self.polling_tasks.lock().await.remove(&id) {
            handle.abort();
        }
    }

    /// Abort every polling loop. Called on shutdown.
    pub async fn stop_all(&self) {
        for (_, handle) in self.polling_tasks.lock().await.drain() {
            handle.abort();
        }
    }

    async fn send_subscription_request(
        &self,
        subscribe: bool,
        hub: &Hub,
        sub: &Subscription,
        secret: &str,
    ) -> Result<(), SubscribeError> {
        let callback = format!(
            "{}/subscription/callback/{}/{}",
            self.cfg.callback_url.trim_end_matches('/'),
            sub.site,
            sub.id
        );
        let body = serde_json::json!({
            "hub.callback": callback,
            "hub.topic": sub.topic_uri,
            "hub.verify": "async",
            "hub.mode": if subscribe { "subscribe" } else { "unsubscribe" },
            "hub.verify_token": self.cfg.subscription_token,
            "hub.lease_numbers": if sub.lease_seconds > 0 { Some(sub.lease_seconds) } else { None },
            "hub.secret": secret,
        });
        let response = self
            .http
            .post(&hub.url)
            .json(&body)
            .send()
            .await
            .context("send hub request")?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SubscribeError::HubRejected {
                name: hub.name.clone(),
                detail: format!("http {status}: {detail}"),
            });
        }
        Ok(())
    }
}

/// Fresh per-subscription HMAC secret (64 hex chars).
pub fn generate_secret() -> String {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

/// Constant-time check of an `X-Hub-Signature` header against the body.
///
/// Accepts both `sha1=<hex>` and bare `<hex>` forms.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> Result<(), SubscribeError> {
    let hex_digest = header.strip_prefix("sha1=").unwrap_or(header).trim();
    let expected = hex::decode(hex_digest).map_err(|_| SubscribeError::SignatureInvalid)?;
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|_| SubscribeError::SignatureInvalid)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SubscribeError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use repost_core::subscription::{EditHub, NewHub};

    use super::*;

    struct MemoryHubs {
        hubs: std::sync::Mutex<HashMap<i64, Hub>>,
    }

    #[async_trait]
    impl HubRepository for MemoryHubs {
        async fn get_multiple(&self) -> Result<Vec<Hub>, StoreError> {
            Ok(self.hubs.lock().unwrap().values().cloned().collect())
        }

        async fn get(&self, id: i64) -> Result<Hub, StoreError> {
            self.hubs
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound(id))
        }

        async fn create(&self, new: NewHub) -> Result<Hub, StoreError> {
            let mut hubs = self.hubs.lock().unwrap();
            let id = hubs.len() as i64 + 1;
            let hub = Hub {
                id,
                name: new.name,
                url: new.url,
            };
            hubs.insert(id, hub.clone());
            Ok(hub)
        }

        async fn merge(&self, id: i64, _edit: EditHub) -> Result<Hub, StoreError> {
            self.get(id).await
        }

        async fn delete(&self, id: i64) -> Result<bool, StoreError> {
            Ok(self.hubs.lock().unwrap().remove(&id).is_some())
        }
    }

    struct MemorySubs {
        subs: std::sync::Mutex<HashMap<i64, Subscription>>,
        next_id: AtomicI64,
    }

    #[async_trait]
    impl SubscriptionRepository for MemorySubs {
        async fn get_multiple(&self) -> Result<Vec<Subscription>, StoreError> {
            Ok(self.subs.lock().unwrap().values().cloned().collect())
        }

        async fn get(&self, id: i64) -> Result<Subscription, StoreError> {
            self.subs
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound(id))
        }

        async fn create(
            &self,
            new: NewSubscription,
            encrypted_secret: String,
        ) -> Result<Subscription, StoreError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let sub = Subscription {
                id,
                site: new.site,
                hub_id: new.hub_id,
                topic_uri: new.topic_uri,
                polling_interval: new.polling_interval,
                created_at: Utc::now().timestamp(),
                lease_seconds: new.lease_seconds.unwrap_or(0),
                encrypted_secret,
            };
            self.subs.lock().unwrap().insert(id, sub.clone());
            Ok(sub)
        }

        async fn delete(&self, id: i64) -> Result<bool, StoreError> {
            Ok(self.subs.lock().unwrap().remove(&id).is_some())
        }
    }

    struct MemoryArchive {
        stored: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FeedArchive for MemoryArchive {
        async fn store(&self, _download_task_id: Option<i64>, xml: &str) -> Result<i64, StoreError> {
            let mut stored = self.stored.lock().unwrap();
            stored.push(xml.to_string());
            Ok(stored.len() as i64)
        }
    }

    struct FakeAdapter;

    impl SiteAdapter for FakeAdapter {
        fn parse_update(&self, xml: &str) -> anyhow::Result<Feed> {
            let video_id = xml.trim().to_string();
            anyhow::ensure!(!video_id.is_empty(), "empty update");
            Ok(Feed {
                video_id: video_id.clone(),
                video_title: format!("video {video_id}"),
                video_url: format!("https://example.com/watch?v={video_id}"),
                channel_id: "chan".into(),
                channel_title: "channel".into(),
                channel_url: "https://example.com/chan".into(),
                site: "fake".into(),
                update_time: Utc::now(),
            })
        }

        fn feed_to_task(&self, feed: &Feed) -> NewDownloadTask {
            NewDownloadTask::new(&feed.video_title, &feed.video_url, &feed.site)
        }
    }

    struct Fixture {
        subscriber: Arc<Subscriber>,
        subs: Arc<MemorySubs>,
        archive: Arc<MemoryArchive>,
        events: SubscriberEvents,
    }

    fn fixture(hub_url: &str, validation_interval: Duration) -> Fixture {
        let hubs = Arc::new(MemoryHubs {
            hubs: std::sync::Mutex::new(HashMap::from([(
                1,
                Hub {
                    id: 1,
                    name: "hub".into(),
                    url: hub_url.to_string(),
                },
            )])),
        });
        let subs = Arc::new(MemorySubs {
            subs: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        });
        let archive = Arc::new(MemoryArchive {
            stored: std::sync::Mutex::new(Vec::new()),
        });
        let events = SubscriberEvents {
            subscribe_complete: Event::new("subscribe_complete"),
            unsubscribe_complete: Event::new("unsubscribe_complete"),
            feed_broadcast: Event::new("feed_broadcast"),
            new_download: Event::new("new_download"),
        };
        let subscriber = Subscriber::new(
            reqwest::Client::new(),
            SubscriberConfig {
                callback_url: "http://localhost:8011".into(),
                subscription_token: "verify-me".into(),
                validation_interval,
            },
            SecretSealer::new("master"),
            hubs,
            subs.clone(),
            archive.clone(),
            HashMap::from([("fake".to_string(), Arc::new(FakeAdapter) as Arc<dyn SiteAdapter>)]),
            events.clone(),
        );
        Fixture {
            subscriber,
            subs,
            archive,
            events,
        }
    }

    fn new_subscription() -> NewSubscription {
        NewSubscription {
            site: "fake".into(),
            hub_id: 1,
            topic_uri: "https://example.com/feed?channel_id=CID".into(),
            lease_seconds: Some(3600),
            polling_interval: None,
        }
    }

    #[tokio::test]
    async fn subscribe_completes_when_the_hub_validates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/subscribe"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let fx = fixture(&format!("{}/subscribe", server.uri()), Duration::from_secs(5));
        let subscriber = fx.subscriber.clone();
        let pending = tokio::spawn(async move { subscriber.subscribe(new_subscription()).await });

        // Wait for the handshake POST, then play the hub's validation call.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let form: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(form["hub.mode"], "subscribe");
        assert_eq!(form["hub.topic"], "https://example.com/feed?channel_id=CID");
        assert_eq!(form["hub.verify_token"], "verify-me");
        assert_eq!(form["hub.lease_numbers"], 3600);
        assert!(form["hub.secret"].as_str().unwrap().len() == 64);
        assert!(form["hub.callback"]
            .as_str()
            .unwrap()
            .ends_with("/subscription/callback/fake/1"));

        let validation = Validation {
            mode: "subscribe".into(),
            topic: "https://example.com/feed?channel_id=CID".into(),
            challenge: "challenge-token".into(),
            verify_token: Some("verify-me".into()),
            lease_seconds: None,
        };
        assert!(fx.subscriber.validate(1, &validation).await);

        let sub = pending.await.unwrap().unwrap();
        assert_eq!(sub.hub_id, 1);
        assert!(fx.subs.get(sub.id).await.is_ok());
    }

    #[tokio::test]
    async fn subscribe_times_out_and_rolls_back_without_validation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let fx = fixture(&server.uri(), Duration::from_millis(100));
        let err = fx.subscriber.subscribe(new_subscription()).await.unwrap_err();
        assert!(matches!(err, SubscribeError::Timeout(1)));
        assert!(fx.subs.get(1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn bad_verify_token_does_not_resolve_the_handshake() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let fx = fixture(&server.uri(), Duration::from_millis(200));
        let subscriber = fx.subscriber.clone();
        let pending = tokio::spawn(async move { subscriber.subscribe(new_subscription()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let validation = Validation {
            mode: "subscribe".into(),
            topic: "t".into(),
            challenge: "c".into(),
            verify_token: Some("wrong".into()),
            lease_seconds: None,
        };
        assert!(!fx.subscriber.validate(1, &validation).await);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, SubscribeError::Timeout(1)));
        assert!(fx.subs.get(1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn hub_rejection_rolls_back_the_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("nope"))
            .mount(&server)
            .await;

        let fx = fixture(&server.uri(), Duration::from_secs(1));
        let err = fx.subscriber.subscribe(new_subscription()).await.unwrap_err();
        assert!(matches!(err, SubscribeError::HubRejected { .. }));
        assert!(fx.subs.get(1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn receive_update_verifies_the_signature_and_emits_a_task() {
        let fx = fixture("http://unused.invalid", Duration::from_secs(1));
        let secret = generate_secret();
        let sealed_secret = SecretSealer::new("master").seal(&secret);
        fx.subs
            .subs
            .lock()
            .unwrap()
            .insert(
                1,
                Subscription {
                    id: 1,
                    site: "fake".into(),
                    hub_id: 1,
                    topic_uri: "t".into(),
                    polling_interval: None,
                    created_at: 0,
                    lease_seconds: 0,
                    encrypted_secret: sealed_secret,
                },
            );

        let tasks: Arc<std::sync::Mutex<Vec<NewDownloadTask>>> = Arc::default();
        {
            let tasks = tasks.clone();
            fx.events.new_download.bind(move |task| {
                let tasks = tasks.clone();
                async move {
                    tasks.lock().unwrap().push(task);
                    Ok(())
                }
            });
        }

        let body = b"VIDEO99";
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        // Signed correctly: accepted, archived, and fanned out.
        let task = fx
            .subscriber
            .receive_update("fake", 1, body, Some(&format!("sha1={signature}")))
            .await
            .unwrap();
        assert_eq!(task.url, "https://example.com/watch?v=VIDEO99");
        assert_eq!(fx.archive.stored.lock().unwrap().len(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(tasks.lock().unwrap().len(), 1);

        // Tampered body: rejected before any parsing happens.
        let err = fx
            .subscriber
            .receive_update("fake", 1, b"VIDEO100", Some(&signature))
            .await
            .unwrap_err();
        assert!(matches!(err, SubscribeError::SignatureInvalid));

        // Missing header: rejected the same way.
        let err = fx
            .subscriber
            .receive_update("fake", 1, body, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SubscribeError::SignatureInvalid));
        assert_eq!(fx.archive.stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rss_subscription_polls_the_topic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(move |_: &Request| ResponseTemplate::new(200).set_body_string("VIDEO1"))
            .mount(&server)
            .await;

        let fx = fixture(&server.uri(), Duration::from_secs(1));
        let sub = fx
            .subscriber
            .subscribe(NewSubscription {
                site: "fake".into(),
                hub_id: 1,
                topic_uri: format!("{}/feed", server.uri()),
                lease_seconds: None,
                polling_interval: Some(1),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!fx.archive.stored.lock().unwrap().is_empty());

        // Unsubscribe cancels the loop without a hub round-trip.
        fx.subscriber.unsubscribe(sub.id).await.unwrap();
        let polled = fx.archive.stored.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(fx.archive.stored.lock().unwrap().len(), polled);
    }

    #[test]
    fn signature_verification_accepts_iff_hmac_matches() {
        let secret = "shared";
        let body = b"<feed/>";
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let good = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, body, &good).is_ok());
        assert!(verify_signature(secret, body, &format!("sha1={good}")).is_ok());
        assert!(verify_signature(secret, body, "deadbeef").is_err());
        assert!(verify_signature(secret, body, "not-hex").is_err());
        assert!(verify_signature("other", body, &good).is_err());
    }
}
