//! Hub, subscription and feed-archive repositories.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use repost_core::subscription::{EditHub, Hub, NewHub, NewSubscription, Subscription};
use repost_engine::repo::{FeedArchive, HubRepository, StoreError, SubscriptionRepository};

use crate::backend;

#[derive(sqlx::FromRow)]
struct HubRow {
    id: i64,
    name: String,
    url: String,
}

impl From<HubRow> for Hub {
    fn from(row: HubRow) -> Self {
        Hub {
            id: row.id,
            name: row.name,
            url: row.url,
        }
    }
}

/// WebSub hubs in SQLite.
#[derive(Clone)]
pub struct HubStore {
    pool: SqlitePool,
}

impl HubStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HubRepository for HubStore {
    async fn get_multiple(&self) -> Result<Vec<Hub>, StoreError> {
        let rows: Vec<HubRow> = sqlx::query_as("SELECT * FROM hubs ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(Hub::from).collect())
    }

    async fn get(&self, id: i64) -> Result<Hub, StoreError> {
        let row: Option<HubRow> = sqlx::query_as("SELECT * FROM hubs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.ok_or(StoreError::NotFound(id))?.into())
    }

    async fn create(&self, new: NewHub) -> Result<Hub, StoreError> {
        let result = sqlx::query("INSERT INTO hubs (name, url) VALUES (?, ?)")
            .bind(&new.name)
            .bind(&new.url)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        self.get(result.last_insert_rowid()).await
    }

    async fn merge(&self, id: i64, edit: EditHub) -> Result<Hub, StoreError> {
        let mut hub = self.get(id).await?;
        if let Some(name) = edit.name {
            hub.name = name;
        }
        if let Some(url) = edit.url {
            hub.url = url;
        }
        let result = sqlx::query("UPDATE hubs SET name = ?, url = ? WHERE id = ?")
            .bind(&hub.name)
            .bind(&hub.url)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(hub)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM subscriptions WHERE hub_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        let result = sqlx::query("DELETE FROM hubs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: i64,
    site: String,
    hub_id: i64,
    topic_uri: String,
    polling_interval: Option<i64>,
    created_at: i64,
    lease_seconds: i64,
    encrypted_secret: String,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            id: row.id,
            site: row.site,
            hub_id: row.hub_id,
            topic_uri: row.topic_uri,
            polling_interval: row.polling_interval,
            created_at: row.created_at,
            lease_seconds: row.lease_seconds,
            encrypted_secret: row.encrypted_secret,
        }
    }
}

/// Subscriptions in SQLite.
#[derive(Clone)]
pub struct SubscriptionStore {
    pool: SqlitePool,
}

impl SubscriptionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SubscriptionStore {
    async fn get_multiple(&self) -> Result<Vec<Subscription>, StoreError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as("SELECT * FROM subscriptions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    async fn get(&self, id: i64) -> Result<Subscription, StoreError> {
        let row: Option<SubscriptionRow> = sqlx::query_as("SELECT * FROM subscriptions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.ok_or(StoreError::NotFound(id))?.into())
    }

    async fn create(
        &self,
        new: NewSubscription,
        encrypted_secret: String,
    ) -> Result<Subscription, StoreError> {
        let result = sqlx::query(
            "INSERT INTO subscriptions (site, hub_id, topic_uri, polling_interval, created_at, lease_seconds, encrypted_secret)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.site)
        .bind(new.hub_id)
        .bind(&new.topic_uri)
        .bind(new.polling_interval)
        .bind(Utc::now().timestamp())
        .bind(new.lease_seconds.unwrap_or(0))
        .bind(&encrypted_secret)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        self.get(result.last_insert_rowid()).await
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}

/// Raw feed payload archive in SQLite.
#[derive(Clone)]
pub struct FeedXmlStore {
    pool: SqlitePool,
}

impl FeedXmlStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedArchive for FeedXmlStore {
    async fn store(&self, download_task_id: Option<i64>, xml: &str) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO feed_xmls (download_task_id, xml) VALUES (?, ?)")
            .bind(download_task_id)
            .bind(xml)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_in_memory, create_tables};

    async fn pool() -> SqlitePool {
        let pool = connect_in_memory().await.unwrap();
        create_tables(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn hub_crud_round_trip() {
        let store = HubStore::new(pool().await);
        let hub = store
            .create(NewHub {
                name: "h".into(),
                url: "https://example.com".into(),
            })
            .await
            .unwrap();
        assert_eq!(hub.id, 1);

        let edited = store
            .merge(
                1,
                EditHub {
                    name: Some("h2".into()),
                    url: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.name, "h2");
        assert_eq!(edited.url, "https://example.com");

        assert_eq!(store.get_multiple().await.unwrap().len(), 1);
        assert!(store.delete(1).await.unwrap());
        assert!(store.get(1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn deleting_a_hub_removes_its_subscriptions() {
        let db = pool().await;
        let hubs = HubStore::new(db.clone());
        let subs = SubscriptionStore::new(db);

        hubs.create(NewHub {
            name: "h".into(),
            url: "https://example.com".into(),
        })
        .await
        .unwrap();
        subs.create(
            NewSubscription {
                site: "youtube".into(),
                hub_id: 1,
                topic_uri: "https://example.com/feed".into(),
                lease_seconds: Some(60),
                polling_interval: None,
            },
            "sealed".into(),
        )
        .await
        .unwrap();

        assert!(hubs.delete(1).await.unwrap());
        assert!(subs.get_multiple().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscription_create_keeps_the_sealed_secret() {
        let db = pool().await;
        HubStore::new(db.clone())
            .create(NewHub {
                name: "h".into(),
                url: "https://example.com".into(),
            })
            .await
            .unwrap();
        let subs = SubscriptionStore::new(db);
        let sub = subs
            .create(
                NewSubscription {
                    site: "youtube".into(),
                    hub_id: 1,
                    topic_uri: "https://example.com/feed".into(),
                    lease_seconds: None,
                    polling_interval: Some(300),
                },
                "sealed-secret".into(),
            )
            .await
            .unwrap();
        assert_eq!(sub.lease_seconds, 0);
        assert_eq!(sub.polling_interval, Some(300));
        assert_eq!(subs.get(sub.id).await.unwrap().encrypted_secret, "sealed-secret");
    }
}
