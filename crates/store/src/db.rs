//! Pool construction and schema bootstrap.

use std::path::Path;
use std::str::FromStr as _;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use repost_engine::repo::StoreError;

use crate::backend;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS download_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL DEFAULT '',
        extension TEXT,
        path TEXT NOT NULL DEFAULT '',
        url TEXT NOT NULL DEFAULT '',
        site TEXT NOT NULL DEFAULT '',
        wait_time INTEGER NOT NULL DEFAULT 0,
        state INTEGER NOT NULL,
        priority INTEGER NOT NULL,
        with_description INTEGER NOT NULL DEFAULT 1,
        with_subtitles INTEGER NOT NULL DEFAULT 0,
        with_thumbnail INTEGER NOT NULL DEFAULT 1,
        format TEXT,
        resolution_x INTEGER,
        resolution_y INTEGER,
        video_codec TEXT,
        audio_codec TEXT,
        video_bit_rate INTEGER,
        audio_bit_rate INTEGER,
        sample_rate INTEGER,
        frame_rate INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS upload_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL DEFAULT '',
        extension TEXT,
        path TEXT NOT NULL DEFAULT '',
        destination TEXT NOT NULL DEFAULT '',
        wait_time INTEGER NOT NULL DEFAULT 0,
        state INTEGER NOT NULL,
        priority INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hubs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL DEFAULT '',
        url TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS subscriptions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        site TEXT NOT NULL DEFAULT '',
        hub_id INTEGER NOT NULL REFERENCES hubs(id),
        topic_uri TEXT NOT NULL DEFAULT '',
        polling_interval INTEGER,
        created_at INTEGER NOT NULL DEFAULT 0,
        lease_seconds INTEGER NOT NULL DEFAULT 0,
        encrypted_secret TEXT NOT NULL DEFAULT ''
    )",
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_hub_id ON subscriptions(hub_id)",
    "CREATE TABLE IF NOT EXISTS feed_xmls (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        download_task_id INTEGER,
        xml TEXT NOT NULL DEFAULT ''
    )",
];

/// Open (creating if missing) the SQLite database at `path`.
pub async fn connect(path: &Path) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .map_err(backend)
}

/// In-memory database on a single connection, for tests.
pub async fn connect_in_memory() -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(backend)?;
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(backend)
}

/// Create every table the daemon uses. Idempotent.
pub async fn create_tables(pool: &SqlitePool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(backend)?;
    }
    Ok(())
}
