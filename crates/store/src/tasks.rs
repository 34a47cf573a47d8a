//! Task repositories over the `download_tasks` and `upload_tasks` tables.

use async_trait::async_trait;
use sqlx::SqlitePool;

use repost_core::task::{
    DownloadTask, EditDownloadTask, EditUploadTask, NewDownloadTask, NewUploadTask, TaskFilter,
    TaskPriority, TaskRecord, TaskState, UploadTask,
};
use repost_engine::repo::{StoreError, TaskRepository};

use crate::backend;

fn decode_state(raw: i64) -> Result<TaskState, StoreError> {
    TaskState::from_i64(raw)
        .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("unknown task state {raw}")))
}

fn decode_priority(raw: i64) -> Result<TaskPriority, StoreError> {
    TaskPriority::from_i64(raw)
        .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("unknown task priority {raw}")))
}

fn push_state_filter(qb: &mut sqlx::QueryBuilder<'_, sqlx::Sqlite>, filter: Option<&TaskFilter>) {
    if let Some(filter) = filter {
        if !filter.states.is_empty() {
            qb.push(" WHERE state ");
            qb.push(if filter.filter_out { "NOT IN (" } else { "IN (" });
            let mut states = qb.separated(", ");
            for state in &filter.states {
                states.push_bind(state.as_i64());
            }
            qb.push(")");
        }
    }
    qb.push(" ORDER BY id");
}

#[derive(sqlx::FromRow)]
struct DownloadRow {
    id: i64,
    name: String,
    extension: Option<String>,
    path: String,
    url: String,
    site: String,
    wait_time: i64,
    state: i64,
    priority: i64,
    with_description: bool,
    with_subtitles: bool,
    with_thumbnail: bool,
    format: Option<String>,
    resolution_x: Option<i64>,
    resolution_y: Option<i64>,
    video_codec: Option<String>,
    audio_codec: Option<String>,
    video_bit_rate: Option<i64>,
    audio_bit_rate: Option<i64>,
    sample_rate: Option<i64>,
    frame_rate: Option<i64>,
}

impl DownloadRow {
    fn into_task(self) -> Result<DownloadTask, StoreError> {
        Ok(DownloadTask {
            id: self.id,
            name: self.name,
            extension: self.extension,
            path: self.path,
            url: self.url,
            site: self.site,
            wait_time: self.wait_time,
            state: decode_state(self.state)?,
            priority: decode_priority(self.priority)?,
            with_description: self.with_description,
            with_subtitles: self.with_subtitles,
            with_thumbnail: self.with_thumbnail,
            format: self.format,
            resolution_x: self.resolution_x,
            resolution_y: self.resolution_y,
            video_codec: self.video_codec,
            audio_codec: self.audio_codec,
            video_bit_rate: self.video_bit_rate,
            audio_bit_rate: self.audio_bit_rate,
            sample_rate: self.sample_rate,
            frame_rate: self.frame_rate,
        })
    }
}

/// Download tasks in SQLite.
#[derive(Clone)]
pub struct DownloadTaskStore {
    pool: SqlitePool,
}

impl DownloadTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository<DownloadTask> for DownloadTaskStore {
    async fn get_multiple(
        &self,
        filter: Option<&TaskFilter>,
    ) -> Result<Vec<DownloadTask>, StoreError> {
        let mut qb = sqlx::QueryBuilder::new("SELECT * FROM download_tasks");
        push_state_filter(&mut qb, filter);
        let rows: Vec<DownloadRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(DownloadRow::into_task).collect()
    }

    async fn get(&self, id: i64) -> Result<DownloadTask, StoreError> {
        let row: Option<DownloadRow> =
            sqlx::query_as("SELECT * FROM download_tasks WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        row.ok_or(StoreError::NotFound(id))?.into_task()
    }

    async fn create(&self, new: NewDownloadTask) -> Result<DownloadTask, StoreError> {
        let task = DownloadTask::from_new(0, new);
        let result = sqlx::query(
            "INSERT INTO download_tasks (
                name, extension, path, url, site, wait_time, state, priority,
                with_description, with_subtitles, with_thumbnail, format,
                resolution_x, resolution_y, video_codec, audio_codec,
                video_bit_rate, audio_bit_rate, sample_rate, frame_rate
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.name)
        .bind(&task.extension)
        .bind(&task.path)
        .bind(&task.url)
        .bind(&task.site)
        .bind(task.wait_time)
        .bind(task.state.as_i64())
        .bind(task.priority.as_i64())
        .bind(task.with_description)
        .bind(task.with_subtitles)
        .bind(task.with_thumbnail)
        .bind(&task.format)
        .bind(task.resolution_x)
        .bind(task.resolution_y)
        .bind(&task.video_codec)
        .bind(&task.audio_codec)
        .bind(task.video_bit_rate)
        .bind(task.audio_bit_rate)
        .bind(task.sample_rate)
        .bind(task.frame_rate)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        self.get(result.last_insert_rowid()).await
    }

    async fn update(&self, task: &DownloadTask) -> Result<DownloadTask, StoreError> {
        let result = sqlx::query(
            "UPDATE download_tasks SET
                name = ?, extension = ?, path = ?, url = ?, site = ?,
                wait_time = ?, state = ?, priority = ?, with_description = ?,
                with_subtitles = ?, with_thumbnail = ?, format = ?,
                resolution_x = ?, resolution_y = ?, video_codec = ?,
                audio_codec = ?, video_bit_rate = ?, audio_bit_rate = ?,
                sample_rate = ?, frame_rate = ?
            WHERE id = ?",
        )
        .bind(&task.name)
        .bind(&task.extension)
        .bind(&task.path)
        .bind(&task.url)
        .bind(&task.site)
        .bind(task.wait_time)
        .bind(task.state.as_i64())
        .bind(task.priority.as_i64())
        .bind(task.with_description)
        .bind(task.with_subtitles)
        .bind(task.with_thumbnail)
        .bind(&task.format)
        .bind(task.resolution_x)
        .bind(task.resolution_y)
        .bind(&task.video_codec)
        .bind(&task.audio_codec)
        .bind(task.video_bit_rate)
        .bind(task.audio_bit_rate)
        .bind(task.sample_rate)
        .bind(task.frame_rate)
        .bind(task.id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(task.id));
        }
        self.get(task.id).await
    }

    async fn merge(&self, edit: EditDownloadTask) -> Result<DownloadTask, StoreError> {
        let mut task = self.get(edit.id).await?;
        task.apply_edit(edit);
        self.update(&task).await
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM download_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct UploadRow {
    id: i64,
    name: String,
    extension: Option<String>,
    path: String,
    destination: String,
    wait_time: i64,
    state: i64,
    priority: i64,
}

impl UploadRow {
    fn into_task(self) -> Result<UploadTask, StoreError> {
        Ok(UploadTask {
            id: self.id,
            name: self.name,
            extension: self.extension,
            path: self.path,
            destination: self.destination,
            wait_time: self.wait_time,
            state: decode_state(self.state)?,
            priority: decode_priority(self.priority)?,
        })
    }
}

/// Upload tasks in SQLite.
#[derive(Clone)]
pub struct UploadTaskStore {
    pool: SqlitePool,
}

impl UploadTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository<UploadTask> for UploadTaskStore {
    async fn get_multiple(
        &self,
        filter: Option<&TaskFilter>,
    ) -> Result<Vec<UploadTask>, StoreError> {
        let mut qb = sqlx::QueryBuilder::new("SELECT * FROM upload_tasks");
        push_state_filter(&mut qb, filter);
        let rows: Vec<UploadRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(UploadRow::into_task).collect()
    }

    async fn get(&self, id: i64) -> Result<UploadTask, StoreError> {
        let row: Option<UploadRow> = sqlx::query_as("SELECT * FROM upload_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.ok_or(StoreError::NotFound(id))?.into_task()
    }

    async fn create(&self, new: NewUploadTask) -> Result<UploadTask, StoreError> {
        let task = UploadTask::from_new(0, new);
        let result = sqlx::query(
            "INSERT INTO upload_tasks (name, extension, path, destination, wait_time, state, priority)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.name)
        .bind(&task.extension)
        .bind(&task.path)
        .bind(&task.destination)
        .bind(task.wait_time)
        .bind(task.state.as_i64())
        .bind(task.priority.as_i64())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        self.get(result.last_insert_rowid()).await
    }

    async fn update(&self, task: &UploadTask) -> Result<UploadTask, StoreError> {
        let result = sqlx::query(
            "UPDATE upload_tasks SET name = ?, extension = ?, path = ?, destination = ?,
                wait_time = ?, state = ?, priority = ?
             WHERE id = ?",
        )
        .bind(&task.name)
        .bind(&task.extension)
        .bind(&task.path)
        .bind(&task.destination)
        .bind(task.wait_time)
        .bind(task.state.as_i64())
        .bind(task.priority.as_i64())
        .bind(task.id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(task.id));
        }
        self.get(task.id).await
    }

    async fn merge(&self, edit: EditUploadTask) -> Result<UploadTask, StoreError> {
        let mut task = self.get(edit.id).await?;
        task.apply_edit(edit);
        self.update(&task).await
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM upload_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_in_memory, create_tables};

    async fn store() -> DownloadTaskStore {
        let pool = connect_in_memory().await.unwrap();
        create_tables(&pool).await.unwrap();
        DownloadTaskStore::new(pool)
    }

    #[tokio::test]
    async fn create_get_update_delete_round_trip() {
        let store = store().await;
        let mut new = NewDownloadTask::new("clip", "https://example.com/v", "youtube");
        new.resolution_x = Some(1280);
        let task = store.create(new).await.unwrap();
        assert_eq!(task.id, 1);
        assert_eq!(task.state, TaskState::InQueue);
        assert_eq!(task.resolution_x, Some(1280));

        let mut task = store.get(1).await.unwrap();
        task.state = TaskState::Processing;
        task.extension = Some(".mp4".into());
        let task = store.update(&task).await.unwrap();
        assert_eq!(task.state, TaskState::Processing);
        assert_eq!(store.get(1).await.unwrap().extension.as_deref(), Some(".mp4"));

        assert!(store.delete(1).await.unwrap());
        assert!(!store.delete(1).await.unwrap());
        assert!(store.get(1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn update_of_missing_row_is_not_found() {
        let store = store().await;
        let ghost = DownloadTask::from_new(
            42,
            NewDownloadTask::new("ghost", "https://example.com", "youtube"),
        );
        assert!(store.update(&ghost).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn merge_applies_sparse_edits() {
        let store = store().await;
        store
            .create(NewDownloadTask::new("a", "https://example.com/a", "youtube"))
            .await
            .unwrap();
        let edited = store
            .merge(EditDownloadTask {
                id: 1,
                name: Some("b".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(edited.name, "b");
        assert_eq!(edited.url, "https://example.com/a");
    }

    #[tokio::test]
    async fn state_filter_selects_and_inverts() {
        let store = store().await;
        for name in ["a", "b", "c"] {
            store
                .create(NewDownloadTask::new(name, "https://example.com", "youtube"))
                .await
                .unwrap();
        }
        let mut done = store.get(2).await.unwrap();
        done.state = TaskState::Completed;
        store.update(&done).await.unwrap();

        let completed = store
            .get_multiple(Some(&TaskFilter {
                states: vec![TaskState::Completed],
                filter_out: false,
            }))
            .await
            .unwrap();
        assert_eq!(completed.iter().map(|t| t.id).collect::<Vec<_>>(), [2]);

        let pending = store
            .get_multiple(Some(&TaskFilter {
                states: vec![TaskState::Completed],
                filter_out: true,
            }))
            .await
            .unwrap();
        assert_eq!(pending.iter().map(|t| t.id).collect::<Vec<_>>(), [1, 3]);

        let all = store.get_multiple(None).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
