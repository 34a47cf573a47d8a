//! Task records for the download and upload schedulers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Parked on a timer until `wait_time`.
    Waiting,
    /// Eligible and sitting in the priority queue.
    InQueue,
    /// A live worker is running the task.
    Processing,
    /// Worker paused in place; the concurrency slot stays held.
    Pause,
    /// Worker paused and parked aside; the slot is released.
    Suspended,
    /// Terminal success.
    Completed,
    /// Terminal failure (retryable).
    Failed,
}

impl TaskState {
    /// Integer form used by the persistence layer.
    pub fn as_i64(self) -> i64 {
        match self {
            TaskState::Waiting => 1,
            TaskState::InQueue => 2,
            TaskState::Processing => 3,
            TaskState::Pause => 4,
            TaskState::Suspended => 5,
            TaskState::Completed => 6,
            TaskState::Failed => 7,
        }
    }

    /// Inverse of [`TaskState::as_i64`].
    pub fn from_i64(value: i64) -> Option<Self> {
        Some(match value {
            1 => TaskState::Waiting,
            2 => TaskState::InQueue,
            3 => TaskState::Processing,
            4 => TaskState::Pause,
            5 => TaskState::Suspended,
            6 => TaskState::Completed,
            7 => TaskState::Failed,
            _ => return None,
        })
    }
}

/// Queue priority. The ordering is total: `InHurry` dequeues before
/// `Default`, which dequeues before `NoHurry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    /// Drain after everything else.
    NoHurry,
    /// Normal priority for new tasks.
    Default,
    /// Jumps ahead of every non-hurried task.
    InHurry,
}

impl TaskPriority {
    /// Integer form used by the persistence layer.
    pub fn as_i64(self) -> i64 {
        match self {
            TaskPriority::NoHurry => 0,
            TaskPriority::Default => 1,
            TaskPriority::InHurry => 2,
        }
    }

    /// Inverse of [`TaskPriority::as_i64`].
    pub fn from_i64(value: i64) -> Option<Self> {
        Some(match value {
            0 => TaskPriority::NoHurry,
            1 => TaskPriority::Default,
            2 => TaskPriority::InHurry,
            _ => return None,
        })
    }
}

/// State filter for task listings. With `filter_out` set the selection is
/// inverted: every task whose state is *not* in `states`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub states: Vec<TaskState>,
    #[serde(default)]
    pub filter_out: bool,
}

impl TaskFilter {
    /// Whether a task in `state` passes the filter.
    pub fn matches(&self, state: TaskState) -> bool {
        if self.states.is_empty() {
            return true;
        }
        self.states.contains(&state) != self.filter_out
    }
}

/// Common surface the scheduler needs from a persisted task record.
///
/// Both task kinds carry identity, scheduling fields, and a sparse edit
/// delta whose `None` fields are left untouched on merge.
pub trait TaskRecord: Clone + Send + Sync + 'static {
    /// Creation DTO accepted by the repository.
    type New: Clone + Send + Sync + 'static;
    /// Sparse edit DTO merged onto the persisted record.
    type Edit: Clone + Send + Sync + 'static;

    fn id(&self) -> i64;
    fn name(&self) -> &str;
    fn state(&self) -> TaskState;
    fn set_state(&mut self, state: TaskState);
    fn priority(&self) -> TaskPriority;
    fn set_priority(&mut self, priority: TaskPriority);
    /// Absolute epoch seconds at which the task becomes eligible; `0` means
    /// immediately.
    fn wait_time(&self) -> i64;
    fn set_wait_time(&mut self, epoch_secs: i64);
    /// Id carried by an edit delta.
    fn edit_id(edit: &Self::Edit) -> i64;
    /// Merge the non-`None` fields of `edit` onto this record.
    fn apply_edit(&mut self, edit: Self::Edit);
}

fn default_true() -> bool {
    true
}

/// A persisted download task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: i64,
    pub name: String,
    pub extension: Option<String>,
    pub path: String,
    pub url: String,
    pub site: String,
    pub wait_time: i64,
    pub state: TaskState,
    pub priority: TaskPriority,
    pub with_description: bool,
    pub with_subtitles: bool,
    pub with_thumbnail: bool,
    pub format: Option<String>,
    pub resolution_x: Option<i64>,
    pub resolution_y: Option<i64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub video_bit_rate: Option<i64>,
    pub audio_bit_rate: Option<i64>,
    pub sample_rate: Option<i64>,
    pub frame_rate: Option<i64>,
}

impl DownloadTask {
    /// Build a fresh record from a creation DTO and an assigned id.
    pub fn from_new(id: i64, new: NewDownloadTask) -> Self {
        Self {
            id,
            name: new.name,
            extension: None,
            path: new.path.unwrap_or_default(),
            url: new.url,
            site: new.site,
            wait_time: new.wait_time.unwrap_or(0),
            state: TaskState::InQueue,
            priority: new.priority.unwrap_or(TaskPriority::Default),
            with_description: new.with_description,
            with_subtitles: new.with_subtitles,
            with_thumbnail: new.with_thumbnail,
            format: new.format,
            resolution_x: new.resolution_x,
            resolution_y: new.resolution_y,
            video_codec: new.video_codec,
            audio_codec: new.audio_codec,
            video_bit_rate: new.video_bit_rate,
            audio_bit_rate: new.audio_bit_rate,
            sample_rate: new.sample_rate,
            frame_rate: new.frame_rate,
        }
    }

    /// Where the artifact lands on disk.
    pub fn file_path(&self) -> PathBuf {
        let file = match &self.extension {
            Some(ext) => format!("{}{ext}", self.name),
            None => self.name.clone(),
        };
        PathBuf::from(&self.path).join(file)
    }
}

/// Creation DTO for a download task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDownloadTask {
    pub name: String,
    pub url: String,
    pub site: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub wait_time: Option<i64>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default = "default_true")]
    pub with_description: bool,
    #[serde(default)]
    pub with_subtitles: bool,
    #[serde(default = "default_true")]
    pub with_thumbnail: bool,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub resolution_x: Option<i64>,
    #[serde(default)]
    pub resolution_y: Option<i64>,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
    #[serde(default)]
    pub video_bit_rate: Option<i64>,
    #[serde(default)]
    pub audio_bit_rate: Option<i64>,
    #[serde(default)]
    pub sample_rate: Option<i64>,
    #[serde(default)]
    pub frame_rate: Option<i64>,
}

impl NewDownloadTask {
    /// Minimal DTO with everything else defaulted.
    pub fn new(name: impl Into<String>, url: impl Into<String>, site: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            site: site.into(),
            path: None,
            wait_time: None,
            priority: None,
            with_description: true,
            with_subtitles: false,
            with_thumbnail: true,
            format: None,
            resolution_x: None,
            resolution_y: None,
            video_codec: None,
            audio_codec: None,
            video_bit_rate: None,
            audio_bit_rate: None,
            sample_rate: None,
            frame_rate: None,
        }
    }
}

/// Sparse edit delta for a download task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditDownloadTask {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub wait_time: Option<i64>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub with_description: Option<bool>,
    #[serde(default)]
    pub with_subtitles: Option<bool>,
    #[serde(default)]
    pub with_thumbnail: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub resolution_x: Option<i64>,
    #[serde(default)]
    pub resolution_y: Option<i64>,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
    #[serde(default)]
    pub video_bit_rate: Option<i64>,
    #[serde(default)]
    pub audio_bit_rate: Option<i64>,
    #[serde(default)]
    pub sample_rate: Option<i64>,
    #[serde(default)]
    pub frame_rate: Option<i64>,
}

impl TaskRecord for DownloadTask {
    type New = NewDownloadTask;
    type Edit = EditDownloadTask;

    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> TaskState {
        self.state
    }

    fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn set_priority(&mut self, priority: TaskPriority) {
        self.priority = priority;
    }

    fn wait_time(&self) -> i64 {
        self.wait_time
    }

    fn set_wait_time(&mut self, epoch_secs: i64) {
        self.wait_time = epoch_secs;
    }

    fn edit_id(edit: &Self::Edit) -> i64 {
        edit.id
    }

    fn apply_edit(&mut self, edit: Self::Edit) {
        let EditDownloadTask {
            id: _,
            name,
            url,
            site,
            path,
            wait_time,
            priority,
            with_description,
            with_subtitles,
            with_thumbnail,
            format,
            resolution_x,
            resolution_y,
            video_codec,
            audio_codec,
            video_bit_rate,
            audio_bit_rate,
            sample_rate,
            frame_rate,
        } = edit;
        if let Some(name) = name {
            self.name = name;
        }
        if let Some(url) = url {
            self.url = url;
        }
        if let Some(site) = site {
            self.site = site;
        }
        if let Some(path) = path {
            self.path = path;
        }
        if let Some(wait_time) = wait_time {
            self.wait_time = wait_time;
        }
        if let Some(priority) = priority {
            self.priority = priority;
        }
        if let Some(v) = with_description {
            self.with_description = v;
        }
        if let Some(v) = with_subtitles {
            self.with_subtitles = v;
        }
        if let Some(v) = with_thumbnail {
            self.with_thumbnail = v;
        }
        if format.is_some() {
            self.format = format;
        }
        if resolution_x.is_some() {
            self.resolution_x = resolution_x;
        }
        if resolution_y.is_some() {
            self.resolution_y = resolution_y;
        }
        if video_codec.is_some() {
            self.video_codec = video_codec;
        }
        if audio_codec.is_some() {
            self.audio_codec = audio_codec;
        }
        if video_bit_rate.is_some() {
            self.video_bit_rate = video_bit_rate;
        }
        if audio_bit_rate.is_some() {
            self.audio_bit_rate = audio_bit_rate;
        }
        if sample_rate.is_some() {
            self.sample_rate = sample_rate;
        }
        if frame_rate.is_some() {
            self.frame_rate = frame_rate;
        }
    }
}

/// A persisted upload task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: i64,
    pub name: String,
    pub extension: Option<String>,
    pub path: String,
    pub destination: String,
    pub wait_time: i64,
    pub state: TaskState,
    pub priority: TaskPriority,
}

impl UploadTask {
    /// Build a fresh record from a creation DTO and an assigned id.
    pub fn from_new(id: i64, new: NewUploadTask) -> Self {
        Self {
            id,
            name: new.name,
            extension: None,
            path: new.path.unwrap_or_default(),
            destination: new.destination,
            wait_time: new.wait_time.unwrap_or(0),
            state: TaskState::InQueue,
            priority: new.priority.unwrap_or(TaskPriority::Default),
        }
    }

    /// Where the artifact to upload lives on disk.
    pub fn file_path(&self) -> PathBuf {
        let file = match &self.extension {
            Some(ext) => format!("{}{ext}", self.name),
            None => self.name.clone(),
        };
        PathBuf::from(&self.path).join(file)
    }
}

/// Creation DTO for an upload task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUploadTask {
    pub name: String,
    pub destination: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub wait_time: Option<i64>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
}

/// Sparse edit delta for an upload task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditUploadTask {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub wait_time: Option<i64>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
}

impl TaskRecord for UploadTask {
    type New = NewUploadTask;
    type Edit = EditUploadTask;

    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> TaskState {
        self.state
    }

    fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn set_priority(&mut self, priority: TaskPriority) {
        self.priority = priority;
    }

    fn wait_time(&self) -> i64 {
        self.wait_time
    }

    fn set_wait_time(&mut self, epoch_secs: i64) {
        self.wait_time = epoch_secs;
    }

    fn edit_id(edit: &Self::Edit) -> i64 {
        edit.id
    }

    fn apply_edit(&mut self, edit: Self::Edit) {
        let EditUploadTask {
            id: _,
            name,
            path,
            destination,
            wait_time,
            priority,
        } = edit;
        if let Some(name) = name {
            self.name = name;
        }
        if let Some(path) = path {
            self.path = path;
        }
        if let Some(destination) = destination {
            self.destination = destination;
        }
        if let Some(wait_time) = wait_time {
            self.wait_time = wait_time;
        }
        if let Some(priority) = priority {
            self.priority = priority;
        }
    }
}
