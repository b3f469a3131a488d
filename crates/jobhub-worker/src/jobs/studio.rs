//! Studio jobs: timeline generation, cache invalidation, and ping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use jobhub_core::config::worker::PoolConfig;
use jobhub_core::error::AppError;

use crate::executor::{JobContext, JobExecutionError, JobProcessor};
use crate::job::{JobKind, JobSpec};

/// Fast-track kind published when a timeline is regenerated.
pub const TIMELINE_KIND: &str = "timeline";

/// Queue carrying studio control jobs.
pub fn studio_queue(studio: &str) -> String {
    format!("{studio}.studio")
}

/// Queue carrying media ingest jobs.
pub fn ingest_queue(studio: &str) -> String {
    format!("{studio}.ingest")
}

/// Queue carrying studio event jobs.
pub fn events_queue(studio: &str) -> String {
    format!("{studio}.events")
}

/// Pool consuming all three queues of `studio`.
pub fn studio_pool(studio: &str) -> PoolConfig {
    PoolConfig {
        name: studio.to_string(),
        queues: vec![studio_queue(studio), ingest_queue(studio), events_queue(studio)],
    }
}

/// Jobs understood by [`StudioJobProcessor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StudioJob {
    /// Lay out a playlist as a timeline for a studio.
    GenerateTimeline {
        /// Studio name.
        studio: String,
        /// Items in play order.
        playlist: Vec<PlaylistItem>,
    },
    /// Drop a cached timeline.
    InvalidateCache {
        /// Studio whose cached timeline is dropped.
        key: String,
    },
    /// Round-trip check.
    Ping {
        /// Echoed back in the result.
        message: String,
    },
}

impl JobKind for StudioJob {
    fn name(&self) -> &'static str {
        match self {
            StudioJob::GenerateTimeline { .. } => "generate_timeline",
            StudioJob::InvalidateCache { .. } => "invalidate_cache",
            StudioJob::Ping { .. } => "ping",
        }
    }
}

/// One playlist item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Item identifier.
    pub id: String,
    /// Playback length in milliseconds.
    pub duration_ms: u64,
}

/// A playlist item placed on the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Item identifier.
    pub id: String,
    /// Offset from timeline start, in milliseconds.
    pub start_ms: u64,
    /// End offset, in milliseconds.
    pub end_ms: u64,
}

/// A generated timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    /// Studio the timeline belongs to.
    pub studio: String,
    /// Entries in play order.
    pub entries: Vec<TimelineEntry>,
    /// Total length in milliseconds.
    pub total_ms: u64,
    /// When the timeline was built.
    pub generated_at: DateTime<Utc>,
}

/// Handles [`StudioJob`]s and caches generated timelines per studio.
#[derive(Debug, Default)]
pub struct StudioJobProcessor {
    timelines: DashMap<String, Timeline>,
}

impl StudioJobProcessor {
    /// Create a processor with an empty timeline cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached timeline for `studio`, if any.
    pub fn cached_timeline(&self, studio: &str) -> Option<Timeline> {
        self.timelines.get(studio).map(|t| t.clone())
    }

    fn generate_timeline(
        &self,
        studio: &str,
        playlist: &[PlaylistItem],
        ctx: &JobContext<StudioJob>,
    ) -> Result<Value, JobExecutionError> {
        if playlist.is_empty() {
            return Err(JobExecutionError::Permanent(format!(
                "Playlist for studio '{}' is empty",
                studio
            )));
        }

        let mut cursor = 0u64;
        let mut entries = Vec::with_capacity(playlist.len());
        for item in playlist {
            if item.duration_ms == 0 {
                return Err(JobExecutionError::Permanent(format!(
                    "Playlist item '{}' has zero duration",
                    item.id
                )));
            }
            let end = cursor.checked_add(item.duration_ms).ok_or_else(|| {
                JobExecutionError::Permanent("Timeline length overflows".to_string())
            })?;
            entries.push(TimelineEntry {
                id: item.id.clone(),
                start_ms: cursor,
                end_ms: end,
            });
            cursor = end;
        }

        let timeline = Timeline {
            studio: studio.to_string(),
            entries,
            total_ms: cursor,
            generated_at: Utc::now(),
        };
        let value = serde_json::to_value(&timeline).map_err(AppError::from)?;

        tracing::info!(
            "Generated timeline for studio '{}': {} items, {}ms",
            studio,
            timeline.entries.len(),
            timeline.total_ms
        );
        self.timelines.insert(studio.to_string(), timeline);
        ctx.notify(TIMELINE_KIND, &[studio], value.clone());

        Ok(value)
    }

    fn invalidate_cache(&self, key: &str) -> Value {
        let removed = self.timelines.remove(key).is_some();
        tracing::debug!("Timeline cache invalidation for '{}': removed={}", key, removed);
        json!({ "key": key, "removed": removed })
    }
}

#[async_trait]
impl JobProcessor<StudioJob> for StudioJobProcessor {
    async fn process(
        &self,
        job: &JobSpec<StudioJob>,
        ctx: &JobContext<StudioJob>,
    ) -> Result<Value, JobExecutionError> {
        match &job.job {
            StudioJob::GenerateTimeline { studio, playlist } => {
                self.generate_timeline(studio, playlist, ctx)
            }
            StudioJob::InvalidateCache { key } => Ok(self.invalidate_cache(key)),
            StudioJob::Ping { message } => Ok(json!({
                "pong": message,
                "worker": ctx.worker_id,
            })),
        }
    }
}
