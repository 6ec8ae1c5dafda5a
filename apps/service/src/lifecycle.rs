//! Stream lifecycle state machine.
//!
//! ```text
//! READY    -> TESTING | LIVE
//! TESTING  -> LIVE | OFFLINE | READY
//! LIVE     -> OFFLINE
//! OFFLINE  -> READY | STALE | ARCHIVED
//! STALE    -> READY | OFFLINE | ARCHIVED
//! ARCHIVED (terminal)
//! ```
//!
//! The manager is the only writer of a stream's status, its lifecycle
//! timestamps and its transition history.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::database::Database;
use crate::database::models::{Stream, StreamStatus, StreamTransition};
use crate::error::{CoordinatorError, CoordinatorResult};

/// Targets reachable from a status
pub fn allowed_transitions(from: StreamStatus) -> &'static [StreamStatus] {
    use StreamStatus::*;

    match from {
        Ready => &[Testing, Live],
        Testing => &[Live, Offline, Ready],
        Live => &[Offline],
        Offline => &[Ready, Stale, Archived],
        Stale => &[Ready, Offline, Archived],
        Archived => &[],
    }
}

pub fn can_transition(from: StreamStatus, to: StreamStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Stamp the timestamp of the entered state and clear the others.
///
/// Entering ARCHIVED keeps `offline_at`/`stale_at` so the archive reason
/// stays visible; entering READY leaves every timestamp null.
fn stamp_lifecycle(stream: &mut Stream, target: StreamStatus, now: DateTime<Utc>) {
    let archiving = target == StreamStatus::Archived;

    stream.testing_started_at = None;
    stream.live_started_at = None;
    if !archiving {
        stream.offline_at = None;
        stream.stale_at = None;
    }
    stream.archived_at = None;

    match target {
        StreamStatus::Ready => {}
        StreamStatus::Testing => stream.testing_started_at = Some(now),
        StreamStatus::Live => stream.live_started_at = Some(now),
        StreamStatus::Offline => stream.offline_at = Some(now),
        StreamStatus::Stale => stream.stale_at = Some(now),
        StreamStatus::Archived => stream.archived_at = Some(now),
    }
    stream.status = target;
}

/// Filter accepted by stream listings: `ALL` or a single status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFilter {
    All,
    Status(StreamStatus),
}

impl FromStr for StreamFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            Ok(StreamFilter::All)
        } else {
            s.parse().map(StreamFilter::Status)
        }
    }
}

impl fmt::Display for StreamFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFilter::All => f.write_str("ALL"),
            StreamFilter::Status(status) => status.fmt(f),
        }
    }
}

/// Fields required to register a stream
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewStream {
    pub stream_id: String,
    pub sponsor_address: String,
    pub token_balance: f64,
    pub rtmp_url: String,
}

#[derive(Clone)]
pub struct LifecycleManager {
    database: Arc<dyn Database>,
}

impl LifecycleManager {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Create a stream in the READY state
    pub async fn register_stream(&self, new: NewStream) -> CoordinatorResult<Stream> {
        let stream_id = new.stream_id.trim();
        if stream_id.is_empty() {
            return Err(CoordinatorError::validation("stream_id must not be empty"));
        }
        if new.sponsor_address.trim().is_empty() {
            return Err(CoordinatorError::validation("sponsor_address must not be empty"));
        }
        if new.rtmp_url.trim().is_empty() {
            return Err(CoordinatorError::validation("rtmp_url must not be empty"));
        }
        if !new.token_balance.is_finite() || new.token_balance < 0.0 {
            return Err(CoordinatorError::validation("token_balance must be a non-negative number"));
        }
        if self.database.get_stream(stream_id).await?.is_some() {
            return Err(CoordinatorError::validation(format!("Stream {stream_id} already exists")));
        }

        let mut stream = Stream::new(
            stream_id.to_string(),
            new.sponsor_address.trim().to_string(),
            new.token_balance,
            new.rtmp_url.trim().to_string(),
        );
        stream.id = Some(self.database.insert_stream(&stream).await?);

        info!(stream_id = %stream.stream_id, sponsor = %stream.sponsor_address, "Registered stream");
        Ok(stream)
    }

    pub async fn get_stream(&self, stream_id: &str) -> CoordinatorResult<Stream> {
        self.database
            .get_stream(stream_id)
            .await?
            .ok_or_else(|| CoordinatorError::StreamNotFound(stream_id.to_string()))
    }

    pub async fn list_streams(&self, filter: StreamFilter) -> CoordinatorResult<Vec<Stream>> {
        let streams = match filter {
            StreamFilter::All => self.database.list_streams(None, None).await?,
            StreamFilter::Status(status) => self.database.list_streams(Some(&[status]), None).await?,
        };
        Ok(streams)
    }

    /// Streams with status exactly LIVE
    pub async fn live_streams(&self) -> CoordinatorResult<Vec<Stream>> {
        self.list_streams(StreamFilter::Status(StreamStatus::Live)).await
    }

    /// Streams eligible for probing and payouts
    pub async fn operational_streams(&self) -> CoordinatorResult<Vec<Stream>> {
        Ok(self.database.list_streams(Some(&StreamStatus::OPERATIONAL), None).await?)
    }

    /// Move a stream to `target`, stamping the entered state's timestamp
    pub async fn transition(&self, stream_id: &str, target: StreamStatus) -> CoordinatorResult<Stream> {
        let mut stream = self.get_stream(stream_id).await?;
        let from = stream.status;

        if !can_transition(from, target) {
            return Err(CoordinatorError::InvalidTransition { from, to: target });
        }

        let now = Utc::now();
        stamp_lifecycle(&mut stream, target, now);

        let record = StreamTransition {
            stream_id: stream.stream_id.clone(),
            from_status: from,
            to_status: target,
            transitioned_at: now,
        };
        if !self.database.apply_transition(&stream, &record).await? {
            // Lost a race with a concurrent transition; report against the state it left behind
            let current = self.get_stream(stream_id).await?.status;
            return Err(CoordinatorError::InvalidTransition { from: current, to: target });
        }

        info!(stream_id = %stream.stream_id, from = %from, to = %target, "Stream transitioned");
        Ok(stream)
    }

    pub async fn transition_history(&self, stream_id: &str) -> CoordinatorResult<Vec<StreamTransition>> {
        // Distinguish "unknown stream" from "never transitioned"
        self.get_stream(stream_id).await?;
        Ok(self.database.get_transitions(stream_id).await?)
    }

    /// Delete a stream together with its nodes
    pub async fn delete_stream(&self, stream_id: &str) -> CoordinatorResult<()> {
        if !self.database.delete_stream(stream_id).await? {
            return Err(CoordinatorError::StreamNotFound(stream_id.to_string()));
        }
        info!(stream_id, "Deleted stream and its nodes");
        Ok(())
    }
}
