use std::fmt;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    NotYetStarted,
    Downloading,
    Completed,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DownloadStatus::NotYetStarted => "not_yet_started",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
        })
    }
}

/// Why a capture cycle was ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The operator asked to quit.
    User,
    /// The broadcast's scheduled start time moved.
    ReSchedule,
    /// The broadcast no longer resolves.
    Deleted,
}

impl CancelReason {
    pub fn status_code(&self) -> u16 {
        match self {
            CancelReason::User => 100,
            CancelReason::ReSchedule => 105,
            CancelReason::Deleted => 404,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CancelReason::User => "User canceled",
            CancelReason::ReSchedule => "Live start time re schedule",
            CancelReason::Deleted => "Live deleted",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), self.status_code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastTarget {
    pub video_id: String,
    pub scheduled_start: DateTime<Utc>,
}

impl BroadcastTarget {
    pub fn new(video_id: impl Into<String>, scheduled_start: DateTime<Utc>) -> Self {
        Self {
            video_id: video_id.into(),
            scheduled_start,
        }
    }
}
