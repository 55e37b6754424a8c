use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    model::BroadcastTarget,
    youtube::{ApiError, DataApi, LiveBroadcastContent},
};

/// Upper bound for one Data API round trip, retries included.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

const SEARCH_MAX_RESULTS: u32 = 3;

/// Upcoming broadcasts scheduled further in the past than this are stale.
const STALE_AFTER_SECS: i64 = 30 * 60;

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("YouTube Data API error")]
    ApiError(#[from] ApiError),
    #[error("Query took longer than {0:?}")]
    Timeout(Duration),
}

/// `true` when the scheduled time lies more than 30 minutes behind `now`.
pub fn is_stale(scheduled_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    (scheduled_start - now).num_seconds() < -STALE_AFTER_SECS
}

pub struct BroadcastQuery<A> {
    api: A,
    timeout: Duration,
}

impl<A: DataApi> BroadcastQuery<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            timeout: QUERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Looks for a live or upcoming broadcast among the channel's latest
    /// items.
    pub async fn find_current_broadcast(
        &self,
        channel_id: &str,
    ) -> Result<Option<BroadcastTarget>, QueryError> {
        self.bounded(self.find_current_broadcast_at(channel_id, Utc::now()))
            .await
    }

    /// Scheduled start of a known broadcast, `None` once it stops resolving.
    pub async fn resolve_scheduled_start(
        &self,
        video_id: &str,
    ) -> Result<Option<DateTime<Utc>>, QueryError> {
        self.bounded(self.resolve_unbounded(video_id)).await
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, QueryError>
    where
        F: std::future::Future<Output = Result<T, QueryError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| QueryError::Timeout(self.timeout))?
    }

    async fn resolve_unbounded(&self, video_id: &str) -> Result<Option<DateTime<Utc>>, QueryError> {
        let details = self.api.live_details(video_id).await?;
        Ok(details.and_then(|d| d.scheduled_start_time))
    }

    pub(crate) async fn find_current_broadcast_at(
        &self,
        channel_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BroadcastTarget>, QueryError> {
        let items = self
            .api
            .search_recent(channel_id, SEARCH_MAX_RESULTS)
            .await?;

        for item in items {
            let Some(video_id) = item.id.video_id else {
                continue;
            };

            match item.snippet.live_broadcast_content {
                LiveBroadcastContent::Live => {
                    debug!("{} is live now", video_id);
                    return Ok(Some(BroadcastTarget::new(video_id, now)));
                }
                LiveBroadcastContent::Upcoming => {
                    let Some(scheduled_start) = self.resolve_unbounded(&video_id).await? else {
                        return Ok(None);
                    };
                    if is_stale(scheduled_start, now) {
                        info!(
                            "Skipping {}: scheduled start {} is stale",
                            video_id, scheduled_start
                        );
                        return Ok(None);
                    }
                    return Ok(Some(BroadcastTarget::new(video_id, scheduled_start)));
                }
                LiveBroadcastContent::None | LiveBroadcastContent::Unknown => continue,
            }
        }

        Ok(None)
    }
}
