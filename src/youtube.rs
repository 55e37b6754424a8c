use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::util;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

// Subsets of the YouTube Data API v3 search.list and videos.list responses

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchListResponse {
    #[serde(default)]
    pub items: Vec<SearchResult>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: ResourceId,
    pub snippet: SearchSnippet,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub kind: String,
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSnippet {
    pub channel_id: String,
    pub title: String,
    pub live_broadcast_content: LiveBroadcastContent,
}

/// `upcoming` before the stream, `live` while streaming, `none` for past
/// streams and regular uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveBroadcastContent {
    None,
    Live,
    Upcoming,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoListResponse {
    #[serde(default)]
    pub items: Vec<Video>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamingDetails {
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Could not build HTTP client")]
    ClientError(#[from] reqwest::Error),
    #[error("Data API request failed")]
    RequestError(#[from] util::HttpError),
}

/// The two Data API calls the broadcast query needs.
#[async_trait]
pub trait DataApi: Send + Sync {
    /// Most recent items of a channel, newest first.
    async fn search_recent(
        &self,
        channel_id: &str,
        max_results: u32,
    ) -> Result<Vec<SearchResult>, ApiError>;

    /// Live streaming details of a single video, `None` when the id no
    /// longer resolves.
    async fn live_details(&self, video_id: &str) -> Result<Option<LiveStreamingDetails>, ApiError>;
}

#[async_trait]
impl<T: DataApi + ?Sized> DataApi for std::sync::Arc<T> {
    async fn search_recent(
        &self,
        channel_id: &str,
        max_results: u32,
    ) -> Result<Vec<SearchResult>, ApiError> {
        (**self).search_recent(channel_id, max_results).await
    }

    async fn live_details(&self, video_id: &str) -> Result<Option<LiveStreamingDetails>, ApiError> {
        (**self).live_details(video_id).await
    }
}

pub struct YoutubeDataApi {
    client: util::HttpClient,
    api_key: String,
    base_url: String,
}

impl YoutubeDataApi {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: util::HttpClient::new(timeout)?,
            api_key: api_key.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl DataApi for YoutubeDataApi {
    async fn search_recent(
        &self,
        channel_id: &str,
        max_results: u32,
    ) -> Result<Vec<SearchResult>, ApiError> {
        let url = format!("{}/search", self.base_url);
        let max_results = max_results.to_string();
        let res: SearchListResponse = self
            .client
            .fetch_json(
                &url,
                &[
                    ("part", "snippet"),
                    ("channelId", channel_id),
                    ("maxResults", &max_results),
                    ("order", "date"),
                    ("key", &self.api_key),
                ],
            )
            .await?;

        Ok(res.items)
    }

    async fn live_details(&self, video_id: &str) -> Result<Option<LiveStreamingDetails>, ApiError> {
        let url = format!("{}/videos", self.base_url);
        let res: VideoListResponse = self
            .client
            .fetch_json(
                &url,
                &[
                    ("part", "liveStreamingDetails"),
                    ("id", video_id),
                    ("maxResults", "1"),
                    ("key", &self.api_key),
                ],
            )
            .await?;

        Ok(res
            .items
            .into_iter()
            .next()
            .and_then(|v| v.live_streaming_details))
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, str::FromStr};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };

    use super::*;

    /// Answers one request with `body` and yields its request line.
    async fn serve_once(body: &'static str) -> (SocketAddr, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();

            let request = String::from_utf8_lossy(&request).to_string();
            request.lines().next().unwrap_or_default().to_string()
        });

        (addr, server)
    }

    fn local_api(addr: SocketAddr) -> YoutubeDataApi {
        YoutubeDataApi::new("KEY", Duration::from_secs(5))
            .unwrap()
            .with_base_url(&format!("http://{}/", addr))
    }

    #[tokio::test]
    async fn search_request_against_local_server() {
        let (addr, server) = serve_once(
            r#"{"items": [{"id": {"kind": "youtube#video", "videoId": "abc123"},
                "snippet": {"channelId": "UCxyz", "title": "t", "liveBroadcastContent": "live"}}]}"#,
        )
        .await;

        let items = local_api(addr).search_recent("UCxyz", 3).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].snippet.live_broadcast_content, LiveBroadcastContent::Live);

        let line = server.await.unwrap();
        assert!(line.starts_with("GET /search?"), "{}", line);
        for param in [
            "part=snippet",
            "channelId=UCxyz",
            "maxResults=3",
            "order=date",
            "key=KEY",
        ] {
            assert!(line.contains(param), "{} missing from {}", param, line);
        }
    }

    #[tokio::test]
    async fn videos_request_against_local_server() {
        let (addr, server) = serve_once(
            r#"{"items": [{"id": "abc123",
                "liveStreamingDetails": {"scheduledStartTime": "2024-02-15T08:15:00Z"}}]}"#,
        )
        .await;

        let details = local_api(addr)
            .live_details("abc123")
            .await
            .unwrap()
            .expect("No live streaming details");
        assert_eq!(
            details.scheduled_start_time,
            Some(DateTime::<Utc>::from_str("2024-02-15T08:15:00Z").unwrap())
        );

        let line = server.await.unwrap();
        assert!(line.starts_with("GET /videos?"), "{}", line);
        for param in ["part=liveStreamingDetails", "id=abc123", "maxResults=1", "key=KEY"] {
            assert!(line.contains(param), "{} missing from {}", param, line);
        }
    }

    #[tokio::test]
    async fn empty_video_list_resolves_to_none() {
        let (addr, server) = serve_once(r#"{"items": []}"#).await;

        assert!(local_api(addr).live_details("gone").await.unwrap().is_none());
        assert!(server.await.unwrap().contains("id=gone"));
    }

    #[test]
    fn search_response() {
        let json = r#"{
            "kind": "youtube#searchListResponse",
            "regionCode": "JP",
            "items": [
                {
                    "kind": "youtube#searchResult",
                    "id": { "kind": "youtube#video", "videoId": "abc123" },
                    "snippet": {
                        "channelId": "UCxyz",
                        "title": "Morning stream",
                        "liveBroadcastContent": "upcoming"
                    }
                },
                {
                    "kind": "youtube#searchResult",
                    "id": { "kind": "youtube#playlist", "playlistId": "PL1" },
                    "snippet": {
                        "channelId": "UCxyz",
                        "title": "Archive",
                        "liveBroadcastContent": "none"
                    }
                }
            ]
        }"#;
        let res: SearchListResponse = serde_json::from_str(json).expect("Could not parse search");

        assert_eq!(res.items.len(), 2);
        assert_eq!(res.items[0].id.video_id.as_deref(), Some("abc123"));
        assert_eq!(
            res.items[0].snippet.live_broadcast_content,
            LiveBroadcastContent::Upcoming
        );
        assert!(res.items[1].id.video_id.is_none());
        assert_eq!(
            res.items[1].snippet.live_broadcast_content,
            LiveBroadcastContent::None
        );
    }

    #[test]
    fn search_response_without_items() {
        let res: SearchListResponse =
            serde_json::from_str(r#"{"kind": "youtube#searchListResponse"}"#).unwrap();
        assert!(res.items.is_empty());
    }

    #[test]
    fn unknown_broadcast_content() {
        let content: LiveBroadcastContent = serde_json::from_str(r#""completed""#).unwrap();
        assert_eq!(content, LiveBroadcastContent::Unknown);
    }

    #[test]
    fn video_response() {
        let json = r#"{
            "items": [
                {
                    "id": "abc123",
                    "liveStreamingDetails": {
                        "scheduledStartTime": "2024-02-15T08:15:00Z",
                        "activeLiveChatId": "chat"
                    }
                }
            ]
        }"#;
        let res: VideoListResponse = serde_json::from_str(json).expect("Could not parse videos");
        let details = res.items[0]
            .live_streaming_details
            .as_ref()
            .expect("No live streaming details");

        assert_eq!(
            details.scheduled_start_time,
            Some(DateTime::<Utc>::from_str("2024-02-15T08:15:00Z").unwrap())
        );
        assert!(details.actual_start_time.is_none());
    }
}
