//! # yta-watch
//!
//! Watches a YouTube channel for an upcoming or running live broadcast and
//! drives an external capture tool (`youtube-dl` by default) once the
//! broadcast is about to start.
//!
//! ## Usage
//!
//! The binary wires three long-lived tasks together: a [`poller::Poller`]
//! that discovers broadcasts through the YouTube Data API, a
//! [`coordinator::Coordinator`] that waits for the scheduled start and
//! retries the capture tool until the stream is live, and a driver that
//! reacts to operator input and completion.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use yta_watch::{
//!     broadcast::BroadcastQuery,
//!     capture::YoutubeDl,
//!     coordinator::{Coordinator, RetryPolicy},
//!     poller::Poller,
//!     youtube::YoutubeDataApi,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let api = YoutubeDataApi::new("API_KEY", Duration::from_secs(30)).unwrap();
//!     let (coordinator, handle, mut complete_rx) =
//!         Coordinator::new(YoutubeDl::default(), RetryPolicy::default());
//!     tokio::spawn(coordinator.run());
//!
//!     let poller = Poller::new(
//!         BroadcastQuery::new(api),
//!         "UC...",
//!         handle,
//!         Duration::from_secs(180),
//!     );
//!     tokio::spawn(poller.run());
//!
//!     if let Some(done) = complete_rx.recv().await {
//!         println!("Captured {}", done.video_id);
//!     }
//! }
//! ```

#![deny(unsafe_code)]

#[macro_use]
extern crate log;

pub mod broadcast;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod model;
pub mod poller;
pub mod util;
pub mod youtube;
