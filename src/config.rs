use std::time::Duration;

use clap::Parser;

use crate::{capture, util};

pub const VERSION: &str = "0.1.0";

/// Watch a YouTube channel and capture its next live stream
#[derive(Parser, Debug)]
#[command(about, long_about = None, disable_version_flag = true)]
pub struct Args {
    /// YouTube Data API key
    #[arg(long = "api", env = "YTA_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// YouTube channel ID
    #[arg(long = "channel", env = "YTA_CHANNEL")]
    pub channel_id: Option<String>,

    /// YouTube Data API call interval, e.g. '500ms', '30s', '3m', '1h'
    #[arg(long, env = "YTA_INTERVAL", default_value = "3m")]
    pub interval: String,

    /// Find the next broadcast once a capture completes
    #[arg(long, env = "YTA_INFINITY")]
    pub infinity: bool,

    /// Capture tool to invoke
    #[arg(long, env = "YTA_DOWNLOADER", default_value = capture::DEFAULT_DOWNLOADER)]
    pub downloader: String,

    /// Print version
    #[arg(short = 'v', long = "version")]
    pub version: bool,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Channel must be specified.")]
    MissingChannel,
    #[error("Api must be specified.")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_key: String,
    pub channel_id: String,
    pub interval: Duration,
    pub continuous: bool,
    pub downloader: String,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let channel_id = non_empty(args.channel_id).ok_or(ConfigError::MissingChannel)?;
        let api_key = non_empty(args.api_key).ok_or(ConfigError::MissingApiKey)?;

        Ok(Self {
            api_key,
            channel_id,
            interval: util::parse_interval(&args.interval),
            continuous: args.infinity,
            downloader: args.downloader,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
