use std::{io::BufRead, process::ExitCode, time::Duration};

use clap::Parser;
use tokio::sync::mpsc;
use yta_watch::{
    broadcast::{self, BroadcastQuery},
    capture::YoutubeDl,
    config::{self, Config},
    coordinator::{Coordinator, CoordinatorHandle, RetryPolicy},
    model::CancelReason,
    poller::Poller,
    youtube::YoutubeDataApi,
};

/// How long a quit waits for a running capture to wind down.
const QUIT_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = config::Args::parse();
    if args.version {
        println!("{}", config::VERSION);
        return ExitCode::SUCCESS;
    }

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    log::info!("Youtube Data API call interval time: {:?}", config.interval);

    let api = match YoutubeDataApi::new(&config.api_key, broadcast::QUERY_TIMEOUT) {
        Ok(api) => api,
        Err(e) => {
            log::error!("Could not create YouTube Data API client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (coordinator, handle, mut complete_rx) =
        Coordinator::new(YoutubeDl::new(&config.downloader), RetryPolicy::default());
    tokio::spawn(coordinator.run());

    let poller = Poller::new(
        BroadcastQuery::new(api),
        &config.channel_id,
        handle.clone(),
        config.interval,
    );
    tokio::spawn(poller.run());

    let mut input_rx = spawn_input_reader();

    loop {
        tokio::select! {
            Some(line) = input_rx.recv() => {
                if line == "quit" || line == "q" {
                    quit(&handle).await;
                    println!("exit from user");
                    return ExitCode::SUCCESS;
                }
            }
            Some(done) = complete_rx.recv() => {
                log::info!("Capture of {} finished", done.video_id);
                println!("Live capture completed!");
                if !config.continuous {
                    return ExitCode::SUCCESS;
                }
            }
            else => return ExitCode::SUCCESS,
        }
    }
}

/// Reads stdin on its own thread so a pending read never holds up shutdown.
fn spawn_input_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(255);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("Could not read stdin: {}", e);
                    break;
                }
            };
            if tx.blocking_send(line.trim().to_string()).is_err() {
                break;
            }
        }
    });

    rx
}

async fn quit(handle: &CoordinatorHandle) {
    if !handle.stop(CancelReason::User, QUIT_GRACE).await {
        // kill_on_drop takes over once the runtime shuts down
        log::warn!(
            "Capture did not stop within {:?}, the capture tool will be killed",
            QUIT_GRACE
        );
    }
}
