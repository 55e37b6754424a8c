use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::{
    broadcast::BroadcastQuery,
    coordinator::{CoordinatorHandle, Ticket},
    model::{BroadcastTarget, CancelReason, DownloadStatus},
    util,
    youtube::DataApi,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PollState {
    Idle,
    Armed { ticket: Ticket, target: BroadcastTarget },
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    NotFound,
    QueryFailed,
    Armed(BroadcastTarget),
    ArmFailed,
    /// The capture is running, nothing to re-check.
    Busy,
    Unchanged,
    Rescheduled(BroadcastTarget),
    Deleted,
}

impl TickOutcome {
    pub fn skips_wait(&self) -> bool {
        matches!(self, TickOutcome::Deleted)
    }
}

pub struct Poller<A> {
    query: BroadcastQuery<A>,
    channel_id: String,
    handle: CoordinatorHandle,
    interval: Duration,
    state: PollState,
}

impl<A: DataApi> Poller<A> {
    pub fn new(
        query: BroadcastQuery<A>,
        channel_id: &str,
        handle: CoordinatorHandle,
        interval: Duration,
    ) -> Self {
        Self {
            query,
            channel_id: channel_id.to_string(),
            handle,
            interval,
            state: PollState::Idle,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            let outcome = self.tick().await;
            debug!("Poll tick: {:?}", outcome);
            if !outcome.skips_wait() {
                ticker.tick().await;
            }
        }
    }

    pub async fn tick(&mut self) -> TickOutcome {
        match self.state.clone() {
            PollState::Idle => self.discover().await,
            PollState::Armed { ticket, target } => self.recheck(ticket, target).await,
        }
    }

    async fn discover(&mut self) -> TickOutcome {
        info!("Get channel info");
        let target = match self.query.find_current_broadcast(&self.channel_id).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                info!("Failed to get a live feed start time");
                return TickOutcome::NotFound;
            }
            Err(e) => {
                warn!("youtube api find_current_broadcast error: {}", e);
                return TickOutcome::QueryFailed;
            }
        };

        match self.handle.set_target(target.clone()) {
            Ok(ticket) => {
                info!("Got a live feed start time");
                info!(
                    "It's scheduled to start at {} (id: {})",
                    util::format_jst(&target.scheduled_start),
                    target.video_id
                );
                self.state = PollState::Armed {
                    ticket,
                    target: target.clone(),
                };
                TickOutcome::Armed(target)
            }
            Err(e) => {
                warn!("Could not arm {}: {}", target.video_id, e);
                TickOutcome::ArmFailed
            }
        }
    }

    async fn recheck(&mut self, ticket: Ticket, target: BroadcastTarget) -> TickOutcome {
        let state = self.handle.state();
        if state.is_finished(ticket) {
            debug!("Cycle for {} has ended", target.video_id);
            self.state = PollState::Idle;
            return self.discover().await;
        }
        if state.status != DownloadStatus::NotYetStarted {
            debug!("Capture of {} is {}, skipping re-check", target.video_id, state.status);
            return TickOutcome::Busy;
        }

        let new_start = match self.query.resolve_scheduled_start(&target.video_id).await {
            Ok(start) => start,
            Err(e) => {
                warn!("youtube api resolve_scheduled_start error: {}", e);
                return TickOutcome::Unchanged;
            }
        };

        // The cycle may have ended while the lookup was in flight
        if self.handle.state().is_finished(ticket) {
            debug!("Cycle for {} ended during re-check", target.video_id);
            self.state = PollState::Idle;
            return self.discover().await;
        }

        let Some(new_start) = new_start else {
            info!("{} no longer resolves", target.video_id);
            self.send_cancel(ticket, CancelReason::Deleted);
            self.state = PollState::Idle;
            return TickOutcome::Deleted;
        };

        if new_start.timestamp() == target.scheduled_start.timestamp() {
            return TickOutcome::Unchanged;
        }

        self.send_cancel(ticket, CancelReason::ReSchedule);

        let target = BroadcastTarget::new(target.video_id, new_start);
        match self.handle.set_target(target.clone()) {
            Ok(ticket) => {
                info!("Got a live feed new start time");
                info!(
                    "It's re scheduled to start at {} (id: {})",
                    util::format_jst(&target.scheduled_start),
                    target.video_id
                );
                self.state = PollState::Armed {
                    ticket,
                    target: target.clone(),
                };
            }
            Err(e) => {
                warn!("Could not re-arm {}: {}", target.video_id, e);
                self.state = PollState::Idle;
            }
        }

        TickOutcome::Rescheduled(target)
    }

    fn send_cancel(&self, ticket: Ticket, reason: CancelReason) {
        if let Err(e) = self.handle.cancel_ticket(ticket, reason) {
            warn!("Could not cancel capture ({}): {}", reason, e);
        }
    }
}
