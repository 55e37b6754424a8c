//! Capture lifecycle for one broadcast at a time.
//!
//! A [`Coordinator`] runs in its own task and handles one target per cycle:
//! it waits for a target, waits for the start time and then invokes the
//! capture tool until it reports the stream as captured. Every wait point
//! also listens on a single-slot cancellation mailbox. Other tasks talk to
//! it through a cloneable [`CoordinatorHandle`].

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_retry::strategy::{ExponentialBackoff, FixedInterval};

use crate::{
    capture::{AttemptOutcome, Capturer},
    model::{BroadcastTarget, CancelReason, DownloadStatus},
    util,
};

/// Targets closer than this are checked on [`SHORT_WAIT_INTERVAL`].
const SHORT_WAIT_THRESHOLD_SECS: i64 = 120;
const SHORT_WAIT_INTERVAL: Duration = Duration::from_secs(2);
/// Capture starts this long before the scheduled time.
const LEAD_TIME_SECS: i64 = 30;

/// How long to wait before the first capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartWait {
    /// The start is close, check again after the interval.
    Poll(Duration),
    /// Sleep once until the lead time before the start.
    Until(Duration),
}

impl StartWait {
    pub fn compute(scheduled_start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining = (scheduled_start - now).num_seconds();
        if remaining < SHORT_WAIT_THRESHOLD_SECS {
            StartWait::Poll(SHORT_WAIT_INTERVAL)
        } else {
            StartWait::Until(Duration::from_secs((remaining - LEAD_TIME_SECS) as u64))
        }
    }

    pub fn delay(&self) -> Duration {
        match *self {
            StartWait::Poll(d) | StartWait::Until(d) => d,
        }
    }
}

/// Pacing between capture attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: Option<usize>,
    /// Caps an exponential backoff that starts at `interval` and doubles.
    pub max_backoff: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: None,
            max_backoff: None,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, max_delay: Duration) -> Self {
        self.max_backoff = Some(max_delay);
        self
    }

    /// Delay before each attempt, ends when attempts run out.
    fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let delays: Box<dyn Iterator<Item = Duration> + Send> = match self.max_backoff {
            Some(max_delay) => {
                // 2^n * interval/2 gives interval, 2 * interval, 4 * interval...
                let half = (self.interval.as_millis() as u64 / 2).max(1);
                Box::new(
                    ExponentialBackoff::from_millis(2)
                        .factor(half)
                        .max_delay(max_delay),
                )
            }
            None => Box::new(FixedInterval::new(self.interval)),
        };

        match self.max_attempts {
            Some(n) => Box::new(delays.take(n)),
            None => delays,
        }
    }
}

/// Issued for every armed target, in arming order.
pub type Ticket = u64;

/// Published by the coordinator after every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleState {
    pub status: DownloadStatus,
    /// Ticket of the target the current cycle is working on.
    pub current: Option<Ticket>,
    /// Highest ticket whose cycle has ended.
    pub last_finished: Option<Ticket>,
    pub cycles_ended: u64,
}

impl CycleState {
    pub fn is_finished(&self, ticket: Ticket) -> bool {
        self.last_finished.map_or(false, |t| t >= ticket)
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEnd {
    Cancelled(CancelReason),
    /// The tool reported the stream as downloaded and merged.
    Completed,
    /// The tool exited cleanly without reporting anything we recognise.
    Finished,
    /// The retry policy ran out of attempts.
    GaveUp { attempts: usize },
    /// Every handle was dropped.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub video_id: String,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CancelError {
    #[error("A cancellation is already pending: {0}")]
    Pending(CancelReason),
    #[error("Coordinator is not running")]
    Closed,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ArmError {
    #[error("A target is already waiting to be picked up")]
    Busy,
    #[error("Coordinator is not running")]
    Closed,
}

/// A cancellation, optionally aimed at one ticket. Aimed cancellations
/// that arrive after their cycle has ended are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cancel {
    reason: CancelReason,
    ticket: Option<Ticket>,
}

impl Cancel {
    fn applies_to(&self, current: Option<Ticket>) -> bool {
        match self.ticket {
            Some(ticket) => Some(ticket) == current,
            None => true,
        }
    }
}

/// Next cancellation that applies to `current`, skipping stale ones.
async fn next_cancel(rx: &mut mpsc::Receiver<Cancel>, current: Option<Ticket>) -> CancelReason {
    loop {
        match rx.recv().await {
            Some(cancel) if cancel.applies_to(current) => return cancel.reason,
            Some(cancel) => debug!(
                "Dropping stale cancellation for ticket {:?}: {}",
                cancel.ticket, cancel.reason
            ),
            None => std::future::pending::<()>().await,
        }
    }
}

#[derive(Debug)]
struct Armed {
    ticket: Ticket,
    target: BroadcastTarget,
    wait: StartWait,
}

#[derive(Clone)]
pub struct CoordinatorHandle {
    target_tx: mpsc::Sender<Armed>,
    cancel_tx: mpsc::Sender<Cancel>,
    state_rx: watch::Receiver<CycleState>,
    next_ticket: Arc<AtomicU64>,
}

impl CoordinatorHandle {
    /// Hands a target to the coordinator and returns its ticket.
    pub fn set_target(&self, target: BroadcastTarget) -> Result<Ticket, ArmError> {
        let wait = StartWait::compute(target.scheduled_start, Utc::now());
        self.arm(target, wait)
    }

    pub(crate) fn arm(&self, target: BroadcastTarget, wait: StartWait) -> Result<Ticket, ArmError> {
        let permit = self.target_tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ArmError::Busy,
            mpsc::error::TrySendError::Closed(_) => ArmError::Closed,
        })?;

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;

        debug!(
            "Arming {} (ticket {}) with {:?}",
            target.video_id, ticket, wait
        );
        permit.send(Armed {
            ticket,
            target,
            wait,
        });

        Ok(ticket)
    }

    /// Delivers a cancellation to whichever wait point is active, or keeps
    /// it for the next one. Only one cancellation can be pending.
    pub fn cancel(&self, reason: CancelReason) -> Result<(), CancelError> {
        self.send_cancel(Cancel {
            reason,
            ticket: None,
        })
    }

    /// Like [`cancel`](Self::cancel), but only the cycle working on `ticket`
    /// honours it.
    pub fn cancel_ticket(&self, ticket: Ticket, reason: CancelReason) -> Result<(), CancelError> {
        self.send_cancel(Cancel {
            reason,
            ticket: Some(ticket),
        })
    }

    fn send_cancel(&self, cancel: Cancel) -> Result<(), CancelError> {
        self.cancel_tx.try_send(cancel).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CancelError::Pending(cancel.reason),
            mpsc::error::TrySendError::Closed(_) => CancelError::Closed,
        })
    }

    /// Cancels the active cycle and waits up to `grace` for it to end.
    /// Returns `false` if the cycle is still running afterwards.
    pub async fn stop(&self, reason: CancelReason, grace: Duration) -> bool {
        let ended = self.state().cycles_ended;
        match self.cancel(reason) {
            Ok(()) => (),
            // The pending one ends the cycle just as well
            Err(CancelError::Pending(pending)) => {
                debug!("Cancellation already pending: {}", pending)
            }
            Err(CancelError::Closed) => return true,
        }

        self.wait_cycles_ended(ended + 1, grace).await
    }

    pub fn state(&self) -> CycleState {
        *self.state_rx.borrow()
    }

    pub fn status(&self) -> DownloadStatus {
        self.state_rx.borrow().status
    }

    /// Waits until `count` cycles have ended in total, or `timeout` passes.
    pub async fn wait_cycles_ended(&self, count: u64, timeout: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        let wait = rx.wait_for(|s| s.cycles_ended >= count);
        let ended = matches!(tokio::time::timeout(timeout, wait).await, Ok(Ok(_)));
        ended
    }
}

pub struct Coordinator<C> {
    capturer: C,
    policy: RetryPolicy,
    target_rx: mpsc::Receiver<Armed>,
    cancel_rx: mpsc::Receiver<Cancel>,
    state_tx: watch::Sender<CycleState>,
    complete_tx: mpsc::Sender<Completion>,
}

impl<C: Capturer> Coordinator<C> {
    pub fn new(
        capturer: C,
        policy: RetryPolicy,
    ) -> (Self, CoordinatorHandle, mpsc::Receiver<Completion>) {
        let (target_tx, target_rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let (complete_tx, complete_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(CycleState {
            status: DownloadStatus::NotYetStarted,
            current: None,
            last_finished: None,
            cycles_ended: 0,
        });
        let next_ticket = Arc::new(AtomicU64::new(0));

        let coordinator = Self {
            capturer,
            policy,
            target_rx,
            cancel_rx,
            state_tx,
            complete_tx,
        };
        let handle = CoordinatorHandle {
            target_tx,
            cancel_tx,
            state_rx,
            next_ticket,
        };

        (coordinator, handle, complete_rx)
    }

    /// Runs cycles back to back until every handle is gone.
    pub async fn run(mut self) {
        loop {
            if self.run_cycle().await == CycleEnd::Closed {
                debug!("Coordinator handles dropped, stopping");
                break;
            }
        }
    }

    /// Handles exactly one target from arming to completion or
    /// cancellation. The status always ends as `Completed`.
    pub async fn run_cycle(&mut self) -> CycleEnd {
        self.state_tx.send_modify(|s| {
            s.status = DownloadStatus::NotYetStarted;
            s.current = None;
        });

        let end = self.cycle().await;

        self.state_tx.send_modify(|s| {
            s.status = DownloadStatus::Completed;
            if s.current.is_some() {
                s.last_finished = s.current;
            }
            s.cycles_ended += 1;
        });
        debug!("Cycle ended ({}): {:?}", self.state_tx.borrow().status, end);

        end
    }

    async fn cycle(&mut self) -> CycleEnd {
        // A buffered target is taken before a buffered cancellation
        let armed = tokio::select! {
            biased;
            armed = self.target_rx.recv() => match armed {
                Some(armed) => armed,
                None => return CycleEnd::Closed,
            },
            reason = next_cancel(&mut self.cancel_rx, None) => {
                info!("run cancel (wait video id): {}", reason);
                return CycleEnd::Cancelled(reason);
            }
        };
        let Armed {
            ticket,
            target,
            wait,
        } = armed;

        self.state_tx.send_modify(|s| s.current = Some(ticket));
        info!("Confirm video id: {}", target.video_id);

        let timer = tokio::time::sleep(wait.delay());
        tokio::pin!(timer);
        tokio::select! {
            _ = &mut timer => (),
            reason = next_cancel(&mut self.cancel_rx, Some(ticket)) => {
                info!("run cancel (wait timer): {}", reason);
                return CycleEnd::Cancelled(reason);
            }
        }

        info!("Download start live stream now!");
        self.state_tx
            .send_modify(|s| s.status = DownloadStatus::Downloading);

        self.download(ticket, &target).await
    }

    async fn download(&mut self, ticket: Ticket, target: &BroadcastTarget) -> CycleEnd {
        let url = util::watch_url(&target.video_id);
        let mut attempts = 0;

        for delay in self.policy.delays() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => (),
                reason = next_cancel(&mut self.cancel_rx, Some(ticket)) => {
                    info!("download cancel (retry wait): {}", reason);
                    return CycleEnd::Cancelled(reason);
                }
            }

            attempts += 1;
            debug!("Capture attempt {} for {}", attempts, url);

            let (interrupt_tx, interrupt_rx) = oneshot::channel();
            let attempt = self.capturer.capture(&url, interrupt_rx);
            tokio::pin!(attempt);

            let result = tokio::select! {
                result = &mut attempt => result,
                reason = next_cancel(&mut self.cancel_rx, Some(ticket)) => {
                    info!("download cancel: {}", reason);
                    let _ = interrupt_tx.send(());
                    if let Err(e) = attempt.await {
                        warn!("Capture tool did not quit cleanly: {}", e);
                    }
                    info!("download quit");
                    return CycleEnd::Cancelled(reason);
                }
            };

            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    warn!("download failed: {}", e);
                    continue;
                }
            };

            match output.classify() {
                AttemptOutcome::LiveNotStarted => {
                    info!("live is not started: {}", target.video_id);
                }
                AttemptOutcome::AlreadyDownloaded => {
                    let completion = Completion {
                        video_id: target.video_id.clone(),
                    };
                    if self.complete_tx.try_send(completion).is_err() {
                        warn!("Completion for {} was not delivered", target.video_id);
                    }
                    return CycleEnd::Completed;
                }
                AttemptOutcome::Finished => {
                    info!("Capture tool exited without a completion marker");
                    return CycleEnd::Finished;
                }
                AttemptOutcome::Failed => {
                    warn!("download failed: capture tool exited with an error");
                }
            }
        }

        warn!("Giving up on {} after {} attempts", url, attempts);
        CycleEnd::GaveUp { attempts }
    }
}
