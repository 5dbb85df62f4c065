use crate::cycle::CycleController;
use crate::types::{SchedulerConfig, SourceList};
use std::fmt;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Which graceful-stop request arrived. Both are handled the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

/// Events delivered to the scheduler through its single queue.
#[derive(Debug)]
pub enum Control {
    /// Replace the source list used by the next cycle.
    Reload(SourceList),
    Stop(StopSignal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    RunningCycle,
    Waiting,
    Draining,
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::RunningCycle => "running-cycle",
            SchedulerState::Waiting => "waiting",
            SchedulerState::Draining => "draining",
            SchedulerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerReport {
    pub cycles: usize,
    pub failed_cycles: usize,
}

/// Capacity of the control queue. Senders wait when it is full.
pub const CONTROL_QUEUE_CAPACITY: usize = 16;

pub fn control_channel() -> (mpsc::Sender<Control>, mpsc::Receiver<Control>) {
    mpsc::channel(CONTROL_QUEUE_CAPACITY)
}

/// Drives cycles on a fixed interval and owns the current source list.
///
/// The source list only changes through [`Control::Reload`] events, which the
/// scheduler applies itself; a running cycle keeps the list it started with.
/// A stop request lets the running cycle finish. Its fetches get at most
/// [`SchedulerConfig::shutdown_grace`] more before they are abandoned, so shutdown
/// is not held up by slow sources.
pub struct Scheduler {
    controller: CycleController,
    config: SchedulerConfig,
    sources: SourceList,
    events: mpsc::Receiver<Control>,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(
        controller: CycleController,
        config: SchedulerConfig,
        sources: SourceList,
        events: mpsc::Receiver<Control>,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            controller,
            config,
            sources,
            events,
            state,
        }
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub async fn run(mut self) -> SchedulerReport {
        let mut report = SchedulerReport::default();

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick is immediate; the first cycle runs now.
        ticker.tick().await;

        info!(
            "Scheduler started with {} sources, refreshing every {:?}",
            self.sources.len(),
            self.config.interval
        );

        loop {
            let stop_requested = self.run_cycle(&mut report).await;
            if stop_requested || self.config.once {
                break;
            }

            self.set_state(SchedulerState::Waiting);
            let stop_requested = loop {
                tokio::select! {
                    _ = ticker.tick() => break false,
                    event = self.events.recv() => match event {
                        Some(Control::Reload(sources)) => self.apply_reload(sources),
                        Some(Control::Stop(signal)) => {
                            info!("Received {:?}, stopping", signal);
                            break true;
                        }
                        None => {
                            info!("Control channel closed, stopping");
                            break true;
                        }
                    },
                }
            };
            if stop_requested {
                self.set_state(SchedulerState::Draining);
                break;
            }
        }

        self.set_state(SchedulerState::Stopped);
        info!(
            cycles = report.cycles,
            failed = report.failed_cycles,
            "Scheduler stopped"
        );
        report
    }

    /// Runs one cycle while still listening for events. Returns true when a stop
    /// was requested during the cycle.
    async fn run_cycle(&mut self, report: &mut SchedulerReport) -> bool {
        self.set_state(SchedulerState::RunningCycle);

        let controller = self.controller.clone();
        let sources = self.sources.clone();
        let cancel = CancellationToken::new();
        let mut stop_requested = false;

        // Moved forward when a stop arrives. Fetches still running then are abandoned.
        let mut grace_deadline = Instant::now();

        let cycle = controller.run(&sources, &cancel);
        tokio::pin!(cycle);

        let result = loop {
            tokio::select! {
                result = &mut cycle => break result,
                event = self.events.recv(), if !stop_requested => {
                    match event {
                        Some(Control::Reload(sources)) => {
                            self.apply_reload(sources);
                            continue;
                        }
                        Some(Control::Stop(signal)) => {
                            info!("Received {:?} during a cycle, finishing it first", signal);
                        }
                        None => info!("Control channel closed during a cycle, finishing it first"),
                    }
                    stop_requested = true;
                    grace_deadline = Instant::now() + self.config.shutdown_grace;
                    self.set_state(SchedulerState::Draining);
                }
                _ = tokio::time::sleep_until(grace_deadline), if stop_requested && !cancel.is_cancelled() => {
                    info!(
                        "Shutdown grace of {:?} elapsed, abandoning outstanding fetches",
                        self.config.shutdown_grace
                    );
                    cancel.cancel();
                }
            }
        };

        report.cycles += 1;
        if let Err(e) = result {
            report.failed_cycles += 1;
            error!("Cycle failed: {}", e);
        }

        stop_requested
    }

    fn apply_reload(&mut self, sources: SourceList) {
        info!("New configuration: {}", sources);
        self.sources = sources;
    }

    fn set_state(&self, state: SchedulerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Scheduler {} -> {}", previous, state);
        }
    }
}
