use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossterm::event::KeyCode;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::fleet::NodeFleet;
use crate::history::RETENTION_MINUTES;
use crate::models::{FleetOverview, GuardPolicy, NodeSnapshot};

pub const EVENT_LOG_CAPACITY: usize = 50;
pub const THRESHOLD_STEP_W: f64 = 10.0;
/// Polls of fleet-wide utilisation kept for the trend sparkline.
pub const TREND_CAPACITY: usize = 120;

/// Work handed to the fleet. Each action takes the fleet lock for its
/// whole duration, so actions never interleave on a node.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Poll { auto_guard: bool },
    Start(Vec<String>),
    Stop(Vec<String>),
    SetPolicy(GuardPolicy),
}

/// Results flowing back from fleet tasks to the UI loop.
#[derive(Clone, Debug, PartialEq)]
pub enum AppEvent {
    Snapshot(Vec<NodeSnapshot>),
    Log(String),
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Dashboard state
pub struct App {
    fleet: Arc<Mutex<NodeFleet>>,
    events_tx: mpsc::UnboundedSender<AppEvent>,
    events_rx: mpsc::UnboundedReceiver<AppEvent>,
    auto_guard: Arc<AtomicBool>,
    refresh_interval: Duration,
    pub snapshots: Vec<NodeSnapshot>,
    pub overview: FleetOverview,
    pub policy: GuardPolicy,
    pub selected: usize,
    pub log: VecDeque<LogEntry>,
    pub util_trend: VecDeque<u64>,
    pub frame_count: u64,
}

impl App {
    pub fn new(
        fleet: NodeFleet,
        policy: GuardPolicy,
        auto_guard: bool,
        refresh_interval: Duration,
    ) -> Self {
        let snapshots = fleet.snapshot();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        App {
            overview: FleetOverview::from_snapshots(&snapshots),
            snapshots,
            fleet: Arc::new(Mutex::new(fleet)),
            events_tx,
            events_rx,
            auto_guard: Arc::new(AtomicBool::new(auto_guard)),
            refresh_interval,
            policy,
            selected: 0,
            log: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
            util_trend: VecDeque::with_capacity(TREND_CAPACITY),
            frame_count: 0,
        }
    }

    pub fn auto_guard(&self) -> bool {
        self.auto_guard.load(Ordering::Relaxed)
    }

    /// Poll the fleet every refresh interval, starting immediately.
    pub fn spawn_poller(&self) -> JoinHandle<()> {
        let fleet = Arc::clone(&self.fleet);
        let tx = self.events_tx.clone();
        let auto_guard = Arc::clone(&self.auto_guard);
        let period = self.refresh_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let action = Action::Poll {
                    auto_guard: auto_guard.load(Ordering::Relaxed),
                };
                for event in run_action(&fleet, action).await {
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        })
    }

    pub fn dispatch(&self, action: Action) {
        debug!(?action, "dispatching");
        let fleet = Arc::clone(&self.fleet);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            for event in run_action(&fleet, action).await {
                let _ = tx.send(event);
            }
        });
    }

    /// Apply everything the fleet tasks have reported so far.
    pub fn drain(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
        }
    }

    pub fn apply(&mut self, event: AppEvent) {
        match event {
            AppEvent::Snapshot(snapshots) => {
                self.overview = FleetOverview::from_snapshots(&snapshots);
                if let Some(mean) = self.overview.mean_utilization_pct {
                    if self.util_trend.len() == TREND_CAPACITY {
                        self.util_trend.pop_front();
                    }
                    self.util_trend.push_back(mean.round() as u64);
                }
                self.snapshots = snapshots;
                self.clamp_selection();
            }
            AppEvent::Log(message) => self.push_log(message),
        }
    }

    /// Newest first; the oldest entry falls off past capacity.
    pub fn push_log(&mut self, message: impl Into<String>) {
        self.log.push_front(LogEntry {
            at: Utc::now(),
            message: message.into(),
        });
        self.log.truncate(EVENT_LOG_CAPACITY);
    }

    pub fn selected_hostname(&self) -> Option<&str> {
        self.snapshots.get(self.selected).map(|s| s.hostname.as_str())
    }

    pub fn select_next(&mut self) {
        if !self.snapshots.is_empty() {
            self.selected = (self.selected + 1) % self.snapshots.len();
        }
    }

    pub fn select_previous(&mut self) {
        if !self.snapshots.is_empty() {
            self.selected = self
                .selected
                .checked_sub(1)
                .unwrap_or(self.snapshots.len() - 1);
        }
    }

    fn clamp_selection(&mut self) {
        self.selected = self.selected.min(self.snapshots.len().saturating_sub(1));
    }

    /// Returns `false` when the dashboard should exit.
    pub fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Down | KeyCode::Char('j') => self.select_next(),
            KeyCode::Up | KeyCode::Char('k') => self.select_previous(),
            KeyCode::Char('s') => {
                if let Some(host) = self.selected_hostname().map(String::from) {
                    self.push_log(format!("starting guard on {host}"));
                    self.dispatch(Action::Start(vec![host]));
                }
            }
            KeyCode::Char('x') => {
                if let Some(host) = self.selected_hostname().map(String::from) {
                    self.push_log(format!("stopping guard on {host}"));
                    self.dispatch(Action::Stop(vec![host]));
                }
            }
            KeyCode::Char('S') => {
                self.push_log("starting guard on all nodes");
                self.dispatch(Action::Start(Vec::new()));
            }
            KeyCode::Char('X') => {
                self.push_log("stopping guard on all nodes");
                self.dispatch(Action::Stop(Vec::new()));
            }
            KeyCode::Char('a') => {
                let enabled = !self.auto_guard.fetch_xor(true, Ordering::Relaxed);
                self.push_log(format!(
                    "auto-guard {}",
                    if enabled { "enabled" } else { "disabled" }
                ));
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                self.adjust_policy(0, THRESHOLD_STEP_W);
            }
            KeyCode::Char('-') => self.adjust_policy(0, -THRESHOLD_STEP_W),
            KeyCode::Char(']') => self.adjust_policy(1, 0.0),
            KeyCode::Char('[') => self.adjust_policy(-1, 0.0),
            KeyCode::Char('r') => {
                self.dispatch(Action::Poll {
                    auto_guard: self.auto_guard(),
                });
            }
            KeyCode::Char('c') => self.log.clear(),
            _ => {}
        }
        true
    }

    /// Nudge the policy, clamped to its valid range. Nothing is sent when
    /// the clamp leaves it unchanged.
    fn adjust_policy(&mut self, interval_delta: i64, threshold_delta: f64) {
        let interval = (i64::from(self.policy.interval_minutes()) + interval_delta)
            .clamp(1, i64::from(RETENTION_MINUTES)) as u32;
        let threshold = (self.policy.power_threshold_w() + threshold_delta).max(0.0);
        match GuardPolicy::new(interval, threshold) {
            Ok(policy) if policy != self.policy => {
                self.policy = policy;
                self.dispatch(Action::SetPolicy(policy));
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "rejected policy adjustment"),
        }
    }

    pub fn tick(&mut self) {
        self.frame_count += 1;
    }

    /// Close every remote session. Waits for in-flight actions to release
    /// the fleet first.
    pub async fn shutdown(&self) {
        self.fleet.lock().await.close().await;
    }
}

/// Run one action against the fleet and describe what happened.
pub async fn run_action(fleet: &Mutex<NodeFleet>, action: Action) -> Vec<AppEvent> {
    let mut fleet = fleet.lock().await;
    let mut events = Vec::new();

    match action {
        Action::Poll { auto_guard } => {
            fleet.update().await;
            if auto_guard {
                let started = fleet.auto_guard().await;
                if !started.is_empty() {
                    events.push(AppEvent::Log(format!(
                        "auto-guard started guard on {}",
                        started.join(", ")
                    )));
                }
            }
        }
        Action::Start(names) => {
            for (host, running) in fleet.start_guard(&names).await {
                if names.is_empty() || names.contains(&host) {
                    events.push(AppEvent::Log(if running {
                        format!("guard running on {host}")
                    } else {
                        format!("failed to start guard on {host}")
                    }));
                }
            }
        }
        Action::Stop(names) => {
            for (host, stopped) in fleet.stop_guard(&names).await {
                if names.is_empty() || names.contains(&host) {
                    events.push(AppEvent::Log(if stopped {
                        format!("guard stopped on {host}")
                    } else {
                        format!("guard still running on {host}")
                    }));
                }
            }
        }
        Action::SetPolicy(policy) => {
            fleet.update_guard_policy(policy);
            events.push(AppEvent::Log(format!(
                "policy: {} min window, {:.0} W threshold",
                policy.interval_minutes(),
                policy.power_threshold_w()
            )));
        }
    }

    events.push(AppEvent::Snapshot(fleet.snapshot()));
    events
}
