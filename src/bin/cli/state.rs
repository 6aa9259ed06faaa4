use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use stompflow::LifecycleKind;

/// Counters for one CLI session.
pub struct SessionState {
    pub start_time: DateTime<Local>,
    pub host: String,
    pub user: String,
    /// destination -> messages received
    pub subscriptions: BTreeMap<String, u64>,
    pub opened: u64,
    pub closed: u64,
    pub errors: u64,
    pub missed_heartbeats: u64,
    pub last_event: Option<(DateTime<Local>, LifecycleKind)>,
}

impl SessionState {
    pub fn new(host: String, user: String) -> Self {
        Self {
            start_time: Local::now(),
            host,
            user,
            subscriptions: BTreeMap::new(),
            opened: 0,
            closed: 0,
            errors: 0,
            missed_heartbeats: 0,
            last_event: None,
        }
    }

    pub fn record_lifecycle(&mut self, kind: LifecycleKind) {
        match kind {
            LifecycleKind::Opened => self.opened += 1,
            LifecycleKind::Closed => self.closed += 1,
            LifecycleKind::Error => self.errors += 1,
            LifecycleKind::FailedServerHeartbeat => self.missed_heartbeats += 1,
        }
        self.last_event = Some((Local::now(), kind));
    }

    pub fn register_subscription(&mut self, destination: &str) {
        self.subscriptions.entry(destination.to_string()).or_default();
    }

    pub fn record_message(&mut self, destination: &str) {
        *self.subscriptions.entry(destination.to_string()).or_default() += 1;
    }

    pub fn total_message_count(&self) -> u64 {
        self.subscriptions.values().sum()
    }

    pub fn generate_summary(&self) -> String {
        let end_time = Local::now();
        let total_secs = end_time.signed_duration_since(self.start_time).num_seconds();

        let mut lines = vec![
            "stompflow session".to_string(),
            format!("  Host:       {}", self.host),
            format!("  User:       {}", self.user),
            format!("  Started:    {}", self.start_time.format("%Y-%m-%d %H:%M:%S")),
            format!("  Duration:   {}m {}s", total_secs / 60, total_secs % 60),
            format!(
                "  Lifecycle:  {} opened, {} closed, {} errors, {} missed heart-beats",
                self.opened, self.closed, self.errors, self.missed_heartbeats
            ),
            "  Subscriptions:".to_string(),
        ];
        let width = self
            .subscriptions
            .keys()
            .map(|d| d.len())
            .max()
            .unwrap_or(5)
            .clamp(5, 40);
        for (dest, count) in &self.subscriptions {
            lines.push(format!("    {:width$} {:>6}", dest, count, width = width));
        }
        lines.push(format!(
            "    {:width$} {:>6}",
            "Total",
            self.total_message_count(),
            width = width
        ));
        lines.join("\n")
    }
}

pub type SharedState = Arc<Mutex<SessionState>>;

pub fn new_shared_state(host: String, user: String) -> SharedState {
    Arc::new(Mutex::new(SessionState::new(host, user)))
}
