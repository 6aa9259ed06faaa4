use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bus::EventBus;
use crate::connection::LifecycleEvent;
use crate::frame::{Command, Frame, HeaderKey};
use crate::transport::Transport;

/// What the client writes when its send timer fires.
pub const HEARTBEAT_PING: &str = "\r\n";

/// Silence tolerated from the server, in multiples of the negotiated
/// watch interval, before the watchdog reports a failure.
pub const WATCHDOG_GRACE_FACTOR: u32 = 3;

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Parameters
/// - `header`: header string from the server or client (for example
///   "10000,10000"). The values represent milliseconds.
///
/// Returns a tuple `(cx, cy)` where each value is the heartbeat interval in
/// milliseconds. Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// Parameters
/// - `desired_send`: how often the client wants to ping the server (ms).
/// - `desired_watch`: the longest silence the client wants to tolerate from
///   the server (ms).
/// - `server_send`: first value of the server's `heart-beat` header.
/// - `server_watch`: second value of the server's `heart-beat` header.
///
/// Returns `(client_send_ms, server_watch_ms)`. A direction the client did
/// not ask for (desired `0`) stays disabled whatever the server says;
/// otherwise the larger of the two declared values wins.
pub fn negotiate_heartbeats(
    desired_send: u64,
    desired_watch: u64,
    server_send: u64,
    server_watch: u64,
) -> (u64, u64) {
    let send = if desired_send > 0 {
        std::cmp::max(desired_send, server_watch)
    } else {
        0
    };
    let watch = if desired_watch > 0 {
        std::cmp::max(desired_watch, server_send)
    } else {
        0
    };
    (send, watch)
}

/// Snapshot of the heartbeat settings of one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub desired_client_send_ms: u64,
    pub desired_server_watch_ms: u64,
    pub negotiated_client_send_ms: u64,
    pub negotiated_server_watch_ms: u64,
    pub last_server_activity_at: Option<Instant>,
}

#[derive(Default)]
struct MonitorState {
    config: HeartbeatConfig,
    failure_reported: bool,
    send_task: Option<JoinHandle<()>>,
    watch_task: Option<JoinHandle<()>>,
}

impl MonitorState {
    fn stop_timers(&mut self) {
        if let Some(task) = self.send_task.take() {
            task.abort();
        }
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
    }
}

struct Inner {
    state: Mutex<MonitorState>,
    transport: Arc<dyn Transport>,
    lifecycle: EventBus<LifecycleEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_server_activity(&self, period: Duration) {
        let overdue = {
            let mut st = self.lock();
            let Some(last) = st.config.last_server_activity_at else {
                return;
            };
            let silence = last.elapsed();
            if silence > period * WATCHDOG_GRACE_FACTOR && !st.failure_reported {
                st.failure_reported = true;
                Some(silence)
            } else {
                None
            }
        };
        if let Some(silence) = overdue {
            tracing::warn!(
                silence_ms = silence.as_millis() as u64,
                "server did not send a heart-beat in time"
            );
            self.lifecycle.publish(LifecycleEvent::failed_server_heartbeat());
        }
    }
}

/// Negotiates heart-beats on `CONNECTED`, pings the server on a timer, and
/// watches for server silence.
///
/// The monitor never disconnects on its own: a missed server heart-beat is
/// published as a [`LifecycleEvent`] and the caller decides what to do.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    inner: Arc<Inner>,
}

impl HeartbeatMonitor {
    pub fn new(transport: Arc<dyn Transport>, lifecycle: EventBus<LifecycleEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MonitorState::default()),
                transport,
                lifecycle,
            }),
        }
    }

    /// Desired client→server ping period in ms (`0` disables). Takes effect
    /// at the next `CONNECTED`.
    pub fn set_client_send_ms(&self, ms: u64) {
        self.inner.lock().config.desired_client_send_ms = ms;
    }

    /// Desired tolerated server silence in ms (`0` disables). Takes effect at
    /// the next `CONNECTED`.
    pub fn set_server_watch_ms(&self, ms: u64) {
        self.inner.lock().config.desired_server_watch_ms = ms;
    }

    pub fn config(&self) -> HeartbeatConfig {
        self.inner.lock().config
    }

    pub fn has_active_timers(&self) -> bool {
        let st = self.inner.lock();
        st.send_task.is_some() || st.watch_task.is_some()
    }

    /// Inspect an inbound frame.
    ///
    /// `CONNECTED` starts negotiation, any other server frame counts as
    /// server activity. Returns `false` for bare server pongs, which must not
    /// be propagated any further.
    pub fn consume(&self, frame: &Frame) -> bool {
        match frame.command {
            Command::Connected => {
                self.start(frame.header_value(HeaderKey::HeartBeat));
                true
            }
            Command::Unknown => {
                if frame.is_heartbeat() {
                    tracing::trace!("<<< PONG");
                    self.server_activity();
                    false
                } else {
                    true
                }
            }
            _ => {
                self.server_activity();
                true
            }
        }
    }

    /// Record that the client just wrote a frame. Any outbound traffic
    /// satisfies the heart-beat obligation, so the send timer starts over.
    pub fn client_activity(&self) {
        let mut st = self.inner.lock();
        let period = st.config.negotiated_client_send_ms;
        if period == 0 || st.send_task.is_none() {
            return;
        }
        if let Some(task) = st.send_task.take() {
            task.abort();
        }
        st.send_task = Some(self.spawn_sender(Duration::from_millis(period)));
    }

    /// Cancel both timers and forget the negotiated intervals. Idempotent.
    pub fn shutdown(&self) {
        let mut st = self.inner.lock();
        st.stop_timers();
        st.config.negotiated_client_send_ms = 0;
        st.config.negotiated_server_watch_ms = 0;
        st.config.last_server_activity_at = None;
        st.failure_reported = false;
    }

    fn start(&self, header: Option<&str>) {
        let mut st = self.inner.lock();
        st.stop_timers();
        st.failure_reported = false;

        let (send, watch) = match header {
            Some(value) => {
                let (server_send, server_watch) = parse_heartbeat_header(value);
                negotiate_heartbeats(
                    st.config.desired_client_send_ms,
                    st.config.desired_server_watch_ms,
                    server_send,
                    server_watch,
                )
            }
            None => (0, 0),
        };
        st.config.negotiated_client_send_ms = send;
        st.config.negotiated_server_watch_ms = watch;
        tracing::debug!(client_send_ms = send, server_watch_ms = watch, "heart-beat negotiated");

        if send > 0 {
            st.send_task = Some(self.spawn_sender(Duration::from_millis(send)));
        }
        if watch > 0 {
            st.config.last_server_activity_at = Some(Instant::now());
            st.watch_task = Some(self.spawn_watchdog(Duration::from_millis(watch)));
        }
    }

    fn server_activity(&self) {
        let mut st = self.inner.lock();
        st.config.last_server_activity_at = Some(Instant::now());
        st.failure_reported = false;
        let period = st.config.negotiated_server_watch_ms;
        if period == 0 {
            return;
        }
        if let Some(task) = st.watch_task.take() {
            task.abort();
        }
        st.watch_task = Some(self.spawn_watchdog(Duration::from_millis(period)));
    }

    fn spawn_sender(&self, period: Duration) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                match inner.transport.send(HEARTBEAT_PING).await {
                    Ok(()) => tracing::trace!("PING >>>"),
                    Err(e) => tracing::warn!(error = %e, "failed to send heart-beat"),
                }
            }
        })
    }

    fn spawn_watchdog(&self, period: Duration) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                inner.check_server_activity(period);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_desired_stays_disabled() {
        assert_eq!(negotiate_heartbeats(0, 0, 5000, 5000), (0, 0));
        assert_eq!(negotiate_heartbeats(0, 100, 5000, 5000), (0, 5000));
    }

    #[test]
    fn larger_declared_value_wins() {
        assert_eq!(negotiate_heartbeats(1000, 2000, 500, 800), (1000, 2000));
        assert_eq!(negotiate_heartbeats(100, 200, 500, 800), (800, 500));
    }
}
