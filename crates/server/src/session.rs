//! Live call registry
//!
//! One entry per connected media stream. Conversation state lives in the
//! store; this only tracks what a running call needs for capacity and idle
//! eviction.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::ServerError;

/// A connected call
pub struct CallSession {
    call_sid: String,
    stream_sid: String,
    /// Conversation session id, known once the store has answered
    session_id: RwLock<Option<String>>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    /// Cancelled when the call is evicted
    hangup: CancellationToken,
}

impl CallSession {
    fn new(call_sid: &str, stream_sid: &str) -> Self {
        let now = Instant::now();
        Self {
            call_sid: call_sid.to_string(),
            stream_sid: stream_sid.to_string(),
            session_id: RwLock::new(None),
            created_at: now,
            last_activity: Mutex::new(now),
            hangup: CancellationToken::new(),
        }
    }

    pub fn call_sid(&self) -> &str {
        &self.call_sid
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn set_session_id(&self, session_id: &str) {
        *self.session_id.write() = Some(session_id.to_string());
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Record inbound activity
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Token the media bridge watches to hang up an evicted call
    pub fn hangup_token(&self) -> CancellationToken {
        self.hangup.clone()
    }

    fn hang_up(&self) {
        self.hangup.cancel();
    }
}

/// Registry of connected calls
pub struct CallSessionManager {
    calls: RwLock<HashMap<String, Arc<CallSession>>>,
    max_calls: usize,
    idle_timeout: Duration,
    cleanup_interval: Duration,
}

impl CallSessionManager {
    pub fn new(max_calls: usize, idle_timeout: Duration) -> Self {
        Self::with_config(max_calls, idle_timeout, Duration::from_secs(60))
    }

    pub fn with_config(
        max_calls: usize,
        idle_timeout: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            max_calls,
            idle_timeout,
            cleanup_interval,
        }
    }

    /// Periodically hang up calls with no inbound activity.
    ///
    /// Returns a sender; sending `true` stops the task.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = manager.cleanup_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let evicted = manager.cleanup_idle();
                        if evicted > 0 {
                            tracing::info!(
                                evicted,
                                remaining = manager.count(),
                                "Idle call cleanup"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Call cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Register a new call. Fails when at capacity.
    pub fn register(
        &self,
        call_sid: &str,
        stream_sid: &str,
    ) -> Result<Arc<CallSession>, ServerError> {
        let mut calls = self.calls.write();

        if let Some(existing) = calls.get(call_sid) {
            // Twilio restarted the stream for the same call
            tracing::warn!(call_sid = %call_sid, "Call re-registered, replacing stream");
            existing.hang_up();
        } else if calls.len() >= self.max_calls {
            tracing::warn!(call_sid = %call_sid, active = calls.len(), "Call capacity reached");
            return Err(ServerError::CallCapacity(calls.len()));
        }

        let call = Arc::new(CallSession::new(call_sid, stream_sid));
        calls.insert(call_sid.to_string(), call.clone());

        metrics::counter!("voice_calls_total").increment(1);
        metrics::gauge!("voice_active_calls").set(calls.len() as f64);
        tracing::info!(call_sid = %call_sid, stream_sid = %stream_sid, "Call registered");

        Ok(call)
    }

    pub fn get(&self, call_sid: &str) -> Option<Arc<CallSession>> {
        self.calls.read().get(call_sid).cloned()
    }

    /// Evict a call. Only removes the entry if it is still `call`, so a
    /// replaced stream cannot evict its successor.
    pub fn remove(&self, call: &Arc<CallSession>) {
        let mut calls = self.calls.write();
        let current = calls
            .get(call.call_sid())
            .is_some_and(|entry| Arc::ptr_eq(entry, call));
        if current {
            calls.remove(call.call_sid());
            tracing::info!(
                call_sid = %call.call_sid(),
                duration_secs = call.age().as_secs(),
                "Call removed"
            );
        }
        metrics::gauge!("voice_active_calls").set(calls.len() as f64);
    }

    pub fn count(&self) -> usize {
        self.calls.read().len()
    }

    /// Hang up and drop calls idle past the timeout; returns how many
    pub fn cleanup_idle(&self) -> usize {
        let mut calls = self.calls.write();
        let before = calls.len();
        calls.retain(|call_sid, call| {
            if call.idle_for() > self.idle_timeout {
                tracing::warn!(call_sid = %call_sid, "Evicting idle call");
                call.hang_up();
                false
            } else {
                true
            }
        });
        metrics::gauge!("voice_active_calls").set(calls.len() as f64);
        before - calls.len()
    }

    /// Hang up every call
    pub fn close_all(&self) {
        let mut calls = self.calls.write();
        for call in calls.values() {
            call.hang_up();
        }
        calls.clear();
        metrics::gauge!("voice_active_calls").set(0.0);
    }
}
