//! Client tracker modelled as an explicit state machine.
//!
//! The browser script this descends from mixed timers, listeners and flags;
//! here the same behavior is a pure value: feed it navigation, activity and
//! visibility inputs plus a `poll` tick, and it tells you which tracking
//! request to send. The embedding glue owns clocks and transport.

use std::time::{Duration, Instant};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A tracking request the embedder should deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerAction {
    TrackPageView,
    /// Seconds since the tracker started.
    TrackSessionEnd { duration: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// No request in flight; pending navigations fire once debounced.
    Idle,
    /// A page view is in flight. Further page views wait for delivery.
    Tracking,
    /// Session end sent. Stays quiet until the visitor navigates again.
    CoolingDown,
}

pub struct Tracker {
    state: TrackerState,
    debounce: Duration,
    idle_timeout: Duration,
    started: Instant,
    last_activity: Instant,
    /// Deadline of the debounced pending page view.
    pending: Option<Instant>,
}

impl Tracker {
    /// A fresh tracker has the initial page view already pending, so the
    /// first `poll` emits it.
    pub fn new(now: Instant) -> Self {
        Self {
            state: TrackerState::Idle,
            debounce: DEFAULT_DEBOUNCE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            started: now,
            last_activity: now,
            pending: Some(now),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// A route change. Resets the debounce window, so rapid successive
    /// navigations collapse into one page view. Also wakes the tracker up
    /// after a session end.
    pub fn on_navigation(&mut self, now: Instant) {
        if self.state == TrackerState::CoolingDown {
            self.state = TrackerState::Idle;
        }
        self.last_activity = now;
        self.pending = Some(now + self.debounce);
    }

    /// Any user interaction. Only feeds the inactivity timeout.
    pub fn on_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// The in-flight page view completed (success or final failure).
    pub fn on_delivered(&mut self) {
        if self.state == TrackerState::Tracking {
            self.state = TrackerState::Idle;
        }
    }

    /// Tab hidden or page unloading. Emits the session end once; repeated
    /// visibility flaps stay quiet until the next navigation.
    pub fn on_hidden(&mut self, now: Instant) -> Option<TrackerAction> {
        if self.state == TrackerState::CoolingDown {
            return None;
        }
        self.state = TrackerState::CoolingDown;
        self.pending = None;
        Some(TrackerAction::TrackSessionEnd {
            duration: self.elapsed_secs(now),
        })
    }

    /// Clock tick. At most one action per call.
    pub fn poll(&mut self, now: Instant) -> Option<TrackerAction> {
        match self.state {
            TrackerState::Tracking | TrackerState::CoolingDown => None,
            TrackerState::Idle => {
                if let Some(deadline) = self.pending {
                    if now >= deadline {
                        self.pending = None;
                        self.state = TrackerState::Tracking;
                        return Some(TrackerAction::TrackPageView);
                    }
                }
                if now.duration_since(self.last_activity) >= self.idle_timeout {
                    self.state = TrackerState::CoolingDown;
                    self.pending = None;
                    return Some(TrackerAction::TrackSessionEnd {
                        duration: self.elapsed_secs(now),
                    });
                }
                None
            }
        }
    }

    fn elapsed_secs(&self, now: Instant) -> i64 {
        now.duration_since(self.started).as_secs() as i64
    }
}
