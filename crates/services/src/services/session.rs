//! Session expiry: a session lasts a fixed time from the last sign-in. The
//! monitor warns once shortly before the end and signs the user out at the end.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::time::interval;
use tracing::{debug, info, warn};

pub const SESSION_DURATION: Duration = Duration::hours(24);
pub const WARNING_THRESHOLD: Duration = Duration::minutes(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active { remaining: Duration },
    ExpiringSoon { remaining: Duration },
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClock {
    last_sign_in: DateTime<Utc>,
}

impl SessionClock {
    pub fn new(last_sign_in: DateTime<Utc>) -> Self {
        Self { last_sign_in }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.last_sign_in + SESSION_DURATION
    }

    pub fn check(&self, now: DateTime<Utc>) -> SessionStatus {
        let remaining = self.expires_at() - now;
        if remaining <= Duration::zero() {
            SessionStatus::Expired
        } else if remaining <= WARNING_THRESHOLD {
            SessionStatus::ExpiringSoon { remaining }
        } else {
            SessionStatus::Active { remaining }
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.check(now) == SessionStatus::Expired
    }
}

/// What the monitor asks of the surrounding application.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    async fn warn_expiring(&self, remaining: Duration);
    async fn sign_out(&self);

    /// The monitor stops early once nobody is interested any more.
    fn is_active(&self) -> bool {
        true
    }
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Warned,
    SignedOut,
}

pub struct SessionExpiryMonitor<H> {
    clock: SessionClock,
    hooks: H,
    poll_interval: StdDuration,
    warned: bool,
}

impl<H: SessionHooks> SessionExpiryMonitor<H> {
    pub fn new(last_sign_in: DateTime<Utc>, hooks: H) -> Self {
        Self {
            clock: SessionClock::new(last_sign_in),
            hooks,
            poll_interval: StdDuration::from_secs(30),
            warned: false,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: StdDuration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Evaluate the session at `now`, firing at most one warning per session.
    pub async fn poll(&mut self, now: DateTime<Utc>) -> PollOutcome {
        match self.clock.check(now) {
            SessionStatus::Expired => {
                info!(expires_at = %self.clock.expires_at(), "session expired, signing out");
                self.hooks.sign_out().await;
                PollOutcome::SignedOut
            }
            SessionStatus::ExpiringSoon { remaining } if !self.warned => {
                self.warned = true;
                warn!(remaining_secs = remaining.num_seconds(), "session expiring soon");
                self.hooks.warn_expiring(remaining).await;
                PollOutcome::Warned
            }
            _ => PollOutcome::Idle,
        }
    }

    /// Poll on an interval until the session ends or the hooks go inactive.
    pub async fn run(mut self)
    where
        H: 'static,
    {
        debug!(
            poll_interval = ?self.poll_interval,
            expires_at = %self.clock.expires_at(),
            "starting session expiry monitor"
        );
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if !self.hooks.is_active() {
                debug!("session hooks inactive, stopping monitor");
                return;
            }
            if self.poll(Utc::now()).await == PollOutcome::SignedOut {
                return;
            }
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()>
    where
        H: 'static,
    {
        tokio::spawn(self.run())
    }
}
