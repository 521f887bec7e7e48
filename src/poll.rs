//! Bounded polling and change-deduplicated narration
//!
//! Every wait in the tool (downtime, reconnect, DOCSIS, tunnel, ping result)
//! is the same loop: a fixed number of attempts with a fixed sleep between
//! them. [`Poller`] owns that loop so the callers only decide what "ready"
//! means. [`Narration`] records what happened along the way.

use crate::error::DeviceError;
use crate::utils::human_time;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// Iteration-counted retry loop.
///
/// ```ignore
/// let mut poller = Poller::new("registration", policy);
/// while let Some(attempt) = poller.next().await {
///     if ready().await { return Ok(()) }
/// }
/// Err(poller.exhausted())
/// ```
#[derive(Debug)]
pub struct Poller {
    what: &'static str,
    policy: PollPolicy,
    attempt: u32,
    delay_first: bool,
}

impl Poller {
    pub fn new(what: &'static str, policy: PollPolicy) -> Self {
        Self {
            what,
            policy,
            attempt: 0,
            delay_first: false,
        }
    }

    /// Sleep before the first attempt too
    pub fn delay_first(mut self) -> Self {
        self.delay_first = true;
        self
    }

    /// Wait out the interval and return the next 1-based attempt number,
    /// or `None` once the budget is spent.
    pub async fn next(&mut self) -> Option<u32> {
        if self.attempt >= self.policy.attempts {
            return None;
        }
        if (self.attempt > 0 || self.delay_first) && !self.policy.interval.is_zero() {
            tokio::time::sleep(self.policy.interval).await;
        }
        self.attempt += 1;
        Some(self.attempt)
    }

    /// Attempts used so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn exhausted(&self) -> DeviceError {
        DeviceError::TimeoutExceeded {
            what: self.what,
            attempts: self.attempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationEntry {
    pub elapsed: Duration,
    pub message: String,
}

/// Timestamped log of a long-running operation
#[derive(Debug)]
pub struct Narration {
    started: Instant,
    entries: Vec<NarrationEntry>,
    last: Option<String>,
}

impl Narration {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            entries: Vec::new(),
            last: None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record unconditionally
    pub fn say(&mut self, message: impl Into<String>) {
        let message = message.into();
        let elapsed = self.elapsed();
        tracing::info!("{} at {}", message, human_time(elapsed.as_secs()));
        self.push(elapsed, message);
    }

    /// Record unconditionally at warning level
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        let elapsed = self.elapsed();
        tracing::warn!("{} at {}", message, human_time(elapsed.as_secs()));
        self.push(elapsed, message);
    }

    /// Record only if the message differs from the previous one in this phase
    pub fn say_if_changed(&mut self, message: impl Into<String>) -> bool {
        let message = message.into();
        if self.last.as_deref() == Some(message.as_str()) {
            tracing::debug!("{} (unchanged)", message);
            return false;
        }
        self.say(message);
        true
    }

    /// Start a new phase: record the transition and forget the previous message
    pub fn phase(&mut self, message: impl Into<String>) {
        self.last = None;
        let message = message.into();
        let elapsed = self.elapsed();
        tracing::info!("{} at {}", message, human_time(elapsed.as_secs()));
        self.entries.push(NarrationEntry { elapsed, message });
    }

    pub fn entries(&self) -> &[NarrationEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<NarrationEntry> {
        self.entries
    }

    fn push(&mut self, elapsed: Duration, message: String) {
        self.last = Some(message.clone());
        self.entries.push(NarrationEntry { elapsed, message });
    }
}
