//! Pausable one-second countdown driven from its owner's event loop.
//!
//! The timer never runs on its own task. Its owner polls `next_signal()` (typically
//! inside `tokio::select!`) and every tick/expiry is produced by that poll, so once
//! `cancel()` returns nothing can be delivered any more: there is no queue to drain.
//! `next_signal()` is cancel-safe; state only changes after the sleep completes.

use std::{pin::Pin, time::Duration};

use tokio::time::{sleep_until, Instant, Sleep};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerSignal {
  /// One period elapsed; `remaining` is the value after the decrement.
  Tick { remaining: u32 },
  /// Remaining time reached zero. Delivered once per arm.
  Expired,
}

enum Phase {
  Idle,
  Running(Pin<Box<Sleep>>),
  /// `None` = zero reached, expiry not yet delivered.
  Paused(Option<Duration>),
  Expiring,
  Done,
}

pub struct CountdownTimer {
  remaining: u32,
  period: Duration,
  phase: Phase,
}

impl Default for CountdownTimer {
  fn default() -> Self { Self::new() }
}

impl CountdownTimer {
  pub fn new() -> Self {
    Self::with_period(Duration::from_secs(1))
  }

  pub fn with_period(period: Duration) -> Self {
    Self { remaining: 0, period, phase: Phase::Idle }
  }

  /// Start counting down from `seconds`, discarding any previous run.
  pub fn arm(&mut self, seconds: u32) {
    self.remaining = seconds;
    self.phase = if seconds == 0 {
      Phase::Expiring
    } else {
      Phase::Running(Box::pin(sleep_until(Instant::now() + self.period)))
    };
  }

  /// Freeze the countdown, keeping the part of the current period already elapsed.
  pub fn pause(&mut self) {
    let held = match &self.phase {
      Phase::Running(next) => Phase::Paused(Some(next.deadline().saturating_duration_since(Instant::now()))),
      Phase::Expiring => Phase::Paused(None),
      _ => return,
    };
    self.phase = held;
  }

  pub fn resume(&mut self) {
    if let Phase::Paused(left) = self.phase {
      self.phase = match left {
        Some(left) => Phase::Running(Box::pin(sleep_until(Instant::now() + left))),
        None => Phase::Expiring,
      };
    }
  }

  /// Idempotent. No signal is produced after this returns until the next `arm`.
  pub fn cancel(&mut self) {
    self.phase = Phase::Idle;
  }

  pub fn remaining(&self) -> u32 {
    self.remaining
  }

  pub fn is_armed(&self) -> bool {
    matches!(self.phase, Phase::Running(_) | Phase::Paused(_) | Phase::Expiring)
  }

  pub fn is_paused(&self) -> bool {
    matches!(self.phase, Phase::Paused(_))
  }

  /// Wait for the next signal. Pends forever while idle, paused, cancelled or done.
  pub async fn next_signal(&mut self) -> TimerSignal {
    if matches!(self.phase, Phase::Expiring) {
      self.phase = Phase::Done;
      return TimerSignal::Expired;
    }

    let period = self.period;
    match &mut self.phase {
      Phase::Running(next) => {
        next.as_mut().await;
        let deadline = next.deadline() + period;
        next.as_mut().reset(deadline);
      }
      _ => return std::future::pending().await,
    }

    self.remaining = self.remaining.saturating_sub(1);
    if self.remaining == 0 {
      self.phase = Phase::Expiring;
    }
    TimerSignal::Tick { remaining: self.remaining }
  }
}
