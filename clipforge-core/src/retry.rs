//! Bounded polling shared by the resolver phases and healing rounds.
//!
//! A poll is parameterized by an attempt budget, a delay schedule, and a
//! probe whose [`Attempt`] result doubles as the success predicate.

use std::{future::Future, time::Duration};

/// How long to wait after a given zero-based attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum DelaySchedule {
    /// The same delay after every attempt.
    Fixed(Duration),
    /// `tiers` holds `(first_attempt_past_tier, delay)` pairs in ascending
    /// order; attempts beyond the last tier use `tail`.
    Tiered {
        tiers: Vec<(u32, Duration)>,
        tail: Duration,
    },
    /// Doubling delay starting from `base`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl DelaySchedule {
    /// Constant `delay` between attempts.
    pub fn fixed(delay: Duration) -> Self {
        DelaySchedule::Fixed(delay)
    }

    /// Fast for the first third of `rounds`, medium for the second, slow after.
    pub fn thirds(rounds: u32, fast: Duration, medium: Duration, slow: Duration) -> Self {
        let third = rounds / 3;
        DelaySchedule::Tiered {
            tiers: vec![(third, fast), (third * 2, medium)],
            tail: slow,
        }
    }

    /// `base * 2^attempt`, never more than `max`.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        DelaySchedule::Exponential { base, max }
    }

    /// Delay to apply after the zero-based `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            DelaySchedule::Fixed(delay) => *delay,
            DelaySchedule::Tiered { tiers, tail } => tiers
                .iter()
                .find(|(bound, _)| attempt < *bound)
                .map(|(_, delay)| *delay)
                .unwrap_or(*tail),
            DelaySchedule::Exponential { base, max } => {
                let multiplier = 2u32.saturating_pow(attempt.min(31));
                base.saturating_mul(multiplier).min(*max)
            }
        }
    }
}

/// Attempt budget plus delay schedule.
#[derive(Clone, Debug, PartialEq)]
pub struct PollPolicy {
    max_attempts: u32,
    schedule: DelaySchedule,
    delay_first: bool,
}

impl PollPolicy {
    /// Delays fall between attempts; none before the first or after the last.
    pub fn new(max_attempts: u32, schedule: DelaySchedule) -> Self {
        Self {
            max_attempts,
            schedule,
            delay_first: false,
        }
    }

    /// Sleep before each attempt (including the first) instead of between
    /// attempts.
    pub fn delay_first(mut self, delay_first: bool) -> Self {
        self.delay_first = delay_first;
        self
    }

    /// Total probes a poll may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn schedule(&self) -> &DelaySchedule {
        &self.schedule
    }
}

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    /// The awaited value is available; polling stops.
    Ready(T),
    /// Not yet. Collaborator failures are reported this way too.
    Pending,
    /// Polling can never succeed (e.g. the record disappeared).
    Abandon,
}

/// How [`poll_until`] finished. `attempts` counts probes made, including
/// the last one.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// A probe returned [`Attempt::Ready`].
    Resolved { value: T, attempts: u32 },
    /// The budget ran out while every probe was pending.
    Exhausted { attempts: u32 },
    /// A probe returned [`Attempt::Abandon`].
    Abandoned { attempts: u32 },
}

/// Run `probe` until it yields [`Attempt::Ready`] or [`Attempt::Abandon`], or
/// the attempt budget runs out. `probe` receives the zero-based attempt index.
pub async fn poll_until<T, F, Fut>(policy: &PollPolicy, mut probe: F) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    for attempt in 0..policy.max_attempts {
        if policy.delay_first {
            tokio::time::sleep(policy.schedule.delay_after(attempt)).await;
        }

        match probe(attempt).await {
            Attempt::Ready(value) => {
                return PollOutcome::Resolved {
                    value,
                    attempts: attempt + 1,
                };
            }
            Attempt::Abandon => {
                return PollOutcome::Abandoned {
                    attempts: attempt + 1,
                };
            }
            Attempt::Pending => {}
        }

        let is_last = attempt + 1 == policy.max_attempts;
        if !policy.delay_first && !is_last {
            tokio::time::sleep(policy.schedule.delay_after(attempt)).await;
        }
    }

    PollOutcome::Exhausted {
        attempts: policy.max_attempts,
    }
}
