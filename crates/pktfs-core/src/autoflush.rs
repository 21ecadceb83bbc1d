// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Modification tracking for the periodic auto-flush

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Longest time a modification may stay unflushed
    pub active: Duration,
    /// Quiet period after the last modification
    pub inactive: Duration,
}

#[derive(Debug)]
pub struct ModifyTracker {
    policy: FlushPolicy,
    first: Option<Instant>,
    last: Option<Instant>,
}

impl ModifyTracker {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            first: None,
            last: None,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.first.get_or_insert(now);
        self.last = Some(now);
    }

    pub fn is_dirty(&self) -> bool {
        self.first.is_some()
    }

    /// True when either timeout has passed at `now`
    pub fn due(&self, now: Instant) -> bool {
        match (self.first, self.last) {
            (Some(first), Some(last)) => {
                now.saturating_duration_since(first) >= self.policy.active
                    || now.saturating_duration_since(last) >= self.policy.inactive
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.first = None;
        self.last = None;
    }
}
