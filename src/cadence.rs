/*
 *  cadence.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	TODO:
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use std::time::{Duration, Instant};

/// Fixed interval schedule anchored on its own deadlines, so a late tick
/// runs the work once and does not push every later slot back.
#[derive(Debug, Clone)]
pub struct Cadence {
    name: &'static str,
    interval: Duration,
    next_due: Instant,
}

impl Cadence {
    /// Due immediately, then every `interval`.
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self::starting_at(name, interval, Instant::now())
    }

    pub fn starting_at(name: &'static str, interval: Duration, first_due: Instant) -> Self {
        Self { name, interval: interval.max(Duration::from_millis(1)), next_due: first_due }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[inline]
    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    #[inline]
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// Record a completed run. The next slot follows the missed deadline, or
    /// `now + interval` if we are a whole interval or more behind.
    pub fn complete(&mut self, now: Instant) {
        self.next_due += self.interval;
        if self.next_due <= now {
            self.next_due = now + self.interval;
        }
    }

    pub fn until_due(&self, now: Instant) -> Duration {
        self.next_due.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_at_start() {
        let c = Cadence::new("energy", Duration::from_secs(30));
        assert!(c.is_due(Instant::now()));
        assert_eq!(c.name(), "energy");
    }

    #[test]
    fn test_late_run_keeps_anchor() {
        let t0 = Instant::now();
        let mut c = Cadence::starting_at("switch", Duration::from_secs(30), t0);

        // ran 4s late, next slot is still t0 + 30s
        c.complete(t0 + Duration::from_secs(4));
        assert_eq!(c.next_due(), t0 + Duration::from_secs(30));
        assert!(!c.is_due(t0 + Duration::from_secs(29)));
        assert!(c.is_due(t0 + Duration::from_secs(30)));
        assert_eq!(c.until_due(t0 + Duration::from_secs(10)), Duration::from_secs(20));
    }

    #[test]
    fn test_far_behind_skips_missed_slots() {
        let t0 = Instant::now();
        let mut c = Cadence::starting_at("weather", Duration::from_secs(60), t0);
        let late = t0 + Duration::from_secs(200);
        c.complete(late);
        assert_eq!(c.next_due(), late + Duration::from_secs(60));
        assert_eq!(c.until_due(late + Duration::from_secs(90)), Duration::ZERO);
    }
}
