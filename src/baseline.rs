/*
 *  baseline.rs
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

/// Minimum change in an energy counter (kWh) worth publishing.
pub const ENERGY_EPSILON: f64 = 0.01;
/// Minimum change in instantaneous power (W) worth publishing.
pub const POWER_EPSILON: f64 = 0.1;

/// Last published value of one metric. Empty until the first publish, so
/// the first observation always goes out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline<T> {
    last: Option<T>,
}

impl<T> Baseline<T> {
    pub fn new() -> Self {
        Self { last: None }
    }

    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }
}

impl<T: PartialEq> Baseline<T> {
    /// Exact compare. Returns true, and takes the value, when it differs.
    pub fn changed(&mut self, value: T) -> bool {
        if self.last.as_ref() == Some(&value) {
            return false;
        }
        self.last = Some(value);
        true
    }
}

impl Baseline<String> {
    /// Byte compare without allocating when nothing changed.
    pub fn changed_str(&mut self, value: &str) -> bool {
        if self.last.as_deref() == Some(value) {
            return false;
        }
        self.last = Some(value.to_string());
        true
    }
}

impl Baseline<f64> {
    /// True when `value` moved more than `epsilon` away from the last publish.
    pub fn changed_beyond(&mut self, value: f64, epsilon: f64) -> bool {
        match self.last {
            Some(prev) if (value - prev).abs() <= epsilon => false,
            _ => {
                self.last = Some(value);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_always_changes() {
        let mut b: Baseline<i32> = Baseline::new();
        assert!(b.changed(0));
        assert!(!b.changed(0));
        assert!(b.changed(1));
        assert_eq!(b.last(), Some(&1));
    }

    #[test]
    fn test_string_compare() {
        let mut b: Baseline<String> = Baseline::new();
        assert!(b.changed_str("So What"));
        assert!(!b.changed_str("So What"));
        assert!(b.changed_str("So what"));
    }

    #[test]
    fn test_epsilon_energy() {
        let mut b: Baseline<f64> = Baseline::new();
        assert!(b.changed_beyond(12.0, ENERGY_EPSILON));
        assert!(!b.changed_beyond(12.005, ENERGY_EPSILON));
        assert!(b.changed_beyond(12.02, ENERGY_EPSILON));
        // compares against the last published value, not the last seen one
        assert!(!b.changed_beyond(12.029, ENERGY_EPSILON));
    }

    #[test]
    fn test_epsilon_power() {
        let mut b: Baseline<f64> = Baseline::new();
        assert!(b.changed_beyond(100.0, POWER_EPSILON));
        assert!(!b.changed_beyond(100.05, POWER_EPSILON));
        assert!(b.changed_beyond(100.3, POWER_EPSILON));
    }
}
