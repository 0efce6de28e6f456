//! Bounded sample series
//!
//! A [`TierSeries`] is a FIFO window of utilization percentages. Its
//! persisted form is the comma-separated list of its values with one
//! decimal, oldest first.

use std::collections::VecDeque;

use crate::Tier;

/// Value reported for a series that holds no sample
pub const NO_DATA: f64 = -1.0;

/// Number of daily values kept (one per hour)
pub const DAILY_CAPACITY: usize = 24;

/// Number of weekly values kept (one per day)
pub const WEEKLY_CAPACITY: usize = 7;

/// Maximum length of each tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierCapacity {
    pub hourly: usize,
    pub daily: usize,
    pub weekly: usize,
}

impl TierCapacity {
    /// Capacities for a given hourly capacity, daily and weekly being fixed
    pub fn with_hourly(hourly: usize) -> Self {
        Self {
            hourly,
            daily: DAILY_CAPACITY,
            weekly: WEEKLY_CAPACITY,
        }
    }

    pub fn get(&self, tier: Tier) -> usize {
        match tier {
            Tier::Hourly => self.hourly,
            Tier::Daily => self.daily,
            Tier::Weekly => self.weekly,
        }
    }
}

/// One tier of one metric
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierSeries {
    values: VecDeque<f64>,
}

impl TierSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
    }

    /// Put older values in front of the current ones
    pub fn prepend(&mut self, older: TierSeries) {
        let mut merged = older.values;
        merged.append(&mut self.values);
        self.values = merged;
    }

    /// Drop the oldest values until at most `capacity` remain
    ///
    /// Returns how many values were dropped.
    pub fn rotate(&mut self, capacity: usize) -> usize {
        let excess = self.values.len().saturating_sub(capacity);
        self.values.drain(..excess);
        excess
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Most recent value
    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Arithmetic mean, `None` when the series is empty
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Mean, or [`NO_DATA`] when the series is empty
    pub fn average_or_sentinel(&self) -> f64 {
        self.mean().unwrap_or(NO_DATA)
    }

    /// Persisted form: values with one decimal, comma-separated
    pub fn to_column(&self) -> String {
        self.values
            .iter()
            .map(|value| format!("{:.1}", value))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a persisted column; the empty string is the empty series
    pub fn parse_column(column: &str) -> Result<Self, String> {
        let column = column.trim();
        if column.is_empty() {
            return Ok(Self::new());
        }

        let values = column
            .split(',')
            .map(|value| {
                value
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| format!("invalid value {:?}: {}", value, e))
            })
            .collect::<Result<VecDeque<_>, _>>()?;

        Ok(Self { values })
    }
}

impl FromIterator<f64> for TierSeries {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// The three tiers of one metric
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSeries {
    pub hourly: TierSeries,
    pub daily: TierSeries,
    pub weekly: TierSeries,
}

impl MetricSeries {
    pub fn tier(&self, tier: Tier) -> &TierSeries {
        match tier {
            Tier::Hourly => &self.hourly,
            Tier::Daily => &self.daily,
            Tier::Weekly => &self.weekly,
        }
    }

    pub fn tier_mut(&mut self, tier: Tier) -> &mut TierSeries {
        match tier {
            Tier::Hourly => &mut self.hourly,
            Tier::Daily => &mut self.daily,
            Tier::Weekly => &mut self.weekly,
        }
    }
}
