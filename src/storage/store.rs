//! In-memory per-actor time series and top-N ranking.
//!
//! Series are append-only during a sampling run and keep actor insertion
//! order, which also serves as the tie-breaker when ranking.

use std::collections::HashMap;

use super::model::{Metric, Sample, Value};

/// Append-only time series keyed by actor id.
#[derive(Debug, Default)]
pub struct SampleStore {
    /// Actor ids in first-seen order.
    order: Vec<String>,
    series: HashMap<String, Vec<Sample>>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample to the actor's series, creating the series on first use.
    pub fn push(&mut self, actor: &str, sample: Sample) {
        match self.series.get_mut(actor) {
            Some(series) => series.push(sample),
            None => {
                self.order.push(actor.to_string());
                self.series.insert(actor.to_string(), vec![sample]);
            }
        }
    }

    /// Returns the most recent sample of an actor for in-place completion.
    ///
    /// Never creates a series.
    pub fn latest_mut(&mut self, actor: &str) -> Option<&mut Sample> {
        self.series.get_mut(actor).and_then(|s| s.last_mut())
    }

    pub fn series(&self, actor: &str) -> Option<&[Sample]> {
        self.series.get(actor).map(Vec::as_slice)
    }

    /// Returns `metric` of the actor's most recent sample.
    pub fn get(&self, actor: &str, metric: Metric) -> Option<Value> {
        self.series(actor)
            .and_then(|s| s.last())
            .and_then(|sample| sample.get(metric))
    }

    /// Iterates `(actor, series)` in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Sample])> {
        self.order
            .iter()
            .filter_map(|id| self.series.get(id).map(|s| (id.as_str(), s.as_slice())))
    }

    /// Number of actors with at least one sample.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.series.clear();
    }

    /// Ranks actors by peak value of `metric`, highest first, and returns at
    /// most `n` actor ids.
    ///
    /// Sentinel values sort above every measurement. Equal peaks keep
    /// first-seen order. Actors whose series has no value for `metric` rank
    /// last.
    pub fn top_n(&self, metric: Metric, n: usize) -> Vec<&str> {
        let mut ranked: Vec<(&str, Option<Value>)> = self
            .iter()
            .filter(|(_, series)| !series.is_empty())
            .map(|(id, series)| (id, peak(series, metric)))
            .collect();

        // sort_by is stable
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(n);
        ranked.into_iter().map(|(id, _)| id).collect()
    }
}

/// Returns the maximum of `metric` across `series`, or `None` when no sample
/// carries a value for it.
pub fn peak(series: &[Sample], metric: Metric) -> Option<Value> {
    series.iter().filter_map(|s| s.get(metric)).max()
}
