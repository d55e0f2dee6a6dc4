//! Running averages of named scalars within an epoch.

use crate::common::*;

/// Collects named scalar series. Each series is averaged independently.
#[derive(Debug, Clone, Default)]
pub struct RunningMetrics {
    series: IndexMap<String, Series>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Series {
    sum: f64,
    count: usize,
}

impl RunningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one value to the series of each name.
    pub fn update<S, I>(&mut self, values: I)
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, f64)>,
    {
        values.into_iter().for_each(|(name, value)| {
            let series = self.series.entry(name.into()).or_default();
            series.sum += value;
            series.count += 1;
        });
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// The arithmetic mean of every series, in first-seen order.
    pub fn snapshot(&self) -> MetricSnapshot {
        let means = self
            .series
            .iter()
            .map(|(name, series)| (name.clone(), series.sum / series.count as f64))
            .collect();
        MetricSnapshot { means }
    }
}

/// Per-name means of an epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSnapshot {
    means: IndexMap<String, f64>,
}

impl MetricSnapshot {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.means.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.means.iter().map(|(name, mean)| (name.as_str(), *mean))
    }

    /// The `loss` entry, or infinity if no batch was seen.
    pub fn loss(&self) -> f64 {
        self.get("loss").unwrap_or(f64::INFINITY)
    }
}
