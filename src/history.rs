use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};

use crate::models::PowerSample;

/// Samples older than this, relative to the latest append, are dropped.
pub const RETENTION_MINUTES: u32 = 30;

/// Per-GPU power draw over the last [`RETENTION_MINUTES`].
#[derive(Clone, Debug, Default)]
pub struct PowerHistory {
    samples: BTreeMap<u32, VecDeque<PowerSample>>,
}

impl PowerHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample and evict everything that fell out of retention.
    pub fn record(&mut self, gpu_index: u32, power_draw_w: f64, now: DateTime<Utc>) {
        let history = self.samples.entry(gpu_index).or_default();
        history.push_back(PowerSample {
            timestamp: now,
            power_draw_w,
        });

        let cutoff = now - minutes(RETENTION_MINUTES);
        while let Some(front) = history.front() {
            if front.timestamp < cutoff {
                history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Mean power over the last `window_minutes`, or `None` when no sample
    /// falls inside the window. `None` is "no recent data", not zero watts.
    pub fn windowed_average(
        &self,
        gpu_index: u32,
        window_minutes: u32,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let cutoff = now - minutes(window_minutes);
        let (sum, count) = self
            .samples
            .get(&gpu_index)?
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .fold((0.0, 0usize), |(sum, count), s| (sum + s.power_draw_w, count + 1));

        (count > 0).then(|| sum / count as f64)
    }

    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.samples.keys().copied()
    }

    #[cfg(test)]
    pub(crate) fn samples(&self, gpu_index: u32) -> impl Iterator<Item = &PowerSample> + '_ {
        self.samples.get(&gpu_index).into_iter().flatten()
    }
}

fn minutes(n: u32) -> TimeDelta {
    TimeDelta::try_minutes(i64::from(n)).unwrap_or_default()
}
