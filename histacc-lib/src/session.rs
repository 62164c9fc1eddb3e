use crate::timing::SessionTiming;
use crate::upload::Histogram;
use serde::{Deserialize, Serialize};

/// Histograms collected by consecutive uploads, one column per upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSession {
    pub histograms: Vec<Histogram>,
    pub timing: SessionTiming,
}

impl HistogramSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, histogram: Histogram) {
        self.histograms.push(histogram);
    }

    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    /// Tabular view: one row per bin index, one value per upload.
    ///
    /// Rows stop at the shortest histogram so every row is complete.
    pub fn rows(&self) -> Vec<Vec<u16>> {
        let rows = self.histograms.iter().map(|h| h.samples.len()).min().unwrap_or(0);
        (0..rows)
            .map(|bin| self.histograms.iter().map(|h| h.samples[bin]).collect())
            .collect()
    }

    /// Element-wise sum across uploads, widened so repeated full bins cannot overflow.
    pub fn summed(&self) -> Vec<u64> {
        self.rows()
            .into_iter()
            .map(|row| row.into_iter().map(u64::from).sum())
            .collect()
    }
}
