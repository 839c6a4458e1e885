//! Per-user detection history: paging bounds and summary statistics.

use serde::Serialize;

use crate::lifecycle::DetectionStatus;
use crate::occlusion::DetectionResults;

/// Maximum page size for history listing.
pub const MAX_LIMIT: usize = 100;

/// Default page size for history listing.
pub const DEFAULT_LIMIT: usize = 50;

/// Resolve optional paging parameters into `(limit, offset)`.
pub fn page_bounds(limit: Option<usize>, offset: Option<usize>) -> (usize, usize) {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    (limit, offset.unwrap_or(0))
}

/// Aggregate numbers over one user's detections.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_vehicles: u64,
    pub occluded_vehicles: u64,
    /// Mean of the per-detection occlusion percentages over completed jobs.
    pub average_occlusion_percentage: f64,
    /// Mean processing time over jobs that recorded one.
    pub average_processing_ms: Option<f64>,
}

/// Incremental builder for [`HistoryStats`].
#[derive(Debug, Default)]
pub struct HistoryStatsBuilder {
    stats: HistoryStats,
    occlusion_sum: f64,
    duration_sum: i64,
    duration_count: usize,
}

impl HistoryStatsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        status: DetectionStatus,
        results: Option<&DetectionResults>,
        processing_duration: Option<i64>,
    ) {
        let s = &mut self.stats;
        s.total += 1;
        match status {
            DetectionStatus::Pending => s.pending += 1,
            DetectionStatus::Processing => s.processing += 1,
            DetectionStatus::Completed => s.completed += 1,
            DetectionStatus::Failed => s.failed += 1,
            DetectionStatus::Cancelled => s.cancelled += 1,
        }
        if status == DetectionStatus::Completed {
            if let Some(r) = results {
                s.total_vehicles += u64::from(r.total_vehicles);
                s.occluded_vehicles += u64::from(r.occluded_vehicles);
                self.occlusion_sum += r.occlusion_percentage;
            }
        }
        if let Some(ms) = processing_duration {
            self.duration_sum += ms;
            self.duration_count += 1;
        }
    }

    pub fn finish(self) -> HistoryStats {
        let mut stats = self.stats;
        if stats.completed > 0 {
            stats.average_occlusion_percentage = self.occlusion_sum / stats.completed as f64;
        }
        if self.duration_count > 0 {
            stats.average_processing_ms = Some(self.duration_sum as f64 / self.duration_count as f64);
        }
        stats
    }
}
