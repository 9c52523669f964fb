//! Navigation timeline
//!
//! In-memory record of dispatched operations and the panoramas the view has
//! actually reached, plus exploration metrics (action count and the
//! lat/lng bounding box of positions seen). Entries are bounded and the
//! oldest fall off first; the metrics cover every action ever recorded.
//! Nothing here outlives the process.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::queue::{OperationKind, QueuedOperation};
use crate::types::LatLng;

/// How a dispatched operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl TimelineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TimelineOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for TimelineOutcome {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown timeline outcome: {}", s)),
        }
    }
}

/// One dispatched operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub sequence: u64,
    pub action: OperationKind,
    pub panorama_id: Option<String>,
    pub heading: f64,
    pub pitch: Option<f64>,
    pub zoom: Option<f64>,
    pub outcome: TimelineOutcome,
    pub error: Option<String>,
    /// Where the view stood once the operation ended, when known
    pub position: Option<LatLng>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TimelineEntry {
    pub fn from_operation(
        sequence: u64,
        operation: &QueuedOperation,
        outcome: TimelineOutcome,
        error: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            action: operation.kind(),
            panorama_id: operation.target_panorama_id().map(str::to_string),
            heading: operation.heading(),
            pitch: operation.pitch(),
            zoom: operation.zoom(),
            outcome,
            error,
            position: None,
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn with_position(mut self, position: Option<LatLng>) -> Self {
        self.position = position;
        self
    }
}

/// Lat/lng bounding box of every position seen
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl GeoBounds {
    pub fn from_point(point: LatLng) -> Self {
        Self {
            min_lat: point.lat,
            max_lat: point.lat,
            min_lng: point.lng,
            max_lng: point.lng,
        }
    }

    pub fn extend(&mut self, point: LatLng) {
        self.min_lat = self.min_lat.min(point.lat);
        self.max_lat = self.max_lat.max(point.lat);
        self.min_lng = self.min_lng.min(point.lng);
        self.max_lng = self.max_lng.max(point.lng);
    }
}

/// Counters over the whole session
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExplorationMetrics {
    pub total_actions: u64,
    /// `None` until a position is known
    pub bounds: Option<GeoBounds>,
}

impl ExplorationMetrics {
    fn extend(&mut self, point: LatLng) {
        match &mut self.bounds {
            Some(bounds) => bounds.extend(point),
            None => self.bounds = Some(GeoBounds::from_point(point)),
        }
    }
}

/// Bounded history of dispatched operations plus visited panoramas
#[derive(Debug, Clone, Serialize)]
pub struct NavigationTimeline {
    #[serde(skip)]
    capacity: usize,
    entries: VecDeque<TimelineEntry>,
    /// In order of first arrival
    visited: Vec<String>,
    metrics: ExplorationMetrics,
}

impl NavigationTimeline {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            visited: Vec::new(),
            metrics: ExplorationMetrics::default(),
        }
    }

    /// Seed the visited set with the panorama the view starts on
    pub fn mark_visited(&mut self, panorama_id: &str) {
        if !self.has_visited(panorama_id) {
            self.visited.push(panorama_id.to_string());
        }
    }

    pub fn record(&mut self, entry: TimelineEntry) {
        self.metrics.total_actions += 1;
        if let Some(position) = entry.position {
            self.metrics.extend(position);
        }
        if entry.action == OperationKind::Panorama && entry.outcome == TimelineOutcome::Completed {
            if let Some(id) = entry.panorama_id.as_deref() {
                self.mark_visited(id);
            }
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &TimelineEntry> {
        self.entries.iter()
    }

    /// Most recent `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<&TimelineEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    pub fn last(&self) -> Option<&TimelineEntry> {
        self.entries.back()
    }

    pub fn metrics(&self) -> &ExplorationMetrics {
        &self.metrics
    }

    pub fn visited(&self) -> &[String] {
        &self.visited
    }

    pub fn has_visited(&self, panorama_id: &str) -> bool {
        self.visited.iter().any(|v| v == panorama_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
