//! Event type definitions for cache activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All events emitted by the cache manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Outcome of a lookup
    Lookup(LookupEvent),
    /// Entries written or removed by callers
    Store(StoreEvent),
    /// Sweeps and index maintenance
    Maintenance(MaintenanceEvent),
    /// Signature preloading
    Preload(PreloadEvent),
}

/// How a lookup was answered. Keys are hex content hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LookupEvent {
    /// Served from the entry stored under the image's own content hash
    ExactHit { key: String },
    /// Served from a near-duplicate
    FuzzyHit {
        key: String,
        matched_key: String,
        similarity: f64,
    },
    /// The exact entry exists but is past its expiry
    Expired { key: String },
    /// Nothing usable was cached
    Miss { key: String },
}

/// Changes made on behalf of callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    /// A result was cached
    Stored {
        key: String,
        expires_at: DateTime<Utc>,
    },
    /// A result was not cached
    Rejected { reason: String },
    /// An entry was explicitly invalidated
    Invalidated { key: String },
}

/// Background upkeep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MaintenanceEvent {
    /// Index warmed from persistent storage
    IndexWarmed { entries: usize },
    /// Expired entries swept
    Swept { removed: usize },
    /// Similarity index rebuilt
    IndexOptimized {
        entries: usize,
        pruned: usize,
        buckets: usize,
    },
}

/// Events while preloading signatures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PreloadEvent {
    /// Preloading has started
    Started { total_images: usize },
    /// Progress update during preloading
    Progress(PreloadProgress),
    /// Preloading completed
    Completed {
        computed: usize,
        skipped: usize,
        duration_ms: u64,
    },
}

/// Progress information during preloading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadProgress {
    /// Images processed so far
    pub completed: usize,
    pub total: usize,
}

impl std::fmt::Display for LookupEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupEvent::ExactHit { .. } => write!(f, "exact hit"),
            LookupEvent::FuzzyHit { similarity, .. } => {
                write!(f, "fuzzy hit ({:.1}% similar)", similarity * 100.0)
            }
            LookupEvent::Expired { .. } => write!(f, "expired"),
            LookupEvent::Miss { .. } => write!(f, "miss"),
        }
    }
}
