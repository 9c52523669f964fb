//! pano-nav - Panorama Navigation Core
//!
//! Sequences navigation intents against a single shared panoramic view:
//! rotate in place, or move to an adjacent panorama with a validated,
//! animated, confirmed and retried transition. Panorama metadata is served
//! through a TTL cache that coalesces concurrent fetches.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Producers: analysis results, UI, CLI scripts                   │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │ enqueue
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    OperationQueue                               │
//! │        FIFO, one dispatch at a time, min interval               │
//! └─────────────────────────────────────────────────────────────────┘
//!              │ panorama                        │ view
//!              ▼                                 │
//! ┌───────────────────────────────┐              │
//! │     TransitionController      │              │
//! │ validate → rotate → swap →    │              │
//! │ confirm → (retry)             │              │
//! └───────────────────────────────┘              │
//!         │                 │                    │
//!         ▼                 ▼                    ▼
//! ┌───────────────┐  ┌──────────────────────────────────────────────┐
//! │ PanoramaCache │  │              RotationAnimator                │
//! │ TTL + dedupe  │  └──────────────────────────────────────────────┘
//! └───────────────┘                    │
//!         │                            ▼
//!         ▼                 ┌──────────────────────────┐
//! ┌──────────────────────┐  │  SharedView / ViewLease  │
//! │ PanoramaDataProvider │  │  (single ViewHandle)     │
//! └──────────────────────┘  └──────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pano_nav::{Navigator, NavigationConfig, QueuedOperation};
//!
//! let config = NavigationConfig::from_file("config/navigation.yaml")?;
//! let navigator = Navigator::new(config, provider, view)?;
//! let _eviction = navigator.spawn_eviction_loop();
//!
//! navigator.queue().enqueue(QueuedOperation::view(90.0));
//! navigator.queue().enqueue(QueuedOperation::panorama("P2", 180.0));
//! navigator.queue().wait_until_idle().await;
//! ```

pub mod animator;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod history;
pub mod intent;
pub mod navigator;
pub mod provider;
pub mod queue;
pub mod transition;
pub mod types;
pub mod view;
pub mod wait;

pub use animator::{cardinal_direction, shortest_rotation, RotationAnimation, RotationAnimator};
pub use cache::{CacheStats, PanoramaCache, PreloadReport};
pub use cancel::{CancellationSource, CancellationToken};
pub use config::{ConfigError, NavigationConfig};
pub use error::{NavError, NavResult};
pub use history::{
    ExplorationMetrics, GeoBounds, NavigationTimeline, TimelineEntry, TimelineOutcome,
};
pub use intent::{AnalysisResult, NextAction};
pub use navigator::Navigator;
pub use provider::{HttpPanoramaProvider, InMemoryPanoramaProvider, PanoramaDataProvider};
pub use queue::{
    next_event, NavigationEvent, OperationKind, OperationQueue, QueueStatus, QueuedOperation,
};
pub use transition::{TransitionController, TransitionPhase, TransitionRequest, TransitionState};
pub use types::{ConnectedPanorama, LatLng, PanoramaLink, PanoramaMetadata, Pov, PovUpdate};
pub use view::{HeadlessView, SharedView, ViewHandle, ViewLease, ViewSnapshot};
