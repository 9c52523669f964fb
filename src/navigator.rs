//! Composition root
//!
//! Builds the cache, animator, transition controller and queue from one
//! [`NavigationConfig`] around a single provider and a single view. Every
//! service is constructed here and handed to its consumers; nothing is
//! global.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::animator::RotationAnimator;
use crate::cache::PanoramaCache;
use crate::config::{ConfigError, NavigationConfig};
use crate::provider::PanoramaDataProvider;
use crate::queue::OperationQueue;
use crate::transition::TransitionController;
use crate::view::{SharedView, ViewHandle};

/// Wired-up navigation core
#[derive(Clone)]
pub struct Navigator {
    config: NavigationConfig,
    view: SharedView,
    cache: Arc<PanoramaCache>,
    animator: RotationAnimator,
    transitions: Arc<TransitionController>,
    queue: OperationQueue,
}

impl Navigator {
    /// Wire the core together. Rejects a config that fails
    /// [`NavigationConfig::validate`].
    pub fn new(
        config: NavigationConfig,
        provider: Arc<dyn PanoramaDataProvider>,
        view: Arc<dyn ViewHandle>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let view = SharedView::new(view);
        let cache = Arc::new(PanoramaCache::new(provider, &config.cache));
        let animator = RotationAnimator::new(config.animation.frame_interval());
        let transitions = Arc::new(TransitionController::new(
            view.clone(),
            cache.clone(),
            animator.clone(),
            config.transition.clone(),
        ));
        let queue = OperationQueue::new(
            view.clone(),
            transitions.clone(),
            animator.clone(),
            config.queue.clone(),
        );

        info!(
            ttl_ms = config.cache.ttl_ms,
            min_interval_ms = config.queue.min_interval_ms,
            max_attempts = config.transition.max_attempts,
            "Navigator initialised"
        );

        Ok(Self {
            config,
            view,
            cache,
            animator,
            transitions,
            queue,
        })
    }

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    pub fn view(&self) -> &SharedView {
        &self.view
    }

    pub fn cache(&self) -> &Arc<PanoramaCache> {
        &self.cache
    }

    pub fn animator(&self) -> &RotationAnimator {
        &self.animator
    }

    pub fn transitions(&self) -> &Arc<TransitionController> {
        &self.transitions
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    /// Evict expired cache entries every `cache.eviction_interval_secs`.
    /// Runs until the returned handle is aborted.
    pub fn spawn_eviction_loop(&self) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let interval = Duration::from_secs(self.config.cache.eviction_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let evicted = cache.evict_expired();
                if evicted > 0 {
                    debug!(evicted, remaining = cache.len(), "Evicted expired panoramas");
                }
            }
        })
    }
}
