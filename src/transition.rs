//! Panorama transition state machine
//!
//! Moves the shared view to a new panorama:
//!
//! ```text
//! Idle → Validating → Rotating → SwappingPanorama → AwaitingConfirmation
//!                                     ▲                    │
//!                                     └── RetryBackoff ◄───┤ (failure, attempts left)
//!                                                          ├─► Success → Idle
//!                                                          └─► Failed  → Idle
//! ```
//!
//! Validation failures are terminal. Retryable swap and confirmation
//! failures (see [`NavError::is_retryable`]) are retried after a fixed
//! backoff until `max_attempts` swaps have been made; any other error ends
//! the transition at once.
//! Whatever the outcome, controls are re-enabled and the state returns to
//! idle on exit, including when the transition future is dropped.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::animator::RotationAnimator;
use crate::cache::PanoramaCache;
use crate::cancel::CancellationToken;
use crate::config::TransitionConfig;
use crate::error::{NavError, NavResult};
use crate::types::PovUpdate;
use crate::view::{SharedView, ViewHandle, ViewLease};
use crate::wait::{self, WaitError};

/// Step of an in-progress transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    Idle,
    Validating,
    Rotating,
    SwappingPanorama,
    AwaitingConfirmation,
    RetryBackoff,
}

impl TransitionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Rotating => "rotating",
            Self::SwappingPanorama => "swapping_panorama",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::RetryBackoff => "retry_backoff",
        }
    }
}

impl fmt::Display for TransitionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observable transition state. Exactly one per controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionState {
    pub in_progress: bool,
    pub target_panorama_id: Option<String>,
    /// Failed swap attempts so far
    pub attempts: u32,
    pub phase: TransitionPhase,
}

impl TransitionState {
    pub fn idle() -> Self {
        Self {
            in_progress: false,
            target_panorama_id: None,
            attempts: 0,
            phase: TransitionPhase::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::idle()
    }
}

impl Default for TransitionState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Where to go and how to look once there
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub target_panorama_id: String,
    pub heading: f64,
    pub pitch: f64,
    pub zoom: Option<f64>,
}

impl TransitionRequest {
    pub fn new(target_panorama_id: impl Into<String>, heading: f64) -> Self {
        Self {
            target_panorama_id: target_panorama_id.into(),
            heading,
            pitch: 0.0,
            zoom: None,
        }
    }

    pub fn with_pitch(mut self, pitch: f64) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = Some(zoom);
        self
    }
}

/// Re-enables controls and resets the state on every exit path
struct TransitionCleanup<'a> {
    view: &'a dyn ViewHandle,
    state: &'a watch::Sender<TransitionState>,
}

impl Drop for TransitionCleanup<'_> {
    fn drop(&mut self) {
        self.view.set_interactive_controls_enabled(true);
        self.state.send_replace(TransitionState::idle());
    }
}

/// Executes panorama transitions against the shared view
pub struct TransitionController {
    view: SharedView,
    cache: Arc<PanoramaCache>,
    animator: RotationAnimator,
    config: TransitionConfig,
    state: watch::Sender<TransitionState>,
    last_error: Mutex<Option<String>>,
}

impl TransitionController {
    pub fn new(
        view: SharedView,
        cache: Arc<PanoramaCache>,
        animator: RotationAnimator,
        config: TransitionConfig,
    ) -> Self {
        let (state, _rx) = watch::channel(TransitionState::idle());
        Self {
            view,
            cache,
            animator,
            config,
            state,
            last_error: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<PanoramaCache> {
        &self.cache
    }

    pub fn state(&self) -> TransitionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransitionState> {
        self.state.subscribe()
    }

    /// Human-readable message of the most recent failure
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Transition to a panorama, taking the view lease for the duration.
    ///
    /// Returns false without touching any state if the view is busy or a
    /// transition is already in progress. Returns false after recording an
    /// error message if the transition fails.
    pub async fn transition_to(
        &self,
        request: TransitionRequest,
        cancel: &CancellationToken,
    ) -> bool {
        if self.state.borrow().in_progress {
            debug!(target = %request.target_panorama_id, "Transition rejected: already in progress");
            return false;
        }
        let Some(lease) = self.view.try_acquire() else {
            debug!(target = %request.target_panorama_id, "Transition rejected: view busy");
            return false;
        };
        self.execute(&lease, request, cancel).await.is_ok()
    }

    /// Run a transition with a lease the caller already holds
    pub async fn execute(
        &self,
        lease: &ViewLease,
        request: TransitionRequest,
        cancel: &CancellationToken,
    ) -> NavResult<()> {
        if self.state.borrow().in_progress {
            return Err(NavError::ViewBusy);
        }

        let view: &dyn ViewHandle = &**lease;
        self.state.send_replace(TransitionState {
            in_progress: true,
            target_panorama_id: Some(request.target_panorama_id.clone()),
            attempts: 0,
            phase: TransitionPhase::Validating,
        });
        let _cleanup = TransitionCleanup {
            view,
            state: &self.state,
        };

        info!(
            target = %request.target_panorama_id,
            heading = request.heading,
            "Starting panorama transition"
        );

        let result = self.run(view, &request, cancel).await;
        match &result {
            Ok(()) => info!(target = %request.target_panorama_id, "Panorama transition complete"),
            Err(e) => {
                warn!(target = %request.target_panorama_id, error = %e, "Panorama transition failed");
                *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
            }
        }
        result
    }

    async fn run(
        &self,
        view: &dyn ViewHandle,
        request: &TransitionRequest,
        cancel: &CancellationToken,
    ) -> NavResult<()> {
        let target = request.target_panorama_id.as_str();

        self.validate(target, cancel).await?;
        view.set_interactive_controls_enabled(false);

        self.set_phase(TransitionPhase::Rotating);
        self.animator
            .rotate_view(view, request.heading, self.config.rotation_duration(), cancel)
            .await?;

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0u32;
        loop {
            let error = match self.attempt_swap(view, request, cancel).await {
                Ok(()) => return Ok(()),
                // Cancellation and hard failures end the transition as-is
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            attempts += 1;
            self.state.send_modify(|s| s.attempts = attempts);
            warn!(
                target,
                attempt = attempts,
                max_attempts,
                error = %error,
                "Transition attempt failed"
            );

            if attempts >= max_attempts {
                return Err(NavError::ExhaustedRetries {
                    panorama_id: target.to_string(),
                    attempts,
                    last_error: error.to_string(),
                });
            }

            self.set_phase(TransitionPhase::RetryBackoff);
            wait::sleep(self.config.retry_backoff(), cancel)
                .await
                .map_err(|_| NavError::Cancelled)?;
        }
    }

    /// Confirm the target is reachable. Any failure here is terminal.
    async fn validate(&self, target: &str, cancel: &CancellationToken) -> NavResult<()> {
        let metadata = match self.cache.get_with_cancel(target, cancel).await {
            Ok(metadata) => metadata,
            Err(NavError::Cancelled) => return Err(NavError::Cancelled),
            Err(e) => return Err(NavError::validation(target, e.to_string())),
        };
        metadata
            .validate()
            .map_err(|reason| NavError::validation(target, reason))
    }

    async fn attempt_swap(
        &self,
        view: &dyn ViewHandle,
        request: &TransitionRequest,
        cancel: &CancellationToken,
    ) -> NavResult<()> {
        let target = request.target_panorama_id.as_str();

        self.set_phase(TransitionPhase::SwappingPanorama);
        self.cache.get_with_cancel(target, cancel).await?;
        view.set_active_panorama_id(target);

        self.set_phase(TransitionPhase::AwaitingConfirmation);
        wait::wait_for(
            || view.active_panorama_id().as_deref() == Some(target),
            self.config.confirm_poll_interval(),
            self.config.confirm_timeout(),
            cancel,
        )
        .await
        .map_err(|e| match e {
            WaitError::TimedOut { waited } => NavError::TransitionTimeout {
                panorama_id: target.to_string(),
                waited_ms: waited.as_millis() as u64,
            },
            WaitError::Cancelled => NavError::Cancelled,
        })?;

        view.set_pov(PovUpdate::new(request.heading, request.pitch));
        if let Some(zoom) = request.zoom {
            view.set_zoom(zoom);
        }
        Ok(())
    }

    fn set_phase(&self, phase: TransitionPhase) {
        self.state.send_modify(|s| s.phase = phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationSource;
    use crate::config::CacheConfig;
    use crate::provider::{InMemoryPanoramaProvider, PanoramaDataProvider};
    use crate::types::PanoramaMetadata;
    use crate::view::HeadlessView;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn provider(ids: &[&str]) -> Arc<InMemoryPanoramaProvider> {
        Arc::new(InMemoryPanoramaProvider::new(ids.iter().map(|id| {
            PanoramaMetadata {
                pano_id: id.to_string(),
                ..Default::default()
            }
        })))
    }

    fn controller_for(view: Arc<HeadlessView>) -> TransitionController {
        let cache = Arc::new(PanoramaCache::new(
            provider(&["P1", "P2", "P3"]),
            &CacheConfig::default(),
        ));
        TransitionController::new(
            SharedView::new(view),
            cache,
            RotationAnimator::default(),
            TransitionConfig::default(),
        )
    }

    /// Serves valid metadata on the first fetch, then fails every later one
    struct DegradingProvider {
        calls: AtomicUsize,
        later: NavError,
    }

    #[async_trait]
    impl PanoramaDataProvider for DegradingProvider {
        async fn fetch(&self, panorama_id: &str) -> NavResult<PanoramaMetadata> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(PanoramaMetadata {
                    pano_id: panorama_id.to_string(),
                    ..Default::default()
                })
            } else {
                Err(self.later.clone())
            }
        }
    }

    /// Every lookup goes to the provider
    fn uncached_controller(
        view: Arc<HeadlessView>,
        later: NavError,
    ) -> (TransitionController, Arc<DegradingProvider>) {
        let provider = Arc::new(DegradingProvider {
            calls: AtomicUsize::new(0),
            later,
        });
        let cache = Arc::new(PanoramaCache::new(
            provider.clone(),
            &CacheConfig {
                ttl_ms: 0,
                ..Default::default()
            },
        ));
        let controller = TransitionController::new(
            SharedView::new(view),
            cache,
            RotationAnimator::default(),
            TransitionConfig::default(),
        );
        (controller, provider)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_transition() {
        let view = Arc::new(
            HeadlessView::new(Some("P1".to_string()))
                .with_swap_delay(Duration::from_millis(300)),
        );
        let controller = controller_for(view.clone());

        let request = TransitionRequest::new("P2", 180.0)
            .with_pitch(5.0)
            .with_zoom(2.0);
        let ok = controller
            .transition_to(request, &CancellationToken::never())
            .await;

        assert!(ok);
        let snapshot = view.snapshot();
        assert_eq!(snapshot.panorama_id.as_deref(), Some("P2"));
        assert_eq!(snapshot.pov.heading, 180.0);
        assert_eq!(snapshot.pov.pitch, 5.0);
        assert_eq!(snapshot.pov.zoom, 2.0);
        assert!(snapshot.controls_enabled);
        assert!(controller.state().is_idle());
        assert!(controller.last_error().is_none());
        assert_eq!(view.swap_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_failure_is_not_retried() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let controller = controller_for(view.clone());

        let ok = controller
            .transition_to(
                TransitionRequest::new("missing", 90.0),
                &CancellationToken::never(),
            )
            .await;

        assert!(!ok);
        assert_eq!(view.swap_requests(), 0);
        assert_eq!(view.pov_updates(), 0);
        assert!(controller
            .last_error()
            .unwrap()
            .contains("Invalid panorama target"));
        assert!(controller.state().is_idle());
        assert!(view.interactive_controls_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_three_attempts_with_backoff() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())).refuse_panorama("P2"));
        let controller = controller_for(view.clone());
        let started = Instant::now();

        let ok = controller
            .transition_to(
                TransitionRequest::new("P2", 90.0),
                &CancellationToken::never(),
            )
            .await;

        assert!(!ok);
        assert_eq!(view.swap_requests(), 3);
        // rotation + three confirmation timeouts + two backoffs
        assert!(started.elapsed() >= Duration::from_millis(1500 + 3 * 5000 + 2 * 1000));
        let message = controller.last_error().unwrap();
        assert!(message.contains("All transition attempts failed"));
        assert!(message.contains("3 attempts"));
        assert!(controller.state().is_idle());
        assert!(view.interactive_controls_enabled());
        assert_eq!(view.active_panorama_id().as_deref(), Some("P1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_swap_error_is_terminal() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let (controller, provider) = uncached_controller(
            view.clone(),
            NavError::InvalidOperation("panorama withdrawn".to_string()),
        );

        let lease = controller.view.acquire().await;
        let result = controller
            .execute(
                &lease,
                TransitionRequest::new("P2", 90.0),
                &CancellationToken::never(),
            )
            .await;

        assert_eq!(
            result,
            Err(NavError::InvalidOperation("panorama withdrawn".to_string()))
        );
        // One validation fetch plus a single swap attempt
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(view.swap_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_during_swap_are_retried() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let (controller, provider) =
            uncached_controller(view.clone(), NavError::fetch("P2", "connection reset"));

        let lease = controller.view.acquire().await;
        let result = controller
            .execute(
                &lease,
                TransitionRequest::new("P2", 90.0),
                &CancellationToken::never(),
            )
            .await;

        assert!(matches!(
            result,
            Err(NavError::ExhaustedRetries { attempts: 3, .. })
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_slow_swap() {
        let view = Arc::new(
            HeadlessView::new(Some("P1".to_string()))
                .with_swap_delay(Duration::from_millis(6000)),
        );
        let controller = controller_for(view.clone());

        let ok = controller
            .transition_to(
                TransitionRequest::new("P2", 90.0),
                &CancellationToken::never(),
            )
            .await;

        assert!(ok);
        assert_eq!(view.swap_requests(), 2);
        assert_eq!(view.active_panorama_id().as_deref(), Some("P2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_while_in_progress() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let controller = Arc::new(controller_for(view.clone()));

        let first = tokio::spawn({
            let controller = controller.clone();
            async move {
                controller
                    .transition_to(
                        TransitionRequest::new("P2", 90.0),
                        &CancellationToken::never(),
                    )
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        let during = controller.state();
        assert!(during.in_progress);
        assert_eq!(during.phase, TransitionPhase::Rotating);
        assert!(!view.interactive_controls_enabled());

        let second = controller
            .transition_to(
                TransitionRequest::new("P3", 270.0),
                &CancellationToken::never(),
            )
            .await;
        assert!(!second);
        assert_eq!(controller.state().target_panorama_id.as_deref(), Some("P2"));

        assert!(first.await.unwrap());
        assert_eq!(view.active_panorama_id().as_deref(), Some("P2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_when_view_leased_elsewhere() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let shared = SharedView::new(view.clone());
        let cache = Arc::new(PanoramaCache::new(provider(&["P2"]), &CacheConfig::default()));
        let controller = TransitionController::new(
            shared.clone(),
            cache,
            RotationAnimator::default(),
            TransitionConfig::default(),
        );

        let _held = shared.try_acquire().unwrap();
        let ok = controller
            .transition_to(
                TransitionRequest::new("P2", 90.0),
                &CancellationToken::never(),
            )
            .await;

        assert!(!ok);
        assert!(controller.state().is_idle());
        assert!(controller.last_error().is_none());
        assert_eq!(view.pov_updates(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resets_state() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())).refuse_panorama("P2"));
        let controller = Arc::new(controller_for(view.clone()));
        let source = CancellationSource::new();

        let handle = tokio::spawn({
            let controller = controller.clone();
            let token = source.token();
            async move {
                let lease = controller.view.acquire().await;
                controller
                    .execute(&lease, TransitionRequest::new("P2", 90.0), &token)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(
            controller.state().phase,
            TransitionPhase::AwaitingConfirmation
        );
        source.cancel();

        assert_eq!(handle.await.unwrap(), Err(NavError::Cancelled));
        assert!(controller.state().is_idle());
        assert!(view.interactive_controls_enabled());
    }
}
