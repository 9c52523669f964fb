//! Operation queue
//!
//! FIFO sequencer for navigation intents. A single drain task dispatches one
//! operation at a time, holding the view lease for the whole dispatch, and
//! keeps successive dispatch starts at least `min_interval` apart measured
//! from the end of the previous dispatch.
//!
//! Failed operations are dropped, not retried; retries live inside the
//! transition controller. Every outcome is published as a
//! [`NavigationEvent`] so failures are observable. `OperationStarted` is
//! sent only after the view lease is held.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::animator::RotationAnimator;
use crate::cancel::{CancellationSource, CancellationToken};
use crate::config::QueueConfig;
use crate::error::{NavError, NavResult};
use crate::history::{NavigationTimeline, TimelineEntry, TimelineOutcome};
use crate::transition::{TransitionController, TransitionRequest};
use crate::types::{LatLng, PovUpdate};
use crate::view::{SharedView, ViewLease};

/// What a queued operation does to the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Move to another panorama
    Panorama,
    /// Rotate in place
    View,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Panorama => "panorama",
            Self::View => "view",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A navigation intent. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedOperation {
    kind: OperationKind,
    target_panorama_id: Option<String>,
    heading: f64,
    pitch: Option<f64>,
    zoom: Option<f64>,
    enqueued_at: DateTime<Utc>,
}

impl QueuedOperation {
    pub fn panorama(target_panorama_id: impl Into<String>, heading: f64) -> Self {
        Self {
            kind: OperationKind::Panorama,
            target_panorama_id: Some(target_panorama_id.into()),
            heading,
            pitch: None,
            zoom: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn view(heading: f64) -> Self {
        Self {
            kind: OperationKind::View,
            target_panorama_id: None,
            heading,
            pitch: None,
            zoom: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_pitch(mut self, pitch: f64) -> Self {
        self.pitch = Some(pitch);
        self
    }

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = Some(zoom);
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn target_panorama_id(&self) -> Option<&str> {
        self.target_panorama_id.as_deref()
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn pitch(&self) -> Option<f64> {
        self.pitch
    }

    pub fn zoom(&self) -> Option<f64> {
        self.zoom
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

/// Queue lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationEvent {
    OperationStarted {
        sequence: u64,
        operation: QueuedOperation,
    },
    OperationCompleted {
        sequence: u64,
        operation: QueuedOperation,
    },
    OperationFailed {
        sequence: u64,
        operation: QueuedOperation,
        error: NavError,
    },
    QueueCleared {
        removed: usize,
    },
    QueueIdle,
}

/// Observable queue state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Operations not yet finished, including the one being dispatched
    pub pending: usize,
    pub processing: bool,
}

impl QueueStatus {
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && !self.processing
    }
}

struct PendingOperation {
    sequence: u64,
    operation: QueuedOperation,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingOperation>,
    processing: bool,
    next_sequence: u64,
    last_dispatch_end: Option<Instant>,
    current: Option<CancellationSource>,
}

struct QueueInner {
    view: SharedView,
    controller: Arc<TransitionController>,
    animator: RotationAnimator,
    config: QueueConfig,
    state: Mutex<QueueState>,
    status: watch::Sender<QueueStatus>,
    events: broadcast::Sender<NavigationEvent>,
    timeline: Mutex<NavigationTimeline>,
}

/// FIFO navigation queue. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

/// Next event from `rx`. A subscriber that fell behind skips the lost
/// events and keeps going; `None` once the queue is gone.
pub async fn next_event(rx: &mut broadcast::Receiver<NavigationEvent>) -> Option<NavigationEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event subscriber lagged, skipping missed events");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

impl OperationQueue {
    pub fn new(
        view: SharedView,
        controller: Arc<TransitionController>,
        animator: RotationAnimator,
        config: QueueConfig,
    ) -> Self {
        let (status, _rx) = watch::channel(QueueStatus::default());
        let (events, _rx) = broadcast::channel(config.event_capacity.max(1));
        let mut timeline = NavigationTimeline::new(config.timeline_capacity);
        if let Some(id) = view.snapshot().panorama_id {
            timeline.mark_visited(&id);
        }

        Self {
            inner: Arc::new(QueueInner {
                view,
                controller,
                animator,
                config,
                state: Mutex::new(QueueState::default()),
                status,
                events,
                timeline: Mutex::new(timeline),
            }),
        }
    }

    /// Append to the tail and start draining if idle. Returns the
    /// operation's sequence number.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, operation: QueuedOperation) -> u64 {
        let (sequence, start_drain) = {
            let mut state = self.inner.lock_state();
            state.next_sequence += 1;
            let sequence = state.next_sequence;
            debug!(sequence, kind = %operation.kind(), "Operation enqueued");
            state.pending.push_back(PendingOperation {
                sequence,
                operation,
            });
            let start_drain = !state.processing;
            state.processing = true;
            self.inner.publish_status(&state);
            (sequence, start_drain)
        };

        if start_drain {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.drain().await });
        }
        sequence
    }

    /// Drop every queued operation. An operation already dispatched runs
    /// to completion; use [`cancel_current`](Self::cancel_current) for that.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.inner.lock_state();
            let removed = state.pending.len();
            state.pending.clear();
            self.inner.publish_status(&state);
            removed
        };
        info!(removed, "Operation queue cleared");
        self.inner.emit(NavigationEvent::QueueCleared { removed });
        removed
    }

    /// Cancel the operation currently being dispatched. Returns false when
    /// nothing is in flight.
    pub fn cancel_current(&self) -> bool {
        let state = self.inner.lock_state();
        match &state.current {
            Some(source) => {
                info!("Cancelling in-flight operation");
                source.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self) -> bool {
        self.inner.lock_state().processing
    }

    pub fn status(&self) -> QueueStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<QueueStatus> {
        self.inner.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<NavigationEvent> {
        self.inner.events.subscribe()
    }

    /// Resolves once nothing is queued or processing
    pub async fn wait_until_idle(&self) {
        let mut rx = self.inner.status.subscribe();
        // The sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(QueueStatus::is_idle).await;
    }

    pub fn timeline(&self) -> NavigationTimeline {
        self.inner
            .timeline
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn publish_status(&self, state: &QueueState) {
        self.status.send_replace(QueueStatus {
            pending: state.pending.len(),
            processing: state.processing,
        });
    }

    fn emit(&self, event: NavigationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn drain(self: Arc<Self>) {
        debug!("Queue drain started");

        loop {
            let next = {
                let mut state = self.lock_state();
                match state.pending.front() {
                    Some(head) => Some((
                        head.sequence,
                        head.operation.clone(),
                        state.last_dispatch_end,
                    )),
                    None => {
                        state.processing = false;
                        self.publish_status(&state);
                        None
                    }
                }
            };

            let Some((sequence, operation, last_end)) = next else {
                debug!("Queue drained");
                self.emit(NavigationEvent::QueueIdle);
                return;
            };

            if let Some(end) = last_end {
                let ready_at = end + self.config.min_interval();
                if ready_at > Instant::now() {
                    debug!(
                        sequence,
                        wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                        "Waiting for minimum operation interval"
                    );
                    tokio::time::sleep_until(ready_at).await;
                    // The queue may have been cleared meanwhile
                    continue;
                }
            }

            self.run_one(sequence, operation).await;
        }
    }

    async fn run_one(&self, sequence: u64, operation: QueuedOperation) {
        let source = CancellationSource::new();
        self.lock_state().current = Some(source.clone());
        let token = source.token();

        // Started is only announced once the view is ours
        let lease = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            lease = self.view.acquire() => Some(lease),
        };

        let started_at = Utc::now();
        let result = match lease {
            Some(lease) => {
                info!(
                    sequence,
                    kind = %operation.kind(),
                    target = operation.target_panorama_id().unwrap_or("-"),
                    heading = operation.heading(),
                    "Dispatching operation"
                );
                self.emit(NavigationEvent::OperationStarted {
                    sequence,
                    operation: operation.clone(),
                });
                self.dispatch(&lease, &operation, &token).await
            }
            None => {
                debug!(sequence, "Cancelled while waiting for the view");
                Err(NavError::Cancelled)
            }
        };

        {
            let mut state = self.lock_state();
            state.current = None;
            state.last_dispatch_end = Some(Instant::now());
            if state.pending.front().map(|p| p.sequence) == Some(sequence) {
                state.pending.pop_front();
            }
            self.publish_status(&state);
        }

        let (outcome, error) = match &result {
            Ok(()) => (TimelineOutcome::Completed, None),
            Err(NavError::Cancelled) => (TimelineOutcome::Cancelled, Some(NavError::Cancelled)),
            Err(e) => (TimelineOutcome::Failed, Some(e.clone())),
        };
        let entry = TimelineEntry::from_operation(
            sequence,
            &operation,
            outcome,
            error.as_ref().map(ToString::to_string),
            started_at,
        )
        .with_position(self.current_position());
        self.timeline
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .record(entry);

        match error {
            None => {
                info!(sequence, "Operation completed");
                self.emit(NavigationEvent::OperationCompleted {
                    sequence,
                    operation,
                });
            }
            Some(error) => {
                warn!(sequence, error = %error, "Operation failed, dropping");
                self.emit(NavigationEvent::OperationFailed {
                    sequence,
                    operation,
                    error,
                });
            }
        }
    }

    /// Position of the panorama the view is on, if its metadata is cached
    fn current_position(&self) -> Option<LatLng> {
        let panorama_id = self.view.snapshot().panorama_id?;
        self.controller.cache().peek(&panorama_id)?.position
    }

    async fn dispatch(
        &self,
        lease: &ViewLease,
        operation: &QueuedOperation,
        cancel: &CancellationToken,
    ) -> NavResult<()> {
        match operation.kind() {
            OperationKind::Panorama => self.dispatch_panorama(lease, operation, cancel).await,
            OperationKind::View => self.dispatch_view(lease, operation, cancel).await,
        }
    }

    async fn dispatch_panorama(
        &self,
        lease: &ViewLease,
        operation: &QueuedOperation,
        cancel: &CancellationToken,
    ) -> NavResult<()> {
        let target = operation.target_panorama_id().ok_or_else(|| {
            NavError::InvalidOperation("panorama operation without a target".to_string())
        })?;

        let mut request =
            TransitionRequest::new(target, operation.heading()).with_pitch(operation.pitch().unwrap_or(0.0));
        if let Some(zoom) = operation.zoom() {
            request = request.with_zoom(zoom);
        }
        self.controller.execute(lease, request, cancel).await
    }

    async fn dispatch_view(
        &self,
        lease: &ViewLease,
        operation: &QueuedOperation,
        cancel: &CancellationToken,
    ) -> NavResult<()> {
        self.animator
            .rotate_view(&**lease, operation.heading(), self.config.rotation_duration(), cancel)
            .await?;

        if let Some(pitch) = operation.pitch() {
            lease.set_pov(PovUpdate {
                heading: None,
                pitch: Some(pitch),
            });
        }
        if let Some(zoom) = operation.zoom() {
            lease.set_zoom(zoom);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PanoramaCache;
    use crate::config::{CacheConfig, TransitionConfig};
    use crate::provider::InMemoryPanoramaProvider;
    use crate::types::PanoramaMetadata;
    use crate::view::{HeadlessView, ViewHandle};
    use std::time::Duration;

    fn build(view: Arc<HeadlessView>) -> OperationQueue {
        build_with(view, QueueConfig::default())
    }

    fn build_with(view: Arc<HeadlessView>, config: QueueConfig) -> OperationQueue {
        let provider = Arc::new(InMemoryPanoramaProvider::new(
            [("P1", 51.5007, -0.1246), ("P2", 51.5014, -0.1419)]
                .iter()
                .map(|(id, lat, lng)| PanoramaMetadata {
                    pano_id: id.to_string(),
                    position: Some(LatLng { lat: *lat, lng: *lng }),
                    ..Default::default()
                }),
        ));
        let cache = Arc::new(PanoramaCache::new(provider, &CacheConfig::default()));
        let shared = SharedView::new(view);
        let animator = RotationAnimator::default();
        let controller = Arc::new(TransitionController::new(
            shared.clone(),
            cache,
            animator.clone(),
            TransitionConfig::default(),
        ));
        OperationQueue::new(shared, controller, animator, config)
    }

    #[test]
    fn test_operation_builders() {
        let op = QueuedOperation::panorama("P2", 180.0)
            .with_pitch(-5.0)
            .with_zoom(2.0);
        assert_eq!(op.kind(), OperationKind::Panorama);
        assert_eq!(op.target_panorama_id(), Some("P2"));
        assert_eq!(op.pitch(), Some(-5.0));
        assert_eq!(op.zoom(), Some(2.0));

        let view = QueuedOperation::view(90.0);
        assert_eq!(view.kind(), OperationKind::View);
        assert_eq!(view.target_panorama_id(), None);
        assert!(view.enqueued_at() <= Utc::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_operation_applies_pitch_and_zoom() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let queue = build(view.clone());

        queue.enqueue(QueuedOperation::view(90.0).with_pitch(10.0).with_zoom(3.0));
        queue.wait_until_idle().await;

        assert_eq!(view.heading(), 90.0);
        assert_eq!(view.pitch(), 10.0);
        assert_eq!(view.zoom(), 3.0);
        assert_eq!(view.swap_requests(), 0);
        assert!(queue.status().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequences_are_monotonic() {
        let view = Arc::new(HeadlessView::new(None));
        let queue = build(view);
        let a = queue.enqueue(QueuedOperation::view(10.0));
        let b = queue.enqueue(QueuedOperation::view(20.0));
        assert!(b > a);
        assert_eq!(queue.len(), 2);
        assert!(queue.is_processing());
        queue.wait_until_idle().await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_keeps_in_flight_operation() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let queue = build(view.clone());
        let mut events = queue.subscribe_events();

        queue.enqueue(QueuedOperation::view(90.0));
        queue.enqueue(QueuedOperation::view(180.0));
        queue.enqueue(QueuedOperation::view(270.0));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(queue.clear(), 3);

        queue.wait_until_idle().await;
        assert_eq!(view.heading(), 90.0);

        let mut completed = 0;
        let mut cleared = false;
        while let Ok(event) = events.try_recv() {
            match event {
                NavigationEvent::OperationCompleted { .. } => completed += 1,
                NavigationEvent::QueueCleared { removed } => {
                    assert_eq!(removed, 3);
                    cleared = true;
                }
                _ => {}
            }
        }
        assert_eq!(completed, 1);
        assert!(cleared);
        assert_eq!(queue.timeline().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_clear_is_not_popped() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let queue = build(view.clone());

        queue.enqueue(QueuedOperation::view(90.0));
        tokio::time::sleep(Duration::from_millis(500)).await;
        queue.clear();
        queue.enqueue(QueuedOperation::view(45.0));

        queue.wait_until_idle().await;
        assert_eq!(view.heading(), 45.0);
        assert_eq!(queue.timeline().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_current_moves_on() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let queue = build(view.clone());
        let mut events = queue.subscribe_events();

        assert!(!queue.cancel_current());
        queue.enqueue(QueuedOperation::view(180.0));
        queue.enqueue(QueuedOperation::panorama("P2", 0.0));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(queue.cancel_current());
        queue.wait_until_idle().await;

        assert_eq!(view.active_panorama_id().as_deref(), Some("P2"));
        let timeline = queue.timeline();
        let outcomes: Vec<TimelineOutcome> = timeline.entries().map(|e| e.outcome).collect();
        assert_eq!(
            outcomes,
            vec![TimelineOutcome::Cancelled, TimelineOutcome::Completed]
        );

        let mut saw_cancel = false;
        while let Ok(event) = events.try_recv() {
            if let NavigationEvent::OperationFailed { error, .. } = event {
                assert_eq!(error, NavError::Cancelled);
                saw_cancel = true;
            }
        }
        assert!(saw_cancel);
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_waits_for_view_lease() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let queue = build(view.clone());
        let mut events = queue.subscribe_events();

        let lease = queue.inner.view.try_acquire().unwrap();
        queue.enqueue(QueuedOperation::view(90.0));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(queue.is_processing());
        assert!(events.try_recv().is_err());

        drop(lease);
        queue.wait_until_idle().await;

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                NavigationEvent::OperationStarted { .. } => kinds.push("started"),
                NavigationEvent::OperationCompleted { .. } => kinds.push("completed"),
                _ => {}
            }
        }
        assert_eq!(kinds, vec!["started", "completed"]);
        assert_eq!(view.heading(), 90.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_lease_never_starts() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let queue = build(view.clone());
        let mut events = queue.subscribe_events();

        let lease = queue.inner.view.try_acquire().unwrap();
        queue.enqueue(QueuedOperation::view(90.0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(queue.cancel_current());
        queue.wait_until_idle().await;
        drop(lease);

        let mut started = false;
        let mut cancelled = false;
        while let Ok(event) = events.try_recv() {
            match event {
                NavigationEvent::OperationStarted { .. } => started = true,
                NavigationEvent::OperationFailed { error, .. } => {
                    cancelled = error == NavError::Cancelled
                }
                _ => {}
            }
        }
        assert!(!started);
        assert!(cancelled);
        assert_eq!(view.heading(), 0.0);
        assert_eq!(
            queue.timeline().last().map(|e| e.outcome),
            Some(TimelineOutcome::Cancelled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_event_skips_lagged_backlog() {
        let view = Arc::new(HeadlessView::new(None));
        let queue = build_with(
            view,
            QueueConfig {
                event_capacity: 1,
                ..Default::default()
            },
        );
        let mut events = queue.subscribe_events();

        queue.clear();
        queue.clear();

        assert_eq!(
            next_event(&mut events).await,
            Some(NavigationEvent::QueueCleared { removed: 0 })
        );

        drop(queue);
        assert_eq!(next_event(&mut events).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeline_tracks_exploration_metrics() {
        let view = Arc::new(HeadlessView::new(Some("P1".to_string())));
        let queue = build(view);

        queue.enqueue(QueuedOperation::panorama("P2", 0.0));
        queue.enqueue(QueuedOperation::panorama("P1", 90.0));
        queue.enqueue(QueuedOperation::panorama("missing", 0.0));
        queue.wait_until_idle().await;

        let timeline = queue.timeline();
        let metrics = timeline.metrics();
        assert_eq!(metrics.total_actions, 3);
        let bounds = metrics.bounds.unwrap();
        assert_eq!(bounds.min_lat, 51.5007);
        assert_eq!(bounds.max_lat, 51.5014);
        assert_eq!(bounds.min_lng, -0.1419);
        assert_eq!(bounds.max_lng, -0.1246);

        let positions: Vec<Option<LatLng>> = timeline.entries().map(|e| e.position).collect();
        assert_eq!(positions[0], Some(LatLng { lat: 51.5014, lng: -0.1419 }));
        // A failed move leaves the view where it was
        assert_eq!(positions[2], Some(LatLng { lat: 51.5007, lng: -0.1246 }));
    }
}
