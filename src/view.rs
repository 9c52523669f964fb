//! Shared view handle and its ownership token
//!
//! Exactly one externally-owned panoramic view exists per process. The
//! navigation core never touches it directly: the view is wrapped in a
//! [`SharedView`], and every mutation goes through a [`ViewLease`] obtained
//! from it. Holding the lease is the single "busy" state of the whole
//! navigation subsystem, covering both queue dispatch and transitions.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::types::{Pov, PovUpdate};

/// Observable state of the view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSnapshot {
    pub panorama_id: Option<String>,
    pub pov: Pov,
    pub controls_enabled: bool,
}

/// Contract of the external panoramic view.
///
/// Implementations must be cheap to call; every method is synchronous and
/// is invoked once per animation frame during rotations.
pub trait ViewHandle: Send + Sync {
    fn heading(&self) -> f64;
    fn pitch(&self) -> f64;
    fn zoom(&self) -> f64;

    fn set_pov(&self, update: PovUpdate);
    fn set_zoom(&self, zoom: f64);

    fn active_panorama_id(&self) -> Option<String>;

    /// Request a panorama swap. The view reports the new id through
    /// `active_panorama_id` once the swap has taken effect.
    fn set_active_panorama_id(&self, panorama_id: &str);

    fn set_interactive_controls_enabled(&self, enabled: bool);
    fn interactive_controls_enabled(&self) -> bool;

    /// Change notifications for heading, position and zoom
    fn subscribe(&self) -> watch::Receiver<ViewSnapshot>;

    fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            panorama_id: self.active_panorama_id(),
            pov: Pov {
                heading: self.heading(),
                pitch: self.pitch(),
                zoom: self.zoom(),
            },
            controls_enabled: self.interactive_controls_enabled(),
        }
    }
}

// =============================================================================
// SHARED VIEW + LEASE
// =============================================================================

/// Process-wide wrapper around the single view handle
#[derive(Clone)]
pub struct SharedView {
    handle: Arc<dyn ViewHandle>,
    lock: Arc<Mutex<()>>,
}

/// Exclusive right to mutate the view. Released on drop.
pub struct ViewLease {
    handle: Arc<dyn ViewHandle>,
    _guard: OwnedMutexGuard<()>,
}

impl SharedView {
    pub fn new(handle: Arc<dyn ViewHandle>) -> Self {
        Self {
            handle,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Take the lease if nobody holds it
    pub fn try_acquire(&self) -> Option<ViewLease> {
        let guard = self.lock.clone().try_lock_owned().ok()?;
        Some(ViewLease {
            handle: self.handle.clone(),
            _guard: guard,
        })
    }

    /// Wait until the lease is free, then take it
    pub async fn acquire(&self) -> ViewLease {
        let guard = self.lock.clone().lock_owned().await;
        ViewLease {
            handle: self.handle.clone(),
            _guard: guard,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Read-only view state; does not require the lease
    pub fn snapshot(&self) -> ViewSnapshot {
        self.handle.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.handle.subscribe()
    }
}

impl Deref for ViewLease {
    type Target = dyn ViewHandle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref()
    }
}

// =============================================================================
// HEADLESS VIEW
// =============================================================================

/// In-memory view used by the CLI and tests.
///
/// Panorama swaps take effect after `swap_delay` (immediately when zero).
/// Refused panorama ids are never reported as active, which simulates a
/// view that fails to load a target.
pub struct HeadlessView {
    state: Arc<watch::Sender<ViewSnapshot>>,
    swap_delay: Duration,
    refused: HashSet<String>,
    swap_requests: AtomicUsize,
    pov_updates: AtomicUsize,
}

impl HeadlessView {
    pub fn new(initial_panorama: Option<String>) -> Self {
        let snapshot = ViewSnapshot {
            panorama_id: initial_panorama,
            pov: Pov {
                heading: 0.0,
                pitch: 0.0,
                zoom: 1.0,
            },
            controls_enabled: true,
        };
        let (tx, _rx) = watch::channel(snapshot);
        Self {
            state: Arc::new(tx),
            swap_delay: Duration::ZERO,
            refused: HashSet::new(),
            swap_requests: AtomicUsize::new(0),
            pov_updates: AtomicUsize::new(0),
        }
    }

    pub fn with_heading(self, heading: f64) -> Self {
        self.state.send_modify(|s| s.pov.heading = heading);
        self
    }

    pub fn with_swap_delay(mut self, delay: Duration) -> Self {
        self.swap_delay = delay;
        self
    }

    /// Never activate this panorama id
    pub fn refuse_panorama(mut self, panorama_id: impl Into<String>) -> Self {
        self.refused.insert(panorama_id.into());
        self
    }

    /// Number of `set_active_panorama_id` calls so far
    pub fn swap_requests(&self) -> usize {
        self.swap_requests.load(Ordering::SeqCst)
    }

    /// Number of `set_pov` calls so far
    pub fn pov_updates(&self) -> usize {
        self.pov_updates.load(Ordering::SeqCst)
    }
}

impl ViewHandle for HeadlessView {
    fn heading(&self) -> f64 {
        self.state.borrow().pov.heading
    }

    fn pitch(&self) -> f64 {
        self.state.borrow().pov.pitch
    }

    fn zoom(&self) -> f64 {
        self.state.borrow().pov.zoom
    }

    fn set_pov(&self, update: PovUpdate) {
        self.pov_updates.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|s| {
            if let Some(heading) = update.heading {
                s.pov.heading = heading;
            }
            if let Some(pitch) = update.pitch {
                s.pov.pitch = pitch;
            }
        });
    }

    fn set_zoom(&self, zoom: f64) {
        self.state.send_modify(|s| s.pov.zoom = zoom);
    }

    fn active_panorama_id(&self) -> Option<String> {
        self.state.borrow().panorama_id.clone()
    }

    fn set_active_panorama_id(&self, panorama_id: &str) {
        self.swap_requests.fetch_add(1, Ordering::SeqCst);
        if self.refused.contains(panorama_id) {
            debug!(panorama_id, "Headless view refusing panorama");
            return;
        }

        let id = panorama_id.to_string();
        if self.swap_delay.is_zero() {
            self.state.send_modify(|s| s.panorama_id = Some(id));
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let state = self.state.clone();
                let delay = self.swap_delay;
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    state.send_modify(|s| s.panorama_id = Some(id));
                });
            }
            Err(_) => self.state.send_modify(|s| s.panorama_id = Some(id)),
        }
    }

    fn set_interactive_controls_enabled(&self, enabled: bool) {
        self.state.send_modify(|s| s.controls_enabled = enabled);
    }

    fn interactive_controls_enabled(&self) -> bool {
        self.state.borrow().controls_enabled
    }

    fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.state.subscribe()
    }
}
