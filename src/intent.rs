//! Analysis results to queued operations
//!
//! The external analysis collaborator decides where to look next; this
//! module turns its answer into something the queue can run.

use serde::{Deserialize, Serialize};

use crate::error::{NavError, NavResult};
use crate::queue::QueuedOperation;

/// Next step requested by the analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    NewPanorama,
    NewView,
    Complete,
}

/// One analysis answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub thoughts: String,
    #[serde(default)]
    pub goal_response: String,
    #[serde(default)]
    pub important_notes: Vec<String>,
    pub next_action: NextAction,
    #[serde(default)]
    pub next_panorama: Option<String>,
    #[serde(default)]
    pub next_heading: Option<f64>,
    #[serde(default)]
    pub next_pitch: Option<f64>,
    #[serde(default)]
    pub next_zoom: Option<f64>,
}

impl AnalysisResult {
    pub fn is_complete(&self) -> bool {
        self.next_action == NextAction::Complete
    }

    /// Map to a queued operation. `Ok(None)` when the analysis is complete.
    pub fn to_operation(&self) -> NavResult<Option<QueuedOperation>> {
        let operation = match self.next_action {
            NextAction::Complete => return Ok(None),
            NextAction::NewPanorama => {
                let (Some(panorama), Some(heading)) =
                    (self.next_panorama.as_deref(), self.next_heading)
                else {
                    return Err(NavError::InvalidOperation(
                        "new_panorama requires next_panorama and next_heading".to_string(),
                    ));
                };
                QueuedOperation::panorama(panorama, heading)
            }
            NextAction::NewView => {
                let Some(heading) = self.next_heading else {
                    return Err(NavError::InvalidOperation(
                        "new_view requires next_heading".to_string(),
                    ));
                };
                QueuedOperation::view(heading)
            }
        };

        let operation = match self.next_pitch {
            Some(pitch) => operation.with_pitch(pitch),
            None => operation,
        };
        Ok(Some(match self.next_zoom {
            Some(zoom) => operation.with_zoom(zoom),
            None => operation,
        }))
    }
}
