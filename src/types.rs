//! Panorama and point-of-view types shared across the navigation core

use serde::{Deserialize, Serialize};

/// Geographic position of a panorama
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Link from one panorama to an adjacent one, as reported by the provider.
/// Providers may omit the target or heading of a link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanoramaLink {
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Metadata of a single panorama fetched from the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanoramaMetadata {
    pub pano_id: String,
    #[serde(default)]
    pub position: Option<LatLng>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub links: Vec<PanoramaLink>,
    #[serde(default)]
    pub copyright: String,
    #[serde(default)]
    pub image_date: String,
}

impl PanoramaMetadata {
    /// Check the metadata is usable as a transition target
    pub fn validate(&self) -> Result<(), String> {
        if self.pano_id.trim().is_empty() {
            return Err("metadata has no panorama id".to_string());
        }
        Ok(())
    }

    /// Links with both a target id and a heading
    pub fn connected(&self) -> Vec<ConnectedPanorama> {
        self.links
            .iter()
            .filter_map(|link| match (&link.target_id, link.heading) {
                (Some(target), Some(heading)) => Some(ConnectedPanorama {
                    pano_id: target.clone(),
                    heading,
                    description: link.description.clone().unwrap_or_default(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// An adjacent panorama reachable from the current one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPanorama {
    pub pano_id: String,
    pub heading: f64,
    pub description: String,
}

/// Point of view: heading (compass degrees), pitch, zoom
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pov {
    pub heading: f64,
    pub pitch: f64,
    pub zoom: f64,
}

/// Partial point-of-view update. `None` leaves the component unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PovUpdate {
    pub heading: Option<f64>,
    pub pitch: Option<f64>,
}

impl PovUpdate {
    pub fn heading(heading: f64) -> Self {
        Self {
            heading: Some(heading),
            pitch: None,
        }
    }

    pub fn new(heading: f64, pitch: f64) -> Self {
        Self {
            heading: Some(heading),
            pitch: Some(pitch),
        }
    }
}
