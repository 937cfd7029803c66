//! Building identity and the desired-state snapshot published by the control backend.

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::zone::Zone;

/// Validate a building identifier.
///
/// Ids end up in stream URLs and log lines, so they are restricted to
/// `^[A-Za-z0-9_.-]{1,64}$`.
pub fn validate_building_id(building_id: &str) -> Result<()> {
    static BUILDING_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = BUILDING_ID_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").expect("static regex"));
    if !re.is_match(building_id) {
        return Err(anyhow!(
            "building id {:?} must match ^[A-Za-z0-9_.-]{{1,64}}$",
            building_id
        ));
    }
    Ok(())
}

/// Per-building configuration as declared by the control backend.
///
/// Treated as immutable input for the lifetime of one worker.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildingConfig {
    pub id: String,
    /// Video reference, relative to the configured video directory.
    pub video_path: Option<String>,
    /// Crossing zone. `None` means "derive the default zone from the frame size".
    pub roi: Option<Zone>,
    pub is_running: bool,
    /// Declared doorway direction. Carried for operators; counting ignores it.
    pub direction: Option<String>,
    /// Every other key the backend sends (calibration size, last counts, ...).
    pub metadata: Map<String, Value>,
}

impl BuildingConfig {
    pub fn new(id: &str, video_path: &str) -> Self {
        Self {
            id: id.to_string(),
            video_path: Some(video_path.to_string()),
            roi: None,
            is_running: true,
            direction: None,
            metadata: Map::new(),
        }
    }

    pub fn with_running(mut self, is_running: bool) -> Self {
        self.is_running = is_running;
        self
    }

    /// Parse one entry of the control document.
    pub fn from_json(id: &str, value: &Value) -> Result<Self> {
        validate_building_id(id)?;
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow!("building {} entry is not an object", id))?;

        let mut metadata = obj.clone();
        let video_path = take_string(&mut metadata, "video_path");
        let direction = take_string(&mut metadata, "direction");
        let roi = metadata.remove("roi").as_ref().and_then(Zone::from_json);
        let is_running = metadata
            .remove("is_running")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        metadata.remove("building_id");

        Ok(Self {
            id: id.to_string(),
            video_path,
            roi,
            is_running,
            direction,
            metadata,
        })
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

/// Desired state of every building known to the control backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControlSnapshot {
    buildings: BTreeMap<String, BuildingConfig>,
}

impl ControlSnapshot {
    pub fn new(buildings: impl IntoIterator<Item = BuildingConfig>) -> Self {
        Self {
            buildings: buildings.into_iter().map(|b| (b.id.clone(), b)).collect(),
        }
    }

    /// Parse the backend's `{"buildings": {...}}` document.
    ///
    /// Absent or malformed documents mean "no buildings desired". Individual
    /// malformed entries are skipped.
    pub fn from_json(bytes: &[u8]) -> Self {
        let doc: Value = match serde_json::from_slice(bytes) {
            Ok(doc) => doc,
            Err(err) => {
                log::warn!("control document is not valid JSON: {}", err);
                return Self::default();
            }
        };
        let Some(entries) = doc.get("buildings").and_then(|b| b.as_object()) else {
            log::warn!("control document has no buildings object");
            return Self::default();
        };

        let mut buildings = BTreeMap::new();
        for (id, value) in entries {
            match BuildingConfig::from_json(id, value) {
                Ok(cfg) => {
                    buildings.insert(id.clone(), cfg);
                }
                Err(err) => log::warn!("skipping control entry: {}", err),
            }
        }
        Self { buildings }
    }

    pub fn get(&self, building_id: &str) -> Option<&BuildingConfig> {
        self.buildings.get(building_id)
    }

    /// True when the building is present and declared running.
    pub fn wants_running(&self, building_id: &str) -> bool {
        self.get(building_id).is_some_and(|b| b.is_running)
    }

    /// Buildings declared running, in id order.
    pub fn desired_running(&self) -> impl Iterator<Item = &BuildingConfig> {
        self.buildings.values().filter(|b| b.is_running)
    }

    pub fn len(&self) -> usize {
        self.buildings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
    }
}
