//! The "logical monitor" view: what we tell configuration tooling about the outputs.
use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;

use crate::backend::{OutputConfig, OutputInfo};

use super::{
    orientation::{self, Rotation},
    Geometry, IdentityAssigner, Mode, ModeResolver, OutputId,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalMonitor {
    pub id: OutputId,
    pub durable_id: String,
    pub name: String,
    pub connected: bool,
    pub enabled: bool,
    pub geometry: Geometry,
    pub rotation: Rotation,
    /// The device transform code of `rotation`.
    pub transform: i32,
    pub current_mode: Mode,
    pub best_mode: Mode,
    /// Biggest first.
    pub modes: Vec<Mode>,
}

#[derive(Debug, Clone, Default)]
struct OutputRecord {
    durable_id: String,
    name: String,
    rotation: Rotation,
    connected: bool,
    geometry: Geometry,
    modes: Vec<Mode>,
}

/// Everything we've learned about every output we have ever seen.
#[derive(Debug, Default)]
pub struct MonitorCatalog {
    identities: IdentityAssigner,
    records: Mutex<BTreeMap<OutputId, OutputRecord>>,
}

impl MonitorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identify(&self, durable_id: &str) -> OutputId {
        self.identities.get_or_assign(durable_id)
    }

    /// An empty mode list keeps the modes we already know.
    pub fn record_output(&self, info: &OutputInfo) -> OutputId {
        let id = self.identify(&info.durable_id);

        let mut records = self.records.lock();
        let record = records.entry(id).or_default();
        record.durable_id.clone_from(&info.durable_id);
        record.name.clone_from(&info.name);
        record.rotation = info.rotation;
        record.connected = info.connected;
        record.geometry = info.geometry;
        if !info.modes.is_empty() {
            record.modes.clone_from(&info.modes);
        }

        id
    }

    pub fn record_modes(&self, durable_id: &str, modes: Vec<Mode>) -> OutputId {
        let id = self.identify(durable_id);

        let mut records = self.records.lock();
        let record = records.entry(id).or_insert_with(|| OutputRecord {
            durable_id: durable_id.to_owned(),
            name: durable_id.to_owned(),
            ..Default::default()
        });
        record.modes = modes;

        id
    }

    pub fn record_applied(&self, config: &OutputConfig) -> OutputId {
        let id = self.identify(&config.durable_id);

        let mut records = self.records.lock();
        let record = records.entry(id).or_insert_with(|| OutputRecord {
            durable_id: config.durable_id.clone(),
            name: config.durable_id.clone(),
            connected: true,
            ..Default::default()
        });
        record.rotation = config.rotation;
        record.geometry = if config.enabled {
            config.geometry()
        } else {
            Geometry::default()
        };
        for mode in &mut record.modes {
            mode.is_current = config.enabled
                && mode.width == config.mode.width
                && mode.height == config.mode.height
                && mode.refresh_rate == config.mode.refresh_rate;
        }

        id
    }

    pub fn durable_id(&self, id: OutputId) -> Option<String> {
        self.records
            .lock()
            .get(&id)
            .map(|record| record.durable_id.clone())
    }

    pub fn describe(&self) -> Vec<LogicalMonitor> {
        self.records
            .lock()
            .iter()
            .map(|(&id, record)| {
                let resolver = ModeResolver::new(&record.modes);

                LogicalMonitor {
                    id,
                    durable_id: record.durable_id.clone(),
                    name: record.name.clone(),
                    connected: record.connected,
                    enabled: record.connected && !record.geometry.is_empty(),
                    geometry: record.geometry,
                    rotation: record.rotation,
                    transform: orientation::to_external(record.rotation).code(),
                    current_mode: resolver.current_mode(),
                    best_mode: resolver.best_mode(),
                    modes: resolver.sorted_descending(),
                }
            })
            .collect()
    }
}

/// Derives a connector-like name from what an output device reports about itself.
///
/// Some devices glue the manufacturer to the model (model `eDP-1-dell`, make `dell`), others
/// append arbitrary suffixes to the connector (`HDMI-A-1-SAMSUNG-XYZ`).
pub fn device_name(model: &str, make: &str) -> String {
    let name = strip_make(model, make);
    if name != model {
        return name.to_owned();
    }

    let parts: Vec<&str> = model.split('-').collect();
    if parts.len() <= 2 {
        return model.split(' ').next().unwrap_or(model).to_owned();
    }

    // the connector ends with its first single character part (`HDMI-A-1`, `DP-1`)
    let mut end = parts.len() - 1;
    while end > 1 && parts[end].len() > 1 {
        end -= 1;
    }

    parts[..=end].join("-")
}

fn strip_make<'a>(model: &'a str, make: &str) -> &'a str {
    let make = make.split(' ').next().unwrap_or_default();
    if make.is_empty() {
        return model;
    }

    let before_make = model.split(make).next().unwrap_or(model);
    before_make.trim_end_matches('-')
}
