//! Talks to the external display configuration tool of wayland sessions.
//!
//! The tool applies the configuration of one output per call
//! (`set <uuid> <enabled> <x> <y> <width> <height> <refresh in mHz> <transform>`) and reports
//! every output as json (`list`).
use std::{
    path::PathBuf,
    process::{Command, Output},
};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    config,
    topology::{monitor::device_name, orientation, Geometry, Mode},
};

use super::{ApplyError, OutputConfig, OutputInfo, TopologyApplier};

const MODE_FLAG_CURRENT: i32 = 1 << 0;
const MODE_FLAG_PREFERRED: i32 = 1 << 1;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Couldn't run '{}': {source}", .program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("'{}' failed: {output}", .program.display())]
    Failed { program: PathBuf, output: String },

    #[error("Couldn't parse the output report: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WlOutputTool {
    program: PathBuf,
    set_args: Vec<String>,
    list_args: Vec<String>,
}

impl WlOutputTool {
    pub fn from_config(config: &config::Apply) -> Self {
        Self {
            program: config.program.clone(),
            set_args: config.set_args.clone(),
            list_args: config.list_args.clone(),
        }
    }

    pub fn command_args(&self, output: &OutputConfig) -> Vec<String> {
        let refresh_mhz = (output.mode.refresh_rate * 1000.0).round() as i32;
        let transform = orientation::to_external(output.rotation).code();

        let mut args = self.set_args.clone();
        args.extend([
            output.durable_id.clone(),
            u8::from(output.enabled).to_string(),
            output.x.to_string(),
            output.y.to_string(),
            output.mode.width.to_string(),
            output.mode.height.to_string(),
            refresh_mhz.to_string(),
            transform.to_string(),
        ]);
        args
    }

    pub fn list_outputs(&self) -> Result<Vec<OutputInfo>, Error> {
        let output = self.run(&self.list_args)?;
        if !output.status.success() {
            return Err(Error::Failed {
                program: self.program.clone(),
                output: combined_output(&output),
            });
        }

        parse_output_list(&String::from_utf8_lossy(&output.stdout))
    }

    fn run(&self, args: &[String]) -> Result<Output, Error> {
        debug!("Run {} {}", self.program.display(), args.join(" "));

        Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| Error::Spawn {
                program: self.program.clone(),
                source,
            })
    }
}

impl TopologyApplier for WlOutputTool {
    fn apply(&self, output: &OutputConfig) -> Result<(), ApplyError> {
        let rejected = |reason: String| ApplyError {
            durable_id: output.durable_id.clone(),
            reason,
        };

        let result = self
            .run(&self.command_args(output))
            .map_err(|err| rejected(err.to_string()))?;

        if !result.status.success() {
            let reason = format!("{} ({})", combined_output(&result), result.status);
            warn!("{}: {}", self.program.display(), reason);
            return Err(rejected(reason));
        }

        Ok(())
    }
}

fn combined_output(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined.trim().to_owned()
}

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(rename = "OutputInfo", default)]
    outputs: Vec<ReportedOutput>,
}

#[derive(Debug, Deserialize)]
struct ReportedOutput {
    uuid: String,
    #[serde(default)]
    enabled: i32,
    #[serde(default)]
    x: i32,
    #[serde(default)]
    y: i32,
    #[serde(default)]
    width: i32,
    #[serde(default)]
    height: i32,
    #[serde(default)]
    manufacturer: String,
    #[serde(default)]
    model: String,
    #[serde(rename = "ModeInfo", default)]
    modes: Vec<ReportedMode>,
    #[serde(default)]
    transform: i32,
}

#[derive(Debug, Deserialize)]
struct ReportedMode {
    width: i32,
    height: i32,
    /// In mHz.
    #[serde(default)]
    refresh_rate: i32,
    #[serde(default)]
    flags: i32,
}

impl From<&ReportedMode> for Mode {
    fn from(mode: &ReportedMode) -> Self {
        Self {
            width: clamp_dimension(mode.width),
            height: clamp_dimension(mode.height),
            refresh_rate: f64::from(mode.refresh_rate) / 1000.0,
            is_preferred: mode.flags & MODE_FLAG_PREFERRED != 0,
            is_current: mode.flags & MODE_FLAG_CURRENT != 0,
        }
    }
}

impl From<ReportedOutput> for OutputInfo {
    fn from(output: ReportedOutput) -> Self {
        let geometry = if output.enabled != 0 {
            Geometry::new(
                output.x,
                output.y,
                clamp_dimension(output.width),
                clamp_dimension(output.height),
            )
        } else {
            Geometry::default()
        };

        Self {
            name: device_name(&output.model, &output.manufacturer),
            geometry,
            rotation: orientation::to_internal(output.transform),
            connected: true,
            modes: output.modes.iter().map(Mode::from).collect(),
            durable_id: output.uuid,
        }
    }
}

fn clamp_dimension(value: i32) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

pub fn parse_output_list(json: &str) -> Result<Vec<OutputInfo>, Error> {
    let report: Report = serde_json::from_str(json)?;
    Ok(report.outputs.into_iter().map(OutputInfo::from).collect())
}
