//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Time-of-day charging windows."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::NaiveTime;
use eo_common::config::ModuleParams;
use serde_json::Value;
use tracing::warn;

use crate::error::PluginError;
use crate::params::{
    resolve, ModuleSettings, ParamDefault, ParamSpec, ResolvedParams, POLL_CADENCE,
};
use crate::plugin::{ChargePlugin, PollContext};

pub const NAME: &str = "scheduler";
const DEFAULT_WINDOW_AMPS: i64 = 32;

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new("enabled", ParamDefault::Bool(true)),
    POLL_CADENCE,
    ParamSpec::new(
        "schedule",
        ParamDefault::Structured(r#"[{"start": "2200", "end": "0400", "amps": 32}]"#),
    ),
    ParamSpec::new("scheduler_granularity", ParamDefault::Int(5)),
];

/// A daily window; `end` before `start` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub amps: i32,
}

impl ScheduleWindow {
    /// Start inclusive, end exclusive. A zero-length window is never active.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start < self.end {
            time >= self.start && time < self.end
        } else if self.end < self.start {
            time >= self.start || time < self.end
        } else {
            false
        }
    }
}

fn parse_hhmm(text: &str) -> Option<NaiveTime> {
    if text.len() != 4 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour = text[..2].parse().ok()?;
    let minute = text[2..].parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn parse_window(entry: &Value) -> Option<ScheduleWindow> {
    let start = parse_hhmm(entry.get("start")?.as_str()?)?;
    let end = parse_hhmm(entry.get("end")?.as_str()?)?;
    let amps = match entry.get("amps") {
        None => DEFAULT_WINDOW_AMPS,
        Some(Value::Number(n)) => n.as_i64()?,
        Some(Value::String(s)) => s.trim().parse().ok()?,
        Some(_) => return None,
    };
    Some(ScheduleWindow {
        start,
        end,
        amps: i32::try_from(amps).ok()?,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub settings: ModuleSettings,
    pub windows: Vec<ScheduleWindow>,
    /// Minutes between schedule slots offered to front ends.
    pub granularity_minutes: u32,
}

impl ScheduleConfig {
    fn from_params(params: &ResolvedParams) -> Result<Self, PluginError> {
        let entries = params
            .get("schedule")
            .and_then(Value::as_array)
            .ok_or_else(|| PluginError::InvalidParameter {
                module: NAME,
                param: "schedule",
                reason: "expected a list of windows".to_owned(),
            })?;
        let mut windows = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            match parse_window(entry) {
                Some(window) => windows.push(window),
                None => warn!(module = NAME, index, entry = %entry, "skipping malformed schedule window"),
            }
        }
        Ok(Self {
            settings: ModuleSettings::from_params(params)?,
            windows,
            granularity_minutes: params.int_as("scheduler_granularity")?,
        })
    }

    /// Highest amps over the windows active at `time`, 0 outside every window.
    pub fn amps_at(&self, time: NaiveTime) -> i32 {
        self.windows
            .iter()
            .filter(|window| window.contains(time))
            .map(|window| window.amps)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct TimedSchedule {
    params: ResolvedParams,
    config: ScheduleConfig,
}

impl TimedSchedule {
    pub fn new(raw: &ModuleParams) -> Result<Self, PluginError> {
        let mut module = Self::default();
        module.configure(raw)?;
        Ok(module)
    }

    pub fn windows(&self) -> &[ScheduleWindow] {
        &self.config.windows
    }

    pub fn amps_at(&self, time: NaiveTime) -> i32 {
        self.config.amps_at(time)
    }
}

impl ChargePlugin for TimedSchedule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn param_spec(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    fn configure(&mut self, raw: &ModuleParams) -> Result<(), PluginError> {
        let params = resolve(NAME, PARAMS, raw);
        self.config = ScheduleConfig::from_params(&params)?;
        self.params = params;
        Ok(())
    }

    fn params(&self) -> &ResolvedParams {
        &self.params
    }

    fn settings(&self) -> ModuleSettings {
        self.config.settings
    }

    fn poll(&mut self, ctx: &PollContext<'_>) -> Result<Option<i32>, PluginError> {
        Ok(Some(self.config.amps_at(ctx.local_time)))
    }
}
