//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Declarative parameter tables and value coercion for policy modules."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Parameter tables.
//!
//! Every policy module declares a static table of [`ParamSpec`] entries. Raw
//! configuration values are coerced against that table once per `configure`;
//! values that are missing or cannot be coerced fall back to the declared
//! default and are logged. Keys the table does not mention pass through
//! untouched so `get_config` still reports them.

use eo_common::config::ModuleParams;
use serde_json::{Number, Value};
use tracing::warn;

use crate::error::PluginError;

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    Float,
    Text,
    Structured,
}

/// Default value of a parameter. Structured defaults are JSON text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
    Structured(&'static str),
}

impl ParamDefault {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamDefault::Bool(_) => ParamKind::Bool,
            ParamDefault::Int(_) => ParamKind::Int,
            ParamDefault::Float(_) => ParamKind::Float,
            ParamDefault::Text(_) => ParamKind::Text,
            ParamDefault::Structured(_) => ParamKind::Structured,
        }
    }

    pub fn to_value(&self) -> Value {
        match *self {
            ParamDefault::Bool(value) => Value::Bool(value),
            ParamDefault::Int(value) => Value::from(value),
            ParamDefault::Float(value) => float_value(value),
            ParamDefault::Text(value) => Value::String(value.to_owned()),
            ParamDefault::Structured(text) => serde_json::from_str(text).unwrap_or(Value::Null),
        }
    }
}

/// One row of a module's parameter table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: ParamDefault,
}

impl ParamSpec {
    pub const fn new(name: &'static str, default: ParamDefault) -> Self {
        Self { name, default }
    }

    pub fn kind(&self) -> ParamKind {
        self.default.kind()
    }
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Coerce `value` to `kind`, or `None` when it cannot be represented.
pub fn coerce(value: &Value, kind: ParamKind) -> Option<Value> {
    match kind {
        ParamKind::Bool => match value {
            Value::Bool(flag) => Some(Value::Bool(*flag)),
            Value::Number(number) => match number.as_i64() {
                Some(1) => Some(Value::Bool(true)),
                Some(0) => Some(Value::Bool(false)),
                _ => None,
            },
            Value::String(text) => parse_bool(text).map(Value::Bool),
            _ => None,
        },
        ParamKind::Int => match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|f| f.trunc() as i64))
                .map(Value::from),
            Value::String(text) => {
                let text = text.trim();
                text.parse::<i64>()
                    .ok()
                    .or_else(|| {
                        text.parse::<f64>()
                            .ok()
                            .filter(|f| f.is_finite())
                            .map(|f| f.trunc() as i64)
                    })
                    .map(Value::from)
            }
            _ => None,
        },
        ParamKind::Float => match value {
            Value::Number(number) => number.as_f64().map(float_value),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(float_value),
            _ => None,
        },
        ParamKind::Text => match value {
            Value::String(text) => Some(Value::String(text.clone())),
            Value::Number(number) => Some(Value::String(number.to_string())),
            Value::Bool(flag) => Some(Value::String(flag.to_string())),
            _ => None,
        },
        ParamKind::Structured => match value {
            Value::Array(_) | Value::Object(_) => Some(value.clone()),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(parsed @ (Value::Array(_) | Value::Object(_))) => Some(parsed),
                _ => None,
            },
            _ => None,
        },
    }
}

/// Coerce a raw table against `specs`, logging each fallback to a default.
pub fn resolve(module: &'static str, specs: &[ParamSpec], raw: &ModuleParams) -> ResolvedParams {
    let mut values = raw.clone();
    for spec in specs {
        let resolved = match raw.get(spec.name) {
            Some(value) => match coerce(value, spec.kind()) {
                Some(coerced) => coerced,
                None => {
                    warn!(module, param = spec.name, value = %value, expected = ?spec.kind(), "parameter has wrong type, using default");
                    spec.default.to_value()
                }
            },
            None => {
                warn!(module, param = spec.name, "parameter not set, using default");
                spec.default.to_value()
            }
        };
        values.insert(spec.name.to_owned(), resolved);
    }
    ResolvedParams { module, values }
}

/// Parameters after coercion.
///
/// Modules turn this into their own typed configuration inside `configure`.
/// The typed getters fail on a key the table never declared, so a misspelt
/// name is rejected at load time instead of reading as zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParams {
    module: &'static str,
    values: ModuleParams,
}

impl ResolvedParams {
    pub fn module(&self) -> &'static str {
        self.module
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn typed<'a, T>(
        &'a self,
        key: &'static str,
        expected: &str,
        read: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<T, PluginError> {
        let value = self.values.get(key).ok_or_else(|| PluginError::InvalidParameter {
            module: self.module,
            param: key,
            reason: "not declared by the module".to_owned(),
        })?;
        read(value).ok_or_else(|| PluginError::InvalidParameter {
            module: self.module,
            param: key,
            reason: format!("expected {}, found {}", expected, value),
        })
    }

    pub fn bool(&self, key: &'static str) -> Result<bool, PluginError> {
        self.typed(key, "a boolean", Value::as_bool)
    }

    pub fn int(&self, key: &'static str) -> Result<i64, PluginError> {
        self.typed(key, "an integer", Value::as_i64)
    }

    pub fn float(&self, key: &'static str) -> Result<f64, PluginError> {
        self.typed(key, "a number", Value::as_f64)
    }

    pub fn text(&self, key: &'static str) -> Result<&str, PluginError> {
        self.typed(key, "text", Value::as_str)
    }

    /// Integer parameter that must fit `T`, e.g. amps as `i32` or a cadence as `u64`.
    pub fn int_as<T: TryFrom<i64>>(&self, key: &'static str) -> Result<T, PluginError> {
        let value = self.int(key)?;
        T::try_from(value).map_err(|_| PluginError::InvalidParameter {
            module: self.module,
            param: key,
            reason: format!("{} is out of range", value),
        })
    }

    pub fn as_map(&self) -> &ModuleParams {
        &self.values
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

/// Table rows every module may carry. Each module declares its own `enabled`
/// default; the cadence defaults to polling every cycle.
pub const POLL_CADENCE: ParamSpec = ParamSpec::new("poll_cadence", ParamDefault::Int(1));

/// Settings the scheduler reads from every module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleSettings {
    pub enabled: bool,
    /// Poll every N cycles; 0 never polls.
    pub poll_cadence: u64,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_cadence: 1,
        }
    }
}

impl ModuleSettings {
    pub fn from_params(params: &ResolvedParams) -> Result<Self, PluginError> {
        Ok(Self {
            enabled: params.bool("enabled")?,
            poll_cadence: params.int_as("poll_cadence")?,
        })
    }
}
