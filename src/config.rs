//! Configuration loading and worker parameter handling.
//!
//! A pipeline configuration is a `[global]` parameter table plus an ordered
//! list of `[[worker]]` declarations:
//!
//! ```toml
//! [global]
//! sample_rate = 16000
//!
//! [[worker]]
//! kind = "file_stream"
//! to = "vad"
//! [worker.params]
//! path = "audio/session.wav"
//!
//! [[worker]]
//! kind = "vad"
//! to = ["asr", "recording"]
//! ```
//!
//! Worker parameters are free-form tagged values; each worker declares the
//! keys it recognizes and applies its own defaults for absent ones. Global
//! parameters are visible to every worker unless shadowed by a local
//! parameter of the same name.

use crate::error::{Result, VoxflowError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A dynamically typed worker parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ParamValue>> {
        match self {
            ParamValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }
}

/// An ordered parameter mapping.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// One worker declaration from the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerDecl {
    /// Registered worker kind (selects the builder).
    pub kind: String,
    /// Instance name; defaults to the kind.
    #[serde(default)]
    pub name: Option<String>,
    /// Downstream worker names; a single name or a list.
    #[serde(default, deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    /// Worker-local parameters.
    #[serde(default)]
    pub params: ParamMap,
}

impl WorkerDecl {
    /// Effective instance name.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(name) => vec![name],
        OneOrMany::Many(names) => names,
    })
}

/// Full pipeline configuration as loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    /// Parameters visible to all workers unless shadowed locally.
    #[serde(default)]
    pub global: ParamMap,
    /// Ordered worker declarations.
    #[serde(default, rename = "worker")]
    pub workers: Vec<WorkerDecl>,
}

impl PipelineConfig {
    /// Loads a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(VoxflowError::ConfigFileNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parses a configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// Per-worker view of local and global parameters.
///
/// Lookup order matches the original semantics: worker-local values shadow
/// globals; a `Null` value counts as absent so worker defaults apply.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedParams<'a> {
    worker: &'a str,
    local: &'a ParamMap,
    global: &'a ParamMap,
}

impl<'a> ResolvedParams<'a> {
    pub fn new(worker: &'a str, local: &'a ParamMap, global: &'a ParamMap) -> Self {
        Self {
            worker,
            local,
            global,
        }
    }

    /// Name of the worker these parameters belong to (used in error paths).
    pub fn worker(&self) -> &str {
        self.worker
    }

    /// Raw lookup, local first.
    pub fn get(&self, key: &str) -> Option<&'a ParamValue> {
        self.local
            .get(key)
            .or_else(|| self.global.get(key))
            .filter(|v| !v.is_null())
    }

    fn invalid(&self, key: &str, message: impl Into<String>) -> VoxflowError {
        VoxflowError::ConfigInvalidValue {
            worker: self.worker.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Optional string parameter.
    pub fn opt_str(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| self.invalid(key, "expected a string")),
        }
    }

    /// String parameter with a default.
    pub fn str_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.opt_str(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// Boolean parameter with a default.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_bool()
                .ok_or_else(|| self.invalid(key, "expected a boolean")),
        }
    }

    /// Float parameter with a default; integers are accepted.
    pub fn f32_or(&self, key: &str, default: f32) -> Result<f32> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| self.invalid(key, "expected a number")),
        }
    }

    /// Non-negative integer parameter with a default.
    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.as_i64() {
                Some(i) if i >= 0 => Ok(i as usize),
                Some(_) => Err(self.invalid(key, "expected a non-negative integer")),
                None => Err(self.invalid(key, "expected an integer")),
            },
        }
    }

    /// Unsigned 64-bit parameter with a default.
    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.as_i64() {
                Some(i) if i >= 0 => Ok(i as u64),
                Some(_) => Err(self.invalid(key, "expected a non-negative integer")),
                None => Err(self.invalid(key, "expected an integer")),
            },
        }
    }

    /// Port parameter with a default.
    pub fn port_or(&self, key: &str, default: u16) -> Result<u16> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.as_i64() {
                Some(i) if (0..=u16::MAX as i64).contains(&i) => Ok(i as u16),
                _ => Err(self.invalid(key, "expected a port number (0-65535)")),
            },
        }
    }

    /// Nested mapping parameter; absent means empty.
    pub fn map_or_empty(&self, key: &str) -> Result<ParamMap> {
        match self.get(key) {
            None => Ok(ParamMap::new()),
            Some(v) => v
                .as_map()
                .cloned()
                .ok_or_else(|| self.invalid(key, "expected a table")),
        }
    }
}
