//! `config.yaml`: what to build and how to label it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rekon_core::Labels;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use crate::runtime::Runtime;

pub const CONFIG_FILE: &str = "config.yaml";

/// Quantity map such as `{cpu: 100m, memory: 128Mi}`.
pub type ResourceList = BTreeMap<String, Json>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,
}

impl Resources {
    pub fn is_empty(&self) -> bool { self.requests.is_none() && self.limits.is_none() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default = "default_source_path")]
    pub path: PathBuf,
}

impl Default for Source {
    fn default() -> Self { Self { path: default_source_path() } }
}

fn default_source_path() -> PathBuf { PathBuf::from(".") }

/// One event subscription for the function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCfg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default = "default_event_version")]
    pub version: String,
}

fn default_event_version() -> String { "v1".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cfg {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: Labels,
    pub runtime: Runtime,
    #[serde(default)]
    pub source: Source,
    #[serde(default, skip_serializing_if = "Resources::is_empty")]
    pub resources: Resources,
    #[serde(default)]
    pub triggers: Vec<TriggerCfg>,
}

impl Cfg {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let cfg: Cfg = serde_yaml::from_str(text).context("parsing workspace config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `<dir>/config.yaml`; a relative `source.path` is resolved against `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let file = dir.join(CONFIG_FILE);
        let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
        let mut cfg = Self::from_yaml(&text).with_context(|| format!("in {}", file.display()))?;
        if cfg.source.path.is_relative() {
            cfg.source.path = dir.join(&cfg.source.path);
        }
        debug!(name = %cfg.name, runtime = %cfg.runtime, source = %cfg.source.path.display(), "workspace config loaded");
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("name must not be empty"));
        }
        for (i, t) in self.triggers.iter().enumerate() {
            if t.source.trim().is_empty() || t.event_type.trim().is_empty() {
                return Err(anyhow!("trigger #{} needs both source and type", i));
            }
        }
        Ok(())
    }
}
