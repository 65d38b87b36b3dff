//! Rekon workspace – turns a function source directory into desired documents.

#![forbid(unsafe_code)]

pub mod config;
pub mod documents;
pub mod runtime;

pub use config::{Cfg, ResourceList, Resources, Source, TriggerCfg, CONFIG_FILE};
pub use documents::{
    build_function, build_function_with, build_triggers, FUNCTION_API_VERSION, FUNCTION_KIND, TRIGGER_API_VERSION,
    TRIGGER_KIND,
};
pub use runtime::{Runtime, RuntimeFiles, RuntimeTable};
