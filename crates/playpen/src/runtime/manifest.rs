//! Runtime manifest
//!
//! The manifest sits next to the runtime module under the base path and tells
//! the loader which file to compile and what its exports are called.

use std::path::{Path, PathBuf};

use config::{Config as ConfigBuilder, File, FileFormat};
use serde::Deserialize;

use crate::bridge::LoadError;

/// Module file and export names of a WebAssembly runtime
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeManifest {
    /// Module file, relative to the base path (binary or text format)
    pub module: PathBuf,

    pub exports: ExportNames,
}

impl Default for RuntimeManifest {
    fn default() -> Self {
        Self {
            module: PathBuf::from("runtime.wasm"),
            exports: ExportNames::default(),
        }
    }
}

/// Names under which the module exports the runtime ABI
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExportNames {
    pub execute: String,
    pub reset: String,
    pub alloc: String,
    pub memory: String,

    /// Called with the input buffer after each execution
    pub dealloc: Option<String>,

    /// Called once after instantiation
    pub entry: Option<String>,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            execute: "execute".to_string(),
            reset: "reset".to_string(),
            alloc: "alloc".to_string(),
            memory: "memory".to_string(),
            dealloc: None,
            entry: None,
        }
    }
}

impl RuntimeManifest {
    /// Load a manifest from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let invalid = |e: config::ConfigError| LoadError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        ConfigBuilder::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()
            .map_err(invalid)?
            .try_deserialize()
            .map_err(invalid)
    }
}
