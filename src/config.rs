use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{FmapTargetClass, PhaseDir};
use crate::error::CurateError;

/// Raw study configuration as written in `bids-curator.json`. Unknown
/// fields are rejected so a misspelled setting fails at load time
/// instead of being silently ignored.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub project: String,
    #[serde(default)]
    pub heuristics: Option<String>,
    #[serde(default)]
    pub converter_image: Option<String>,
    #[serde(default)]
    pub qc_image: Option<String>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub directions: Option<Vec<String>>,
    #[serde(default)]
    pub target_classes: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub project: String,
    pub heuristics: Option<String>,
    pub converter_image: Option<String>,
    pub qc_image: Option<String>,
    pub overwrite: bool,
    pub directions: Vec<PhaseDir>,
    pub target_classes: Vec<FmapTargetClass>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CurateError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("bids-curator.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(CurateError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CurateError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CurateError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CurateError> {
        let directions = match config.directions {
            Some(values) => values
                .iter()
                .map(|value| value.parse())
                .collect::<Result<Vec<_>, _>>()?,
            None => default_directions(),
        };
        let target_classes = match config.target_classes {
            Some(values) => values
                .iter()
                .map(|value| value.parse())
                .collect::<Result<Vec<_>, _>>()?,
            None => default_target_classes(),
        };

        Ok(ResolvedConfig {
            project: config.project,
            heuristics: config.heuristics,
            converter_image: config.converter_image,
            qc_image: config.qc_image,
            overwrite: config.overwrite.unwrap_or(false),
            directions,
            target_classes,
        })
    }
}

pub fn default_directions() -> Vec<PhaseDir> {
    vec![PhaseDir::Ap, PhaseDir::Pa]
}

pub fn default_target_classes() -> Vec<FmapTargetClass> {
    vec![FmapTargetClass::Func, FmapTargetClass::Dwi]
}
