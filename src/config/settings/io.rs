// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::path::{Path, PathBuf};

use crate::error::{NokodeError, Result};

use super::Settings;

impl Settings {
    /// Get the default settings file path.
    pub fn default_path() -> PathBuf {
        PathBuf::from("etc").join("nokode.yaml")
    }

    /// Load settings from a file, then apply environment overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);
        let mut settings = Self::load_from(&path)?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Load settings from a specific path without consulting the environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    /// Parse settings content, choosing the format from the file extension.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        match extension.as_str() {
            "yaml" | "yml" => Ok(serde_yaml::from_str(content)?),
            "toml" => Ok(toml::from_str(content)?),
            "json" => Ok(serde_json::from_str(content)?),
            other => Err(NokodeError::Config(format!(
                "Unsupported settings format '.{}' for {}",
                other,
                path.display()
            ))),
        }
    }
}
