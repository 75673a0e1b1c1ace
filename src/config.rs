// Copyright (C) 2025 Noah Cashin <noahc959@icloud.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checkpoint::LoadOptions;
use crate::converter::ExternalConverter;
use crate::error::ConfigError;
use crate::normalize::NormalizeOptions;
use crate::{
    DEFAULT_ARCHIVE_NAME, DEFAULT_CARGO, DEFAULT_CONVERTER_BIN, DEFAULT_MANIFEST_PATH,
    DEFAULT_TARGET_NAME,
};

/// Everything a conversion run needs. Loaded from JSON, then overridden from the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Archive file name, created next to the source checkpoint
    pub archive_name: String,
    /// Target file name, created next to the source checkpoint
    pub target_name: String,
    /// Cargo manifest of the workspace that builds the converter binary
    pub manifest_path: PathBuf,
    pub cargo: String,
    pub converter_bin: String,
    pub state_dict_key: Option<String>,
    pub upcast_bf16: bool,
    /// Stop after the archive is written
    pub skip_convert: bool,
    pub progress: bool,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            target_name: DEFAULT_TARGET_NAME.to_string(),
            manifest_path: PathBuf::from(DEFAULT_MANIFEST_PATH),
            cargo: DEFAULT_CARGO.to_string(),
            converter_bin: DEFAULT_CONVERTER_BIN.to_string(),
            state_dict_key: None,
            upcast_bf16: false,
            skip_convert: false,
            progress: true,
        }
    }
}

impl ConvertConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            state_dict_key: self.state_dict_key.clone(),
        }
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            upcast_bf16: self.upcast_bf16,
        }
    }

    pub fn converter(&self) -> ExternalConverter {
        ExternalConverter::cargo_run(&self.cargo, &self.converter_bin, &self.manifest_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_conversion_script() {
        let cfg = ConvertConfig::default();
        assert_eq!(cfg.archive_name, "model.npz");
        assert_eq!(cfg.target_name, "rust_model.ot");
        assert_eq!(cfg.converter_bin, "convert-tensor");
        assert!(cfg.progress);
        assert!(!cfg.skip_convert);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckptconv.json");
        let json = r#"{ "manifest_path": "/opt/rust-bert/Cargo.toml", "upcast_bf16": true }"#;
        std::fs::write(&path, json).unwrap();

        let cfg = ConvertConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.manifest_path, PathBuf::from("/opt/rust-bert/Cargo.toml"));
        assert!(cfg.upcast_bf16);
        assert!(cfg.normalize_options().upcast_bf16);
        assert_eq!(cfg.archive_name, DEFAULT_ARCHIVE_NAME);
        assert_eq!(cfg.cargo, "cargo");
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ConvertConfig::from_json_file(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            ConvertConfig::from_json_file(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
