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

use std::fmt;
use std::path::PathBuf;

use candle_core::DType;
use thiserror::Error;

use crate::checkpoint::CheckpointFormat;

/// Pipeline stage, used to tell the user where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Normalize,
    Write,
    Convert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Load => "load",
            Stage::Normalize => "normalize",
            Stage::Write => "write",
            Stage::Convert => "convert",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("checkpoint not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("failed to read {} as {format} checkpoint: {source}", .path.display())]
    Parse {
        path: PathBuf,
        format: CheckpointFormat,
        #[source]
        source: candle_core::Error,
    },
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("parameter name collision: `{first}` and `{second}` both normalize to `{renamed}`")]
    NameCollision { renamed: String, first: String, second: String },

    #[error("failed to copy tensor `{name}`: {source}")]
    Copy {
        name: String,
        #[source]
        source: candle_core::Error,
    },
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("tensor `{name}` has dtype {dtype:?}, which the npy format cannot store")]
    UnsupportedDtype { name: String, dtype: DType },

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize archive {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: candle_core::Error,
    },
}

#[derive(Debug, Error)]
pub enum ExternalToolError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {}", describe_exit(.code))]
    Failed { program: String, code: Option<i32> },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Umbrella error for a pipeline run. Each variant corresponds to one stage.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("[load] {0}")]
    Load(#[from] LoadError),

    #[error("[normalize] {0}")]
    Normalize(#[from] NormalizeError),

    #[error("[write] {0}")]
    Write(#[from] WriteError),

    #[error("[convert] {0}")]
    ExternalTool(#[from] ExternalToolError),
}

impl ConvertError {
    pub fn stage(&self) -> Stage {
        match self {
            ConvertError::Load(_) => Stage::Load,
            ConvertError::Normalize(_) => Stage::Normalize,
            ConvertError::Write(_) => Stage::Write,
            ConvertError::ExternalTool(_) => Stage::Convert,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed reading config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_is_reported_per_variant() {
        let err: ConvertError = LoadError::NotFound(PathBuf::from("/nope.bin")).into();
        assert_eq!(err.stage(), Stage::Load);
        assert!(err.to_string().starts_with("[load]"));

        let err: ConvertError = ExternalToolError::Failed {
            program: "cargo".into(),
            code: Some(1),
        }
        .into();
        assert_eq!(err.stage(), Stage::Convert);
        assert_eq!(err.to_string(), "[convert] `cargo` exited with exit code 1");
    }

    #[test]
    fn signal_exit_is_described() {
        let err = ExternalToolError::Failed { program: "sh".into(), code: None };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn collision_message_names_both_sources() {
        let err = NormalizeError::NameCollision {
            renamed: "layer.weight".into(),
            first: "layer.gamma".into(),
            second: "layer.weight".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("`layer.gamma`"));
        assert!(msg.contains("`layer.weight`"));
    }
}
