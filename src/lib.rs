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

// * Checkpoint conversion pipeline:
//   PyTorch weights -> normalized npz archive -> external converter.
// * Stages run strictly in order; the first failure aborts the run.

pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod converter;
pub mod error;
pub mod normalize;
pub mod pipeline;

pub use archive::{archive_digest, read_archive, write_archive};
pub use checkpoint::{load_checkpoint, Checkpoint, CheckpointFormat, LoadOptions, TensorMap};
pub use config::ConvertConfig;
pub use converter::ExternalConverter;
pub use error::{
    ConfigError, ConvertError, ExternalToolError, LoadError, NormalizeError, Stage, WriteError,
};
pub use normalize::{
    normalize, normalize_name, normalize_with, NormalizeOptions, NormalizedCheckpoint, RENAME_RULES,
};
pub use pipeline::{ConversionReport, OutputPaths, Pipeline};

// Public defaults (rust-bert conventions: model.npz -> rust_model.ot via convert-tensor)
pub const DEFAULT_ARCHIVE_NAME: &str = "model.npz";
pub const DEFAULT_TARGET_NAME: &str = "rust_model.ot";
pub const DEFAULT_MANIFEST_PATH: &str = "Cargo.toml";
pub const DEFAULT_CARGO: &str = "cargo";
pub const DEFAULT_CONVERTER_BIN: &str = "convert-tensor";
