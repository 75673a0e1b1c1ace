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

// * Load -> normalize -> write archive -> external converter, strictly in that order.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::archive::{archive_digest, write_archive};
use crate::checkpoint::{load_checkpoint, source_dir};
use crate::config::ConvertConfig;
use crate::converter::ExternalConverter;
use crate::error::ConvertError;
use crate::normalize::normalize_with;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub archive: PathBuf,
    pub target: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ConversionReport {
    pub tensors: usize,
    pub renamed: usize,
    pub archive: PathBuf,
    pub archive_bytes: u64,
    /// BLAKE3 of the archive; None if the file could not be re-read for hashing
    pub archive_blake3: Option<String>,
    /// None when the converter was skipped
    pub target: Option<PathBuf>,
    pub elapsed: Duration,
}

pub struct Pipeline {
    config: ConvertConfig,
    converter: ExternalConverter,
}

impl Pipeline {
    pub fn new(config: ConvertConfig) -> Self {
        let converter = config.converter();
        Self { config, converter }
    }

    pub fn with_converter(config: ConvertConfig, converter: ExternalConverter) -> Self {
        Self { config, converter }
    }

    /// Archive and target live in the source checkpoint's directory.
    pub fn output_paths(&self, source: &Path) -> OutputPaths {
        let dir = source_dir(source);
        OutputPaths {
            archive: dir.join(&self.config.archive_name),
            target: dir.join(&self.config.target_name),
        }
    }

    pub fn run(&self, source: &Path) -> Result<ConversionReport, ConvertError> {
        let t0 = Instant::now();
        let paths = self.output_paths(source);
        let spinner = self.spinner();

        spinner.set_message(format!("loading {}", source.display()));
        let checkpoint = load_checkpoint(source, &self.config.load_options())
            .inspect_err(|_| spinner.abandon())?;

        spinner.set_message(format!("normalizing {} tensors", checkpoint.len()));
        let normalized = normalize_with(&checkpoint, &self.config.normalize_options())
            .inspect_err(|_| spinner.abandon())?;
        drop(checkpoint);

        spinner.set_message(format!("writing {}", paths.archive.display()));
        let archive_bytes =
            write_archive(&normalized, &paths.archive).inspect_err(|_| spinner.abandon())?;
        spinner.finish_and_clear();

        let archive_blake3 = match archive_digest(&paths.archive) {
            Ok(d) => {
                info!("archive blake3 {}", d);
                Some(d)
            }
            Err(e) => {
                warn!("could not hash {}: {}", paths.archive.display(), e);
                None
            }
        };

        let target = if self.config.skip_convert {
            info!("skipping external conversion");
            None
        } else {
            self.converter.run(&paths.archive, &paths.target)?;
            Some(paths.target)
        };

        Ok(ConversionReport {
            tensors: normalized.len(),
            renamed: normalized.renamed_count(),
            archive: paths.archive,
            archive_bytes,
            archive_blake3,
            target,
            elapsed: t0.elapsed(),
        })
    }

    fn spinner(&self) -> ProgressBar {
        if !self.config.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }
}
