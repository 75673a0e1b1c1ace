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

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use tracing_subscriber::EnvFilter;

use ckptconv::{load_checkpoint, normalize_name, ConvertConfig, LoadOptions, Pipeline};

#[derive(Parser, Debug)]
#[command(
    name = "ckptconv",
    version,
    about = "Convert a PyTorch checkpoint to model.npz and hand it to the npz -> .ot converter",
    subcommand_negates_reqs = true
)]
struct Cli {
    /// Path to the PyTorch weights file to convert
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    source_file: Option<PathBuf>,

    /// JSON config file; flags below override its values
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Cargo manifest of the workspace providing the converter binary
    #[arg(long, value_hint = ValueHint::FilePath)]
    manifest_path: Option<PathBuf>,

    /// Cargo executable
    #[arg(long)]
    cargo: Option<String>,

    /// Name of the converter binary inside the manifest's workspace
    #[arg(long)]
    converter_bin: Option<String>,

    /// Archive file name (written next to the source)
    #[arg(long)]
    archive_name: Option<String>,

    /// Target file name (written next to the source)
    #[arg(long)]
    target_name: Option<String>,

    /// Read weights from this key of the PyTorch checkpoint, e.g. state_dict
    #[arg(long)]
    state_dict_key: Option<String>,

    /// Cast bf16 tensors to f32 (npy cannot store bf16)
    #[arg(long)]
    upcast_bf16: bool,

    /// Only write the archive, do not run the converter
    #[arg(long)]
    skip_convert: bool,

    /// Hide the progress spinner
    #[arg(long)]
    no_progress: bool,

    /// More logging (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List tensors (name, dtype, shape) of checkpoints or npz archives
    Inspect {
        #[arg(required = true, value_hint = ValueHint::FilePath)]
        files: Vec<PathBuf>,

        /// Show the normalized name of each tensor and report collisions
        #[arg(long)]
        rename: bool,

        #[arg(long)]
        state_dict_key: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(cli: &Cli) -> Result<ConvertConfig> {
    let mut cfg = match &cli.config {
        Some(p) => ConvertConfig::from_json_file(p)?,
        None => ConvertConfig::default(),
    };
    if let Some(v) = &cli.manifest_path {
        cfg.manifest_path = v.clone();
    }
    if let Some(v) = &cli.cargo {
        cfg.cargo = v.clone();
    }
    if let Some(v) = &cli.converter_bin {
        cfg.converter_bin = v.clone();
    }
    if let Some(v) = &cli.archive_name {
        cfg.archive_name = v.clone();
    }
    if let Some(v) = &cli.target_name {
        cfg.target_name = v.clone();
    }
    if let Some(v) = &cli.state_dict_key {
        cfg.state_dict_key = Some(v.clone());
    }
    cfg.upcast_bf16 |= cli.upcast_bf16;
    cfg.skip_convert |= cli.skip_convert;
    if cli.no_progress {
        cfg.progress = false;
    }
    Ok(cfg)
}

fn convert(cli: &Cli, source: &Path) -> Result<()> {
    let cfg = build_config(cli)?;
    if !cfg.skip_convert && !cfg.manifest_path.exists() {
        bail!(
            "converter manifest not found: {} (pass --manifest-path or --skip-convert)",
            cfg.manifest_path.display()
        );
    }

    let pipeline = Pipeline::new(cfg);
    let report = pipeline
        .run(source)
        .with_context(|| format!("conversion of {} failed", source.display()))?;

    println!(
        "Converted {} tensors ({} renamed) in {:.2?}",
        report.tensors, report.renamed, report.elapsed
    );
    println!(
        "   Archive: {} ({} bytes)",
        report.archive.display(),
        report.archive_bytes
    );
    if let Some(digest) = &report.archive_blake3 {
        println!("   BLAKE3:  {}", digest);
    }
    match &report.target {
        Some(target) => {
            println!("   Target:  {}", target.display());
            if let Ok(meta) = std::fs::metadata(target) {
                println!("   Target size: {} bytes", meta.len());
            }
        }
        None => println!("   Target:  skipped"),
    }
    Ok(())
}

fn inspect(files: &[PathBuf], rename: bool, state_dict_key: Option<String>) -> Result<()> {
    let opts = LoadOptions { state_dict_key };
    let mut collisions = 0usize;
    for file in files {
        let ckpt = load_checkpoint(file, &opts)
            .with_context(|| format!("failed to inspect {}", file.display()))?;
        let mut seen: HashMap<String, &str> = HashMap::new();
        for (name, t) in ckpt.iter() {
            if rename {
                let new_name = normalize_name(name);
                let arrow = if new_name != name {
                    format!(" -> {}", new_name)
                } else {
                    String::new()
                };
                println!(
                    "{}: {}{} {:?} {:?}",
                    file.display(),
                    name,
                    arrow,
                    t.dtype(),
                    t.dims()
                );
                if let Some(prev) = seen.insert(new_name.clone(), name) {
                    eprintln!(
                        "collision: `{}` and `{}` both normalize to `{}`",
                        prev, name, new_name
                    );
                    collisions += 1;
                }
            } else {
                println!(
                    "{}: {} {:?} {:?}",
                    file.display(),
                    name,
                    t.dtype(),
                    t.dims()
                );
            }
        }
        println!(
            "{}: {} tensors, {} bytes",
            file.display(),
            ckpt.len(),
            ckpt.total_bytes()
        );
    }
    if collisions > 0 {
        bail!("{} name collision(s) after normalization", collisions);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match &cli.command {
        Some(Commands::Inspect {
            files,
            rename,
            state_dict_key,
        }) => inspect(files, *rename, state_dict_key.clone()),
        None => {
            let source = cli.source_file.as_deref().context("missing source file")?;
            convert(&cli, source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "ckptconv",
            "/models/bert/pytorch_model.bin",
            "--manifest-path",
            "/src/rust-bert/Cargo.toml",
            "--target-name",
            "bert.ot",
            "--upcast-bf16",
            "--no-progress",
        ]);
        let cfg = build_config(&cli).unwrap();
        assert_eq!(cfg.manifest_path, PathBuf::from("/src/rust-bert/Cargo.toml"));
        assert_eq!(cfg.target_name, "bert.ot");
        assert_eq!(cfg.archive_name, "model.npz");
        assert!(cfg.upcast_bf16);
        assert!(!cfg.progress);
        assert!(!cfg.skip_convert);
    }

    #[test]
    fn inspect_does_not_need_a_source_file() {
        let args = ["ckptconv", "inspect", "--rename", "a.npz", "b.bin"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.source_file.is_none());
        match cli.command {
            Some(Commands::Inspect { files, rename, .. }) => {
                assert_eq!(files.len(), 2);
                assert!(rename);
            }
            None => panic!("expected inspect"),
        }
    }

    #[test]
    fn source_file_is_required_for_conversion() {
        assert!(Cli::try_parse_from(["ckptconv"]).is_err());
    }
}
