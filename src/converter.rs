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

use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::error::ExternalToolError;

/// External npz -> target converter, run as a blocking subprocess.
///
/// The archive and target paths are appended after `args`, in that order.
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    program: OsString,
    args: Vec<OsString>,
}

impl ExternalConverter {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `cargo run --bin=<bin> --manifest-path=<manifest> -- <archive> <target>`
    pub fn cargo_run(cargo: impl Into<OsString>, bin: &str, manifest: &Path) -> Self {
        let mut manifest_arg = OsString::from("--manifest-path=");
        manifest_arg.push(manifest);
        Self::new(cargo)
            .arg("run")
            .arg(format!("--bin={}", bin))
            .arg(manifest_arg)
            .arg("--")
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    /// Full argument list for one invocation, without the program itself.
    pub fn command_args(&self, archive: &Path, target: &Path) -> Vec<OsString> {
        let mut v = self.args.clone();
        v.push(archive.as_os_str().to_owned());
        v.push(target.as_os_str().to_owned());
        v
    }

    /// Runs the converter and waits for it. stdout/stderr are inherited.
    pub fn run(&self, archive: &Path, target: &Path) -> Result<(), ExternalToolError> {
        let program = self.program.to_string_lossy().into_owned();
        let args = self.command_args(archive, target);
        info!(
            "running: {} {}",
            program,
            args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
        );

        let status = Command::new(&self.program)
            .args(&args)
            .status()
            .map_err(|source| ExternalToolError::Spawn {
                program: program.clone(),
                source,
            })?;

        if status.success() {
            info!("{} finished successfully", program);
            Ok(())
        } else {
            Err(ExternalToolError::Failed {
                program,
                code: status.code(),
            })
        }
    }
}
