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

// * Checkpoint loading: PyTorch pickle/zip, safetensors and npz into an ordered
//   name -> tensor map.
// * Everything lands on the CPU; whole files are read, there is no partial loading.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use tracing::{debug, info, warn};

use crate::error::LoadError;

/// Ordered mapping from parameter name to tensor.
///
/// Iteration follows insertion order (the order tensors appear in the source file).
/// Inserting a name that is already present replaces the tensor in place.
#[derive(Debug, Clone, Default)]
pub struct TensorMap {
    entries: Vec<(String, Tensor)>,
    index: HashMap<String, usize>,
}

/// A checkpoint as read from disk.
pub type Checkpoint = TensorMap;

impl TensorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        let name = name.into();
        match self.index.get(&name) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, tensor)),
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, tensor));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn entries(&self) -> &[(String, Tensor)] {
        &self.entries
    }

    /// Total payload size in bytes, ignoring container overhead.
    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.elem_count() * t.dtype().size_in_bytes()).sum()
    }
}

impl FromIterator<(String, Tensor)> for TensorMap {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        let mut map = TensorMap::new();
        for (name, tensor) in iter {
            map.insert(name, tensor);
        }
        map
    }
}

// ---------------- Format detection ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// torch.save output (zip container holding data.pkl)
    PyTorch,
    SafeTensors,
    Npz,
}

impl CheckpointFormat {
    /// Picks the reader from the file extension. Unknown extensions are treated as
    /// PyTorch files, since torch.save does not enforce any.
    pub fn from_path(path: &Path) -> Self {
        let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("safetensors") => CheckpointFormat::SafeTensors,
            Some("npz") => CheckpointFormat::Npz,
            _ => CheckpointFormat::PyTorch,
        }
    }
}

impl fmt::Display for CheckpointFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointFormat::PyTorch => f.write_str("pytorch"),
            CheckpointFormat::SafeTensors => f.write_str("safetensors"),
            CheckpointFormat::Npz => f.write_str("npz"),
        }
    }
}

// ---------------- Loader ----------------

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Nested dictionary holding the weights in a PyTorch checkpoint, e.g. "state_dict".
    /// Ignored for other formats.
    pub state_dict_key: Option<String>,
}

pub fn load_checkpoint(path: &Path, opts: &LoadOptions) -> Result<Checkpoint, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(LoadError::NotAFile(path.to_path_buf()));
    }
    let format = CheckpointFormat::from_path(path);
    info!("loading {} checkpoint {}", format, path.display());

    let parse_err = |source| LoadError::Parse {
        path: path.to_path_buf(),
        format,
        source,
    };
    let entries: Vec<(String, Tensor)> = match format {
        CheckpointFormat::PyTorch => {
            read_pth_in_order(path, opts.state_dict_key.as_deref()).map_err(parse_err)?
        }
        CheckpointFormat::SafeTensors => {
            // safetensors headers carry no order; sort for a stable archive layout
            let tensors = candle_core::safetensors::load(path, &Device::Cpu).map_err(parse_err)?;
            let mut v: Vec<_> = tensors.into_iter().collect();
            v.sort_by(|a, b| a.0.cmp(&b.0));
            v
        }
        CheckpointFormat::Npz => Tensor::read_npz(path).map_err(parse_err)?,
    };
    if opts.state_dict_key.is_some() && format != CheckpointFormat::PyTorch {
        warn!("state dict key is only used for PyTorch checkpoints; ignored for {}", format);
    }

    let checkpoint: Checkpoint = entries.into_iter().collect();
    if checkpoint.is_empty() {
        warn!("checkpoint {} contains no tensors", path.display());
    }
    for (name, t) in checkpoint.iter() {
        debug!("  {} {:?} {:?}", name, t.dtype(), t.dims());
    }
    info!("loaded {} tensors ({} bytes)", checkpoint.len(), checkpoint.total_bytes());
    Ok(checkpoint)
}

/// Tensors of a torch.save file in pickle stream order.
///
/// `pickle::read_all` goes through a HashMap keyed by name, so its order changes from
/// run to run. The tensor info list follows the pickle stream and is fixed per file.
fn read_pth_in_order(
    path: &Path,
    key: Option<&str>,
) -> candle_core::Result<Vec<(String, Tensor)>> {
    let infos = candle_core::pickle::read_pth_tensor_info(path, false, key)?;
    let pth = candle_core::pickle::PthTensors::new(path, key)?;
    let mut out = Vec::with_capacity(infos.len());
    for info in infos {
        match pth.get(&info.name)? {
            Some(t) => out.push((info.name, t)),
            None => warn!(
                "tensor {} listed in {} but not readable, skipped",
                info.name,
                path.display()
            ),
        }
    }
    Ok(out)
}

pub(crate) fn source_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
