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

// * Key/array normalization: rename TF-style LayerNorm parameters and give every tensor
//   its own row-major buffer.

use std::collections::HashMap;
use std::ops::Deref;

use candle_core::{DType, Tensor};
use tracing::{debug, info};

use crate::checkpoint::{Checkpoint, TensorMap};
use crate::error::NormalizeError;

/// Substring replacements applied to every parameter name, in this order.
/// Each rule sees the output of the previous one.
pub const RENAME_RULES: [(&str, &str); 2] = [("gamma", "weight"), ("beta", "bias")];

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Cast bf16 tensors to f32 (npy has no bf16).
    pub upcast_bf16: bool,
}

/// A checkpoint whose names went through [`RENAME_RULES`] and whose tensors are
/// contiguous copies. Only [`normalize`] / [`normalize_with`] build one.
#[derive(Debug, Clone)]
pub struct NormalizedCheckpoint {
    tensors: TensorMap,
    renamed: usize,
}

impl NormalizedCheckpoint {
    /// Number of parameters whose name changed.
    pub fn renamed_count(&self) -> usize {
        self.renamed
    }
}

impl Deref for NormalizedCheckpoint {
    type Target = TensorMap;
    fn deref(&self) -> &TensorMap {
        &self.tensors
    }
}

pub fn normalize_name(name: &str) -> String {
    RENAME_RULES.iter().fold(name.to_string(), |acc, (from, to)| acc.replace(from, to))
}

/// Row-major copy in a freshly allocated buffer, whatever the input's strides or offset.
fn contiguous_copy(tensor: &Tensor, upcast_bf16: bool) -> candle_core::Result<Tensor> {
    if upcast_bf16 && tensor.dtype() == DType::BF16 {
        // to_dtype always allocates; force_contiguous below still normalizes the layout
        return tensor.to_dtype(DType::F32)?.force_contiguous();
    }
    tensor.force_contiguous()
}

pub fn normalize(checkpoint: &Checkpoint) -> Result<NormalizedCheckpoint, NormalizeError> {
    normalize_with(checkpoint, &NormalizeOptions::default())
}

pub fn normalize_with(
    checkpoint: &Checkpoint,
    opts: &NormalizeOptions,
) -> Result<NormalizedCheckpoint, NormalizeError> {
    // renamed -> original, to name both sides of a collision
    let mut origin: HashMap<String, &str> = HashMap::with_capacity(checkpoint.len());
    let mut tensors = TensorMap::new();
    let mut renamed = 0usize;

    for (name, tensor) in checkpoint.iter() {
        let new_name = normalize_name(name);
        if let Some(first) = origin.get(&new_name) {
            return Err(NormalizeError::NameCollision {
                renamed: new_name,
                first: first.to_string(),
                second: name.to_string(),
            });
        }
        if new_name != name {
            debug!("rename {} -> {}", name, new_name);
            renamed += 1;
        }
        let copy = contiguous_copy(tensor, opts.upcast_bf16).map_err(|source| NormalizeError::Copy {
            name: name.to_string(),
            source,
        })?;
        origin.insert(new_name.clone(), name);
        tensors.insert(new_name, copy);
    }

    info!("normalized {} tensors ({} renamed)", tensors.len(), renamed);
    Ok(NormalizedCheckpoint { tensors, renamed })
}
