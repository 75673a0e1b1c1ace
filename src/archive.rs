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

// -------------------------------
// Archive format
// -------------------------------
//
// A zip container with one `<name>.npy` member per tensor, the layout numpy.savez
// produces and tch's Tensor::read_npz expects. The file is written under a
// temporary name next to the destination and renamed into place once closed, so
// the converter never sees a half-written archive.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use blake3::Hasher;
use candle_core::{DType, Tensor};
use tracing::{debug, info};

use crate::checkpoint::{CheckpointFormat, TensorMap};
use crate::error::{LoadError, WriteError};
use crate::normalize::NormalizedCheckpoint;

fn npy_supports(dtype: DType) -> bool {
    !matches!(dtype, DType::BF16)
}

/// Writes `checkpoint` to `path` and returns the archive size in bytes.
pub fn write_archive(checkpoint: &NormalizedCheckpoint, path: &Path) -> Result<u64, WriteError> {
    for (name, t) in checkpoint.iter() {
        if !npy_supports(t.dtype()) {
            return Err(WriteError::UnsupportedDtype {
                name: name.to_string(),
                dtype: t.dtype(),
            });
        }
    }

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let io_err = |source| WriteError::Io { path: path.to_path_buf(), source };

    // dot-prefixed so directory listings and globs skip the in-flight file
    let tmp = tempfile::Builder::new()
        .prefix(".ckptconv-")
        .suffix(".npz.partial")
        .tempfile_in(dir)
        .map_err(io_err)?
        .into_temp_path();
    debug!("writing {} tensors to {}", checkpoint.len(), tmp.display());

    // dropping `tmp` on any early return removes the partial file
    Tensor::write_npz(checkpoint.entries(), &tmp)
        .map_err(|source| WriteError::Serialize { path: path.to_path_buf(), source })?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    let size = std::fs::metadata(path).map_err(io_err)?.len();
    info!("wrote archive {} ({} bytes)", path.display(), size);
    Ok(size)
}

/// Reads an archive written by [`write_archive`] (or numpy.savez) back into memory.
pub fn read_archive(path: &Path) -> Result<TensorMap, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let entries = Tensor::read_npz(path).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        format: CheckpointFormat::Npz,
        source,
    })?;
    Ok(entries.into_iter().collect())
}

/// BLAKE3 digest of the file at `path`, hex encoded.
pub fn archive_digest(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 { break; }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::normalize::{normalize, normalize_with, NormalizeOptions};
    use candle_core::Device;

    fn sample() -> Checkpoint {
        let dev = Device::Cpu;
        let proj = Tensor::arange(0f32, 12., &dev).unwrap().reshape((3, 4)).unwrap();
        vec![
            ("encoder.gamma".to_string(), Tensor::new(&[[1.0f32, 2.0]], &dev).unwrap()),
            ("encoder.beta".to_string(), Tensor::new(&[0.0f32, 0.0], &dev).unwrap()),
            ("proj.weight".to_string(), proj.t().unwrap()),
            ("steps".to_string(), Tensor::new(&[7i64], &dev).unwrap()),
        ]
        .into_iter()
        .collect()
    }

    fn as_f64(t: &Tensor) -> Vec<f64> {
        t.flatten_all()
            .unwrap()
            .to_dtype(DType::F64)
            .unwrap()
            .to_vec1::<f64>()
            .unwrap()
    }

    #[test]
    fn round_trip_preserves_keys_shapes_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.npz");
        let normalized = normalize(&sample()).unwrap();

        let size = write_archive(&normalized, &path).unwrap();
        assert!(size > 0);
        let back = read_archive(&path).unwrap();

        assert_eq!(back.len(), normalized.len());
        for (name, t) in normalized.iter() {
            let r = back.get(name).unwrap_or_else(|| panic!("missing {name}"));
            assert_eq!(r.dims(), t.dims(), "{name}");
            assert_eq!(r.dtype(), t.dtype(), "{name}");
            assert_eq!(as_f64(r), as_f64(t), "{name}");
        }
        assert_eq!(back.get("proj.weight").unwrap().dims(), &[4, 3]);
    }

    #[test]
    fn no_partial_files_remain_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.npz");
        write_archive(&normalize(&sample()).unwrap(), &path).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("model.npz")]);
    }

    #[test]
    fn bf16_is_rejected_before_anything_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.npz");
        let t = Tensor::new(&[1f32, 2.], &Device::Cpu).unwrap().to_dtype(DType::BF16).unwrap();
        let ckpt: Checkpoint = vec![("ln.gamma".to_string(), t)].into_iter().collect();

        let err = write_archive(&normalize(&ckpt).unwrap(), &path).unwrap_err();
        match err {
            WriteError::UnsupportedDtype { name, dtype } => {
                assert_eq!(name, "ln.weight");
                assert_eq!(dtype, DType::BF16);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let upcast = normalize_with(&ckpt, &NormalizeOptions { upcast_bf16: true }).unwrap();
        write_archive(&upcast, &path).unwrap();
        assert_eq!(read_archive(&path).unwrap().get("ln.weight").unwrap().dtype(), DType::F32);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/model.npz");
        let err = write_archive(&normalize(&sample()).unwrap(), &path).unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"weights").unwrap();
        std::fs::write(&b, b"weights!").unwrap();
        let da = archive_digest(&a).unwrap();
        assert_eq!(da.len(), 64);
        assert_eq!(da, archive_digest(&a).unwrap());
        assert_ne!(da, archive_digest(&b).unwrap());
        assert_eq!(da, blake3::hash(b"weights").to_hex().to_string());
    }
}
