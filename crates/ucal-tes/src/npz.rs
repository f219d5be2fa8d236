//! NumPy `.npz` container holding the persisted TES arrays.
//!
//! Each array is a `.npy` v1.0 member of an uncompressed zip archive, the
//! layout `numpy.savez` produces, so outputs load directly with `np.load`.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use ucal_core::errors::{ErrorInfo, UcalError};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MAGIC: &[u8] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

fn npz_error(code: &str, path: &Path, err: impl ToString) -> UcalError {
    UcalError::Io(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Time-ordered pulse arrays of one (run, state).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TesArrays {
    /// Arrival times in unix nanoseconds, ascending.
    pub timestamps: Vec<i64>,
    /// Calibrated energies in eV.
    pub energies: Vec<f64>,
    /// Channel number of each pulse.
    pub channels: Vec<i64>,
}

impl TesArrays {
    /// Number of pulses.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True when no pulse was recorded.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

fn npy_header(descr: &str, len: usize) -> Vec<u8> {
    let dict = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': ({len},), }}");
    // magic + version + u16 length prefix
    let prefix = MAGIC.len() + 2 + 2;
    let unpadded = prefix + dict.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(prefix + header_len);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');
    out
}

fn npy_i64(values: &[i64]) -> Vec<u8> {
    let mut out = npy_header("<i8", values.len());
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn npy_f64(values: &[f64]) -> Vec<u8> {
    let mut out = npy_header("<f8", values.len());
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Writes `arrays` to `path`, creating parent directories.
///
/// The archive is assembled next to the target and renamed into place, so an
/// existing `path` always holds a complete container.
pub fn write_npz(path: &Path, arrays: &TesArrays) -> Result<(), UcalError> {
    if arrays.energies.len() != arrays.len() || arrays.channels.len() != arrays.len() {
        return Err(UcalError::Engine(
            ErrorInfo::new("npz.shape", "array lengths differ")
                .with_context("timestamps", arrays.len().to_string())
                .with_context("energies", arrays.energies.len().to_string())
                .with_context("channels", arrays.channels.len().to_string()),
        ));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| npz_error("npz.dir", parent, err))?;
    }
    let staging = partial_path(path);
    let file = File::create(&staging).map_err(|err| npz_error("npz.create", &staging, err))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    let members = [
        ("timestamps.npy", npy_i64(&arrays.timestamps)),
        ("energies.npy", npy_f64(&arrays.energies)),
        ("channels.npy", npy_i64(&arrays.channels)),
    ];
    for (name, bytes) in members {
        writer
            .start_file(name, options)
            .map_err(|err| npz_error("npz.write", &staging, err))?;
        writer
            .write_all(&bytes)
            .map_err(|err| npz_error("npz.write", &staging, err))?;
    }
    writer
        .finish()
        .map_err(|err| npz_error("npz.write", &staging, err))?;
    fs::rename(&staging, path).map_err(|err| npz_error("npz.rename", path, err))
}

struct NpyPayload<'b> {
    descr: String,
    len: usize,
    data: &'b [u8],
}

fn parse_npy<'b>(bytes: &'b [u8], path: &Path) -> Result<NpyPayload<'b>, UcalError> {
    let malformed = |what: &str| npz_error("npz.format", path, what);
    if bytes.len() < 10 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(malformed("missing npy magic"));
    }
    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        _ => return Err(malformed("unsupported npy version")),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .ok_or_else(|| malformed("truncated npy header"))?;
    if header.contains("'fortran_order': True") {
        return Err(malformed("fortran-ordered arrays are not supported"));
    }
    let descr = header
        .split("'descr':")
        .nth(1)
        .and_then(|rest| rest.split('\'').nth(1))
        .ok_or_else(|| malformed("npy header lacks descr"))?
        .to_string();
    let shape = header
        .split("'shape':")
        .nth(1)
        .and_then(|rest| rest.split(['(', ')']).nth(1))
        .ok_or_else(|| malformed("npy header lacks shape"))?;
    let len = match shape.trim().trim_end_matches(',').trim() {
        "" => 1,
        dims => dims.split(',').try_fold(1usize, |acc, dim| {
            let dim = dim
                .trim()
                .parse::<usize>()
                .map_err(|_| malformed("npy shape is not numeric"))?;
            acc.checked_mul(dim)
                .ok_or_else(|| malformed("npy shape overflows"))
        })?,
    };
    Ok(NpyPayload {
        descr,
        len,
        data: &bytes[data_start..],
    })
}

fn decode<T, const N: usize>(
    payload: &NpyPayload<'_>,
    descr: &str,
    path: &Path,
    from_le: fn([u8; N]) -> T,
) -> Result<Vec<T>, UcalError> {
    if payload.descr != descr {
        return Err(npz_error(
            "npz.dtype",
            path,
            format!("expected {descr}, found {}", payload.descr),
        ));
    }
    let size = payload
        .len
        .checked_mul(N)
        .ok_or_else(|| npz_error("npz.format", path, "npy shape overflows"))?;
    if payload.data.len() < size {
        return Err(npz_error("npz.format", path, "npy data shorter than shape"));
    }
    Ok(payload.data[..size]
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            from_le(raw)
        })
        .collect())
}

fn read_member<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    path: &Path,
) -> Result<Vec<u8>, UcalError> {
    let mut member = archive
        .by_name(name)
        .map_err(|err| npz_error("npz.member", path, format!("{name}: {err}")))?;
    let mut bytes = Vec::new();
    member
        .read_to_end(&mut bytes)
        .map_err(|err| npz_error("npz.read", path, err))?;
    Ok(bytes)
}

/// Reads a container written by [`write_npz`] (or `numpy.savez`).
pub fn read_npz(path: &Path) -> Result<TesArrays, UcalError> {
    let file = File::open(path).map_err(|err| npz_error("npz.open", path, err))?;
    let mut archive = ZipArchive::new(file).map_err(|err| npz_error("npz.open", path, err))?;

    let timestamps = read_member(&mut archive, "timestamps.npy", path)?;
    let energies = read_member(&mut archive, "energies.npy", path)?;
    let channels = read_member(&mut archive, "channels.npy", path)?;

    Ok(TesArrays {
        timestamps: decode(&parse_npy(&timestamps, path)?, "<i8", path, i64::from_le_bytes)?,
        energies: decode(&parse_npy(&energies, path)?, "<f8", path, f64::from_le_bytes)?,
        channels: decode(&parse_npy(&channels, path)?, "<i8", path, i64::from_le_bytes)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_aligned_and_newline_terminated() {
        for len in [0usize, 7, 123_456_789] {
            let header = npy_header("<f8", len);
            assert_eq!(header.len() % HEADER_ALIGN, 0);
            assert_eq!(header.last(), Some(&b'\n'));
            let declared = u16::from_le_bytes([header[8], header[9]]) as usize;
            assert_eq!(declared + 10, header.len());
        }
    }

    #[test]
    fn container_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/scan0001_SCAN1.npz");
        let arrays = TesArrays {
            timestamps: vec![1, 2, 3],
            energies: vec![277.5, 392.1, 524.9],
            channels: vec![7, 9, 7],
        };
        write_npz(&path, &arrays).unwrap();
        assert!(!partial_path(&path).exists());
        assert_eq!(read_npz(&path).unwrap(), arrays);
    }

    fn raw_npy(shape: &str, payload: usize) -> Vec<u8> {
        let dict = format!("{{'descr': '<f8', 'fortran_order': False, 'shape': ({shape}), }}\n");
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        bytes.extend_from_slice(dict.as_bytes());
        bytes.resize(bytes.len() + payload, 0);
        bytes
    }

    #[test]
    fn oversized_shape_is_a_format_error() {
        let path = Path::new("corrupt.npz");
        let bytes = raw_npy(&format!("{},", usize::MAX), 16);
        let payload = parse_npy(&bytes, path).unwrap();
        assert_eq!(payload.len, usize::MAX);
        let err = decode(&payload, "<f8", path, f64::from_le_bytes).unwrap_err();
        assert_eq!(err.code(), "npz.format");

        let bytes = raw_npy(&format!("{}, 4", usize::MAX), 0);
        let err = parse_npy(&bytes, path).err().unwrap();
        assert_eq!(err.code(), "npz.format");
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let arrays = TesArrays {
            timestamps: vec![1],
            energies: vec![],
            channels: vec![1],
        };
        let err = write_npz(&dir.path().join("x.npz"), &arrays).unwrap_err();
        assert_eq!(err.code(), "npz.shape");
    }
}
