use std::os::raw::{c_int, c_void};

use fpzip_sys::{
    fpzip_read, fpzip_read_close, fpzip_read_from_buffer, fpzip_read_header, fpzip_write,
    fpzip_write_close, fpzip_write_header, fpzip_write_to_buffer, FPZIP_TYPE_FLOAT,
};
use half::f16;

use crate::{BridgeError, Result};

/// First header word marking a payload that is a compressed block
pub const COMPRESSED_MAGIC: u32 = 1012247;

/// Headroom for fpzip's stream header on incompressible input
const BLOCK_SLACK: usize = 1024;

/// Compress raw little-endian f16 samples into a lossless fpzip block.
///
/// The block describes a `height x width x channels` float array in row-major
/// order, carried as one field.
pub fn compress_payload(raw: &[u8], height: u32, width: u32, channels: u32) -> Result<Vec<u8>> {
    let samples: Vec<f32> = raw
        .chunks_exact(2)
        .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
        .collect();
    let dim = |d: u32| c_int::try_from(d).map_err(|_| BridgeError::Decompress(format!("dimension {d} too large")));
    let (nx, ny, nz) = (dim(channels)?, dim(width)?, dim(height)?);

    let mut block = vec![0u8; samples.len() * 4 + BLOCK_SLACK];
    // SAFETY: the stream writes at most `block.len()` bytes into `block`, and
    // reads exactly nx*ny*nz floats from `samples`, which holds that many.
    let written = unsafe {
        let fpz = fpzip_write_to_buffer(block.as_mut_ptr() as *mut c_void, block.len() as _);
        if fpz.is_null() {
            return Err(BridgeError::Decompress("fpzip writer unavailable".into()));
        }
        (*fpz).type_ = FPZIP_TYPE_FLOAT as _;
        (*fpz).prec = 0;
        (*fpz).nx = nx;
        (*fpz).ny = ny;
        (*fpz).nz = nz;
        (*fpz).nf = 1;
        let written = if fpzip_write_header(fpz) == 0 {
            0
        } else {
            fpzip_write(fpz, samples.as_ptr() as *const c_void) as usize
        };
        fpzip_write_close(fpz);
        written
    };

    if written == 0 {
        return Err(BridgeError::Decompress("fpzip could not compress payload".into()));
    }
    block.truncate(written);
    Ok(block)
}

/// Recover f16 samples from an fpzip block.
///
/// The engine compresses 32-bit floats; they are narrowed back to f16 so the
/// result has the same shape as an uncompressed payload. Fails unless the
/// block holds exactly `expected` samples.
pub fn decompress_payload(block: &[u8], expected: usize) -> Result<Vec<u8>> {
    if block.is_empty() {
        return Err(BridgeError::Decompress("empty compressed block".into()));
    }

    // SAFETY: the reader only touches `block`, and `fpzip_read` writes
    // nx*ny*nz*nf floats, which is the size `samples` is allocated to after
    // the header has been checked against `expected`.
    let samples = unsafe {
        let fpz = fpzip_read_from_buffer(block.as_ptr() as *const c_void);
        if fpz.is_null() {
            return Err(BridgeError::Decompress("fpzip reader unavailable".into()));
        }
        let result = read_block(fpz, expected);
        fpzip_read_close(fpz);
        result?
    };

    Ok(samples
        .into_iter()
        .flat_map(|v| f16::from_f32(v).to_le_bytes())
        .collect())
}

unsafe fn read_block(fpz: *mut fpzip_sys::FPZ, expected: usize) -> Result<Vec<f32>> {
    if fpzip_read_header(fpz) == 0 {
        return Err(BridgeError::Decompress("invalid fpzip header".into()));
    }
    if (*fpz).type_ as i64 != FPZIP_TYPE_FLOAT as i64 {
        return Err(BridgeError::Decompress("fpzip block does not hold 32-bit floats".into()));
    }

    let count = [(*fpz).nx, (*fpz).ny, (*fpz).nz, (*fpz).nf]
        .iter()
        .try_fold(1usize, |acc, &d| usize::try_from(d).ok().and_then(|d| acc.checked_mul(d)))
        .ok_or_else(|| BridgeError::Decompress("fpzip dimensions overflow".into()))?;
    if count != expected {
        return Err(BridgeError::Decompress(format!(
            "fpzip block holds {count} samples, header declares {expected}"
        )));
    }

    let mut samples = vec![0f32; count];
    let read = fpzip_read(fpz, samples.as_mut_ptr() as *mut c_void) as usize;
    if read == 0 {
        return Err(BridgeError::Decompress("fpzip stream ended early".into()));
    }
    Ok(samples)
}
