//! NIfTI-1 volume I/O.
//!
//! Single-file `.nii.gz` only: a 348-byte NIfTI-1 header, four bytes of
//! extension padding, then the voxel data in x-fastest order, all gzipped.
//! Volumes are written as little-endian float32 with the affine in the
//! sform fields; the reader additionally accepts float64 data and
//! big-endian files. Reading is also the validity check for output files:
//! truncated or foreign files fail with a descriptive error instead of
//! yielding a partial volume.

use crate::data::{StatVolume, VolumeSpace};
use crate::error::{CbmaError, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nalgebra::Matrix4;
use ndarray::Array3;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::warn;

/// NIfTI-1 header size.
const HEADER_SIZE: usize = 348;
/// Data offset for single-file NIfTI-1 (header + extension flag).
const VOX_OFFSET: usize = 352;

/// NIfTI-1 header field byte offsets.
mod offsets {
    pub const SIZEOF_HDR: usize = 0;
    pub const DIM: usize = 40;
    pub const DATATYPE: usize = 70;
    pub const BITPIX: usize = 72;
    pub const PIXDIM: usize = 76;
    pub const VOX_OFFSET: usize = 108;
    pub const SCL_SLOPE: usize = 112;
    pub const SCL_INTER: usize = 116;
    pub const XYZT_UNITS: usize = 123;
    pub const DESCRIP: usize = 148;
    pub const QFORM_CODE: usize = 252;
    pub const SFORM_CODE: usize = 254;
    pub const SROW_X: usize = 280;
    pub const SROW_Y: usize = 296;
    pub const SROW_Z: usize = 312;
    pub const MAGIC: usize = 344;
}

/// Datatype code for float32.
const DT_FLOAT32: i16 = 16;
/// Datatype code for float64.
const DT_FLOAT64: i16 = 64;
/// Spatial units: millimeters.
const UNITS_MM: u8 = 2;
/// sform code: aligned to a standard space.
const SFORM_ALIGNED: i16 = 2;

/// Write a volume as gzipped little-endian float32 NIfTI-1.
pub fn write_nifti<P: AsRef<Path>>(path: P, volume: &StatVolume) -> Result<()> {
    let (nx, ny, nz) = volume.shape();
    let affine = volume.space().affine();

    let mut header = vec![0u8; HEADER_SIZE];
    LittleEndian::write_i32(&mut header[offsets::SIZEOF_HDR..], HEADER_SIZE as i32);

    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, d) in dim.iter().enumerate() {
        LittleEndian::write_i16(&mut header[offsets::DIM + 2 * i..], *d);
    }

    LittleEndian::write_i16(&mut header[offsets::DATATYPE..], DT_FLOAT32);
    LittleEndian::write_i16(&mut header[offsets::BITPIX..], 32);

    // pixdim[0] is the qfac; 1.0 keeps readers that consult it happy.
    let mut pixdim = [0.0f32; 8];
    pixdim[0] = 1.0;
    for axis in 0..3 {
        let col = affine.fixed_view::<3, 1>(0, axis);
        pixdim[axis + 1] = col.norm() as f32;
    }
    for (i, p) in pixdim.iter().enumerate() {
        LittleEndian::write_f32(&mut header[offsets::PIXDIM + 4 * i..], *p);
    }

    LittleEndian::write_f32(&mut header[offsets::VOX_OFFSET..], VOX_OFFSET as f32);
    LittleEndian::write_f32(&mut header[offsets::SCL_SLOPE..], 1.0);
    LittleEndian::write_f32(&mut header[offsets::SCL_INTER..], 0.0);
    header[offsets::XYZT_UNITS] = UNITS_MM;

    let descrip = b"cbma-contrast";
    header[offsets::DESCRIP..offsets::DESCRIP + descrip.len()].copy_from_slice(descrip);

    LittleEndian::write_i16(&mut header[offsets::QFORM_CODE..], 0);
    LittleEndian::write_i16(&mut header[offsets::SFORM_CODE..], SFORM_ALIGNED);
    for (row, offset) in [offsets::SROW_X, offsets::SROW_Y, offsets::SROW_Z]
        .iter()
        .enumerate()
    {
        for col in 0..4 {
            LittleEndian::write_f32(
                &mut header[offset + 4 * col..],
                affine[(row, col)] as f32,
            );
        }
    }

    header[offsets::MAGIC..offsets::MAGIC + 4].copy_from_slice(b"n+1\0");

    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    encoder.write_all(&header)?;
    // Four zero bytes: no header extensions.
    encoder.write_all(&[0u8; 4])?;

    // NIfTI stores x fastest, then y, then z.
    let data = volume.data();
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                encoder.write_f32::<LittleEndian>(data[(i, j, k)] as f32)?;
            }
        }
    }
    encoder.finish()?.flush()?;
    Ok(())
}

/// Read a gzipped NIfTI-1 volume.
pub fn read_nifti<P: AsRef<Path>>(path: P) -> Result<StatVolume> {
    let file = File::open(&path)?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut bytes = Vec::new();
    decoder
        .read_to_end(&mut bytes)
        .map_err(|e| CbmaError::Nifti(format!("Not a valid gzip stream: {}", e)))?;

    if bytes.len() < HEADER_SIZE {
        return Err(CbmaError::Nifti(format!(
            "File too short for a NIfTI-1 header: {} bytes",
            bytes.len()
        )));
    }

    let sizeof_le = LittleEndian::read_i32(&bytes[offsets::SIZEOF_HDR..]);
    let big_endian = match sizeof_le {
        x if x == HEADER_SIZE as i32 => false,
        x if x.swap_bytes() == HEADER_SIZE as i32 => true,
        other => {
            return Err(CbmaError::Nifti(format!(
                "Bad sizeof_hdr {}, expected {}",
                other, HEADER_SIZE
            )))
        }
    };

    let magic = &bytes[offsets::MAGIC..offsets::MAGIC + 4];
    if magic != b"n+1\0" {
        if magic.starts_with(b"ni1") {
            return Err(CbmaError::Nifti(
                "Two-file NIfTI (.hdr/.img) is not supported".to_string(),
            ));
        }
        return Err(CbmaError::Nifti("Bad NIfTI magic".to_string()));
    }

    let read_i16 = |off: usize| -> i16 {
        if big_endian {
            BigEndian::read_i16(&bytes[off..])
        } else {
            LittleEndian::read_i16(&bytes[off..])
        }
    };
    let read_f32 = |off: usize| -> f32 {
        if big_endian {
            BigEndian::read_f32(&bytes[off..])
        } else {
            LittleEndian::read_f32(&bytes[off..])
        }
    };

    let ndim = read_i16(offsets::DIM);
    if !(1..=7).contains(&ndim) {
        return Err(CbmaError::Nifti(format!("Bad dim[0] = {}", ndim)));
    }
    let mut dims = [1usize; 7];
    for (i, d) in dims.iter_mut().enumerate().take(ndim as usize) {
        let v = read_i16(offsets::DIM + 2 * (i + 1));
        if v < 1 {
            return Err(CbmaError::Nifti(format!("Bad dim[{}] = {}", i + 1, v)));
        }
        *d = v as usize;
    }
    if dims[3..].iter().any(|&d| d != 1) {
        return Err(CbmaError::Nifti(
            "Only 3-D volumes are supported".to_string(),
        ));
    }
    let (nx, ny, nz) = (dims[0], dims[1], dims[2]);

    let datatype = read_i16(offsets::DATATYPE);
    let elem_size = match datatype {
        DT_FLOAT32 => 4,
        DT_FLOAT64 => 8,
        other => {
            return Err(CbmaError::Nifti(format!(
                "Unsupported datatype code {}",
                other
            )))
        }
    };

    let vox_offset = read_f32(offsets::VOX_OFFSET) as usize;
    if vox_offset < HEADER_SIZE {
        return Err(CbmaError::Nifti(format!(
            "Bad vox_offset {}",
            vox_offset
        )));
    }
    let n_voxels = nx * ny * nz;
    let expected = vox_offset + n_voxels * elem_size;
    if bytes.len() < expected {
        return Err(CbmaError::Nifti(format!(
            "Truncated data: expected {} bytes, found {}",
            expected,
            bytes.len()
        )));
    }

    let scl_slope = read_f32(offsets::SCL_SLOPE) as f64;
    let scl_inter = read_f32(offsets::SCL_INTER) as f64;
    let scale = |v: f64| -> f64 {
        if scl_slope != 0.0 && (scl_slope != 1.0 || scl_inter != 0.0) {
            v * scl_slope + scl_inter
        } else {
            v
        }
    };

    let mut data = Array3::zeros((nx, ny, nz));
    let mut cursor = vox_offset;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let raw = match datatype {
                    DT_FLOAT32 => read_f32(cursor) as f64,
                    _ => {
                        if big_endian {
                            BigEndian::read_f64(&bytes[cursor..])
                        } else {
                            LittleEndian::read_f64(&bytes[cursor..])
                        }
                    }
                };
                data[(i, j, k)] = scale(raw);
                cursor += elem_size;
            }
        }
    }

    let affine = read_affine(&read_i16, &read_f32)?;
    let space = VolumeSpace::new((nx, ny, nz), affine)?;
    StatVolume::new(data, space)
}

/// Affine from the sform fields, falling back to a pixdim diagonal when no
/// sform is present (quaternion qforms are not decoded).
fn read_affine(
    read_i16: &dyn Fn(usize) -> i16,
    read_f32: &dyn Fn(usize) -> f32,
) -> Result<Matrix4<f64>> {
    let sform_code = read_i16(offsets::SFORM_CODE);
    if sform_code > 0 {
        let mut affine = Matrix4::identity();
        for (row, offset) in [offsets::SROW_X, offsets::SROW_Y, offsets::SROW_Z]
            .iter()
            .enumerate()
        {
            for col in 0..4 {
                affine[(row, col)] = read_f32(offset + 4 * col) as f64;
            }
        }
        return Ok(affine);
    }

    warn!("No sform in NIfTI header; falling back to pixdim spacing");
    let mut affine = Matrix4::identity();
    for axis in 0..3 {
        let spacing = read_f32(offsets::PIXDIM + 4 * (axis + 1)) as f64;
        if spacing <= 0.0 {
            return Err(CbmaError::Nifti(format!(
                "Non-positive pixdim[{}] = {}",
                axis + 1,
                spacing
            )));
        }
        affine[(axis, axis)] = spacing;
    }
    Ok(affine)
}
