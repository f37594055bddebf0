//! JPEG 2000 main-header parsing for layout discovery.
//!
//! Only the geometry needed to address tiles is read; no entropy-coded data
//! is touched. Two container shapes are accepted:
//!
//! ## JP2 (ISO/IEC 15444-1 Annex I)
//! ```text
//! Box:  LBox (u32) | TBox (4 bytes) | [XLBox (u64) if LBox == 1] | payload
//! The first box is the 12-byte signature box "jP  " 0D0A870A.
//! The codestream lives in the "jp2c" box.
//! ```
//!
//! ## Raw codestream (J2K)
//! ```text
//! SOC (FF4F) | SIZ (FF51) | ... COD (FF52) ... | SOT (FF90) ...
//! ```
//!
//! All values are big-endian.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;

use crate::error::FormatError;
use crate::raster::Layout;

// =============================================================================
// Markers
// =============================================================================

/// Start of codestream
pub const SOC: u16 = 0xFF4F;

/// Image and tile size
pub const SIZ: u16 = 0xFF51;

/// Coding style default
pub const COD: u16 = 0xFF52;

/// Start of tile-part
pub const SOT: u16 = 0xFF90;

/// End of codestream
pub const EOC: u16 = 0xFFD9;

/// JP2 signature box, including its length and type fields
pub const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

/// Fixed part of the SIZ segment, excluding the per-component triples
const SIZ_FIXED_LEN: usize = 36;

// =============================================================================
// Codestream summary
// =============================================================================

/// Geometry and sample format read from a codestream main header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodestreamInfo {
    /// Tile geometry of the image
    pub layout: Layout,

    /// Bit depth of component 0
    pub bit_depth: u8,

    /// Whether component 0 holds signed samples
    pub signed: bool,
}

/// Resolve the layout of a JPEG 2000 file.
pub fn resolve_layout(path: &Path) -> Result<Layout, FormatError> {
    Ok(read_codestream_info(path)?.layout)
}

/// Read the main header of a JP2 or J2K file on disk.
pub fn read_codestream_info(path: &Path) -> Result<CodestreamInfo, FormatError> {
    let file = File::open(path)?;
    parse_codestream_info(&mut BufReader::new(file))
}

/// Parse a JP2 or J2K stream positioned at its first byte.
pub fn parse_codestream_info<R: Read + Seek>(reader: &mut R) -> Result<CodestreamInfo, FormatError> {
    let mut magic = [0u8; 12];
    let n = read_up_to(reader, &mut magic)?;

    if n >= 2 && u16::from_be_bytes([magic[0], magic[1]]) == SOC {
        reader.seek(SeekFrom::Start(0))?;
    } else if n == magic.len() && magic == JP2_SIGNATURE {
        seek_to_codestream_box(reader)?;
    } else {
        return Err(FormatError::NotJpeg2000(
            "missing JP2 signature or SOC marker".to_string(),
        ));
    }

    parse_main_header(reader)
}

/// Walk JP2 boxes following the signature box until the "jp2c" payload.
fn seek_to_codestream_box<R: Read + Seek>(reader: &mut R) -> Result<(), FormatError> {
    loop {
        let mut header = [0u8; 8];
        if read_up_to(reader, &mut header)? < header.len() {
            return Err(FormatError::MissingMarker("jp2c"));
        }

        let lbox = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let tbox = &header[4..8];

        let (box_len, header_len) = match lbox {
            0 => (None, 8),
            1 => {
                let mut xl = [0u8; 8];
                reader.read_exact(&mut xl)?;
                (Some(u64::from_be_bytes(xl)), 16)
            }
            n => (Some(n), 8),
        };

        if tbox == b"jp2c" {
            return Ok(());
        }

        match box_len {
            Some(len) if len >= header_len => {
                let skip = i64::try_from(len - header_len)
                    .map_err(|_| FormatError::TruncatedSegment("box"))?;
                reader.seek(SeekFrom::Current(skip))?;
            }
            Some(_) => return Err(FormatError::TruncatedSegment("box")),
            // A length-0 box runs to the end of the file.
            None => return Err(FormatError::MissingMarker("jp2c")),
        }
    }
}

fn parse_main_header<R: Read>(reader: &mut R) -> Result<CodestreamInfo, FormatError> {
    if read_marker(reader)? != SOC {
        return Err(FormatError::MissingMarker("SOC"));
    }
    if read_marker(reader)? != SIZ {
        return Err(FormatError::MissingMarker("SIZ"));
    }
    let siz = read_segment(reader, "SIZ")?;

    let levels = loop {
        match read_marker(reader)? {
            COD => {
                let cod = read_segment(reader, "COD")?;
                if cod.len() < 6 {
                    return Err(FormatError::TruncatedSegment("COD"));
                }
                break cod[5] as u32;
            }
            SOT | EOC => return Err(FormatError::MissingMarker("COD")),
            _ => {
                read_segment(reader, "marker")?;
            }
        }
    };

    decode_siz(&siz, levels + 1)
}

fn decode_siz(siz: &[u8], num_resolutions: u32) -> Result<CodestreamInfo, FormatError> {
    if siz.len() < SIZ_FIXED_LEN {
        return Err(FormatError::TruncatedSegment("SIZ"));
    }

    let u32_at = |i: usize| u32::from_be_bytes([siz[i], siz[i + 1], siz[i + 2], siz[i + 3]]);

    let x_siz = u32_at(2);
    let y_siz = u32_at(6);
    let x_osiz = u32_at(10);
    let y_osiz = u32_at(14);
    let xt_siz = u32_at(18);
    let yt_siz = u32_at(22);
    let xto_siz = u32_at(26);
    let yto_siz = u32_at(30);
    let c_siz = u16::from_be_bytes([siz[34], siz[35]]) as usize;

    if siz.len() < SIZ_FIXED_LEN + 3 * c_siz {
        return Err(FormatError::TruncatedSegment("SIZ"));
    }
    if x_siz <= x_osiz || y_siz <= y_osiz {
        return Err(FormatError::InvalidLayout(format!(
            "image area {}..{} x {}..{}",
            x_osiz, x_siz, y_osiz, y_siz
        )));
    }
    if xt_siz == 0 || yt_siz == 0 || xto_siz > x_osiz || yto_siz > y_osiz {
        return Err(FormatError::InvalidLayout(format!(
            "tile grid {}x{} at ({}, {})",
            xt_siz, yt_siz, xto_siz, yto_siz
        )));
    }

    let num_x_tiles = (x_siz - xto_siz).div_ceil(xt_siz);
    let num_y_tiles = (y_siz - yto_siz).div_ceil(yt_siz);

    let layout = Layout::new(
        num_resolutions,
        c_siz as u32,
        x_siz - x_osiz,
        y_siz - y_osiz,
        num_x_tiles,
        num_y_tiles,
        xto_siz,
        yto_siz,
        xt_siz,
        yt_siz,
    )?
    .with_image_offset(x_osiz, y_osiz);

    let ssiz = siz[SIZ_FIXED_LEN];

    Ok(CodestreamInfo {
        layout,
        bit_depth: (ssiz & 0x7F) + 1,
        signed: ssiz & 0x80 != 0,
    })
}

// =============================================================================
// Low-level readers
// =============================================================================

fn read_marker<R: Read>(reader: &mut R) -> Result<u16, FormatError> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Read a marker segment body; the length field counts itself.
fn read_segment<R: Read>(reader: &mut R, name: &'static str) -> Result<Vec<u8>, FormatError> {
    let len = read_marker(reader)? as usize;
    if len < 2 {
        return Err(FormatError::TruncatedSegment(name));
    }
    let mut body = vec![0u8; len - 2];
    reader
        .read_exact(&mut body)
        .map_err(|_| FormatError::TruncatedSegment(name))?;
    Ok(body)
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, FormatError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

// =============================================================================
// Tests
// =============================================================================
