//! PGX tile payload format.
//!
//! PGX is the single-component raw format OpenJPEG's `opj_decompress` emits
//! when asked for a `.pgx` output. Each component of a decoded tile lands in
//! its own file:
//!
//! ```text
//! "PG" SP ("ML" | "LM") SP ("+" | "-") SP <bit depth> SP <width> SP <height> LF
//! <width * height samples, row-major, no padding>
//! ```
//!
//! `ML` means most significant byte first. Samples take one byte when the
//! bit depth is 8 or less and two bytes otherwise.
//!
//! # Placement
//!
//! A tile at the right or bottom border of the image is cut short by the
//! image edge, so the payload may declare fewer samples than the destination
//! tile holds. Such payloads are copied into the top-left corner of the
//! destination and every other cell is zeroed. A payload declaring more than
//! the destination holds is rejected as corrupt.

use crate::error::{FormatError, TileError};

/// Number of space-separated tokens in a PGX header line
const HEADER_TOKENS: usize = 6;

// =============================================================================
// Sample byte order
// =============================================================================

/// Byte order of the samples following the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOrder {
    /// "ML": most significant byte first
    BigEndian,
    /// "LM": least significant byte first
    LittleEndian,
}

impl SampleOrder {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "LM" => SampleOrder::LittleEndian,
            _ => SampleOrder::BigEndian,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            SampleOrder::BigEndian => "ML",
            SampleOrder::LittleEndian => "LM",
        }
    }

    #[inline]
    fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            SampleOrder::BigEndian => u16::from_be_bytes([bytes[0], bytes[1]]),
            SampleOrder::LittleEndian => u16::from_le_bytes([bytes[0], bytes[1]]),
        }
    }
}

// =============================================================================
// Header
// =============================================================================

/// Parsed PGX header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgxHeader {
    /// Sample byte order
    pub order: SampleOrder,

    /// Whether samples are declared signed
    pub signed: bool,

    /// Declared bit depth
    pub bit_depth: u32,

    /// Declared width in samples
    pub width: usize,

    /// Declared height in samples
    pub height: usize,
}

impl PgxHeader {
    /// Bytes per stored sample.
    pub fn sample_size(&self) -> usize {
        if self.bit_depth <= 8 {
            1
        } else {
            2
        }
    }

    /// Number of samples declared by the header.
    pub fn sample_count(&self) -> usize {
        self.width * self.height
    }

    /// Parse the header line, returning the header and the payload that follows it.
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8]), FormatError> {
        let line_end = data.iter().position(|&b| b == b'\n').ok_or_else(|| {
            FormatError::UnexpectedTileFormat("no header line terminator".to_string())
        })?;

        let line = std::str::from_utf8(&data[..line_end])
            .map_err(|_| FormatError::UnexpectedTileFormat("header is not ASCII".to_string()))?;
        let line = line.strip_suffix('\r').unwrap_or(line);

        let tokens: Vec<&str> = line.split(' ').collect();
        if tokens.len() != HEADER_TOKENS {
            return Err(FormatError::UnexpectedTileFormat(format!(
                "expected {} header tokens, got {}",
                HEADER_TOKENS,
                tokens.len()
            )));
        }

        let header = PgxHeader {
            order: SampleOrder::from_tag(tokens[1]),
            signed: tokens[2] == "-",
            bit_depth: parse_number("bit depth", tokens[3])?,
            width: parse_number("width", tokens[4])?,
            height: parse_number("height", tokens[5])?,
        };

        Ok((header, &data[line_end + 1..]))
    }

    /// Render the header line, including the trailing newline.
    pub fn to_line(&self) -> String {
        format!(
            "PG {} {} {} {} {}\n",
            self.order.tag(),
            if self.signed { "-" } else { "+" },
            self.bit_depth,
            self.width,
            self.height
        )
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, token: &str) -> Result<T, FormatError> {
    token.parse().map_err(|_| FormatError::InvalidNumber {
        field,
        value: token.to_string(),
    })
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse one component payload into a tile buffer.
///
/// `tile` must hold exactly `tile_width * tile_height` samples. Payloads
/// smaller than the tile are placed top-left and the remainder is zeroed.
///
/// # Errors
///
/// - [`TileError::Format`] if the header is malformed or the payload is short
/// - [`TileError::Corruption`] if the declared size exceeds the tile
///
/// # Panics
///
/// Panics if `tile.len() != tile_width * tile_height`.
pub fn parse_tile(
    data: &[u8],
    tile_width: usize,
    tile_height: usize,
    tile: &mut [u16],
) -> Result<PgxHeader, TileError> {
    assert_eq!(
        tile_width * tile_height,
        tile.len(),
        "tile buffer holds {} samples, expected {}x{}",
        tile.len(),
        tile_width,
        tile_height
    );

    let (header, payload) = PgxHeader::parse(data)?;

    if header.width > tile_width || header.height > tile_height {
        return Err(TileError::Corruption {
            width: header.width,
            height: header.height,
            tile_width,
            tile_height,
        });
    }

    let count = header.sample_count();
    let needed = count * header.sample_size();
    if payload.len() < needed {
        return Err(FormatError::Truncated {
            expected: needed,
            actual: payload.len(),
        }
        .into());
    }
    let payload = &payload[..needed];

    if count == tile.len() {
        decode_samples(&header, payload, tile);
    } else if count < tile.len() {
        let mut samples = vec![0u16; count];
        decode_samples(&header, payload, &mut samples);

        tile.fill(0);
        if header.width > 0 {
            for (y, row) in samples.chunks_exact(header.width).enumerate() {
                let start = y * tile_width;
                tile[start..start + header.width].copy_from_slice(row);
            }
        }
    } else {
        // Unreachable after the dimension check above.
        tile.fill(0);
    }

    Ok(header)
}

fn decode_samples(header: &PgxHeader, payload: &[u8], out: &mut [u16]) {
    match header.sample_size() {
        1 => {
            for (dst, &b) in out.iter_mut().zip(payload) {
                *dst = b as u16;
            }
        }
        _ => {
            for (dst, pair) in out.iter_mut().zip(payload.chunks_exact(2)) {
                *dst = header.order.read_u16(pair);
            }
        }
    }
}

// =============================================================================
// Writing
// =============================================================================

/// Encode samples as a big-endian PGX payload.
///
/// # Panics
///
/// Panics if `samples.len() != width * height`.
pub fn write_pgx(bit_depth: u32, width: usize, height: usize, samples: &[u16]) -> Vec<u8> {
    assert_eq!(samples.len(), width * height, "sample count mismatch");

    let header = PgxHeader {
        order: SampleOrder::BigEndian,
        signed: false,
        bit_depth,
        width,
        height,
    };

    let mut out = header.to_line().into_bytes();
    out.reserve(samples.len() * header.sample_size());
    if header.sample_size() == 1 {
        out.extend(samples.iter().map(|&s| s.min(u8::MAX as u16) as u8));
    } else {
        for s in samples {
            out.extend_from_slice(&s.to_be_bytes());
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
