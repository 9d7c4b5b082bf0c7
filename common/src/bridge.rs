//! Conversion from bus image messages to the in-memory RGB bitmap the
//! capture node displays and saves.

use std::io::Cursor;
use std::str::FromStr;

use image::{ImageReader, Rgb, RgbImage};

use crate::frame::{ImageMessage, ImagePayload, RawImage};

/// A decoded camera image: 8-bit RGB, `height x width x 3`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Pixel encodings accepted in raw image messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoding {
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Mono8,
    Mono16,
}

impl PixelEncoding {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Mono8 => 1,
            Self::Mono16 => 2,
        }
    }

    fn to_rgb(self, px: &[u8], is_bigendian: bool) -> Rgb<u8> {
        match self {
            Self::Rgb8 | Self::Rgba8 => Rgb([px[0], px[1], px[2]]),
            Self::Bgr8 | Self::Bgra8 => Rgb([px[2], px[1], px[0]]),
            Self::Mono8 => Rgb([px[0]; 3]),
            Self::Mono16 => {
                let value = if is_bigendian {
                    u16::from_be_bytes([px[0], px[1]])
                } else {
                    u16::from_le_bytes([px[0], px[1]])
                };
                Rgb([(value >> 8) as u8; 3])
            }
        }
    }
}

impl FromStr for PixelEncoding {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rgb8" => Ok(Self::Rgb8),
            "bgr8" => Ok(Self::Bgr8),
            "rgba8" => Ok(Self::Rgba8),
            "bgra8" => Ok(Self::Bgra8),
            "mono8" => Ok(Self::Mono8),
            "mono16" => Ok(Self::Mono16),
            other => Err(DecodeError::UnsupportedEncoding(other.to_string())),
        }
    }
}

/// Decode a message into a [`Frame`] using its encoding tag.
pub fn decode(msg: &ImageMessage) -> Result<Frame, DecodeError> {
    let image = match &msg.payload {
        ImagePayload::Compressed(data) => decode_compressed(data)?,
        ImagePayload::Raw(raw) => decode_raw(raw)?,
    };
    Ok(Frame {
        image,
        captured_at_ms: msg.captured_at_ms,
        seq: msg.seq,
    })
}

fn decode_compressed(data: &[u8]) -> Result<RgbImage, DecodeError> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| DecodeError::Compressed(e.to_string()))?
        .decode()
        .map_err(|e| DecodeError::Compressed(e.to_string()))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(DecodeError::EmptyImage);
    }
    Ok(img.to_rgb8())
}

fn decode_raw(raw: &RawImage) -> Result<RgbImage, DecodeError> {
    let encoding: PixelEncoding = raw.encoding.parse()?;
    if raw.width == 0 || raw.height == 0 {
        return Err(DecodeError::EmptyImage);
    }

    let bpp = encoding.bytes_per_pixel();
    let row_bytes = raw.width as u64 * bpp as u64;
    let step = raw.step as u64;
    if step < row_bytes {
        return Err(DecodeError::StrideTooSmall {
            step: raw.step,
            row_bytes,
        });
    }
    let expected = step * raw.height as u64;
    if (raw.data.len() as u64) < expected {
        return Err(DecodeError::Truncated {
            got: raw.data.len(),
            expected,
        });
    }

    let step = raw.step as usize;
    Ok(RgbImage::from_fn(raw.width, raw.height, |x, y| {
        let offset = y as usize * step + x as usize * bpp;
        encoding.to_rgb(&raw.data[offset..offset + bpp], raw.is_bigendian)
    }))
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported pixel encoding {0:?}")]
    UnsupportedEncoding(String),
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("row stride {step} is smaller than one row of pixels ({row_bytes} bytes)")]
    StrideTooSmall { step: u32, row_bytes: u64 },
    #[error("pixel data truncated: got {got} bytes, expected {expected}")]
    Truncated { got: usize, expected: u64 },
    #[error("failed to decode compressed image: {0}")]
    Compressed(String),
}
