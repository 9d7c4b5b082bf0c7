/// The image carried inside a bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    /// Compressed still (JPEG from MJPEG cameras, PNG also accepted).
    Compressed(Vec<u8>),
    /// Uncompressed pixel rows tagged with their pixel encoding.
    Raw(RawImage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    /// Pixel encoding tag, e.g. `bgr8`, `rgb8`, `mono8`.
    pub encoding: String,
    pub width: u32,
    pub height: u32,
    /// Row stride in bytes.
    pub step: u32,
    /// Byte order of multi-byte channels (`mono16`).
    pub is_bigendian: bool,
    pub data: Vec<u8>,
}

/// A camera image message with timestamp metadata.
///
/// Binary wire formats (big-endian):
///
/// v1 (compressed, backward-compatible with JPEG frame producers):
///   [0..8]   captured_at_ms  (i64, Unix millis)
///   [8..16]  seq             (u64)
///   [16..]   compressed image bytes
///
/// v2 (raw):
///   [0]      version = 0x02
///   [1]      is_bigendian
///   [2..10]  captured_at_ms  (i64)
///   [10..18] seq             (u64)
///   [18..22] width           (u32)
///   [22..26] height          (u32)
///   [26..30] step            (u32)
///   [30]     encoding_len    (u8)
///   [31..31+encoding_len]    encoding (ASCII)
///   [..+4]   data_len        (u32)
///   [..]     data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMessage {
    pub payload: ImagePayload,
    pub captured_at_ms: i64,
    pub seq: u64,
}

/// Encoding tag reported for v1 messages.
pub const COMPRESSED_ENCODING: &str = "compressed";

const V1_HEADER_SIZE: usize = 16; // 8 bytes timestamp + 8 bytes seq
const V2_FIXED_HEADER_SIZE: usize = 31; // up to and including encoding_len
const V2_MARKER: u8 = 0x02;

impl ImageMessage {
    pub fn new_compressed(data: Vec<u8>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload: ImagePayload::Compressed(data),
            captured_at_ms,
            seq,
        }
    }

    pub fn new_raw(raw: RawImage, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload: ImagePayload::Raw(raw),
            captured_at_ms,
            seq,
        }
    }

    pub fn encoding(&self) -> &str {
        match &self.payload {
            ImagePayload::Compressed(_) => COMPRESSED_ENCODING,
            ImagePayload::Raw(raw) => &raw.encoding,
        }
    }

    pub fn payload_size(&self) -> usize {
        match &self.payload {
            ImagePayload::Compressed(data) => data.len(),
            ImagePayload::Raw(raw) => raw.data.len(),
        }
    }

    /// Serialize to the binary bus payload.
    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        match &self.payload {
            ImagePayload::Compressed(data) => {
                let mut buf = Vec::with_capacity(V1_HEADER_SIZE + data.len());
                buf.extend_from_slice(&self.captured_at_ms.to_be_bytes());
                buf.extend_from_slice(&self.seq.to_be_bytes());
                buf.extend_from_slice(data);
                Ok(buf)
            }
            ImagePayload::Raw(raw) => {
                let encoding = raw.encoding.as_bytes();
                let encoding_len = u8::try_from(encoding.len())
                    .map_err(|_| FrameError::EncodingTooLong(encoding.len()))?;
                let data_len = u32::try_from(raw.data.len())
                    .map_err(|_| FrameError::DataTooLong(raw.data.len()))?;

                let mut buf = Vec::with_capacity(
                    V2_FIXED_HEADER_SIZE + encoding.len() + 4 + raw.data.len(),
                );
                buf.push(V2_MARKER);
                buf.push(u8::from(raw.is_bigendian));
                buf.extend_from_slice(&self.captured_at_ms.to_be_bytes());
                buf.extend_from_slice(&self.seq.to_be_bytes());
                buf.extend_from_slice(&raw.width.to_be_bytes());
                buf.extend_from_slice(&raw.height.to_be_bytes());
                buf.extend_from_slice(&raw.step.to_be_bytes());
                buf.push(encoding_len);
                buf.extend_from_slice(encoding);
                buf.extend_from_slice(&data_len.to_be_bytes());
                buf.extend_from_slice(&raw.data);
                Ok(buf)
            }
        }
    }

    /// Deserialize from a binary bus payload. Auto-detects v1 vs v2.
    pub fn deserialize(data: &[u8]) -> Result<Self, FrameError> {
        let mut reader = Reader { data, pos: 0 };

        match data.first() {
            None => Err(FrameError::TooShort {
                got: 0,
                expected: V1_HEADER_SIZE,
            }),
            Some(&V2_MARKER) => {
                if data.len() < V2_FIXED_HEADER_SIZE {
                    return Err(FrameError::TooShort {
                        got: data.len(),
                        expected: V2_FIXED_HEADER_SIZE,
                    });
                }
                reader.skip(1)?;
                let is_bigendian = reader.u8()? != 0;
                let captured_at_ms = i64::from_be_bytes(reader.array()?);
                let seq = u64::from_be_bytes(reader.array()?);
                let width = u32::from_be_bytes(reader.array()?);
                let height = u32::from_be_bytes(reader.array()?);
                let step = u32::from_be_bytes(reader.array()?);
                let encoding_len = reader.u8()? as usize;
                let encoding = std::str::from_utf8(reader.bytes(encoding_len)?)
                    .map_err(|_| FrameError::InvalidEncodingTag)?
                    .to_string();
                let data_len = u32::from_be_bytes(reader.array()?) as usize;
                let pixels = reader.bytes(data_len)?.to_vec();

                Ok(Self::new_raw(
                    RawImage {
                        encoding,
                        width,
                        height,
                        step,
                        is_bigendian,
                        data: pixels,
                    },
                    captured_at_ms,
                    seq,
                ))
            }
            Some(_) => {
                if data.len() < V1_HEADER_SIZE {
                    return Err(FrameError::TooShort {
                        got: data.len(),
                        expected: V1_HEADER_SIZE,
                    });
                }
                let captured_at_ms = i64::from_be_bytes(reader.array()?);
                let seq = u64::from_be_bytes(reader.array()?);
                Ok(Self::new_compressed(
                    data[V1_HEADER_SIZE..].to_vec(),
                    captured_at_ms,
                    seq,
                ))
            }
        }
    }
}

/// Bounds-checked cursor over a payload.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        let end = self.pos.checked_add(len).ok_or(FrameError::TooShort {
            got: self.data.len(),
            expected: usize::MAX,
        })?;
        let slice = self.data.get(self.pos..end).ok_or(FrameError::TooShort {
            got: self.data.len(),
            expected: end,
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.bytes(1)?[0])
    }

    fn skip(&mut self, len: usize) -> Result<(), FrameError> {
        self.bytes(len).map(|_| ())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("image payload too short: got {got} bytes, expected at least {expected}")]
    TooShort { got: usize, expected: usize },
    #[error("encoding tag is not valid UTF-8")]
    InvalidEncodingTag,
    #[error("encoding tag too long: {0} bytes")]
    EncodingTooLong(usize),
    #[error("pixel data too long for the wire format: {0} bytes")]
    DataTooLong(usize),
}
