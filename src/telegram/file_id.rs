//! Decoder for Bot-API style file ids.
//!
//! A file id is url-safe base64 over a run-length encoded buffer. Zero
//! bytes are stored as `0x00, count`. The last byte is the format version
//! (4 for current ids, which also carry a sub-version byte before it).
//! The payload starts with two little-endian `i32`s (file type and DC id),
//! followed by an optional TL-serialized file reference and the media id
//! and access hash as little-endian `i64`s.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use grammers_tl_types as tl;
use thiserror::Error;

const FILE_REFERENCE_FLAG: i32 = 1 << 25;
const WEB_LOCATION_FLAG: i32 = 1 << 24;

/// File type tag of stickers.
pub const FILE_TYPE_STICKER: i32 = 8;

/// Errors raised while decoding a file id.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FileIdError {
    #[error("file id is not valid base64")]
    Base64,

    #[error("file id is truncated")]
    Truncated,

    #[error("web-location file ids cannot be sent by reference")]
    WebLocation,

    #[error("file id has type {0}, expected a sticker")]
    NotSticker(i32),
}

/// A decoded file id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileId {
    /// File type tag with the flag bits removed.
    pub file_type: i32,
    /// Datacenter holding the file.
    pub dc_id: i32,
    /// File reference, empty when the id carries none.
    pub file_reference: Vec<u8>,
    /// Document or photo id.
    pub media_id: i64,
    /// Access hash of the media.
    pub access_hash: i64,
}

impl FileId {
    /// Decodes a Bot-API file id string.
    pub fn decode(file_id: &str) -> Result<Self, FileIdError> {
        let raw = URL_SAFE_NO_PAD
            .decode(file_id.trim().trim_end_matches('='))
            .map_err(|_| FileIdError::Base64)?;
        let buffer = rle_decode(&raw);

        let version = *buffer.last().ok_or(FileIdError::Truncated)?;
        let payload_len = if version >= 4 {
            buffer.len().checked_sub(2)
        } else {
            buffer.len().checked_sub(1)
        }
        .ok_or(FileIdError::Truncated)?;

        let mut reader = Reader::new(&buffer[..payload_len]);

        let mut file_type = reader.i32()?;
        let dc_id = reader.i32()?;

        if file_type & WEB_LOCATION_FLAG != 0 {
            return Err(FileIdError::WebLocation);
        }

        let file_reference = if file_type & FILE_REFERENCE_FLAG == 0 {
            Vec::new()
        } else {
            file_type &= !FILE_REFERENCE_FLAG;
            reader.tl_bytes()?
        };

        let media_id = reader.i64()?;
        let access_hash = reader.i64()?;

        Ok(Self {
            file_type,
            dc_id,
            file_reference,
            media_id,
            access_hash,
        })
    }

    /// Whether the id refers to a sticker.
    #[must_use]
    pub fn is_sticker(&self) -> bool {
        self.file_type == FILE_TYPE_STICKER
    }

    /// Decodes a file id that must refer to a sticker.
    pub fn decode_sticker(file_id: &str) -> Result<Self, FileIdError> {
        Self::decode(file_id)?.ensure_sticker()
    }

    fn ensure_sticker(self) -> Result<Self, FileIdError> {
        if self.is_sticker() {
            Ok(self)
        } else {
            Err(FileIdError::NotSticker(self.file_type))
        }
    }

    /// Builds the input document used to send the file by reference.
    #[must_use]
    pub fn to_input_document(&self) -> tl::enums::InputDocument {
        tl::types::InputDocument {
            id: self.media_id,
            access_hash: self.access_hash,
            file_reference: self.file_reference.clone(),
        }
        .into()
    }
}

/// Expands `0x00, n` pairs into `n` zero bytes.
fn rle_decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut zero_pending = false;

    for &byte in data {
        if zero_pending {
            out.extend(std::iter::repeat_n(0, usize::from(byte)));
            zero_pending = false;
        } else if byte == 0 {
            zero_pending = true;
        } else {
            out.push(byte);
        }
    }

    out
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FileIdError> {
        let end = self.pos.checked_add(n).ok_or(FileIdError::Truncated)?;
        let slice = self.data.get(self.pos..end).ok_or(FileIdError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FileIdError> {
        self.take(N)?
            .try_into()
            .map_err(|_| FileIdError::Truncated)
    }

    fn i32(&mut self) -> Result<i32, FileIdError> {
        self.array().map(i32::from_le_bytes)
    }

    fn i64(&mut self) -> Result<i64, FileIdError> {
        self.array().map(i64::from_le_bytes)
    }

    /// Reads TL `bytes`: a 1-byte length (or 254 and a 3-byte length),
    /// the data, then padding up to a multiple of four.
    fn tl_bytes(&mut self) -> Result<Vec<u8>, FileIdError> {
        let first = self.take(1)?[0];
        let (len, header) = if first == 254 {
            let [a, b, c] = self.array::<3>()?;
            (usize::from(a) | (usize::from(b) << 8) | (usize::from(c) << 16), 4)
        } else {
            (usize::from(first), 1)
        };

        let bytes = self.take(len)?.to_vec();
        let padding = (4 - (header + len) % 4) % 4;
        self.take(padding)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STICKER: &str =
        "CAACAgUAAx0EX9CqtwACBvdpYhcQ4xFR18TbqiDxMasDZ4EWOQACLwQAAt4AAXFVonEmaEmbIrYeBA";

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_rle_decode() {
        assert_eq!(rle_decode(&[1, 0, 3, 2]), vec![1, 0, 0, 0, 2]);
        assert_eq!(rle_decode(&[5, 6]), vec![5, 6]);
        assert_eq!(rle_decode(&[0, 0]), Vec::<u8>::new());
    }

    #[test]
    fn test_decode_sticker_id() {
        let decoded = FileId::decode(STICKER).unwrap();

        assert!(decoded.is_sticker());
        assert_eq!(decoded.dc_id, 5);
        assert_eq!(
            decoded.file_reference,
            hex("045fd0aab7000006f769621710e31151d7c4dbaa20f131ab0367811639")
        );
        assert_eq!(decoded.media_id, 6_156_703_119_074_919_471);
        assert_eq!(decoded.access_hash, -5_322_521_070_016_237_150);
    }

    #[test]
    fn test_decode_sticker_rejects_other_types() {
        assert!(FileId::decode_sticker(STICKER).is_ok());

        let document = FileId {
            file_type: 5,
            ..FileId::decode(STICKER).unwrap()
        };
        assert_eq!(document.ensure_sticker(), Err(FileIdError::NotSticker(5)));
    }

    #[test]
    fn test_decode_accepts_padding() {
        let padded = format!("{STICKER}==");
        assert_eq!(FileId::decode(&padded), FileId::decode(STICKER));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(FileId::decode("not*base64"), Err(FileIdError::Base64));
        assert_eq!(FileId::decode("CAAC"), Err(FileIdError::Truncated));
        assert_eq!(FileId::decode(""), Err(FileIdError::Truncated));
    }

    #[test]
    fn test_tl_bytes_padding() {
        // length 3 + header 1 = 4, no padding; then a trailing marker byte
        let data = [3, 0xaa, 0xbb, 0xcc, 0x01];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.tl_bytes().unwrap(), vec![0xaa, 0xbb, 0xcc]);
        assert_eq!(reader.take(1).unwrap(), &[0x01]);

        // length 1 + header 1 = 2, two padding bytes
        let data = [1, 0xaa, 0, 0, 0x02];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.tl_bytes().unwrap(), vec![0xaa]);
        assert_eq!(reader.take(1).unwrap(), &[0x02]);
    }
}
