//! Image type detection from magic bytes.
//!
//! Content-Type headers and file extensions are never trusted; the tag on an
//! [`ImageBlob`] always comes from its bytes.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use crate::common::{EmoteError, EmoteResult};

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_START: &[u8] = b"\xFF\xD8";
const JPEG_END: &[u8] = b"\xFF\xD9";
const GIF87_SIGNATURE: &[u8] = b"GIF87a";
const GIF89_SIGNATURE: &[u8] = b"GIF89a";
const RIFF_SIGNATURE: &[u8] = b"RIFF";
const WEBP_FOURCC: &[u8] = b"WEBP";

/// Image formats accepted as emotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MimeType {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl MimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    /// GIF is the only format the platform stores as an animated emote.
    pub fn is_animated(&self) -> bool {
        matches!(self, Self::Gif)
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify raw bytes as one of the supported image formats.
pub fn classify(data: &[u8]) -> EmoteResult<MimeType> {
    if data.starts_with(PNG_SIGNATURE) {
        return Ok(MimeType::Png);
    }
    if data.starts_with(JPEG_START) && trim_trailing_nuls(data).ends_with(JPEG_END) {
        return Ok(MimeType::Jpeg);
    }
    if data.starts_with(GIF87_SIGNATURE) || data.starts_with(GIF89_SIGNATURE) {
        return Ok(MimeType::Gif);
    }
    if data.starts_with(RIFF_SIGNATURE) && data.get(8..12) == Some(WEBP_FOURCC) {
        return Ok(MimeType::Webp);
    }
    Err(EmoteError::InvalidImage)
}

fn trim_trailing_nuls(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &data[..end]
}

/// Immutable image bytes tagged with their sniffed type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    data: Bytes,
    mime: MimeType,
}

impl ImageBlob {
    /// Wrap bytes, failing with `InvalidImage` if they are not a supported image.
    pub fn new(data: impl Into<Bytes>) -> EmoteResult<Self> {
        let data = data.into();
        let mime = classify(&data)?;
        Ok(Self { data, mime })
    }

    pub fn mime(&self) -> MimeType {
        self.mime
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// `data:` URL in the form the emote creation endpoint expects.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_signatures() {
        assert_eq!(
            classify(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").unwrap(),
            MimeType::Png
        );
        assert_eq!(classify(b"\xFF\xD8\xFF\xE0JFIF\xFF\xD9").unwrap(), MimeType::Jpeg);
        assert_eq!(classify(b"GIF87a\x01\x00").unwrap(), MimeType::Gif);
        assert_eq!(classify(b"GIF89a\x01\x00").unwrap(), MimeType::Gif);
        assert_eq!(classify(b"RIFF\x24\0\0\0WEBPVP8 ").unwrap(), MimeType::Webp);
    }

    #[test]
    fn test_jpeg_with_trailing_padding() {
        assert_eq!(
            classify(b"\xFF\xD8\xFF\xDB\xFF\xD9\0\0\0").unwrap(),
            MimeType::Jpeg
        );
    }

    #[test]
    fn test_truncated_jpeg_rejected() {
        assert!(matches!(
            classify(b"\xFF\xD8\xFF\xDB\x00\x43"),
            Err(EmoteError::InvalidImage)
        ));
    }

    #[test]
    fn test_riff_without_webp_rejected() {
        assert!(classify(b"RIFF\x24\0\0\0WAVEfmt ").is_err());
        assert!(classify(b"RIFF").is_err());
    }

    #[test]
    fn test_other_bytes_rejected() {
        for data in [
            &b""[..],
            b"\0",
            b"GIF88a",
            b"\x89PNG",
            b"BM\x36\0\0\0",
            b"PK\x03\x04",
            b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>",
        ] {
            assert!(
                matches!(classify(data), Err(EmoteError::InvalidImage)),
                "{:?} should be rejected",
                data
            );
        }
    }

    #[test]
    fn test_data_url() {
        let blob = ImageBlob::new(&b"GIF89a"[..]).unwrap();
        assert_eq!(blob.mime(), MimeType::Gif);
        assert_eq!(blob.len(), 6);
        assert_eq!(blob.to_data_url(), "data:image/gif;base64,R0lGODlh");
    }

    #[test]
    fn test_only_gif_is_animated() {
        assert!(MimeType::Gif.is_animated());
        assert!(!MimeType::Png.is_animated());
        assert!(!MimeType::Webp.is_animated());
    }
}
