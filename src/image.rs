//! Source and generated image types.

use crate::error::{Result, TurnaroundError};
use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format (modern, efficient).
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Attempts to map a MIME type to a format.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.trim().to_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }
}

/// Decodes a base64 payload that may be imperfectly formatted.
///
/// Data-URL payloads pasted or relayed through other tools frequently carry
/// embedded whitespace or missing `=` padding, which strict decoders reject.
pub(crate) fn decode_base64_lenient(input: &str) -> Result<Vec<u8>> {
    use base64::Engine;

    let cleaned: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    if let Ok(data) = base64::engine::general_purpose::STANDARD.decode(&cleaned) {
        return Ok(data);
    }

    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(&cleaned)
        .map_err(|e| TurnaroundError::Decode(e.to_string()))
}

/// A user-supplied source image awaiting analysis and view generation.
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// Image format detected at intake.
    pub format: ImageFormat,
}

impl SourceImage {
    /// Loads a source image from a file, detecting its format from magic
    /// bytes. Files that are not a supported image are rejected.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let format = ImageFormat::from_magic_bytes(&data).ok_or_else(|| {
            TurnaroundError::InvalidRequest(format!(
                "{} is not a supported image (png, jpeg, webp)",
                path.as_ref().display()
            ))
        })?;
        Ok(Self { data, format })
    }

    /// Parses a `data:<mime>;base64,<payload>` URL.
    ///
    /// The MIME type must start with `image/`; the payload is decoded
    /// leniently.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| TurnaroundError::InvalidRequest("invalid data URL format".into()))?;
        let (mime, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| TurnaroundError::InvalidRequest("invalid data URL format".into()))?;

        if !mime.starts_with("image/") {
            return Err(TurnaroundError::InvalidRequest(format!(
                "not an image MIME type: {mime}"
            )));
        }

        let data = decode_base64_lenient(payload)?;
        let format = ImageFormat::from_mime_type(mime)
            .or_else(|| ImageFormat::from_magic_bytes(&data))
            .ok_or_else(|| TurnaroundError::InvalidRequest(format!("unsupported image MIME type: {mime}")))?;

        Ok(Self { data, format })
    }

    /// Returns the MIME type of this image.
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Encodes the image data as base64.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Returns the image as an embeddable data URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), self.to_base64())
    }
}

/// Metadata about a single generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationMetadata {
    /// Model used for generation.
    pub model: Option<String>,
    /// Generation duration in milliseconds.
    pub duration_ms: Option<u64>,
}

/// A generated image with its data and metadata.
#[derive(Debug, Clone)]
#[must_use = "generated image should be saved or processed"]
pub struct GeneratedImage {
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// Image format.
    pub format: ImageFormat,
    /// Provider that generated this image.
    pub provider: ProviderKind,
    /// Generation metadata.
    pub metadata: GenerationMetadata,
}

impl GeneratedImage {
    /// Creates a new generated image.
    pub fn new(
        data: Vec<u8>,
        format: ImageFormat,
        provider: ProviderKind,
        metadata: GenerationMetadata,
    ) -> Self {
        Self {
            data,
            format,
            provider,
            metadata,
        }
    }

    /// Returns the size of the image data in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Saves the image to the specified path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.data)?;
        Ok(())
    }

    /// Encodes the image data as base64.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Returns the image as an embeddable data URL.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            self.to_base64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_MAGIC: [u8; 12] = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0];
    const WEBP_MAGIC: [u8; 12] = *b"RIFF\x00\x00\x00\x00WEBP";

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            ImageFormat::from_magic_bytes(&PNG_MAGIC),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&JPEG_MAGIC),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&WEBP_MAGIC),
            Some(ImageFormat::WebP)
        );
        assert_eq!(ImageFormat::from_magic_bytes(b"not an image"), None);
    }

    #[test]
    fn test_format_from_mime_type() {
        assert_eq!(ImageFormat::from_mime_type("image/png"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_mime_type("image/jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_mime_type("text/html"), None);
    }

    #[test]
    fn test_decode_base64_lenient() {
        // "hello" with embedded newline and stripped padding
        assert_eq!(decode_base64_lenient("aGVs\nbG8").unwrap(), b"hello");
        assert_eq!(decode_base64_lenient("aGVsbG8=").unwrap(), b"hello");
        assert!(decode_base64_lenient("!!not base64!!").is_err());
    }

    #[test]
    fn test_source_image_from_data_url() {
        use base64::Engine;
        let payload = base64::engine::general_purpose::STANDARD.encode(PNG_MAGIC);
        let url = format!("data:image/png;base64,{payload}");

        let image = SourceImage::from_data_url(&url).unwrap();
        assert_eq!(image.format, ImageFormat::Png);
        assert_eq!(image.data, PNG_MAGIC);
        assert_eq!(image.to_data_url(), url);
    }

    #[test]
    fn test_source_image_rejects_non_image_mime() {
        let err = SourceImage::from_data_url("data:text/plain;base64,aGVsbG8=").unwrap_err();
        assert!(matches!(err, TurnaroundError::InvalidRequest(_)));
    }

    #[test]
    fn test_source_image_rejects_malformed_url() {
        assert!(SourceImage::from_data_url("image/png;base64,abcd").is_err());
        assert!(SourceImage::from_data_url("data:image/png,abcd").is_err());
    }

    #[test]
    fn test_source_image_from_path_rejects_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, b"just some text, long enough to scan").unwrap();
        assert!(SourceImage::from_path(&path).is_err());

        let png = dir.path().join("pic.png");
        std::fs::write(&png, PNG_MAGIC).unwrap();
        let image = SourceImage::from_path(&png).unwrap();
        assert_eq!(image.format, ImageFormat::Png);
    }

    #[test]
    fn test_generated_image_data_url() {
        let image = GeneratedImage::new(
            PNG_MAGIC.to_vec(),
            ImageFormat::Png,
            ProviderKind::Gemini,
            GenerationMetadata::default(),
        );
        assert!(image.to_data_url().starts_with("data:image/png;base64,"));
        assert_eq!(image.size(), 12);
    }
}
