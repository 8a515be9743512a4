//! Validation of uploaded input rasters.

use image::ImageFormat;

use crate::error::CoreError;

/// The only accepted upload content type.
pub const TIFF_CONTENT_TYPE: &str = "image/tiff";

/// BigTIFF headers (little and big endian), which `image` does not sniff.
const BIGTIFF_MAGIC: [&[u8]; 2] = [b"II+\0", b"MM\0+"];

/// Reject uploads whose declared content type is not `image/tiff`.
pub fn validate_content_type(content_type: Option<&str>) -> Result<(), CoreError> {
    let essence = content_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase());
    match essence.as_deref() {
        Some(TIFF_CONTENT_TYPE) => Ok(()),
        Some(other) => Err(CoreError::UnsupportedMedia(format!(
            "wrong content-type '{other}', expected '{TIFF_CONTENT_TYPE}'"
        ))),
        None => Err(CoreError::UnsupportedMedia(format!(
            "missing content-type, expected '{TIFF_CONTENT_TYPE}'"
        ))),
    }
}

/// Check that the leading bytes of an upload are a TIFF header.
pub fn ensure_tiff(head: &[u8]) -> Result<(), CoreError> {
    if BIGTIFF_MAGIC.iter().any(|magic| head.starts_with(magic)) {
        return Ok(());
    }
    match image::guess_format(head) {
        Ok(ImageFormat::Tiff) => Ok(()),
        _ => Err(CoreError::UnsupportedMedia(
            "uploaded file is not a TIFF image".into(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn accepts_tiff_content_type() {
        assert!(validate_content_type(Some("image/tiff")).is_ok());
        assert!(validate_content_type(Some("Image/TIFF; name=x")).is_ok());
    }

    #[test]
    fn rejects_other_content_types() {
        assert_matches!(
            validate_content_type(Some("image/png")),
            Err(CoreError::UnsupportedMedia(_))
        );
        assert_matches!(validate_content_type(None), Err(CoreError::UnsupportedMedia(_)));
    }

    #[test]
    fn sniffs_tiff_headers() {
        assert!(ensure_tiff(b"II*\0\x08\0\0\0").is_ok());
        assert!(ensure_tiff(b"MM\0*\0\0\0\x08").is_ok());
        assert!(ensure_tiff(b"II+\0\x08\0\0\0").is_ok());
        assert!(ensure_tiff(b"\x89PNG\r\n\x1a\n").is_err());
        assert!(ensure_tiff(b"").is_err());
    }
}
