//! QR encoding of rendered configurations, for scan-to-import on phones.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("qr encoding failed: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("png encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

/// Encode text as a QR code and return it as a `data:image/png;base64,...`
/// URL, ready to drop into an `<img>` tag.
pub fn encode_data_url(text: &str) -> Result<String, QrError> {
    let code = QrCode::new(text.as_bytes())?;
    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(360, 360)
        .build();

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(&png)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_png_data_url() {
        let url = encode_data_url("[Interface]\nPrivateKey = abc\n").unwrap();
        let b64 = url.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = BASE64.decode(b64).unwrap();
        // PNG magic.
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[test]
    fn oversized_payload_rejected() {
        let huge = "x".repeat(8000);
        assert!(matches!(encode_data_url(&huge), Err(QrError::Encode(_))));
    }
}
