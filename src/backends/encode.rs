//! Page image → base64 PNG attachment for a vision model.
//!
//! PNG keeps rendered text crisp; JPEG artefacts around glyphs measurably hurt
//! OCR. `detail: "high"` lets tiling models see fine print.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!(png_bytes = buf.len(), b64_bytes = b64.len(), "encoded page image");
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
