//! Request building: rendered page → [`GenerationRequest`].
//!
//! The page image is PNG-encoded (lossless, so text edges stay crisp) and
//! base64-wrapped, but only when the prompt asks for it with the image
//! placeholder. A text-only prompt never pays for encoding.

use crate::engine::GenerationRequest;
use crate::prompts::references_image;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a base64 PNG.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png"))
}

/// Build the request for one page.
pub fn build_request(
    page_index: usize,
    img: &DynamicImage,
    prompt: &str,
    crop: bool,
) -> Result<GenerationRequest, image::ImageError> {
    let image = if references_image(prompt) {
        Some(encode_page(img)?)
    } else {
        None
    };
    Ok(GenerationRequest {
        page_index,
        prompt: prompt.to_string(),
        image,
        crop,
    })
}
