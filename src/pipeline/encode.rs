//! Image encoding: [`NormalizedImage`] → base64 PNG wrapped in `ImageData`.
//!
//! Vision APIs accept images as base64 data-URIs embedded in the JSON
//! request body. PNG is chosen over JPEG because it is lossless — digit
//! crispness matters far more than file size when the model has to read
//! monetary amounts off the page. `detail: "high"` instructs GPT-4-class
//! models to use the full image tile budget; without it the fine print in
//! fee tables is lost.

use crate::error::ExtractError;
use crate::pipeline::normalize::NormalizedImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// Encode one normalized page as a base64 PNG ready for the provider API.
pub fn encode_page(page: &NormalizedImage) -> Result<ImageData, ExtractError> {
    let mut buf = Vec::new();
    page.pixels
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ExtractError::ImageEncode {
            page: page.page_index + 1,
            detail: format!("{e}"),
        })?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        page = page.page_index + 1,
        bytes = b64.len(),
        "encoded page"
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Encode every page of a document, preserving page order.
pub fn encode_pages(pages: &[NormalizedImage]) -> Result<Vec<ImageData>, ExtractError> {
    pages.iter().map(encode_page).collect()
}
