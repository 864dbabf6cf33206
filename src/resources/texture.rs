use std::path::Path;

use image::{GenericImageView, ImageFormat, load_from_memory_with_format};

use crate::backend::TextureSource;

use super::load_binary;

/// Decodes image file contents into RGBA8 pixels.
///
/// `format` is a file extension hint such as `"png"`; without one the format
/// is guessed from the data.
pub fn decode_texture(bytes: &[u8], label: &str, format: Option<&str>) -> anyhow::Result<TextureSource> {
    let img = match format.and_then(ImageFormat::from_extension) {
        Some(fmt) => load_from_memory_with_format(bytes, fmt)?,
        None => image::load_from_memory(bytes)?,
    };
    let (width, height) = img.dimensions();
    Ok(TextureSource {
        label: label.to_string(),
        width,
        height,
        rgba: img.to_rgba8().into_raw(),
    })
}

pub async fn load_texture(path: &Path) -> anyhow::Result<TextureSource> {
    let data = load_binary(path).await?;
    let format = path.extension().and_then(|e| e.to_str());
    decode_texture(&data, &path.to_string_lossy(), format)
}
