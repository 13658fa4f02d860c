//! Image loading for indexing and queries
//!
//! Files are read whole so the same bytes feed the decode check, the content
//! hash and the embedding model. Camera RAW files are rendered to PNG first;
//! their content hash stays that of the file on disk.

mod download;

pub use download::{DownloadLimits, Downloader};

use crate::error::PixseekError;
use crate::scanner::filters::{extension_of, is_raw_extension};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Not an image: {0}")]
    NotAnImage(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ImageError> for PixseekError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::NotFound(path) => PixseekError::QueryFileNotFound { path },
            ImageError::NotAnImage(path) => PixseekError::NotAnImage { path },
            ImageError::Io { path, source } => {
                PixseekError::io(source, format!("Failed to read image {}", path.display()))
            }
        }
    }
}

/// Encoded image bytes known to decode
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Path or URL the bytes came from
    pub source: String,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl LoadedImage {
    /// Wrap raw bytes after checking that the `image` crate can decode them
    pub fn from_bytes(source: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ImageError> {
        let source = source.into();
        let decoded = match image::load_from_memory(&bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!("Decoding {} failed: {}", source, e);
                return Err(ImageError::NotAnImage(source));
            }
        };

        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            source,
            bytes,
        })
    }

    /// Load a file's bytes, rendering camera RAW formats by extension
    pub fn from_file_bytes(path: &Path, bytes: Vec<u8>) -> Result<Self, ImageError> {
        let source = path.to_string_lossy().into_owned();
        if !extension_of(path).is_some_and(|ext| is_raw_extension(&ext)) {
            return Self::from_bytes(source, bytes);
        }

        match render_raw(path) {
            Ok(rendered) => Self::from_bytes(source, rendered),
            Err(e) => {
                tracing::debug!("Rendering RAW {} failed: {}", source, e);
                Err(ImageError::NotAnImage(source))
            }
        }
    }

    /// Content hash of the encoded bytes
    pub fn hash(&self) -> String {
        content_hash(&self.bytes)
    }
}

/// Read and decode-check an image file
pub fn read_image(path: &Path) -> Result<LoadedImage, ImageError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ImageError::NotFound(path.to_path_buf()),
        _ => ImageError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    LoadedImage::from_file_bytes(path, bytes)
}

/// Develop a camera RAW file into 8-bit sRGB PNG bytes
fn render_raw(path: &Path) -> Result<Vec<u8>, String> {
    let decoded = imagepipe::simple_decode_8bit(path, 0, 0)?;
    let rgb = RgbImage::from_raw(decoded.width as u32, decoded.height as u32, decoded.data)
        .ok_or_else(|| "RAW pipeline returned a truncated buffer".to_string())?;

    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    Ok(out.into_inner())
}

/// Hex blake3 digest used for rename and copy detection
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Hash a file without decoding it
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(content_hash(&bytes))
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;
    use std::path::Path;

    /// PNG bytes of a solid-color image
    pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(8, 8, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    pub fn write_png(path: &Path, color: [u8; 3]) {
        std::fs::write(path, png_bytes(color)).unwrap();
    }
}
