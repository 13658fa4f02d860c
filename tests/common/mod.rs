//! Shared fixtures for the integration tests
#![allow(dead_code)]

use pixseek::embedding::{normalize, EmbeddingError, EmbeddingProvider};
use pixseek::imaging::LoadedImage;
use pixseek::indexing::{IndexOptions, IndexReport, Indexer, NoProgress};
use pixseek::storage::{Store, VECTOR_DIM};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];
pub const PURPLE: [u8; 3] = [255, 0, 255];
pub const TEAL: [u8; 3] = [0, 255, 255];

/// Embeds an image as its first pixel's colour on axes 0..3 and a phrase as
/// the axis of the colour it names. Deterministic, and counts every image it
/// embeds so tests can tell reused vectors from fresh ones.
#[derive(Default)]
pub struct PaletteProvider {
    images: AtomicUsize,
    text_calls: AtomicUsize,
}

impl PaletteProvider {
    pub fn images_embedded(&self) -> usize {
        self.images.load(Ordering::SeqCst)
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }
}

fn word_axis(word: &str) -> Option<usize> {
    match word {
        "red" | "cat" => Some(0),
        "green" | "dog" | "fence" => Some(1),
        "blue" | "night" => Some(2),
        _ => None,
    }
}

impl EmbeddingProvider for PaletteProvider {
    fn embed_images(&self, images: &[LoadedImage]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.images.fetch_add(images.len(), Ordering::SeqCst);
        images
            .iter()
            .map(|img| {
                let rgb = image::load_from_memory(&img.bytes)
                    .map_err(|e| EmbeddingError::InvalidInput(e.to_string()))?
                    .to_rgb8();
                let px = rgb.get_pixel(0, 0).0;
                let mut v = vec![0.0; VECTOR_DIM];
                for (axis, channel) in px.iter().enumerate() {
                    v[axis] = *channel as f32;
                }
                normalize(&mut v);
                Ok(v)
            })
            .collect()
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0; VECTOR_DIM];
                for axis in text.split_whitespace().filter_map(word_axis) {
                    v[axis] += 1.0;
                }
                normalize(&mut v);
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        VECTOR_DIM
    }

    fn model_name(&self) -> &str {
        "palette"
    }
}

/// 8x8 single-colour PNG
pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb(color));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

pub fn write_png(path: &Path, color: [u8; 3]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, png_bytes(color)).unwrap();
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn sweep_with(
    store: &Store,
    provider: &PaletteProvider,
    root: &Path,
    options: IndexOptions,
) -> IndexReport {
    Indexer::new(store, provider, options)
        .sweep(root, Arc::new(NoProgress))
        .expect("sweep")
}

pub fn sweep(store: &Store, provider: &PaletteProvider, root: &Path) -> IndexReport {
    sweep_with(store, provider, root, IndexOptions::default())
}
