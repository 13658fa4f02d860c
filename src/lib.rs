//! pixseek - Local semantic image search
//!
//! Keeps a persistent index of CLIP embeddings for the images under a
//! directory tree, synchronised incrementally with the filesystem, and ranks
//! indexed images against weighted text and image queries.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod imaging;
pub mod indexing;
pub mod scanner;
pub mod search;
pub mod storage;

pub use error::{PixseekError, Result};
