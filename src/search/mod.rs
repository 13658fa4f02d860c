//! Semantic search over the store
//!
//! Positive and negative term sets are each reduced to one vector: text
//! phrases go through one batched text embedding call, files and URLs
//! through one batched image call, each embedding scaled by its multiplier
//! and summed. The query vector is `positive - negative`, and every live
//! record under the root is scored by dot product against it.

mod query;
mod ranking;

pub use query::{QueryTerm, TermKind, TermParser};
pub use ranking::{combine, weighted_sum, Ranker, SearchResult};

use crate::embedding::{check_batch, EmbeddingProvider};
use crate::error::{PixseekError, Result};
use crate::imaging::{read_image, Downloader, ImageError};
use crate::scanner::ExcludeDirs;
use crate::storage::Store;
use ndarray::Array1;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A search request
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Raw positive terms, e.g. `"2:night"` or `"./cat.jpg"`
    pub positive: Vec<String>,
    /// Raw negative terms
    pub negative: Vec<String>,
    /// Only records under this directory are ranked
    pub root: PathBuf,
    pub top_k: usize,
}

/// Vector for one term set plus the images it referenced
pub struct ResolvedTerms {
    pub vector: Array1<f32>,
    /// Canonical file paths and URLs used as terms
    pub sources: Vec<String>,
}

/// Answers searches against a [`Store`]
pub struct QueryEngine<'a> {
    store: &'a Store,
    provider: &'a dyn EmbeddingProvider,
    downloader: Downloader,
    exclude: ExcludeDirs,
    parser: TermParser,
}

impl<'a> QueryEngine<'a> {
    pub fn new(
        store: &'a Store,
        provider: &'a dyn EmbeddingProvider,
        downloader: Downloader,
        exclude: ExcludeDirs,
    ) -> Result<Self> {
        Ok(Self {
            store,
            provider,
            downloader,
            exclude,
            parser: TermParser::new()?,
        })
    }

    pub fn parser(&self) -> &TermParser {
        &self.parser
    }

    /// Rank live records under `query.root`
    ///
    /// A term naming a missing file or something that is not an image fails
    /// the whole search.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let positive = self.resolve(&self.parser.parse_all(&query.positive)).await?;
        let negative = self.resolve(&self.parser.parse_all(&query.negative)).await?;
        let vector = combine(&positive.vector, &negative.vector);

        let excluded_sources: HashSet<&str> = positive
            .sources
            .iter()
            .chain(negative.sources.iter())
            .map(String::as_str)
            .collect();

        let mut ranker = Ranker::new(&vector);
        let mut candidates = 0usize;
        self.store.for_each_vector_under(&query.root, |filepath, stored| {
            candidates += 1;
            if excluded_sources.contains(filepath)
                || self.exclude.excludes(&query.root, Path::new(filepath))
            {
                return;
            }
            ranker.push(filepath, stored);
        })?;

        let results = ranker.finish(query.top_k);
        debug!(
            "Ranked {} candidates under {}, returning {}",
            candidates,
            query.root.display(),
            results.len()
        );
        Ok(results)
    }

    /// Reduce a term set to one vector
    pub async fn resolve(&self, terms: &[QueryTerm]) -> Result<ResolvedTerms> {
        let dimension = self.provider.dimension();
        let (mut text_weights, mut texts) = (Vec::new(), Vec::new());
        let (mut image_weights, mut images) = (Vec::new(), Vec::new());
        let mut sources = Vec::new();

        for term in terms {
            match &term.kind {
                TermKind::Text(text) => {
                    text_weights.push(term.multiplier);
                    texts.push(text.clone());
                }
                TermKind::Url(url) => {
                    images.push(self.downloader.fetch(url).await?);
                    image_weights.push(term.multiplier);
                    sources.push(url.clone());
                }
                TermKind::File(path) => {
                    let canonical = resolve_file(path)?;
                    let image = read_image(&canonical).map_err(|e| match e {
                        ImageError::NotAnImage(_) => PixseekError::NotAnImage {
                            path: path.display().to_string(),
                        },
                        other => other.into(),
                    })?;
                    images.push(image);
                    image_weights.push(term.multiplier);
                    sources.push(canonical.to_string_lossy().into_owned());
                }
            }
        }

        let mut weighted: Vec<(f32, Vec<f32>)> = Vec::with_capacity(terms.len());

        if !texts.is_empty() {
            let vectors = self.provider.embed_texts(&texts)?;
            check_batch(&vectors, texts.len(), dimension)?;
            weighted.extend(text_weights.into_iter().zip(vectors));
        }

        if !images.is_empty() {
            let vectors = self.provider.embed_images(&images)?;
            check_batch(&vectors, images.len(), dimension)?;
            weighted.extend(image_weights.into_iter().zip(vectors));
        }

        Ok(ResolvedTerms {
            vector: weighted_sum(dimension, &weighted),
            sources,
        })
    }
}

/// Absolute, symlink-free path of a query file
fn resolve_file(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PixseekError::QueryFileNotFound {
            path: path.to_path_buf(),
        },
        _ => PixseekError::io(e, format!("Failed to resolve query file {}", path.display())),
    })
}
