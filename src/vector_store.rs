//! # VectorIndex
//!
//! Read-only nearest-neighbour index over the corpus embedding matrix.
//!
//! This module wraps an exact (brute-force) Euclidean index from the `hora`
//! crate. The index is built once at startup from an [`EmbeddingMatrix`] and
//! is never modified afterwards, so a single instance can be shared by every
//! in-flight request without locking.
//!
//! ## Search policy
//! - `k` larger than the corpus is **clamped** to the corpus size.
//! - Hits are ordered by ascending L2 distance; equal distances keep row order.
//! - The reported distance is the true Euclidean distance
//!   `sqrt(Σ (q[i] - r[i])^2)`, recomputed from the stored row.
//!
//! ## Quick Example
//! ```no_run
//! use ragchart::corpus::EmbeddingMatrix;
//! use ragchart::vector_store::VectorIndex;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let matrix = EmbeddingMatrix::from_rows(vec![vec![0.0, 0.0], vec![1.0, 1.0]])?;
//! let index = VectorIndex::build(matrix)?;
//! let hits = index.search(&[0.9, 0.9], 1)?;
//! assert_eq!(hits[0].row, 1);
//! # Ok(()) }
//! ```

use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::bruteforce_idx::BruteForceIndex;
use hora::index::bruteforce_params::BruteForceParams;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::ArrayView1;
use tracing::{debug, info};

use crate::corpus::EmbeddingMatrix;
use crate::error::{CorpusError, RagError};

/// A row of the corpus and its distance from the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub row: usize,
    pub distance: f32,
}

/// Exact L2 nearest-neighbour index over a fixed embedding matrix.
pub struct VectorIndex {
    index: BruteForceIndex<f32, usize>,
    matrix: EmbeddingMatrix,
}

impl VectorIndex {
    /// Build the index over every row of `matrix`.
    ///
    /// # Errors
    /// - [`CorpusError::EmptyCorpus`] if the matrix has no rows or no columns.
    /// - [`CorpusError::Index`] if hora rejects a row or the build step.
    pub fn build(matrix: EmbeddingMatrix) -> Result<Self, CorpusError> {
        if matrix.rows() == 0 || matrix.dimension() == 0 {
            return Err(CorpusError::EmptyCorpus);
        }

        let mut index = BruteForceIndex::<f32, usize>::new(
            matrix.dimension(),
            &BruteForceParams::default(),
        );

        let progress = ProgressBar::new(matrix.rows() as u64);
        if let Ok(style) = ProgressStyle::with_template("indexing {bar:40} {pos}/{len} rows") {
            progress.set_style(style);
        }

        for row in 0..matrix.rows() {
            let vector = matrix.row(row).to_vec();
            index
                .add(&vector, row)
                .map_err(|e| CorpusError::Index(format!("row {row}: {e}")))?;
            progress.inc(1);
        }
        progress.finish_and_clear();

        index
            .build(Metric::Euclidean)
            .map_err(|e| CorpusError::Index(e.to_string()))?;

        info!(
            "Vector index built with {} embeddings of dimension {}",
            matrix.rows(),
            matrix.dimension()
        );

        Ok(Self { index, matrix })
    }

    /// Number of indexed rows.
    pub fn len(&self) -> usize {
        self.matrix.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.rows() == 0
    }

    pub fn dimension(&self) -> usize {
        self.matrix.dimension()
    }

    /// Return the `k` rows closest to `query`, nearest first.
    ///
    /// `k` is clamped to the corpus size; `k == 0` yields an empty list.
    ///
    /// # Errors
    /// [`RagError::Search`] if `query.len()` differs from the index dimension.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, RagError> {
        if query.len() != self.dimension() {
            return Err(RagError::Search(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dimension()
            )));
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<Neighbor> = self
            .index
            .search_nodes(query, k)
            .into_iter()
            .filter_map(|(node, _)| *node.idx())
            .map(|row| Neighbor {
                row,
                distance: euclidean_distance(query, self.matrix.row(row)),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.row.cmp(&b.row))
        });

        debug!("Search returned {} of {} requested neighbours", hits.len(), k);
        Ok(hits)
    }
}

/// Euclidean distance between a query and a stored row of equal length.
pub fn euclidean_distance(a: &[f32], b: ArrayView1<'_, f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(av, bv)| (av - bv).powi(2))
        .sum::<f32>()
        .sqrt()
}
