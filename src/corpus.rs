//! # Corpus
//!
//! The searchable corpus is two files produced offline:
//!
//! - a NumPy `.npy` matrix, one embedding per row, and
//! - a JSON-lines metadata file, line `i` describing row `i`.
//!
//! Records have no key of their own; they are identified by their row. The
//! two files are joined positionally, so any disagreement in counts is fatal.
//! Both live for the whole process and are never mutated after loading.
//!
//! ```no_run
//! use ragchart::corpus::Corpus;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let corpus = Corpus::load("embeddings.npy".as_ref(), "metadata.json".as_ref())?;
//! println!("{} records of dimension {}", corpus.len(), corpus.matrix.dimension());
//! # Ok(()) }
//! ```

use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayView1, ShapeBuilder};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::info;

use crate::error::CorpusError;

/// Opaque metadata document for one corpus entry.
pub type CorpusRecord = JsonValue;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

static DESCR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'descr'\s*:\s*'([<>=|])([a-z])(\d+)'").expect("valid regex"));
static FORTRAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'fortran_order'\s*:\s*(True|False)").expect("valid regex"));
static SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'shape'\s*:\s*\(([^)]*)\)").expect("valid regex"));

/// Dense `[rows, dimension]` embedding matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    data: Array2<f32>,
}

impl EmbeddingMatrix {
    /// Build a matrix from individual rows.
    ///
    /// # Errors
    /// - [`CorpusError::EmptyCorpus`] when `rows` is empty or the rows have no columns.
    /// - [`CorpusError::Ragged`] when a row's length differs from the first row's.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, CorpusError> {
        let dimension = rows.first().map(Vec::len).unwrap_or(0);
        if dimension == 0 {
            return Err(CorpusError::EmptyCorpus);
        }
        if let Some((row, found)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != dimension)
            .map(|(i, r)| (i, r.len()))
        {
            return Err(CorpusError::Ragged {
                row,
                expected: dimension,
                found,
            });
        }

        let count = rows.len();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((count, dimension), flat)
            .map_err(|e| CorpusError::Index(e.to_string()))?;
        Ok(Self { data })
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn dimension(&self) -> usize {
        self.data.ncols()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.data.row(index)
    }

    /// Read a `.npy` file holding a 2-D float matrix.
    ///
    /// Accepts format versions 1 through 3, `f4` or `f8` in either byte
    /// order, and both C and Fortran layouts. `f8` data is narrowed to `f32`.
    pub fn read_npy(path: &Path) -> Result<Self, CorpusError> {
        let bytes = fs::read(path).map_err(|source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_npy(&bytes).map_err(|reason| CorpusError::Npy {
            path: path.to_path_buf(),
            reason,
        })
    }
}

fn parse_npy(bytes: &[u8]) -> Result<EmbeddingMatrix, String> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err("missing NUMPY magic string".to_string());
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err("truncated header".to_string());
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        v => return Err(format!("unsupported format version {v}")),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| "truncated header".to_string())?;
    let header = String::from_utf8_lossy(header);

    let descr = DESCR_RE
        .captures(&header)
        .ok_or_else(|| "header has no 'descr'".to_string())?;
    let big_endian = &descr[1] == ">";
    let width: usize = match (&descr[2], &descr[3]) {
        ("f", "4") => 4,
        ("f", "8") => 8,
        (kind, size) => return Err(format!("unsupported dtype {kind}{size}, expected f4 or f8")),
    };

    let fortran_order = FORTRAN_RE
        .captures(&header)
        .map(|c| &c[1] == "True")
        .ok_or_else(|| "header has no 'fortran_order'".to_string())?;

    let shape = SHAPE_RE
        .captures(&header)
        .ok_or_else(|| "header has no 'shape'".to_string())?;
    let dims = shape[1]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| format!("bad shape entry {s:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    let (rows, cols) = match dims.as_slice() {
        [rows, cols] => (*rows, *cols),
        other => return Err(format!("expected a 2-D matrix, found shape {other:?}")),
    };

    let payload = &bytes[data_start..];
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(width))
        .ok_or_else(|| format!("shape ({rows}, {cols}) is too large"))?;
    if payload.len() != expected {
        return Err(format!(
            "payload holds {} bytes, shape ({rows}, {cols}) needs {expected}",
            payload.len()
        ));
    }

    let values: Vec<f32> = payload
        .chunks_exact(width)
        .map(|chunk| match (width, big_endian) {
            (4, false) => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            (4, true) => f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            (_, false) => f64::from_le_bytes(eight(chunk)) as f32,
            (_, true) => f64::from_be_bytes(eight(chunk)) as f32,
        })
        .collect();

    let data = if fortran_order {
        Array2::from_shape_vec((rows, cols).f(), values)
            .map_err(|e| e.to_string())?
            .as_standard_layout()
            .to_owned()
    } else {
        Array2::from_shape_vec((rows, cols), values).map_err(|e| e.to_string())?
    };

    Ok(EmbeddingMatrix { data })
}

fn eight(chunk: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&chunk[..8]);
    out
}

/// Parse a JSON-lines metadata file, one record per line, in file order.
///
/// Lines are decoded in parallel; order is preserved. A blank or invalid line
/// is an error naming its 1-based line number.
pub fn read_metadata(path: &Path) -> Result<Vec<CorpusRecord>, CorpusError> {
    let content = fs::read_to_string(path).map_err(|source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_metadata(&content)
}

fn parse_metadata(content: &str) -> Result<Vec<CorpusRecord>, CorpusError> {
    let lines: Vec<&str> = content.trim_end().lines().collect();
    lines
        .par_iter()
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str::<CorpusRecord>(line.trim()).map_err(|source| {
                CorpusError::Metadata {
                    line: i + 1,
                    source,
                }
            })
        })
        .collect()
}

/// Matrix plus the positionally joined metadata records.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub matrix: EmbeddingMatrix,
    pub records: Vec<CorpusRecord>,
}

impl Corpus {
    /// Join a matrix with its records.
    ///
    /// # Errors
    /// [`CorpusError::RowCountMismatch`] when the counts differ.
    pub fn new(matrix: EmbeddingMatrix, records: Vec<CorpusRecord>) -> Result<Self, CorpusError> {
        if matrix.rows() != records.len() {
            return Err(CorpusError::RowCountMismatch {
                rows: matrix.rows(),
                records: records.len(),
            });
        }
        Ok(Self { matrix, records })
    }

    /// Load both corpus files and join them.
    pub fn load(embeddings_path: &Path, metadata_path: &Path) -> Result<Self, CorpusError> {
        let matrix = EmbeddingMatrix::read_npy(embeddings_path)?;
        info!(
            "Loaded embeddings from {} with shape ({}, {})",
            embeddings_path.display(),
            matrix.rows(),
            matrix.dimension()
        );

        let records = read_metadata(metadata_path)?;
        info!(
            "Loaded metadata from {} with {} entries",
            metadata_path.display(),
            records.len()
        );

        Self::new(matrix, records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
