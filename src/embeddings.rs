//! # Embeddings
//!
//! Query text is turned into a vector by a sentence-embedding model running on
//! the CPU through Candle (pure Rust). The model is the same family that
//! produced the corpus matrix (all-MiniLM-L6-v2 by default), so query and
//! corpus vectors live in the same space.
//!
//! Loading the model is the dominant cost of the whole pipeline, so
//! [`MiniLmEmbedder`] loads it at most once, behind a
//! [`OnceCell`](once_cell::sync::OnceCell), and shares it read-only between
//! requests. Call [`MiniLmEmbedder::warm_up`] at startup to surface a broken
//! model before serving traffic.
//!
//! ```no_run
//! use ragchart::embeddings::{EmbeddingProvider, EmbeddingSettings, MiniLmEmbedder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = MiniLmEmbedder::new(EmbeddingSettings::default());
//! let v = embedder.embed("robbery downtown")?;
//! assert_eq!(v.len(), 384);
//! # Ok(()) }
//! ```

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use once_cell::sync::OnceCell;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

use crate::config::RagConfig;
use crate::error::EmbeddingError;

/// Longest token sequence fed to the model.
const MAX_SEQUENCE_LENGTH: usize = 256;

/// Turns text into a fixed-dimension vector.
///
/// Implementations must be deterministic for a fixed model and must not depend
/// on accelerator availability.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Where to find the embedding model.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSettings {
    pub model_id: String,
    pub revision: String,
    /// Local directory that overrides the hub download.
    pub model_dir: Option<PathBuf>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            revision: "main".to_string(),
            model_dir: None,
        }
    }
}

impl From<&RagConfig> for EmbeddingSettings {
    fn from(config: &RagConfig) -> Self {
        Self {
            model_id: config.embedding_model.clone(),
            revision: config.embedding_revision.clone(),
            model_dir: config.embedding_model_dir.clone(),
        }
    }
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl SentenceEmbeddingsModel {
    /// Load the model, from `settings.model_dir` when set, otherwise from the Hugging Face Hub.
    pub fn load(settings: &EmbeddingSettings) -> Result<Self, EmbeddingError> {
        let device = Device::Cpu;

        let (config_filename, tokenizer_filename, weights_filename) = match &settings.model_dir {
            Some(dir) => local_model_files(dir)?,
            None => hub_model_files(settings)?,
        };

        let config = std::fs::read_to_string(&config_filename).map_err(load_err)?;
        let config: Config = serde_json::from_str(&config).map_err(load_err)?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_filename)
            .map_err(|e| EmbeddingError::Load(format!("failed to load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| EmbeddingError::Load(format!("failed to configure tokenizer: {e}")))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(load_err)?
        };
        let model = BertModel::load(vb, &config).map_err(load_err)?;

        info!("Embedding model {} loaded on CPU", settings.model_id);

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Encode text into an L2-normalised embedding.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Inference(format!("tokenization error: {e}")))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(infer_err)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(infer_err)?;
        let attention_mask = Tensor::new(tokens.get_attention_mask(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(infer_err)?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, Some(&attention_mask))
            .map_err(infer_err)?;

        let embedding = self
            .mean_pooling(&output, tokens.get_attention_mask())
            .and_then(|e| Self::normalize(&e))
            .map_err(infer_err)?;

        embedding.to_vec1::<f32>().map_err(infer_err)
    }

    /// Mean pooling over token embeddings, considering attention mask
    fn mean_pooling(
        &self,
        embeddings: &Tensor,
        attention_mask: &[u32],
    ) -> candle_core::Result<Tensor> {
        // embeddings: [1, seq_len, hidden]; mask becomes [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;

        sum.broadcast_div(&count)?.squeeze(0)
    }

    fn normalize(tensor: &Tensor) -> candle_core::Result<Tensor> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        tensor.broadcast_div(&norm)
    }
}

fn local_model_files(dir: &Path) -> Result<(PathBuf, PathBuf, PathBuf), EmbeddingError> {
    let files = (
        dir.join("config.json"),
        dir.join("tokenizer.json"),
        dir.join("model.safetensors"),
    );
    for path in [&files.0, &files.1, &files.2] {
        if !path.is_file() {
            return Err(EmbeddingError::Load(format!(
                "model directory is missing {}",
                path.display()
            )));
        }
    }
    Ok(files)
}

fn hub_model_files(
    settings: &EmbeddingSettings,
) -> Result<(PathBuf, PathBuf, PathBuf), EmbeddingError> {
    let repo = Repo::with_revision(
        settings.model_id.clone(),
        RepoType::Model,
        settings.revision.clone(),
    );
    let api = Api::new().map_err(load_err)?;
    let api_repo = api.repo(repo);

    Ok((
        api_repo.get("config.json").map_err(load_err)?,
        api_repo.get("tokenizer.json").map_err(load_err)?,
        api_repo.get("model.safetensors").map_err(load_err)?,
    ))
}

fn load_err(e: impl std::fmt::Display) -> EmbeddingError {
    EmbeddingError::Load(e.to_string())
}

fn infer_err(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::Inference(e.to_string())
}

/// Process-wide embedding provider that loads its model on first use.
pub struct MiniLmEmbedder {
    settings: EmbeddingSettings,
    model: OnceCell<SentenceEmbeddingsModel>,
}

impl MiniLmEmbedder {
    pub fn new(settings: EmbeddingSettings) -> Self {
        Self {
            settings,
            model: OnceCell::new(),
        }
    }

    /// Load the model now and return the embedding dimension.
    pub fn warm_up(&self) -> Result<usize, EmbeddingError> {
        Ok(self.embed("warm up")?.len())
    }

    fn model(&self) -> Result<&SentenceEmbeddingsModel, EmbeddingError> {
        self.model
            .get_or_try_init(|| SentenceEmbeddingsModel::load(&self.settings))
    }
}

impl EmbeddingProvider for MiniLmEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.model()?.encode(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_settings_from_config() {
        let mut config = RagConfig::with_defaults("e.npy".into(), "m.json".into());
        config.embedding_model_dir = Some(PathBuf::from("/opt/minilm"));
        let settings = EmbeddingSettings::from(&config);
        assert_eq!(settings.model_id, "sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(settings.revision, "main");
        assert_eq!(settings.model_dir, Some(PathBuf::from("/opt/minilm")));
    }

    #[test]
    fn test_missing_local_model_fails_to_load() {
        let dir = tempdir().unwrap();
        let embedder = MiniLmEmbedder::new(EmbeddingSettings {
            model_dir: Some(dir.path().to_path_buf()),
            ..EmbeddingSettings::default()
        });
        match embedder.embed("anything") {
            Err(EmbeddingError::Load(msg)) => assert!(msg.contains("config.json"), "{msg}"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
