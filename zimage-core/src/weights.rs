//! Locating the Z-Image-Turbo checkpoint on disk, downloading it when absent.
//!
//! The checkpoint uses the diffusers directory layout:
//!
//! ```text
//! tokenizer/tokenizer.json
//! text_encoder/config.json
//! text_encoder/model.safetensors.index.json        (+ shards)
//! transformer/config.json
//! transformer/diffusion_pytorch_model.safetensors.index.json   (+ shards)
//! vae/config.json
//! vae/diffusion_pytorch_model.safetensors
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hf_hub::api::tokio::{Api, ApiRepo};
use serde::Deserialize;

pub const DEFAULT_MODEL_PATH: &str = "ckpts/Z-Image-Turbo";
pub const DEFAULT_REPO_ID: &str = "Tongyi-MAI/Z-Image-Turbo";

const TOKENIZER: &str = "tokenizer/tokenizer.json";
const TEXT_ENCODER_CONFIG: &str = "text_encoder/config.json";
const TEXT_ENCODER_INDEX: &str = "text_encoder/model.safetensors.index.json";
const TRANSFORMER_CONFIG: &str = "transformer/config.json";
const TRANSFORMER_INDEX: &str = "transformer/diffusion_pytorch_model.safetensors.index.json";
const VAE_CONFIG: &str = "vae/config.json";
const VAE_WEIGHTS: &str = "vae/diffusion_pytorch_model.safetensors";

/// Resolved paths of every file needed to build the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub tokenizer: PathBuf,
    pub text_encoder_config: Option<PathBuf>,
    pub text_encoder_weights: Vec<PathBuf>,
    pub transformer_config: Option<PathBuf>,
    pub transformer_weights: Vec<PathBuf>,
    pub vae_config: Option<PathBuf>,
    pub vae_weights: PathBuf,
}

enum WeightSource {
    Local(PathBuf),
    Hub(ApiRepo),
}

impl WeightSource {
    async fn get(&self, file: &str) -> Result<PathBuf> {
        match self {
            WeightSource::Local(root) => {
                let path = root.join(file);
                if !path.is_file() {
                    anyhow::bail!("{} not found", path.display());
                }
                Ok(path)
            }
            WeightSource::Hub(repo) => repo
                .get(file)
                .await
                .with_context(|| format!("failed to download {file}")),
        }
    }

    async fn get_optional(&self, file: &str) -> Option<PathBuf> {
        match self.get(file).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::debug!("{file} unavailable, using preset: {e:#}");
                None
            }
        }
    }

    async fn sharded(&self, index_file: &str) -> Result<Vec<PathBuf>> {
        let index = self.get(index_file).await?;
        let dir = index_file.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let mut shards = Vec::new();
        for name in shard_names(&index)? {
            let file = if dir.is_empty() {
                name
            } else {
                format!("{dir}/{name}")
            };
            shards.push(self.get(&file).await?);
        }
        Ok(shards)
    }

    async fn resolve(&self) -> Result<ModelFiles> {
        Ok(ModelFiles {
            tokenizer: self.get(TOKENIZER).await?,
            text_encoder_config: self.get_optional(TEXT_ENCODER_CONFIG).await,
            text_encoder_weights: self.sharded(TEXT_ENCODER_INDEX).await?,
            transformer_config: self.get_optional(TRANSFORMER_CONFIG).await,
            transformer_weights: self.sharded(TRANSFORMER_INDEX).await?,
            vae_config: self.get_optional(VAE_CONFIG).await,
            vae_weights: self.get(VAE_WEIGHTS).await?,
        })
    }
}

#[derive(Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

/// Distinct shard file names listed by a `*.safetensors.index.json`, sorted.
pub fn shard_names(index: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(index)
        .with_context(|| format!("failed to open {}", index.display()))?;
    let index_json: SafetensorsIndex = serde_json::from_reader(file)
        .with_context(|| format!("failed to parse {}", index.display()))?;
    let shards: BTreeSet<String> = index_json.weight_map.into_values().collect();
    if shards.is_empty() {
        anyhow::bail!("{} lists no weight files", index.display());
    }
    Ok(shards.into_iter().collect())
}

/// Resolves the checkpoint from `model_path`, falling back to a download of
/// `repo_id` from the Hugging Face Hub when any required file is missing.
pub async fn ensure_model_weights(model_path: &Path, repo_id: &str) -> Result<ModelFiles> {
    match WeightSource::Local(model_path.to_path_buf()).resolve().await {
        Ok(files) => {
            tracing::info!("using local weights from {}", model_path.display());
            Ok(files)
        }
        Err(e) => {
            tracing::warn!(
                "incomplete checkpoint at {} ({e:#}), fetching {repo_id} from the hub",
                model_path.display()
            );
            let api = Api::new().context("failed to create hf hub API")?;
            WeightSource::Hub(api.model(repo_id.to_string()))
                .resolve()
                .await
                .with_context(|| format!("failed to fetch weights for {repo_id}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn touch(root: &Path, file: &str) {
        let path = root.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn write_index(root: &Path, file: &str, shards: &[&str]) {
        let weight_map: HashMap<String, String> = shards
            .iter()
            .enumerate()
            .map(|(i, shard)| (format!("layers.{i}.weight"), shard.to_string()))
            .collect();
        let path = root.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, json!({ "metadata": {}, "weight_map": weight_map }).to_string()).unwrap();
        for shard in shards {
            let dir = file.rsplit_once('/').unwrap().0;
            touch(root, &format!("{dir}/{shard}"));
        }
    }

    fn checkpoint(root: &Path) {
        touch(root, TOKENIZER);
        write_index(
            root,
            TEXT_ENCODER_INDEX,
            &[
                "model-00002-of-00002.safetensors",
                "model-00001-of-00002.safetensors",
                "model-00002-of-00002.safetensors",
            ],
        );
        write_index(
            root,
            TRANSFORMER_INDEX,
            &["diffusion_pytorch_model-00001-of-00001.safetensors"],
        );
        touch(root, VAE_WEIGHTS);
    }

    #[test]
    fn shard_names_are_unique_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_index(dir.path(), "te/index.json", &["b.safetensors", "a.safetensors", "b.safetensors"]);
        let names = shard_names(&dir.path().join("te/index.json")).unwrap();
        assert_eq!(names, vec!["a.safetensors", "b.safetensors"]);
    }

    #[test]
    fn empty_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_index(dir.path(), "te/index.json", &[]);
        let err = shard_names(&dir.path().join("te/index.json")).unwrap_err();
        assert!(err.to_string().contains("lists no weight files"));
    }

    #[tokio::test]
    async fn resolves_complete_local_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        checkpoint(dir.path());
        touch(dir.path(), VAE_CONFIG);

        let files = ensure_model_weights(dir.path(), DEFAULT_REPO_ID).await.unwrap();
        assert_eq!(files.tokenizer, dir.path().join(TOKENIZER));
        assert_eq!(
            files.text_encoder_weights,
            vec![
                dir.path().join("text_encoder/model-00001-of-00002.safetensors"),
                dir.path().join("text_encoder/model-00002-of-00002.safetensors"),
            ]
        );
        assert_eq!(files.transformer_weights.len(), 1);
        assert_eq!(files.vae_config, Some(dir.path().join(VAE_CONFIG)));
        assert_eq!(files.text_encoder_config, None);
        assert_eq!(files.transformer_config, None);
    }

    #[tokio::test]
    async fn local_resolution_reports_missing_shard() {
        let dir = tempfile::tempdir().unwrap();
        checkpoint(dir.path());
        fs::remove_file(dir.path().join("text_encoder/model-00001-of-00002.safetensors")).unwrap();

        let err = WeightSource::Local(dir.path().to_path_buf())
            .resolve()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("model-00001-of-00002.safetensors not found"));
    }

    #[tokio::test]
    async fn local_resolution_requires_vae() {
        let dir = tempfile::tempdir().unwrap();
        checkpoint(dir.path());
        fs::remove_file(dir.path().join(VAE_WEIGHTS)).unwrap();

        let res = WeightSource::Local(dir.path().to_path_buf()).resolve().await;
        assert!(res.is_err());
    }
}
