use std::path::{Path, PathBuf};

use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::z_image::{
    calculate_shift, postprocess_image,
    scheduler::{BASE_IMAGE_SEQ_LEN, BASE_SHIFT, MAX_IMAGE_SEQ_LEN, MAX_SHIFT},
    AutoEncoderKL, Config, FlowMatchEulerDiscreteScheduler, SchedulerConfig, TextEncoderConfig,
    VaeConfig, ZImageTextEncoder, ZImageTransformer2DModel,
};
use image::DynamicImage;
use serde::de::DeserializeOwned;
use tokenizers::Tokenizer;

pub mod sampling;

use crate::{
    select_best_device, tensor_to_image,
    weights::{ensure_model_weights, ModelFiles, DEFAULT_MODEL_PATH, DEFAULT_REPO_ID},
    DeviceMap, GenerationRequest, Loader, ModelLike,
};

/// Z-Image-Turbo components, loaded once and shared by every request.
pub struct ZImageModel {
    device: Device,
    dtype: DType,
    tokenizer: Tokenizer,
    text_encoder: ZImageTextEncoder,
    transformer: ZImageTransformer2DModel,
    vae: AutoEncoderKL,
}

impl ZImageModel {
    pub fn from_files(files: &ModelFiles, device_map: DeviceMap) -> Result<Self> {
        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = device.bf16_default_to_f32();
        tracing::info!(?device, ?dtype, "placing Z-Image components");

        // --- Tokenizer ---
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(Error::msg)
            .context("failed to load tokenizer")?;

        // --- Qwen3 text encoder ---
        let text_encoder_cfg: TextEncoderConfig = read_config(
            files.text_encoder_config.as_deref(),
            TextEncoderConfig::z_image,
        )
        .context("failed to read text encoder config")?;
        let text_encoder_vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&files.text_encoder_weights, dtype, &device)
                .context("failed to build text encoder var builder")?
        };
        let text_encoder = ZImageTextEncoder::new(&text_encoder_cfg, text_encoder_vb)
            .context("failed to load text encoder")?;
        tracing::info!("text encoder loaded");

        // --- Diffusion transformer ---
        let transformer_cfg: Config = read_config(
            files.transformer_config.as_deref(),
            Config::z_image_turbo,
        )
        .context("failed to read transformer config")?;
        let transformer_vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&files.transformer_weights, dtype, &device)
                .context("failed to build transformer var builder")?
        };
        let transformer = ZImageTransformer2DModel::new(&transformer_cfg, transformer_vb)
            .context("failed to load transformer")?;
        tracing::info!("transformer loaded");

        // --- VAE ---
        let vae_cfg: VaeConfig = read_config(files.vae_config.as_deref(), VaeConfig::z_image)
            .context("failed to read VAE config")?;
        let vae_vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.vae_weights], dtype, &device)
                .context("failed to build VAE var builder")?
        };
        let vae = AutoEncoderKL::new(&vae_cfg, vae_vb).context("failed to load VAE")?;
        tracing::info!("VAE loaded");

        Ok(Self {
            device,
            dtype,
            tokenizer,
            text_encoder,
            transformer,
            vae,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

fn read_config<T: DeserializeOwned>(path: Option<&Path>, preset: fn() -> T) -> Result<T> {
    match path {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(serde_json::from_reader(file)?)
        }
        None => Ok(preset()),
    }
}

impl ModelLike for ZImageModel {
    fn run(&self, request: &GenerationRequest) -> Result<DynamicImage> {
        let (latent_h, latent_w) = sampling::latent_size(request.height, request.width)?;

        // --- Encode the prompt ---
        let tokens = self
            .tokenizer
            .encode(sampling::format_prompt(&request.prompt), true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        let n_tokens = tokens.len();
        let input_ids = Tensor::from_vec(tokens, (1, n_tokens), &self.device)?;
        let cap_feats = self.text_encoder.forward(&input_ids)?;
        let cap_mask = Tensor::ones((1, n_tokens), DType::U8, &self.device)?;

        // --- Schedule ---
        let patch_size = self.transformer.config().all_patch_size[0];
        let image_seq_len = (latent_h / patch_size) * (latent_w / patch_size);
        let mu = calculate_shift(
            image_seq_len,
            BASE_IMAGE_SEQ_LEN,
            MAX_IMAGE_SEQ_LEN,
            BASE_SHIFT,
            MAX_SHIFT,
        );
        let mut scheduler = FlowMatchEulerDiscreteScheduler::new(SchedulerConfig::z_image_turbo());
        scheduler.set_timesteps(request.steps, Some(mu));

        // (B, C, H, W) -> (B, C, 1, H, W)
        let mut latents =
            sampling::initial_noise(request.seed, latent_h, latent_w, &self.device)?
                .to_dtype(self.dtype)?
                .unsqueeze(2)?;

        // --- Denoise. Turbo is guidance-distilled: guidance scale 0, one pass per step. ---
        for step in 0..request.steps {
            let t = scheduler.current_timestep_normalized();
            let t = Tensor::from_vec(vec![t as f32], (1,), &self.device)?.to_dtype(self.dtype)?;
            let pred = self
                .transformer
                .forward(&latents, &t, &cap_feats, &cap_mask)?
                .neg()?;
            latents = scheduler
                .step(&pred.squeeze(2)?, &latents.squeeze(2)?)?
                .unsqueeze(2)?;
            tracing::debug!(
                step = step + 1,
                steps = request.steps,
                sigma = scheduler.current_sigma(),
                "denoising step"
            );
        }

        // --- Decode ---
        let decoded = self.vae.decode(&latents.squeeze(2)?)?;
        let img = postprocess_image(&decoded)?.i(0)?;
        tensor_to_image(&img)
    }
}

/// Resolves the checkpoint and builds a [`ZImageModel`].
#[derive(Debug, Clone)]
pub struct ZImageLoader {
    pub model_path: PathBuf,
    pub repo_id: String,
    pub device_map: DeviceMap,
}

impl Default for ZImageLoader {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            repo_id: DEFAULT_REPO_ID.to_string(),
            device_map: DeviceMap::default(),
        }
    }
}

impl Loader for ZImageLoader {
    type Model = ZImageModel;

    async fn load(&self) -> Result<Self::Model> {
        let files = ensure_model_weights(&self.model_path, &self.repo_id).await?;
        let device_map = self.device_map;
        // mmap and weight conversion block for a long time
        tokio::task::spawn_blocking(move || ZImageModel::from_files(&files, device_map))
            .await
            .context("model loading task failed")?
    }
}
