use anyhow::Result;
use candle_core::{Device, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

/// VAE downsampling (8) times transformer patch size (2).
pub const VAE_ALIGN: usize = 16;
pub const LATENT_CHANNELS: usize = 16;

/// Qwen3 chat template with the generation prompt appended.
pub fn format_prompt(prompt: &str) -> String {
    format!("<|im_start|>user\n{prompt}<|im_end|>\n<|im_start|>assistant\n")
}

/// Latent (height, width) for an image of the given pixel size.
pub fn latent_size(height: usize, width: usize) -> Result<(usize, usize)> {
    if height % VAE_ALIGN != 0 || width % VAE_ALIGN != 0 {
        anyhow::bail!(
            "image dimensions must be divisible by {VAE_ALIGN}, got {width}x{height}; try {}x{}",
            (width / VAE_ALIGN) * VAE_ALIGN,
            (height / VAE_ALIGN) * VAE_ALIGN,
        );
    }
    Ok((2 * (height / VAE_ALIGN), 2 * (width / VAE_ALIGN)))
}

/// Standard normal latent noise of shape (1, 16, latent_h, latent_w).
///
/// Drawn on the host from a per-call generator so a fixed seed gives the same
/// noise on every device, and concurrent requests never share RNG state.
pub fn initial_noise(
    seed: Option<u64>,
    latent_h: usize,
    latent_w: usize,
    device: &Device,
) -> Result<Tensor> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let len = LATENT_CHANNELS * latent_h * latent_w;
    let data: Vec<f32> = (0..len).map(|_| rng.sample(StandardNormal)).collect();
    Ok(Tensor::from_vec(
        data,
        (1, LATENT_CHANNELS, latent_h, latent_w),
        device,
    )?)
}
