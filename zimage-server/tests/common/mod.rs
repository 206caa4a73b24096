use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use image::{DynamicImage, RgbImage};
use rand::{rngs::StdRng, Rng, SeedableRng};
use zimage_core::{GenerationRequest, Loader, ModelLike, Pipeline};

/// Prompt that makes [`NoiseModel`] fail like a crashed sampler.
pub const FAILING_PROMPT: &str = "explode";

/// Paints seeded noise, so a fixed seed gives identical pixels.
pub struct NoiseModel;

impl ModelLike for NoiseModel {
    fn run(&self, request: &GenerationRequest) -> anyhow::Result<DynamicImage> {
        if request.prompt == FAILING_PROMPT {
            anyhow::bail!("CUDA error: out of memory");
        }
        let mut rng = match request.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let img = RgbImage::from_fn(request.width as u32, request.height as u32, |_, _| {
            image::Rgb([rng.gen(), rng.gen(), rng.gen()])
        });
        Ok(DynamicImage::ImageRgb8(img))
    }
}

#[derive(Clone, Default)]
pub struct CountingLoader {
    pub loads: Arc<AtomicUsize>,
    pub broken: bool,
}

impl CountingLoader {
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl Loader for CountingLoader {
    type Model = NoiseModel;

    async fn load(&self) -> anyhow::Result<NoiseModel> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            anyhow::bail!("ckpts/Z-Image-Turbo/vae/diffusion_pytorch_model.safetensors not found");
        }
        Ok(NoiseModel)
    }
}

pub fn pipeline() -> (Arc<Pipeline<CountingLoader>>, CountingLoader) {
    let loader = CountingLoader::default();
    (Arc::new(Pipeline::new(loader.clone())), loader)
}

pub fn broken_pipeline() -> (Arc<Pipeline<CountingLoader>>, CountingLoader) {
    let loader = CountingLoader {
        broken: true,
        ..Default::default()
    };
    (Arc::new(Pipeline::new(loader.clone())), loader)
}
