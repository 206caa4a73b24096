use anyhow::anyhow;
use image::DynamicImage;

use crate::{Error, GenerationRequest, LazyModel, Loader, ModelLike, Result};

/// Single-image inference over a lazily loaded model.
pub struct Pipeline<L: Loader> {
    model: LazyModel<L>,
}

impl<L: Loader> Pipeline<L> {
    pub fn new(loader: L) -> Self {
        Self {
            model: LazyModel::new(loader),
        }
    }

    /// Runs one generation. The request is expected to be validated already.
    pub async fn generate(&self, request: GenerationRequest) -> Result<DynamicImage> {
        let model = self.model.get().await.map_err(Error::ModelLoad)?;
        tracing::info!(
            width = request.width,
            height = request.height,
            steps = request.steps,
            seed = ?request.seed,
            "generating image"
        );
        // The sampler is compute-bound; keep it off the async workers.
        let image = tokio::task::spawn_blocking(move || model.run(&request))
            .await
            .map_err(|e| Error::Inference(anyhow!("generation task failed: {e}")))?
            .map_err(Error::Inference)?;
        Ok(image)
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_loaded()
    }

    pub fn loader(&self) -> &L {
        self.model.loader()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    impl ModelLike for Echo {
        fn run(&self, request: &GenerationRequest) -> anyhow::Result<DynamicImage> {
            if request.prompt == "boom" {
                anyhow::bail!("sampler diverged");
            }
            if request.prompt == "panic" {
                panic!("kernel crashed");
            }
            Ok(DynamicImage::new_rgb8(request.width as u32, request.height as u32))
        }
    }

    #[derive(Default)]
    struct EchoLoader {
        loads: AtomicUsize,
        broken: bool,
    }

    impl Loader for EchoLoader {
        type Model = Echo;

        async fn load(&self) -> anyhow::Result<Echo> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.broken {
                anyhow::bail!("ckpts/Z-Image-Turbo does not exist");
            }
            Ok(Echo)
        }
    }

    #[tokio::test]
    async fn returns_image_of_requested_size() {
        let pipeline = Pipeline::new(EchoLoader::default());
        let mut request = GenerationRequest::new("a lighthouse");
        request.width = 512;
        request.height = 768;
        let image = pipeline.generate(request).await.unwrap();
        assert_eq!((image.width(), image.height()), (512, 768));
    }

    #[tokio::test]
    async fn reuses_loaded_model() {
        let pipeline = Pipeline::new(EchoLoader::default());
        for _ in 0..3 {
            pipeline.generate(GenerationRequest::new("x")).await.unwrap();
        }
        assert_eq!(pipeline.loader().loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_failure_is_a_model_load_error() {
        let pipeline = Pipeline::new(EchoLoader {
            broken: true,
            ..Default::default()
        });
        let err = pipeline.generate(GenerationRequest::new("x")).await.unwrap_err();
        assert_eq!(err.error_type(), "ModelLoadError");
        assert!(err.to_string().contains("does not exist"));
        assert!(!pipeline.is_loaded());
    }

    #[tokio::test]
    async fn sampler_failure_is_an_inference_error() {
        let pipeline = Pipeline::new(EchoLoader::default());
        let err = pipeline.generate(GenerationRequest::new("boom")).await.unwrap_err();
        assert_eq!(err.error_type(), "InferenceError");
        assert_eq!(err.to_string(), "sampler diverged");
    }

    #[tokio::test]
    async fn sampler_panic_is_an_inference_error() {
        let pipeline = Pipeline::new(EchoLoader::default());
        let err = pipeline.generate(GenerationRequest::new("panic")).await.unwrap_err();
        assert_eq!(err.error_type(), "InferenceError");
        // the pipeline survives the panic
        pipeline.generate(GenerationRequest::new("x")).await.unwrap();
    }
}
