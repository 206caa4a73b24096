pub mod device_map;
pub mod error;
pub mod lazy;
pub mod loader;
pub mod pipeline;
pub mod request;
pub mod weights;
mod util;

mod zimage;

pub use device_map::*;
pub use error::{Error, Result};
use image::DynamicImage;
pub use lazy::LazyModel;
pub use loader::*;
pub use pipeline::Pipeline;
pub use request::GenerationRequest;
pub use util::{encode_png, encode_png_base64};
pub(crate) use util::{select_best_device, tensor_to_image};
pub use zimage::{ZImageLoader, ZImageModel};

/// A loaded text-to-image model. `run` blocks until the image is decoded.
pub trait ModelLike: Send + Sync {
    fn run(&self, request: &GenerationRequest) -> anyhow::Result<DynamicImage>;
}
