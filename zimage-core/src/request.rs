use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

pub const DEFAULT_WIDTH: usize = 1024;
pub const DEFAULT_HEIGHT: usize = 1024;
pub const DEFAULT_STEPS: usize = 8;

/// One text-to-image generation.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Validate)]
pub struct GenerationRequest {
    #[validate(length(min = 1, message = "prompt must not be empty"))]
    pub prompt: String,
    #[serde(default = "default_width")]
    #[validate(range(min = 256, max = 2048, message = "width must be between 256 and 2048"))]
    pub width: usize,
    #[serde(default = "default_height")]
    #[validate(range(min = 256, max = 2048, message = "height must be between 256 and 2048"))]
    pub height: usize,
    #[serde(default = "default_steps")]
    #[validate(range(min = 1, max = 50, message = "steps must be between 1 and 50"))]
    pub steps: usize,
    /// Fixes the initial noise. Without it every call samples fresh noise.
    /// Negative seeds wrap into the unsigned range.
    #[serde(default, deserialize_with = "deserialize_seed")]
    pub seed: Option<u64>,
}

fn default_width() -> usize {
    DEFAULT_WIDTH
}

fn default_height() -> usize {
    DEFAULT_HEIGHT
}

fn default_steps() -> usize {
    DEFAULT_STEPS
}

fn deserialize_seed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seed {
        Unsigned(u64),
        Signed(i64),
    }

    Ok(Option::<Seed>::deserialize(deserializer)?.map(|seed| match seed {
        Seed::Unsigned(seed) => seed,
        Seed::Signed(seed) => seed as u64,
    }))
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            steps: DEFAULT_STEPS,
            seed: None,
        }
    }

    /// Checks bounds, handing the request back when it may reach the model.
    pub fn validated(self) -> crate::Result<Self> {
        self.validate()?;
        Ok(self)
    }
}
