use std::path::PathBuf;

use clap::{Args, Parser};
use zimage_core::{
    weights::{DEFAULT_MODEL_PATH, DEFAULT_REPO_ID},
    DeviceMap, ZImageLoader,
};

/// Where the checkpoint lives and which device it goes on.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Checkpoint directory; downloaded from `--repo-id` when incomplete
    #[arg(long, env = "ZIMAGE_MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    /// Hugging Face Hub repository to fetch missing weights from
    #[arg(long, env = "ZIMAGE_REPO_ID", default_value = DEFAULT_REPO_ID)]
    pub repo_id: String,

    /// Use CPU instead of GPU
    #[arg(long, env = "ZIMAGE_FORCE_CPU")]
    pub cpu: bool,

    /// Accelerator ordinal
    #[arg(long, env = "ZIMAGE_DEVICE", default_value_t = 0)]
    pub device_ordinal: usize,
}

impl ModelArgs {
    pub fn loader(&self) -> ZImageLoader {
        ZImageLoader {
            model_path: self.model_path.clone(),
            repo_id: self.repo_id.clone(),
            device_map: DeviceMap::new(self.cpu, self.device_ordinal),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Z-Image HTTP server")]
pub struct ServerArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Host address to bind the server to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the server to
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,
}

impl ServerArgs {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Z-Image batch worker: one JSON event per stdin line, one JSON result per stdout line"
)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Process this single event and exit
    #[arg(long)]
    pub test_input: Option<String>,
}
