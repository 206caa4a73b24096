use std::future::Future;

use anyhow::Result;

use crate::ModelLike;

/// Builds a ready-to-run model. Called at most once per [`crate::LazyModel`].
pub trait Loader: Send + Sync + 'static {
    type Model: ModelLike + 'static;

    fn load(&self) -> impl Future<Output = Result<Self::Model>> + Send;
}
