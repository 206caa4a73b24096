use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::OnceCell;

use crate::Loader;

/// Process-wide memoized model.
///
/// The first caller of [`LazyModel::get`] starts the load; concurrent callers
/// wait for that same load instead of starting their own. A successful load
/// is kept for the lifetime of the cell and never reloaded. A failed load is
/// not stored, so the next caller tries again.
///
/// The load runs on its own task. A caller that is dropped mid-load (an HTTP
/// client hanging up) leaves it running, and later callers join it.
pub struct LazyModel<L: Loader> {
    inner: Arc<Inner<L>>,
}

struct Inner<L: Loader> {
    loader: L,
    model: OnceCell<Arc<L::Model>>,
}

impl<L: Loader> LazyModel<L> {
    pub fn new(loader: L) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader,
                model: OnceCell::new(),
            }),
        }
    }

    pub async fn get(&self) -> Result<Arc<L::Model>> {
        if let Some(model) = self.inner.model.get() {
            return Ok(Arc::clone(model));
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let model = inner
                .model
                .get_or_try_init(|| async {
                    tracing::info!("loading model");
                    let model = inner.loader.load().await?;
                    tracing::info!("model loaded");
                    Ok::<_, anyhow::Error>(Arc::new(model))
                })
                .await?;
            Ok(Arc::clone(model))
        })
        .await
        .map_err(|e| anyhow!("model load task failed: {e}"))?
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.model.initialized()
    }

    pub fn loader(&self) -> &L {
        &self.inner.loader
    }
}
