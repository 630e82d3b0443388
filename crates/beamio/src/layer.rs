//! A tower [`Layer`](tower::Layer) wrapping any http service with the
//! engine.

use std::sync::Arc;

use tower::Layer;

use crate::{config::EngineConfig, handler::EngineHandler, service::EngineService};

/// Wraps an inner service with an [`EngineService`].
pub struct EngineLayer<H: EngineHandler> {
    handler: Arc<H>,
    config: EngineConfig,
}

impl<H: EngineHandler> EngineLayer<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(handler: Arc<H>, config: EngineConfig) -> Self {
        Self { handler, config }
    }
}

impl<H: EngineHandler> Clone for EngineLayer<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S, H: EngineHandler> Layer<S> for EngineLayer<H> {
    type Service = EngineService<H, S>;

    fn layer(&self, inner: S) -> Self::Service {
        EngineService::with_config_inner(inner, self.handler.clone(), self.config.clone())
    }
}
