//! A tower [`Service`] serving the engine http surface, forwarding anything
//! else to an inner service.

use std::{
    convert::Infallible,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use ::futures::future::{self, Ready};
use http::{Request, Response};
use http_body::Body;
use http_body_util::Empty;
use tower::Service;

use crate::{
    body::ResponseBody, config::EngineConfig, engine::Engine, handler::EngineHandler,
};

mod futures;
mod parser;

pub use parser::{ParseError, TransportType};

use self::{futures::ResponseFuture, parser::dispatch_req};

/// A [`Service`] handling engine requests as a middleware.
///
/// Requests under the configured path prefix are routed to the matching
/// transport; everything else goes to the inner service, which defaults to a
/// [`NotFoundService`].
pub struct EngineService<H: EngineHandler, S = NotFoundService> {
    inner: S,
    engine: Arc<Engine<H>>,
}

impl<H: EngineHandler> EngineService<H, NotFoundService> {
    /// Create a standalone service answering 404 to non-engine requests.
    pub fn new(handler: Arc<H>) -> Self {
        EngineService::with_config(handler, EngineConfig::default())
    }

    /// Same as [`EngineService::new`] with a custom config.
    pub fn with_config(handler: Arc<H>, config: EngineConfig) -> Self {
        EngineService::with_config_inner(NotFoundService, handler, config)
    }
}

impl<S, H: EngineHandler> EngineService<H, S> {
    /// Create a new service wrapping a custom inner service.
    pub fn with_inner(inner: S, handler: Arc<H>) -> Self {
        EngineService::with_config_inner(inner, handler, EngineConfig::default())
    }

    /// Create a new service wrapping a custom inner service, with a custom
    /// config.
    pub fn with_config_inner(inner: S, handler: Arc<H>, config: EngineConfig) -> Self {
        EngineService {
            inner,
            engine: Arc::new(Engine::new(handler, config)),
        }
    }

    /// Build a service from an already running engine, sharing its sessions.
    pub fn from_parts(inner: S, engine: Arc<Engine<H>>) -> Self {
        EngineService { inner, engine }
    }

    /// The engine driven by this service.
    pub fn engine(&self) -> &Arc<Engine<H>> {
        &self.engine
    }

    /// Convert this service into a [`MakeEngineService`] usable by hyper's
    /// serving loops.
    pub fn into_make_service(self) -> MakeEngineService<H, S> {
        MakeEngineService::new(self)
    }
}

impl<S: Clone, H: EngineHandler> Clone for EngineService<H, S> {
    fn clone(&self) -> Self {
        EngineService {
            inner: self.inner.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<H: EngineHandler, S> std::fmt::Debug for EngineService<H, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineService")
            .field("engine", &self.engine)
            .finish()
    }
}

impl<ReqBody, ResBody, S, H> Service<Request<ReqBody>> for EngineService<H, S>
where
    ReqBody: Body + Send + Unpin + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: std::fmt::Debug,
    ResBody: Body + Send + 'static,
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    H: EngineHandler,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        if req.uri().path().starts_with(&self.engine.config.req_path) {
            dispatch_req(req, self.engine.clone())
        } else {
            ResponseFuture::new(self.inner.call(req))
        }
    }
}

/// A `MakeService` handing out clones of the wrapped [`EngineService`].
pub struct MakeEngineService<H: EngineHandler, S> {
    svc: EngineService<H, S>,
}

impl<H: EngineHandler, S> MakeEngineService<H, S> {
    pub fn new(svc: EngineService<H, S>) -> Self {
        MakeEngineService { svc }
    }
}

impl<H: EngineHandler, S: Clone, T> Service<T> for MakeEngineService<H, S> {
    type Response = EngineService<H, S>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: T) -> Self::Future {
        future::ready(Ok(self.svc.clone()))
    }
}

/// A [`Service`] answering 404 to everything, used as the default inner
/// service.
#[derive(Debug, Clone)]
pub struct NotFoundService;

impl<ReqBody> Service<Request<ReqBody>> for NotFoundService {
    type Response = Response<Empty<Bytes>>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _: Request<ReqBody>) -> Self::Future {
        future::ready(Ok(Response::builder()
            .status(404)
            .body(Empty::new())
            .unwrap()))
    }
}
