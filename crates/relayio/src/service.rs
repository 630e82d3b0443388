//! A tower [`Service`] serving the whole Socket.IO stack.

use std::{
    sync::Arc,
    task::{Context, Poll},
};

use http::{Request, Response};
use http_body::Body;
use tower::Service;

use crate::{adapter::Adapter, client::Client};
use beamio::{
    body::ResponseBody,
    service::{EngineService, NotFoundService},
    Engine,
};

/// The http service of a Socket.IO server: engine requests are handled,
/// everything else goes to the inner service.
pub struct SocketIoService<A: Adapter, S = NotFoundService> {
    engine_svc: EngineService<Client<A>, S>,
}

impl<A: Adapter, S: Clone> SocketIoService<A, S> {
    pub(crate) fn from_parts(inner: S, engine: Arc<Engine<Client<A>>>) -> Self {
        Self {
            engine_svc: EngineService::from_parts(inner, engine),
        }
    }
}

impl<A: Adapter, S: Clone> Clone for SocketIoService<A, S> {
    fn clone(&self) -> Self {
        Self {
            engine_svc: self.engine_svc.clone(),
        }
    }
}

impl<A: Adapter, S> std::fmt::Debug for SocketIoService<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketIoService").finish()
    }
}

impl<ReqBody, ResBody, S, A> Service<Request<ReqBody>> for SocketIoService<A, S>
where
    ReqBody: Body + Send + Unpin + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: std::fmt::Debug,
    ResBody: Body + Send + 'static,
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    A: Adapter,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = <EngineService<Client<A>, S> as Service<Request<ReqBody>>>::Future;

    #[inline(always)]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.engine_svc.poll_ready(cx)
    }

    #[inline(always)]
    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        self.engine_svc.call(req)
    }
}
