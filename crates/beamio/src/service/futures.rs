use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use http::Response;
use pin_project_lite::pin_project;

use crate::body::ResponseBody;

type BoxResponseFuture<B> = Pin<Box<dyn Future<Output = Response<ResponseBody<B>>> + Send>>;

pin_project! {
    /// Future returned by the engine service: either the inner service's own
    /// future, an immediately available engine response, or an engine
    /// response still being computed.
    #[project = ResFutProj]
    pub struct ResponseFuture<F, B> {
        #[pin]
        inner: ResponseFutureInner<F, B>,
    }
}

pin_project! {
    #[project = ResFutInnerProj]
    enum ResponseFutureInner<F, B> {
        InnerService { #[pin] future: F },
        Ready { response: Option<Response<ResponseBody<B>>> },
        Engine { future: BoxResponseFuture<B> },
    }
}

impl<F, B> ResponseFuture<F, B> {
    /// Forward the inner service's future.
    pub(crate) fn new(future: F) -> Self {
        Self {
            inner: ResponseFutureInner::InnerService { future },
        }
    }

    /// An engine response that is already available.
    pub(crate) fn ready(response: Response<ResponseBody<B>>) -> Self {
        Self {
            inner: ResponseFutureInner::Ready {
                response: Some(response),
            },
        }
    }

    /// An empty engine response with the given status code.
    pub(crate) fn empty_response(code: u16) -> Self {
        let response = Response::builder()
            .status(code)
            .body(ResponseBody::empty_response())
            .unwrap();
        Self::ready(response)
    }

    /// An engine response that is still being computed.
    pub(crate) fn async_response(future: BoxResponseFuture<B>) -> Self {
        Self {
            inner: ResponseFutureInner::Engine { future },
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<ResponseBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().inner.project() {
            ResFutInnerProj::InnerService { future } => future
                .poll(cx)
                .map(|r| r.map(|response| response.map(ResponseBody::new))),
            ResFutInnerProj::Ready { response } => {
                Poll::Ready(Ok(response.take().expect("future polled after completion")))
            }
            ResFutInnerProj::Engine { future } => future.as_mut().poll(cx).map(Ok),
        }
    }
}
