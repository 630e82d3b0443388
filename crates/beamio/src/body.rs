//! Response body unifying engine-generated responses with responses coming
//! from the inner service.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Buf, Bytes};
use http_body::{Body, Frame, SizeHint};
use http_body_util::Full;
use pin_project_lite::pin_project;

pin_project! {
    /// A tri-state body: empty, a full engine payload, or the inner
    /// service's own body.
    #[project = ResponseBodyProj]
    pub enum ResponseBody<B> {
        Empty,
        Engine { #[pin] body: Full<Bytes> },
        Inner { #[pin] body: B },
    }
}

impl<B> ResponseBody<B> {
    pub fn empty_response() -> Self {
        ResponseBody::Empty
    }

    pub fn engine_response(body: impl Into<Bytes>) -> Self {
        ResponseBody::Engine {
            body: Full::new(body.into()),
        }
    }

    pub fn new(body: B) -> Self {
        ResponseBody::Inner { body }
    }
}

impl<B> Body for ResponseBody<B>
where
    B: Body,
    B::Data: Buf,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            ResponseBodyProj::Empty => Poll::Ready(None),
            ResponseBodyProj::Engine { body } => body
                .poll_frame(cx)
                .map(|f| f.map(|f| Ok(f.expect("Full is infallible")))),
            ResponseBodyProj::Inner { body } => body.poll_frame(cx).map(|f| {
                f.map(|f| f.map(|f| f.map_data(|mut data| data.copy_to_bytes(data.remaining()))))
            }),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ResponseBody::Empty => true,
            ResponseBody::Engine { body } => body.is_end_stream(),
            ResponseBody::Inner { body } => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            ResponseBody::Empty => SizeHint::with_exact(0),
            ResponseBody::Engine { body } => body.size_hint(),
            ResponseBody::Inner { body } => body.size_hint(),
        }
    }
}
