//! Acknowledgement plumbing.
//!
//! [`AckStream`] is both a [`Stream`] yielding every `(socket id, result)`
//! pair of a broadcast and a [`Future`] resolving to the first result, for
//! the single-socket case.

use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{
    future::FusedFuture,
    stream::{FusedStream, FuturesUnordered},
    Future, Stream,
};
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{sync::oneshot::Receiver, time::Timeout};

use crate::{
    adapter::Adapter,
    errors::{AckError, SocketError},
    packet::Packet,
    socket::Socket,
};
use beamio::Sid;

/// An acknowledgement sent by the client.
#[derive(Debug)]
pub struct AckResponse<T> {
    /// The data returned by the client.
    pub data: T,
    /// The binary payloads of the ack, empty when there are none.
    pub binary: Vec<Vec<u8>>,
}

pub(crate) type AckResult<T> = Result<AckResponse<T>, AckError>;

pin_project! {
    /// One pending acknowledgement, tagged with its socket.
    pub(crate) struct AckResultFut {
        sid: Sid,
        #[pin]
        state: AckFutState,
    }
}

pin_project! {
    #[project = AckFutStateProj]
    enum AckFutState {
        Pending { #[pin] rx: Timeout<Receiver<AckResult<Value>>> },
        // The send failed right away, e.g. the socket was already closed.
        Failed { err: Option<SocketError> },
    }
}

impl AckResultFut {
    fn new(sid: Sid, rx: Receiver<AckResult<Value>>, timeout: Duration) -> Self {
        Self {
            sid,
            state: AckFutState::Pending {
                rx: tokio::time::timeout(timeout, rx),
            },
        }
    }

    fn failed(sid: Sid, err: SocketError) -> Self {
        Self {
            sid,
            state: AckFutState::Failed { err: Some(err) },
        }
    }
}

impl Future for AckResultFut {
    type Output = (Sid, AckResult<Value>);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let sid = *this.sid;
        match this.state.project() {
            AckFutStateProj::Pending { rx } => match rx.poll(cx) {
                Poll::Ready(Ok(Ok(res))) => Poll::Ready((sid, res)),
                // sender dropped: the socket disconnected before answering
                Poll::Ready(Ok(Err(_))) => {
                    Poll::Ready((sid, Err(AckError::Socket(SocketError::Closed))))
                }
                Poll::Ready(Err(_)) => Poll::Ready((sid, Err(AckError::Timeout))),
                Poll::Pending => Poll::Pending,
            },
            AckFutStateProj::Failed { err } => {
                let err = err.take().expect("ack future polled after completion");
                Poll::Ready((sid, Err(AckError::Socket(err))))
            }
        }
    }
}

pin_project! {
    /// The untyped ack aggregation. It is converted to an [`AckStream`] by
    /// the operators.
    #[project = InnerProj]
    pub(crate) enum AckInnerStream {
        Stream {
            #[pin]
            rxs: FuturesUnordered<AckResultFut>,
        },
        Fut {
            #[pin]
            rx: Timeout<Receiver<AckResult<Value>>>,
            sid: Sid,
            polled: bool,
        },
    }
}

impl AckInnerStream {
    /// Send `packet` to every socket and wait for one ack each.
    ///
    /// The recipient count is fixed up front: sockets that fail to receive
    /// the packet still occupy a slot of the stream, as an error entry.
    pub fn broadcast<A: Adapter>(
        packet: Packet<'static>,
        sockets: Vec<std::sync::Arc<Socket<A>>>,
        timeout: Duration,
    ) -> Self {
        let rxs = FuturesUnordered::new();

        for socket in sockets {
            match socket.send_with_ack(packet.clone()) {
                Ok(rx) => rxs.push(AckResultFut::new(socket.id, rx, timeout)),
                Err(err) => rxs.push(AckResultFut::failed(socket.id, err)),
            }
        }
        AckInnerStream::Stream { rxs }
    }

    /// Wait for the acknowledgement of a single socket.
    pub fn send(rx: Receiver<AckResult<Value>>, timeout: Duration, sid: Sid) -> Self {
        AckInnerStream::Fut {
            rx: tokio::time::timeout(timeout, rx),
            sid,
            polled: false,
        }
    }
}

impl Stream for AckInnerStream {
    type Item = (Sid, AckResult<Value>);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.project() {
            InnerProj::Stream { rxs } => rxs.poll_next(cx),
            InnerProj::Fut { polled, .. } if *polled => Poll::Ready(None),
            InnerProj::Fut { rx, sid, polled } => match rx.poll(cx) {
                Poll::Ready(res) => {
                    *polled = true;
                    let res = match res {
                        Ok(Ok(res)) => res,
                        Ok(Err(_)) => Err(AckError::Socket(SocketError::Closed)),
                        Err(_) => Err(AckError::Timeout),
                    };
                    Poll::Ready(Some((*sid, res)))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            AckInnerStream::Stream { rxs } => rxs.size_hint(),
            AckInnerStream::Fut { .. } => (1, Some(1)),
        }
    }
}

impl FusedStream for AckInnerStream {
    fn is_terminated(&self) -> bool {
        match self {
            AckInnerStream::Stream { rxs } => rxs.is_terminated(),
            AckInnerStream::Fut { polled, .. } => *polled,
        }
    }
}

pin_project! {
    /// The typed acknowledgement aggregation returned by `emit_with_ack`.
    ///
    /// * As a [`Stream`] it yields every `(socket id, result)` pair of a
    ///   broadcast.
    /// * As a [`Future`] it resolves to the first result, which is the only
    ///   one when emitting to a single socket.
    #[must_use = "futures and streams do nothing unless you `.await` or poll them"]
    pub struct AckStream<T> {
        #[pin]
        inner: AckInnerStream,
        _marker: std::marker::PhantomData<T>,
    }
}

impl<T: DeserializeOwned> Stream for AckStream<T> {
    type Item = (Sid, Result<AckResponse<T>, AckError>);

    #[inline]
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .inner
            .poll_next(cx)
            .map(|v| v.map(|(sid, res)| (sid, map_ack_response(res))))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T: DeserializeOwned> FusedStream for AckStream<T> {
    #[inline]
    fn is_terminated(&self) -> bool {
        FusedStream::is_terminated(&self.inner)
    }
}

impl<T: DeserializeOwned> Future for AckStream<T> {
    type Output = Result<AckResponse<T>, AckError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().inner.poll_next(cx) {
            Poll::Ready(Some((_, res))) => Poll::Ready(map_ack_response(res)),
            Poll::Ready(None) => Poll::Ready(Err(AckError::Socket(SocketError::Closed))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: DeserializeOwned> FusedFuture for AckStream<T> {
    #[inline]
    fn is_terminated(&self) -> bool {
        FusedStream::is_terminated(&self.inner)
    }
}

impl<T> From<AckInnerStream> for AckStream<T> {
    fn from(inner: AckInnerStream) -> Self {
        Self {
            inner,
            _marker: std::marker::PhantomData,
        }
    }
}

fn map_ack_response<T: DeserializeOwned>(ack: AckResult<Value>) -> AckResult<T> {
    ack.and_then(|v| {
        serde_json::from_value(v.data)
            .map(|data| AckResponse {
                data,
                binary: v.binary,
            })
            .map_err(AckError::Serde)
    })
}
