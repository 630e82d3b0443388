//! [`MessageHandler`]: what runs when an event packet reaches a socket.
//!
//! Extraction failures do not call the handler; they bubble up to the
//! socket's error channel as an argument-mismatch report.

use std::sync::Arc;

use futures::Future;
use serde_json::Value;

use super::{private, MakeErasedHandler};
use crate::{adapter::Adapter, socket::Socket};

/// A type-erased [`MessageHandler`], shared so dispatch does not hold the
/// registry lock while running it.
pub(crate) type BoxedMessageHandler<A> = Arc<dyn ErasedMessageHandler<A>>;

pub(crate) trait ErasedMessageHandler<A: Adapter>: Send + Sync + 'static {
    /// Returns the extraction failure message when the decoded arguments do
    /// not fit the handler signature.
    fn call(
        &self,
        s: Arc<Socket<A>>,
        v: Value,
        p: Vec<Vec<u8>>,
        ack_id: Option<i64>,
    ) -> Result<(), String>;
}

/// Extracts one handler argument from an event, without consuming it.
pub trait FromMessageParts<A: Adapter>: Sized {
    /// The error reported when the extraction fails.
    type Error: std::fmt::Display + Send + 'static;

    fn from_message_parts(
        s: &Arc<Socket<A>>,
        v: &mut Value,
        p: &mut Vec<Vec<u8>>,
        ack_id: &Option<i64>,
    ) -> Result<Self, Self::Error>;
}

/// Extracts the final handler argument from an event, consuming it.
///
/// Extractors that do not consume the event implement [`FromMessageParts`]
/// as well, plus a delegating [`FromMessage`] impl, so they are usable in
/// any position. A blanket impl would forbid consuming-only extractors like
/// [`Bin`](crate::extract::Bin), so the delegation is spelled per type.
pub trait FromMessage<A: Adapter>: Sized {
    /// The error reported when the extraction fails.
    type Error: std::fmt::Display + Send + 'static;

    fn from_message(
        s: Arc<Socket<A>>,
        v: Value,
        p: Vec<Vec<u8>>,
        ack_id: Option<i64>,
    ) -> Result<Self, Self::Error>;
}

/// A handler of event packets: any clonable sync or async closure whose
/// arguments are message extractors, the last one possibly consuming.
pub trait MessageHandler<A: Adapter, T>: Send + Sync + 'static {
    fn call(
        &self,
        s: Arc<Socket<A>>,
        v: Value,
        p: Vec<Vec<u8>>,
        ack_id: Option<i64>,
    ) -> Result<(), String>;

    #[doc(hidden)]
    fn phantom(&self) -> std::marker::PhantomData<T> {
        std::marker::PhantomData
    }
}

impl<A: Adapter, T, H> MakeErasedHandler<H, A, T>
where
    T: Send + Sync + 'static,
    H: MessageHandler<A, T> + Send + Sync + 'static,
{
    pub fn new_message_boxed(inner: H) -> BoxedMessageHandler<A> {
        Arc::new(MakeErasedHandler::new(inner))
    }
}

impl<A: Adapter, T, H> ErasedMessageHandler<A> for MakeErasedHandler<H, A, T>
where
    T: Send + Sync + 'static,
    H: MessageHandler<A, T> + Send + Sync + 'static,
{
    #[inline(always)]
    fn call(
        &self,
        s: Arc<Socket<A>>,
        v: Value,
        p: Vec<Vec<u8>>,
        ack_id: Option<i64>,
    ) -> Result<(), String> {
        self.handler.call(s, v, p, ack_id)
    }
}

macro_rules! impl_message_handler_async {
    ([$($ty:ident),*]) => {
        #[allow(non_snake_case, unused)]
        impl<A, F, Fut, $($ty,)* Last> MessageHandler<A, (private::Async, $($ty,)* Last)> for F
        where
            F: FnOnce($($ty,)* Last) -> Fut + Send + Sync + Clone + 'static,
            Fut: Future<Output = ()> + Send + 'static,
            A: Adapter,
            $( $ty: FromMessageParts<A> + Send, )*
            Last: FromMessage<A> + Send,
        {
            fn call(
                &self,
                s: Arc<Socket<A>>,
                mut v: Value,
                mut p: Vec<Vec<u8>>,
                ack_id: Option<i64>,
            ) -> Result<(), String> {
                $(
                    let $ty = $ty::from_message_parts(&s, &mut v, &mut p, &ack_id)
                        .map_err(|e| e.to_string())?;
                )*
                let last = Last::from_message(s, v, p, ack_id).map_err(|e| e.to_string())?;

                let fut = (self.clone())($($ty,)* last);
                tokio::spawn(fut);
                Ok(())
            }
        }
    };
}

macro_rules! impl_message_handler {
    ([$($ty:ident),*]) => {
        #[allow(non_snake_case, unused)]
        impl<A, F, $($ty,)* Last> MessageHandler<A, (private::Sync, $($ty,)* Last)> for F
        where
            F: FnOnce($($ty,)* Last) + Send + Sync + Clone + 'static,
            A: Adapter,
            $( $ty: FromMessageParts<A> + Send, )*
            Last: FromMessage<A> + Send,
        {
            fn call(
                &self,
                s: Arc<Socket<A>>,
                mut v: Value,
                mut p: Vec<Vec<u8>>,
                ack_id: Option<i64>,
            ) -> Result<(), String> {
                $(
                    let $ty = $ty::from_message_parts(&s, &mut v, &mut p, &ack_id)
                        .map_err(|e| e.to_string())?;
                )*
                let last = Last::from_message(s, v, p, ack_id).map_err(|e| e.to_string())?;

                (self.clone())($($ty,)* last);
                Ok(())
            }
        }
    };
}

/// Zero-argument handlers, kept out of the generic macros because they have
/// no consuming `Last` extractor.
impl<A: Adapter, F> MessageHandler<A, (private::Sync,)> for F
where
    F: FnOnce() + Send + Sync + Clone + 'static,
{
    fn call(
        &self,
        _: Arc<Socket<A>>,
        _: Value,
        _: Vec<Vec<u8>>,
        _: Option<i64>,
    ) -> Result<(), String> {
        (self.clone())();
        Ok(())
    }
}

impl<A: Adapter, F, Fut> MessageHandler<A, (private::Async,)> for F
where
    F: FnOnce() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(
        &self,
        _: Arc<Socket<A>>,
        _: Value,
        _: Vec<Vec<u8>>,
        _: Option<i64>,
    ) -> Result<(), String> {
        tokio::spawn((self.clone())());
        Ok(())
    }
}

macro_rules! impl_message_handlers {
    ($name:ident) => {
        $name!([]);
        $name!([T1]);
        $name!([T1, T2]);
        $name!([T1, T2, T3]);
        $name!([T1, T2, T3, T4]);
        $name!([T1, T2, T3, T4, T5]);
        $name!([T1, T2, T3, T4, T5, T6]);
        $name!([T1, T2, T3, T4, T5, T6, T7]);
    };
}

impl_message_handlers!(impl_message_handler_async);
impl_message_handlers!(impl_message_handler);
