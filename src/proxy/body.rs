//! Response body wrapper tied to a backend's in-flight count.

use crate::backend::InflightGuard;
use hyper::body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Body that holds an [`InflightGuard`] until the stream finishes.
    ///
    /// The guard is released on the final frame, on a body error, or when
    /// the body is dropped early (for example, the client went away).
    pub struct GuardedBody<B> {
        #[pin]
        inner: B,
        guard: Option<InflightGuard>,
    }
}

impl<B> GuardedBody<B> {
    /// Wrap `inner`, keeping `guard` alive while it streams.
    pub fn new(inner: B, guard: InflightGuard) -> Self {
        Self {
            inner,
            guard: Some(guard),
        }
    }
}

impl<B: Body> Body for GuardedBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = this.inner.poll_frame(cx);

        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            this.guard.take();
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
