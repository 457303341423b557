//! Outbound boundary of the enricher.
//!
//! The enricher does not own a broker binding. This module defines the
//! Tower-compatible seam it plugs into: enriched [`Message`]s are handed to
//! any `tower::Service<Message>`, typically a [`SenderService`] wrapping a
//! concrete [`Sender`] backend.
//!
//! ## Key components
//!
//! - [`layers::HeaderEnricherLayer`]: Tower layer enriching every message
//!   before it reaches the inner service
//! - [`SenderService`]: Adapter from a [`Sender`] to a Tower service
//! - [`Sender`]: Trait implemented by concrete sender backends
//! - [`InMemory`]: Sender collecting messages in memory

mod inmemory;

pub mod layers;

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tower::Service;

use crate::Message;

pub use inmemory::InMemory;

/// Tower service adapter for a [`Sender`] backend.
///
/// This type bridges the [`Sender`] trait with Tower’s `Service` abstraction.
#[derive(Clone)]
pub struct SenderService<D> {
    sender: D,
}

impl<D> SenderService<D> {
    /// Create a new sender service from a backend.
    pub fn new(sender: D) -> Self {
        Self { sender }
    }
}

/// `tower::Service` implementation delegating to a [`Sender`].
impl<D> Service<Message> for SenderService<D>
where
    D: Sender + Clone + Send + 'static,
{
    type Response = ();
    type Error = tower::BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Message) -> Self::Future {
        let mut sender = self.sender.clone();
        Box::pin(async move {
            sender.send(req).await.map_err(Into::into)?;
            Ok(())
        })
    }
}

/// Trait implemented by concrete sender backends.
///
/// A sender is responsible for delivering an enriched [`Message`] to the next
/// stage of the pipeline (e.g. a broker binding or an in-memory queue).
#[async_trait::async_trait]
pub trait Sender {
    /// Backend-specific error type.
    type Error: Into<tower::BoxError>;

    /// Deliver a message.
    async fn send(&mut self, message: Message) -> Result<(), Self::Error>;
}
