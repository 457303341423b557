use std::{future::Future, pin::Pin, sync::Arc};

use tower::{Layer, Service};

use crate::{HeaderEnricher, Message};

/// Tower `Service` wrapper that enriches messages before forwarding them.
///
/// Each request is run through a shared [`HeaderEnricher`]; the enriched
/// message is passed to the inner service. When enrichment fails the error
/// is returned to the caller and the inner service is not called, so retry
/// or dead-letter policies stay with the dispatcher.
#[derive(Clone)]
pub struct HeaderEnricherService<T> {
    inner: T,
    enricher: Arc<HeaderEnricher>,
}

impl<T> Service<Message> for HeaderEnricherService<T>
where
    T: Service<Message> + Clone + Send + 'static,
    <T as Service<Message>>::Error: Into<tower::BoxError>,
    T::Future: Send + 'static,
{
    type Response = T::Response;
    type Error = tower::BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Message) -> Self::Future {
        let mut inner = self.inner.clone();
        let enriched = self.enricher.enrich(&req);

        Box::pin(async move {
            let message = enriched?;
            inner.call(message).await.map_err(Into::into)
        })
    }
}

/// Tower `Layer` that applies `HeaderEnricherService` to a service stack.
///
/// The enricher is built once and shared by every service the layer
/// produces.
#[derive(Clone)]
pub struct HeaderEnricherLayer {
    enricher: Arc<HeaderEnricher>,
}

impl HeaderEnricherLayer {
    /// Create a layer around an enricher, or an `Arc` of one to share it.
    pub fn new(enricher: impl Into<Arc<HeaderEnricher>>) -> Self {
        Self {
            enricher: enricher.into(),
        }
    }
}

impl<S> Layer<S> for HeaderEnricherLayer {
    type Service = HeaderEnricherService<S>;

    fn layer(&self, service: S) -> Self::Service {
        HeaderEnricherService {
            inner: service,
            enricher: Arc::clone(&self.enricher),
        }
    }
}
