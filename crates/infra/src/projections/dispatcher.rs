use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use mrp_events::{EventEnvelope, SkipReason, SyncOutcome};

use super::{ProjectionError, ProjectionMapping, ProjectionStore, ProjectionSynchronizer};

/// Anything that applies envelopes of one entity family.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Event-type prefix this handler owns.
    fn entity(&self) -> &'static str;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<SyncOutcome, ProjectionError>;
}

#[async_trait]
impl<M, S> EnvelopeHandler for ProjectionSynchronizer<M, S>
where
    M: ProjectionMapping,
    S: ProjectionStore<M>,
{
    fn entity(&self) -> &'static str {
        M::ENTITY
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<SyncOutcome, ProjectionError> {
        self.apply(envelope).await
    }
}

/// Routes each envelope to the handler whose entity prefixes its event type.
///
/// The longest matching prefix wins, so `BomLineCreated` goes to `BomLine`, not `Bom`.
#[derive(Default, Clone)]
pub struct ProjectionDispatcher {
    handlers: Vec<Arc<dyn EnvelopeHandler>>,
}

impl core::fmt::Debug for ProjectionDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectionDispatcher")
            .field("entities", &self.entities())
            .finish()
    }
}

impl ProjectionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler<H: EnvelopeHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn register(&mut self, handler: Arc<dyn EnvelopeHandler>) {
        self.handlers.push(handler);
    }

    pub fn entities(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.entity()).collect()
    }

    fn route(&self, event_type: &str) -> Option<&Arc<dyn EnvelopeHandler>> {
        self.handlers
            .iter()
            .filter(|h| event_type.starts_with(h.entity()))
            .max_by_key(|h| h.entity().len())
    }

    /// Apply one envelope. Envelopes no handler owns are logged and skipped.
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> Result<SyncOutcome, ProjectionError> {
        match self.route(envelope.event_type()) {
            Some(handler) => handler.handle(envelope).await,
            None => {
                warn!(
                    event_id = %envelope.event_id(),
                    event_type = %envelope.event_type(),
                    "no projection handles this event type; discarded"
                );
                Ok(SyncOutcome::Skipped(SkipReason::UnknownEventType))
            }
        }
    }
}
