//! Signal intake: classify a domain event and put it on the queue.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{EntityKind, NewSignal, SignalEventType, SignalTtlConfig};
use crate::domain::ports::SignalQueue;
use crate::services::event_registry::SignalClassificationRegistry;

/// Turns domain events into classified queue entries.
pub struct SignalIntake {
    queue: Arc<dyn SignalQueue>,
    registry: Arc<SignalClassificationRegistry>,
    ttl: SignalTtlConfig,
}

impl SignalIntake {
    /// Intake writing to `queue`.
    pub fn new(
        queue: Arc<dyn SignalQueue>,
        registry: Arc<SignalClassificationRegistry>,
        ttl: SignalTtlConfig,
    ) -> Self {
        Self { queue, registry, ttl }
    }

    /// Classify and enqueue one event. Returns the new queue id.
    pub async fn record(
        &self,
        user_id: Uuid,
        event_type: SignalEventType,
        target: Option<(EntityKind, Uuid)>,
    ) -> DomainResult<i64> {
        self.record_at(user_id, event_type, target, Utc::now()).await
    }

    /// As [`record`](Self::record) with an explicit occurrence time.
    pub async fn record_at(
        &self,
        user_id: Uuid,
        event_type: SignalEventType,
        target: Option<(EntityKind, Uuid)>,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<i64> {
        let class = self.registry.classify(event_type);
        let ttl = self.ttl.ttl_for(class.window);

        let mut signal = NewSignal::new(user_id, event_type, class.priority, class.window, ttl)
            .created_at(occurred_at, ttl);
        if let Some((kind, id)) = target {
            signal = signal.with_target(kind, id);
        }

        let id = self.queue.enqueue(&signal).await?;
        tracing::debug!(
            signal_id = id,
            %user_id,
            event_type = event_type.as_str(),
            priority = class.priority.as_str(),
            window = class.window.as_str(),
            "Signal enqueued"
        );
        Ok(id)
    }
}
