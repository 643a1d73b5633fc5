//! Signal classification registry.
//!
//! Maps every known domain event type to the priority and delivery window
//! its signals are queued with. The table is built once at startup and
//! handed to the services that need it.

use std::collections::HashMap;

use crate::domain::models::{SignalEventType, SignalPriority, WindowType};

/// Queueing class of an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalClassification {
    /// Queue priority
    pub priority: SignalPriority,
    /// Delivery window
    pub window: WindowType,
}

impl SignalClassification {
    /// Classify as `priority` in `window`.
    pub const fn new(priority: SignalPriority, window: WindowType) -> Self {
        Self { priority, window }
    }
}

/// Classification applied to event types missing from the registry.
pub const FALLBACK_CLASSIFICATION: SignalClassification =
    SignalClassification::new(SignalPriority::Low, WindowType::BatchWindow);

const STANDARD_TABLE: &[(SignalEventType, SignalPriority, WindowType)] = {
    use SignalEventType as E;
    use SignalPriority as P;
    use WindowType as W;
    &[
        (E::TaskCreated, P::Low, W::BatchWindow),
        (E::TaskCompleted, P::Low, W::BatchWindow),
        (E::TaskOverdue, P::WindowAligned, W::MorningWindow),
        (E::TaskRescheduled, P::WindowAligned, W::EveningWindow),
        (E::HabitCompleted, P::Low, W::BatchWindow),
        (E::HabitMissed, P::Urgent, W::Immediate),
        (E::HabitStreakBroken, P::Urgent, W::Immediate),
        (E::GoalCreated, P::Low, W::BatchWindow),
        (E::GoalProgressUpdated, P::Low, W::BatchWindow),
        (E::GoalDeadlineApproaching, P::Urgent, W::Immediate),
        (E::ProjectCreated, P::Low, W::BatchWindow),
        (E::ProjectStalled, P::WindowAligned, W::WeeklyReview),
        (E::ExperimentStarted, P::Low, W::BatchWindow),
        (E::ExperimentEnded, P::WindowAligned, W::EveningWindow),
        (E::CheckInSubmitted, P::WindowAligned, W::EveningWindow),
        (E::LowEnergyReported, P::Urgent, W::Immediate),
        (E::ProfileUpdated, P::Low, W::BatchWindow),
        (E::DailyPlanRequested, P::Urgent, W::MorningWindow),
        (E::WeeklyReviewDue, P::WindowAligned, W::WeeklyReview),
    ]
};

/// Explicit event type to (priority, window) table.
#[derive(Debug, Clone, Default)]
pub struct SignalClassificationRegistry {
    entries: HashMap<SignalEventType, SignalClassification>,
}

impl SignalClassificationRegistry {
    /// Registry with no classifications.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry used in production.
    pub fn standard() -> Self {
        STANDARD_TABLE
            .iter()
            .fold(Self::new(), |registry, (event, priority, window)| {
                registry.with(*event, *priority, *window)
            })
    }

    /// Add or replace one classification.
    pub fn with(mut self, event: SignalEventType, priority: SignalPriority, window: WindowType) -> Self {
        self.entries
            .insert(event, SignalClassification::new(priority, window));
        self
    }

    /// Registered classification, if any.
    pub fn get(&self, event: SignalEventType) -> Option<SignalClassification> {
        self.entries.get(&event).copied()
    }

    /// Classification for `event`, falling back to low-priority batch delivery.
    pub fn classify(&self, event: SignalEventType) -> SignalClassification {
        self.get(event).unwrap_or_else(|| {
            tracing::warn!(event_type = event.as_str(), "Unmapped event type, using fallback classification");
            FALLBACK_CLASSIFICATION
        })
    }

    /// Known event types with no entry, in declaration order.
    pub fn validate(&self) -> Vec<SignalEventType> {
        let missing: Vec<_> = SignalEventType::ALL
            .into_iter()
            .filter(|event| !self.entries.contains_key(event))
            .collect();

        for event in &missing {
            tracing::warn!(event_type = event.as_str(), "Event type has no signal classification");
        }

        missing
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
