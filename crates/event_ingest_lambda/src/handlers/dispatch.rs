use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use event_ingest_core::contract::ProcessingOutcome;
use event_ingest_core::registry::{Event, EventRegistry};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Processing bound to one event subject. Collaborators come in through the
/// implementor's constructor.
#[async_trait]
pub trait EventStrategy: Send + Sync {
    fn subject(&self) -> &'static str;

    async fn process(&self, event: &dyn Event, cancel: &CancellationToken) -> ProcessingOutcome;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no processing strategy bound to subject {0}")]
    MissingStrategy(String),
}

pub struct Dispatcher {
    strategies: HashMap<&'static str, Arc<dyn EventStrategy>>,
}

impl Dispatcher {
    /// Binds strategies by subject. Every subject the registry can decode needs one.
    pub fn new(
        registry: &EventRegistry,
        strategies: Vec<Arc<dyn EventStrategy>>,
    ) -> Result<Self, DispatchError> {
        let strategies: HashMap<_, _> = strategies
            .into_iter()
            .map(|strategy| (strategy.subject(), strategy))
            .collect();

        if let Some(subject) = registry
            .subjects()
            .into_iter()
            .find(|subject| !strategies.contains_key(subject))
        {
            return Err(DispatchError::MissingStrategy(subject.to_string()));
        }

        Ok(Self { strategies })
    }

    pub fn strategy_for(&self, subject: &str) -> Result<&Arc<dyn EventStrategy>, DispatchError> {
        self.strategies
            .get(subject)
            .ok_or_else(|| DispatchError::MissingStrategy(subject.to_string()))
    }

    pub async fn dispatch(
        &self,
        event: &dyn Event,
        cancel: &CancellationToken,
    ) -> Result<ProcessingOutcome, DispatchError> {
        let strategy = self.strategy_for(event.subject())?;
        debug!(subject = event.subject(), "dispatching event to strategy");
        Ok(strategy.process(event, cancel).await)
    }
}
