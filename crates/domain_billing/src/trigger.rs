//! Post-commit analytics triggers
//!
//! A settlement hands the clinic-local date it touched to an
//! [`AnalyticsTrigger`] after its transaction commits. The trigger decides
//! when the day is replayed; it never affects the committed payment.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::analytics::AnalyticsRollupEngine;
use crate::error::BillingError;

/// Receives the dates whose rollups are stale
#[async_trait]
pub trait AnalyticsTrigger: Send + Sync {
    /// Reports that `date` changed; an error here is a soft failure
    async fn day_changed(&self, date: NaiveDate) -> Result<(), BillingError>;
}

/// Replays the day before returning
#[derive(Clone)]
pub struct InlineRollupTrigger {
    engine: AnalyticsRollupEngine,
}

impl InlineRollupTrigger {
    pub fn new(engine: AnalyticsRollupEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl AnalyticsTrigger for InlineRollupTrigger {
    async fn day_changed(&self, date: NaiveDate) -> Result<(), BillingError> {
        self.engine.rebuild_day(date).await.map(|_| ())
    }
}

/// Hands dates to a background worker and returns immediately
///
/// The worker drains whatever is queued, replays each distinct date once,
/// and logs failures.
#[derive(Clone)]
pub struct QueuedRollupTrigger {
    sender: mpsc::UnboundedSender<NaiveDate>,
}

impl QueuedRollupTrigger {
    /// Starts the worker on the current tokio runtime
    pub fn spawn(engine: AnalyticsRollupEngine) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(engine, receiver));
        (Self { sender }, handle)
    }
}

#[async_trait]
impl AnalyticsTrigger for QueuedRollupTrigger {
    async fn day_changed(&self, date: NaiveDate) -> Result<(), BillingError> {
        self.sender
            .send(date)
            .map_err(|_| BillingError::internal("analytics worker has stopped"))
    }
}

async fn run_worker(engine: AnalyticsRollupEngine, mut receiver: mpsc::UnboundedReceiver<NaiveDate>) {
    while let Some(first) = receiver.recv().await {
        let mut dates = BTreeSet::from([first]);
        while let Ok(date) = receiver.try_recv() {
            dates.insert(date);
        }

        for date in dates {
            if let Err(e) = engine.rebuild_day(date).await {
                warn!(%date, error = %e, "Queued analytics rebuild failed");
            }
        }
    }
    debug!("Analytics worker stopped");
}
