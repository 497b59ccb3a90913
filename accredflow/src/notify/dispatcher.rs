//! Tier notification dispatch with per-execution deduplication.
//!
//! Each `(execution_id, facility_id)` pair is claimed before its publish. A
//! claim is released only when the channel reports a definite failure, so a
//! retried dispatch can try again; a timed-out publish keeps its claim since
//! the message may already be out. The ledger lives in memory: a crash mid
//! dispatch can lead to a second delivery after restart.

use chrono::NaiveDate;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{facility_notification, ChannelBindings, NotificationChannel, NotificationPayload};
use crate::errors::PublishError;
use crate::model::{ClassifiedFacility, Tier, TierCounts};

/// Stable identifier for a facility notification within an execution.
#[must_use]
pub fn notification_id(execution_id: &str, facility_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(execution_id.as_bytes());
    hasher.update(b":");
    hasher.update(facility_id.as_bytes());
    let digest = hasher.finalize();
    format!("idem:{}", hex::encode(&digest[..16]))
}

/// A facility notification that was not delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    /// The facility.
    pub facility_id: String,
    /// Its tier.
    pub tier: Tier,
    /// The channel it was bound for.
    pub channel: String,
    /// What went wrong.
    pub reason: String,
}

/// Outcome of one `dispatch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// The execution dispatched for.
    pub execution_id: String,
    /// Notifications published per tier.
    pub published: TierCounts,
    /// Facilities skipped because this execution already notified them.
    pub duplicates_suppressed: usize,
    /// Facilities in `Tier::None`.
    pub not_dispatched: usize,
    /// Per-facility publish failures.
    pub failures: Vec<DispatchFailure>,
}

impl DispatchReport {
    /// Total notifications published.
    #[must_use]
    pub fn total_published(&self) -> usize {
        self.published.dispatchable()
    }

    /// Returns true if any publish failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

enum PublishOutcome {
    Published,
    Failed(PublishError),
    TimedOut,
}

/// Publishes classified facilities to their tier channels.
pub struct NotificationDispatcher {
    channel: Arc<dyn NotificationChannel>,
    bindings: ChannelBindings,
    max_concurrent: usize,
    publish_timeout: Duration,
    delivered: DashMap<String, HashSet<String>>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("bindings", &self.bindings)
            .field("max_concurrent", &self.max_concurrent)
            .field("publish_timeout", &self.publish_timeout)
            .field("executions_tracked", &self.delivered.len())
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        bindings: ChannelBindings,
        max_concurrent: usize,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            bindings,
            max_concurrent: max_concurrent.max(1),
            publish_timeout,
            delivered: DashMap::new(),
        }
    }

    /// Returns the channel bindings.
    #[must_use]
    pub fn bindings(&self) -> &ChannelBindings {
        &self.bindings
    }

    /// Claims a facility for this execution; false if already claimed.
    fn claim(&self, execution_id: &str, facility_id: &str) -> bool {
        self.delivered
            .entry(execution_id.to_string())
            .or_default()
            .insert(facility_id.to_string())
    }

    fn release(&self, execution_id: &str, facility_id: &str) {
        if let Some(mut claimed) = self.delivered.get_mut(execution_id) {
            claimed.remove(facility_id);
        }
    }

    /// Number of facilities already notified for an execution.
    #[must_use]
    pub fn delivered_count(&self, execution_id: &str) -> usize {
        self.delivered.get(execution_id).map_or(0, |set| set.len())
    }

    /// Number of executions with a live ledger.
    #[must_use]
    pub fn tracked_executions(&self) -> usize {
        self.delivered.len()
    }

    /// Drops the ledger for an execution that will not be dispatched again.
    pub fn release_execution(&self, execution_id: &str) {
        self.delivered.remove(execution_id);
    }

    async fn publish_with_timeout(
        &self,
        channel: &str,
        payload: &NotificationPayload,
    ) -> PublishOutcome {
        let publish = self.channel.publish(channel, payload);
        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => PublishOutcome::Published,
            Ok(Err(err)) => PublishOutcome::Failed(err),
            Err(_) => PublishOutcome::TimedOut,
        }
    }

    /// Publishes each dispatchable facility to its tier channel.
    ///
    /// Tiers go out most urgent first. Within a tier, publishes run
    /// concurrently up to the configured limit. A failed publish is recorded
    /// and never stops the rest.
    pub async fn dispatch(
        &self,
        facilities: &[ClassifiedFacility],
        execution_id: &str,
        as_of_date: NaiveDate,
    ) -> DispatchReport {
        let mut report = DispatchReport {
            execution_id: execution_id.to_string(),
            ..DispatchReport::default()
        };

        for tier in Tier::DISPATCHABLE {
            let Some(channel) = self.bindings.for_tier(tier) else {
                continue;
            };

            let mut batch = Vec::new();
            for facility in facilities.iter().filter(|f| f.tier == tier) {
                if self.claim(execution_id, facility.facility_id()) {
                    batch.push(facility);
                } else {
                    debug!(
                        execution_id = %execution_id,
                        facility_id = %facility.facility_id(),
                        "Suppressing duplicate notification"
                    );
                    report.duplicates_suppressed += 1;
                }
            }

            let outcomes: Vec<(&ClassifiedFacility, PublishOutcome)> = stream::iter(batch)
                .map(|facility| async move {
                    let id = notification_id(execution_id, facility.facility_id());
                    let payload = facility_notification(facility, execution_id, as_of_date, &id);
                    (facility, self.publish_with_timeout(channel, &payload).await)
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

            for (facility, outcome) in outcomes {
                let reason = match outcome {
                    PublishOutcome::Published => {
                        report.published.increment(tier);
                        continue;
                    }
                    PublishOutcome::Failed(err) => {
                        self.release(execution_id, facility.facility_id());
                        err.reason
                    }
                    PublishOutcome::TimedOut => format!(
                        "publish timed out after {}ms",
                        self.publish_timeout.as_millis()
                    ),
                };
                warn!(
                    execution_id = %execution_id,
                    facility_id = %facility.facility_id(),
                    tier = %tier,
                    channel = %channel,
                    reason = %reason,
                    "Facility notification failed"
                );
                report.failures.push(DispatchFailure {
                    facility_id: facility.facility_id().to_string(),
                    tier,
                    channel: channel.to_string(),
                    reason,
                });
            }
        }

        report.not_dispatched = facilities.iter().filter(|f| !f.tier.is_dispatchable()).count();

        info!(
            execution_id = %execution_id,
            critical = report.published.critical,
            high = report.published.high,
            medium = report.published.medium,
            duplicates = report.duplicates_suppressed,
            failures = report.failures.len(),
            "Dispatch completed"
        );
        report
    }

    /// Publishes an operational alert.
    pub async fn publish_operational(
        &self,
        payload: &NotificationPayload,
    ) -> Result<(), PublishError> {
        let channel = self.bindings.operational.as_str();
        match self.publish_with_timeout(channel, payload).await {
            PublishOutcome::Published => Ok(()),
            PublishOutcome::Failed(err) => Err(err),
            PublishOutcome::TimedOut => Err(PublishError::new(
                channel,
                format!("publish timed out after {}ms", self.publish_timeout.as_millis()),
            )),
        }
    }
}
