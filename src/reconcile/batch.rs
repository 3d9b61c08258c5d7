use super::{Outcome, Reconciler};
use crate::core::Identity;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::info;

/// Identities reconciled at once when the caller does not say otherwise
pub const DEFAULT_BATCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub created: usize,
    pub already_exists: usize,
    pub not_applicable: usize,
    pub failed: usize,
    /// Subset of `failed` that needs an operator
    pub requires_manual_setup: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Created { .. } => self.created += 1,
            Outcome::AlreadyExists { .. } => self.already_exists += 1,
            Outcome::NotApplicable => self.not_applicable += 1,
            Outcome::Failed {
                requires_manual_setup,
                ..
            } => {
                self.failed += 1;
                if *requires_manual_setup {
                    self.requires_manual_setup += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub identity_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub entries: Vec<BatchEntry>,
}

impl Reconciler {
    /// Reconcile many identities with at most `concurrency` in flight.
    ///
    /// Entries come back in input order. Duplicated identities are fine: the
    /// store's unique key still converges them to one profile.
    pub async fn reconcile_all(&self, identities: &[Identity], concurrency: usize) -> BatchReport {
        let entries: Vec<BatchEntry> = stream::iter(identities)
            .map(|identity| async move {
                BatchEntry {
                    identity_id: identity.id().to_string(),
                    outcome: self.reconcile(identity).await,
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let mut summary = BatchSummary::default();
        for entry in &entries {
            summary.record(&entry.outcome);
        }

        info!(
            total = summary.total,
            created = summary.created,
            already_exists = summary.already_exists,
            failed = summary.failed,
            "batch reconciliation finished"
        );

        BatchReport { summary, entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Role;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn identity(id: &str, role: Role) -> Identity {
        Identity::new(id, format!("{id}@example.ma"), "", role).unwrap()
    }

    #[tokio::test]
    async fn test_batch_summary_counts() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone());

        let identities = vec![
            identity("b1", Role::Candidate),
            identity("b2", Role::Company),
            identity("b1", Role::Candidate),
            identity("b3", Role::Staff),
        ];

        let report = reconciler.reconcile_all(&identities, 2).await;

        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.not_applicable, 1);
        assert_eq!(report.summary.failed, 0);
        assert_eq!(report.summary.created + report.summary.already_exists, 3);
        assert_eq!(store.profile_count().await, 2);

        let order: Vec<&str> = report.entries.iter().map(|e| e.identity_id.as_str()).collect();
        assert_eq!(order, vec!["b1", "b2", "b1", "b3"]);
    }

    #[tokio::test]
    async fn test_batch_counts_manual_setup_failures() {
        let store = Arc::new(MemoryStore::new().with_missing_schema());
        let reconciler = Reconciler::new(store);

        let report = reconciler
            .reconcile_all(&[identity("b4", Role::Worker)], 0)
            .await;

        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.requires_manual_setup, 1);
    }
}
