//! Volt Workflow - the mission submission state machine.
//!
//! submitted → review → {approved, rejected, redo}; redo → review.
//! Approval is the only path that credits the ledger, and the status flip
//! and the credit commit in one coupled write. The precondition
//! (`status == review`) is re-checked on every retry, so a record can be
//! approved at most once no matter how the writes race.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use std::sync::Arc;
use thiserror::Error;
use volt_ledger::{LedgerError, PointsLedger};
use volt_policy::{AccessPolicies, RequestContext};
use volt_storage::{
    CoupledWriteStore, HistoryStore, MissionStore, QueryWindow, StorageError, UserStore, VoltStore,
};
use volt_types::{Actor, Decision, HistoryId, HistoryRecord, MissionId, MissionStatus};

/// Attempts per optimistic write before giving up with `Conflict`.
const WRITE_RETRY_ATTEMPTS: usize = 3;

/// The mission submission workflow. Sole owner of `HistoryRecord.status`
/// and `points_awarded`.
#[derive(Clone)]
pub struct HistoryWorkflow {
    store: Arc<dyn VoltStore>,
    ledger: PointsLedger,
    policies: Arc<AccessPolicies>,
}

impl HistoryWorkflow {
    pub fn new(
        store: Arc<dyn VoltStore>,
        ledger: PointsLedger,
        policies: Arc<AccessPolicies>,
    ) -> Self {
        Self {
            store,
            ledger,
            policies,
        }
    }

    /// Submit a mission for review.
    ///
    /// The record is created in `submitted` and flipped to `review` during
    /// intake; exactly one record write happens and no actor ever observes
    /// a `submitted` record.
    pub async fn submit(
        &self,
        actor: &Actor,
        mission_id: &MissionId,
    ) -> Result<HistoryRecord, WorkflowError> {
        let mission = self
            .store
            .get_mission(mission_id)
            .await?
            .filter(|mission| mission.is_active)
            .ok_or_else(|| WorkflowError::NotFound(format!("mission {mission_id} not found")))?;

        let mut record = HistoryRecord::new(actor.id.clone(), mission.id.clone());
        let ctx = RequestContext::new(Some(actor), &record);
        if !self.policies.history.create.evaluate(&ctx) {
            return Err(WorkflowError::Unauthorized);
        }

        record.status = MissionStatus::Review;
        let created = self.store.create_history(record).await?;
        tracing::info!(
            record_id = %created.id,
            user_id = %created.user_id,
            mission = %mission.title,
            "mission submitted for review"
        );
        Ok(created)
    }

    /// Apply a reviewer decision (or an owner resubmission) to a record.
    ///
    /// `redo` is dispatched on (status, actor): a parent issuing it on a
    /// `review` record sends the record back, the owning child issuing it
    /// on a `redo` record resubmits.
    pub async fn decide(
        &self,
        actor: &Actor,
        record_id: &HistoryId,
        decision: Decision,
    ) -> Result<HistoryRecord, WorkflowError> {
        for _ in 0..WRITE_RETRY_ATTEMPTS {
            let record = self
                .store
                .get_history(record_id)
                .await?
                .ok_or_else(|| {
                    WorkflowError::NotFound(format!("history record {record_id} not found"))
                })?;

            let ctx = RequestContext::new(Some(actor), &record);
            if !self.policies.history.update.evaluate(&ctx) {
                return Err(WorkflowError::Unauthorized);
            }

            let outcome = match decision {
                Decision::Approve => self.approve(actor, record).await?,
                Decision::Reject => self.reject(actor, record).await?,
                Decision::Redo => self.redo(actor, record).await?,
            };

            match outcome {
                DecideOutcome::Done(record) => return Ok(record),
                DecideOutcome::Retry => continue,
            }
        }
        Err(WorkflowError::Conflict(format!(
            "decision {decision} on record {record_id} kept conflicting"
        )))
    }

    /// List submissions the actor may see: parents see everything, a child
    /// only their own records (the collection's list rule, per record).
    pub async fn list(&self, actor: &Actor) -> Result<Vec<HistoryRecord>, WorkflowError> {
        let records = self.store.list_history(QueryWindow::default()).await?;
        Ok(records
            .into_iter()
            .filter(|record| {
                self.policies
                    .history
                    .list
                    .evaluate(&RequestContext::new(Some(actor), record))
            })
            .collect())
    }

    /// Fetch a single submission, gated by the view rule.
    pub async fn view(
        &self,
        actor: &Actor,
        record_id: &HistoryId,
    ) -> Result<HistoryRecord, WorkflowError> {
        let record = self
            .store
            .get_history(record_id)
            .await?
            .ok_or_else(|| {
                WorkflowError::NotFound(format!("history record {record_id} not found"))
            })?;
        let ctx = RequestContext::new(Some(actor), &record);
        if !self.policies.history.view.evaluate(&ctx) {
            return Err(WorkflowError::Unauthorized);
        }
        Ok(record)
    }

    async fn approve(
        &self,
        actor: &Actor,
        record: HistoryRecord,
    ) -> Result<DecideOutcome, WorkflowError> {
        if !actor.role.is_parent() {
            return Err(WorkflowError::Unauthorized);
        }
        if record.status != MissionStatus::Review {
            return Err(WorkflowError::InvalidTransition {
                from: record.status,
                decision: Decision::Approve,
            });
        }

        let mission = self
            .store
            .get_mission(&record.mission_id)
            .await?
            .ok_or_else(|| {
                WorkflowError::NotFound(format!("mission {} not found", record.mission_id))
            })?;
        let user = self
            .store
            .get_user(&record.user_id)
            .await?
            .ok_or_else(|| {
                WorkflowError::NotFound(format!("user {} not found", record.user_id))
            })?;

        let mut credited = self.ledger.prepare_credit(&user, mission.base_points)?;
        credited.missions_completed += 1;

        let mut next = record;
        next.status = MissionStatus::Approved;
        next.points_awarded = Some(mission.base_points);

        match self.store.save_history_with_user(next, credited).await {
            Ok((record, user)) => {
                tracing::info!(
                    record_id = %record.id,
                    user_id = %user.id,
                    awarded = mission.base_points,
                    points = user.points,
                    "mission approved"
                );
                Ok(DecideOutcome::Done(record))
            }
            Err(StorageError::Conflict(_)) => Ok(DecideOutcome::Retry),
            Err(err) => Err(err.into()),
        }
    }

    async fn reject(
        &self,
        actor: &Actor,
        record: HistoryRecord,
    ) -> Result<DecideOutcome, WorkflowError> {
        if !actor.role.is_parent() {
            return Err(WorkflowError::Unauthorized);
        }
        if record.status != MissionStatus::Review {
            return Err(WorkflowError::InvalidTransition {
                from: record.status,
                decision: Decision::Reject,
            });
        }

        let mut next = record;
        next.status = MissionStatus::Rejected;
        match self.store.save_history(next).await {
            Ok(record) => {
                tracing::info!(record_id = %record.id, "mission rejected");
                Ok(DecideOutcome::Done(record))
            }
            Err(StorageError::Conflict(_)) => Ok(DecideOutcome::Retry),
            Err(err) => Err(err.into()),
        }
    }

    async fn redo(
        &self,
        actor: &Actor,
        record: HistoryRecord,
    ) -> Result<DecideOutcome, WorkflowError> {
        let target = match record.status {
            // Parent sends the submission back for another try.
            MissionStatus::Review if actor.role.is_parent() => MissionStatus::Redo,
            // The owning child resubmits.
            MissionStatus::Redo if actor.id == record.user_id => MissionStatus::Review,
            MissionStatus::Review | MissionStatus::Redo => {
                return Err(WorkflowError::Unauthorized)
            }
            from => {
                return Err(WorkflowError::InvalidTransition {
                    from,
                    decision: Decision::Redo,
                })
            }
        };

        let mut next = record;
        next.status = target;
        match self.store.save_history(next).await {
            Ok(record) => {
                tracing::info!(record_id = %record.id, status = %record.status, "mission sent for redo");
                Ok(DecideOutcome::Done(record))
            }
            Err(StorageError::Conflict(_)) => Ok(DecideOutcome::Retry),
            Err(err) => Err(err.into()),
        }
    }
}

enum DecideOutcome {
    Done(HistoryRecord),
    Retry,
}

/// Workflow-related errors.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid transition: cannot {decision} a {from} record")]
    InvalidTransition {
        from: MissionStatus,
        decision: Decision,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<StorageError> for WorkflowError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            StorageError::Conflict(msg) => Self::Conflict(msg),
            StorageError::InvalidInput(msg) | StorageError::Backend(msg) => Self::Backend(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volt_storage::memory::InMemoryVoltStore;
    use volt_storage::{MissionStore, UserStore};
    use volt_types::{MissionRecord, Role, UserRecord};

    struct Fixture {
        store: Arc<InMemoryVoltStore>,
        workflow: HistoryWorkflow,
        parent: Actor,
        child: Actor,
        mission: MissionRecord,
    }

    async fn setup() -> Fixture {
        let store = Arc::new(InMemoryVoltStore::new());
        let parent_user = store
            .insert_user(UserRecord::new("dad", Role::Parent))
            .await
            .unwrap();
        let child_user = store
            .insert_user(UserRecord::new("zoe", Role::Child))
            .await
            .unwrap();
        let mission = store
            .insert_mission(MissionRecord::new("Dishes", "kitchen", 20))
            .await
            .unwrap();

        let workflow = HistoryWorkflow::new(
            store.clone(),
            PointsLedger::new(store.clone()),
            Arc::new(AccessPolicies::defaults()),
        );

        Fixture {
            store,
            workflow,
            parent: Actor {
                id: parent_user.id,
                role: Role::Parent,
            },
            child: Actor {
                id: child_user.id,
                role: Role::Child,
            },
            mission,
        }
    }

    #[tokio::test]
    async fn submission_lands_in_review() {
        let fx = setup().await;
        let record = fx.workflow.submit(&fx.child, &fx.mission.id).await.unwrap();
        assert_eq!(record.status, MissionStatus::Review);
        assert_eq!(record.user_id, fx.child.id);
        assert!(record.points_awarded.is_none());
    }

    #[tokio::test]
    async fn inactive_missions_are_not_submittable() {
        let fx = setup().await;
        let mut stale = MissionRecord::new("Old Chore", "delete", 5);
        stale.is_active = false;
        let stale = fx.store.insert_mission(stale).await.unwrap();

        let result = fx.workflow.submit(&fx.child, &stale.id).await;
        assert!(matches!(result, Err(WorkflowError::NotFound(_))));
    }

    #[tokio::test]
    async fn approval_credits_exactly_once() {
        let fx = setup().await;
        let record = fx.workflow.submit(&fx.child, &fx.mission.id).await.unwrap();

        let approved = fx
            .workflow
            .decide(&fx.parent, &record.id, Decision::Approve)
            .await
            .unwrap();
        assert_eq!(approved.status, MissionStatus::Approved);
        assert_eq!(approved.points_awarded, Some(20));

        let user = fx.store.get_user(&fx.child.id).await.unwrap().unwrap();
        assert_eq!(user.points, 20);
        assert_eq!(user.missions_completed, 1);

        // A second approval must refuse, and the ledger must not move.
        let result = fx
            .workflow
            .decide(&fx.parent, &record.id, Decision::Approve)
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::InvalidTransition {
                from: MissionStatus::Approved,
                ..
            })
        ));
        let user = fx.store.get_user(&fx.child.id).await.unwrap().unwrap();
        assert_eq!(user.points, 20);
    }

    #[tokio::test]
    async fn children_cannot_adjudicate() {
        let fx = setup().await;
        let record = fx.workflow.submit(&fx.child, &fx.mission.id).await.unwrap();

        let result = fx
            .workflow
            .decide(&fx.child, &record.id, Decision::Approve)
            .await;
        assert!(matches!(result, Err(WorkflowError::Unauthorized)));
    }

    #[tokio::test]
    async fn rejection_is_terminal_and_creditless() {
        let fx = setup().await;
        let record = fx.workflow.submit(&fx.child, &fx.mission.id).await.unwrap();

        let rejected = fx
            .workflow
            .decide(&fx.parent, &record.id, Decision::Reject)
            .await
            .unwrap();
        assert_eq!(rejected.status, MissionStatus::Rejected);

        let user = fx.store.get_user(&fx.child.id).await.unwrap().unwrap();
        assert_eq!(user.points, 0);

        let result = fx
            .workflow
            .decide(&fx.child, &rejected.id, Decision::Redo)
            .await;
        assert!(matches!(result, Err(WorkflowError::Unauthorized)));
    }

    #[tokio::test]
    async fn redo_round_trip() {
        let fx = setup().await;
        let record = fx.workflow.submit(&fx.child, &fx.mission.id).await.unwrap();

        let sent_back = fx
            .workflow
            .decide(&fx.parent, &record.id, Decision::Redo)
            .await
            .unwrap();
        assert_eq!(sent_back.status, MissionStatus::Redo);

        // Another child may not touch the record.
        let other = Actor::new("max", Role::Child);
        let result = fx
            .workflow
            .decide(&other, &record.id, Decision::Redo)
            .await;
        assert!(matches!(result, Err(WorkflowError::Unauthorized)));

        // The owner resubmits, and the parent can now approve.
        let resubmitted = fx
            .workflow
            .decide(&fx.child, &record.id, Decision::Redo)
            .await
            .unwrap();
        assert_eq!(resubmitted.status, MissionStatus::Review);

        let approved = fx
            .workflow
            .decide(&fx.parent, &record.id, Decision::Approve)
            .await
            .unwrap();
        assert_eq!(approved.status, MissionStatus::Approved);
    }

    #[tokio::test]
    async fn listing_is_scoped_by_role() {
        let fx = setup().await;
        let other_user = fx
            .store
            .insert_user(UserRecord::new("max", Role::Child))
            .await
            .unwrap();
        let other = Actor {
            id: other_user.id,
            role: Role::Child,
        };

        fx.workflow.submit(&fx.child, &fx.mission.id).await.unwrap();
        fx.workflow.submit(&other, &fx.mission.id).await.unwrap();

        assert_eq!(fx.workflow.list(&fx.parent).await.unwrap().len(), 2);
        let mine = fx.workflow.list(&fx.child).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user_id, fx.child.id);
    }

    #[tokio::test]
    async fn viewing_another_childs_record_is_denied() {
        let fx = setup().await;
        let record = fx.workflow.submit(&fx.child, &fx.mission.id).await.unwrap();

        let other = Actor::new("max", Role::Child);
        let result = fx.workflow.view(&other, &record.id).await;
        assert!(matches!(result, Err(WorkflowError::Unauthorized)));

        let seen = fx.workflow.view(&fx.parent, &record.id).await.unwrap();
        assert_eq!(seen.id, record.id);
    }
}
