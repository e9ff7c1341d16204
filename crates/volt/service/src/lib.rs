//! Volt Service - the single entry point the invoking layer (HTTP
//! handlers, CLI, scheduler wiring) talks to.
//!
//! Wires the compiled access policies, the ledger, the bazaar, and the
//! submission workflow over one shared store handle, and flattens every
//! component error into the service taxonomy: `Unauthorized`,
//! `InvalidTransition`, `InsufficientStock`, `InsufficientPoints`,
//! `Conflict`, `NotFound`, `Backend`.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use std::sync::Arc;
use thiserror::Error;
use volt_bazaar::{BazaarError, BazaarEconomy};
use volt_ledger::{LedgerError, PointsLedger};
use volt_policy::{AccessPolicies, RequestContext};
use volt_storage::{
    BazaarStore, MissionStore, QueryWindow, StorageError, UserStore, VoltStore,
};
use volt_types::{
    Actor, BatchOutcome, BazaarItemRecord, Decision, HistoryId, HistoryRecord, ItemId, MissionId,
    MissionRecord, UserRecord,
};
use volt_workflow::{HistoryWorkflow, WorkflowError};

/// The chore economy facade.
#[derive(Clone)]
pub struct VoltService {
    store: Arc<dyn VoltStore>,
    policies: Arc<AccessPolicies>,
    ledger: PointsLedger,
    bazaar: BazaarEconomy,
    workflow: HistoryWorkflow,
}

impl VoltService {
    pub fn new(store: Arc<dyn VoltStore>, policies: AccessPolicies) -> Self {
        let policies = Arc::new(policies);
        let ledger = PointsLedger::new(store.clone());
        let bazaar = BazaarEconomy::new(store.clone(), ledger.clone());
        let workflow = HistoryWorkflow::new(store.clone(), ledger.clone(), policies.clone());
        Self {
            store,
            policies,
            ledger,
            bazaar,
            workflow,
        }
    }

    /// Build a service with the stock access rules.
    pub fn with_default_policies(store: Arc<dyn VoltStore>) -> Self {
        Self::new(store, AccessPolicies::defaults())
    }

    /// Access the underlying store handle.
    pub fn store(&self) -> Arc<dyn VoltStore> {
        self.store.clone()
    }

    /// The ledger component, e.g. for scheduler wiring.
    pub fn ledger(&self) -> PointsLedger {
        self.ledger.clone()
    }

    /// The bazaar component, e.g. for scheduler wiring.
    pub fn bazaar(&self) -> BazaarEconomy {
        self.bazaar.clone()
    }

    // ── Workflow surface ─────────────────────────────────────────────

    pub async fn submit_mission(
        &self,
        actor: &Actor,
        mission_id: &MissionId,
    ) -> Result<HistoryRecord, ServiceError> {
        Ok(self.workflow.submit(actor, mission_id).await?)
    }

    pub async fn decide_mission(
        &self,
        actor: &Actor,
        record_id: &HistoryId,
        decision: Decision,
    ) -> Result<HistoryRecord, ServiceError> {
        Ok(self.workflow.decide(actor, record_id, decision).await?)
    }

    pub async fn list_history(&self, actor: &Actor) -> Result<Vec<HistoryRecord>, ServiceError> {
        Ok(self.workflow.list(actor).await?)
    }

    pub async fn view_history(
        &self,
        actor: &Actor,
        record_id: &HistoryId,
    ) -> Result<HistoryRecord, ServiceError> {
        Ok(self.workflow.view(actor, record_id).await?)
    }

    // ── Bazaar surface ───────────────────────────────────────────────

    /// Claim one unit of a bazaar item for the requesting actor.
    pub async fn claim_item(
        &self,
        actor: &Actor,
        item_id: &ItemId,
    ) -> Result<BazaarItemRecord, ServiceError> {
        let item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("item {item_id} not found")))?;
        let ctx = RequestContext::new(Some(actor), &item);
        if !self.policies.bazaar.update.evaluate(&ctx) {
            return Err(ServiceError::Unauthorized);
        }
        Ok(self.bazaar.claim(&actor.id, item_id).await?)
    }

    /// List bazaar items visible to the actor.
    pub async fn list_items(&self, actor: &Actor) -> Result<Vec<BazaarItemRecord>, ServiceError> {
        let items = self.store.list_items(QueryWindow::default()).await?;
        Ok(items
            .into_iter()
            .filter(|item| {
                self.policies
                    .bazaar
                    .list
                    .evaluate(&RequestContext::new(Some(actor), item))
            })
            .collect())
    }

    // ── Mission surface ──────────────────────────────────────────────

    /// List active mission templates visible to the actor.
    pub async fn list_missions(&self, actor: &Actor) -> Result<Vec<MissionRecord>, ServiceError> {
        let missions = self.store.list_missions(QueryWindow::default()).await?;
        Ok(missions
            .into_iter()
            .filter(|mission| mission.is_active)
            .filter(|mission| {
                self.policies
                    .missions
                    .list
                    .evaluate(&RequestContext::new(Some(actor), mission))
            })
            .collect())
    }

    // ── User surface ─────────────────────────────────────────────────

    /// Household leaderboard: every visible member, highest balance first.
    pub async fn leaderboard(&self, actor: &Actor) -> Result<Vec<UserRecord>, ServiceError> {
        let users = self.store.list_users(QueryWindow::default()).await?;
        let mut visible: Vec<_> = users
            .into_iter()
            .filter(|user| {
                self.policies
                    .users
                    .list
                    .evaluate(&RequestContext::new(Some(actor), user))
            })
            .collect();
        visible.sort_by(|a, b| b.points.cmp(&a.points).then(a.username.cmp(&b.username)));
        Ok(visible)
    }

    // ── Maintenance surface (scheduler-facing, bypasses policies) ────

    pub async fn run_replenishment(&self) -> Result<BatchOutcome, ServiceError> {
        Ok(self.bazaar.replenish_all().await?)
    }

    pub async fn run_decay(&self) -> Result<BatchOutcome, ServiceError> {
        Ok(self.ledger.decay_all().await?)
    }
}

/// The service-level error taxonomy.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("insufficient stock for {0}")]
    InsufficientStock(String),

    #[error("insufficient points: have {have}, need {need}")]
    InsufficientPoints { have: u64, need: u64 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<WorkflowError> for ServiceError {
    fn from(value: WorkflowError) -> Self {
        match value {
            WorkflowError::Unauthorized => Self::Unauthorized,
            WorkflowError::InvalidTransition { from, decision } => {
                Self::InvalidTransition(format!("cannot {decision} a {from} record"))
            }
            WorkflowError::NotFound(msg) => Self::NotFound(msg),
            WorkflowError::Conflict(msg) => Self::Conflict(msg),
            WorkflowError::Backend(msg) => Self::Backend(msg),
            WorkflowError::Ledger(err) => err.into(),
        }
    }
}

impl From<BazaarError> for ServiceError {
    fn from(value: BazaarError) -> Self {
        match value {
            BazaarError::InsufficientStock { item } => Self::InsufficientStock(item),
            BazaarError::InsufficientPoints { have, need } => {
                Self::InsufficientPoints { have, need }
            }
            BazaarError::NotFound(msg) => Self::NotFound(msg),
            BazaarError::Conflict(msg) => Self::Conflict(msg),
            BazaarError::Backend(msg) => Self::Backend(msg),
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::InsufficientPoints { have, need } => {
                Self::InsufficientPoints { have, need }
            }
            LedgerError::NotFound(msg) => Self::NotFound(msg),
            LedgerError::Conflict(msg) => Self::Conflict(msg),
            LedgerError::InvalidAmount => Self::Backend("invalid ledger amount".to_string()),
            LedgerError::Backend(msg) => Self::Backend(msg),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            StorageError::Conflict(msg) => Self::Conflict(msg),
            StorageError::InvalidInput(msg) | StorageError::Backend(msg) => Self::Backend(msg),
        }
    }
}
