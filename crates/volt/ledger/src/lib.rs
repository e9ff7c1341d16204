//! Volt Ledger - the points (volt) balance authority.
//!
//! Nothing else in the system writes `User.points`. Credits come from
//! mission approvals, debits from bazaar claims, and the weekly decay
//! halves every balance. Callers that need a points change inside a larger
//! atomic unit use the `prepare_*` computations and hand the prepared user
//! record to the store's coupled write; the arithmetic still lives here.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use std::sync::Arc;
use thiserror::Error;
use volt_storage::{QueryWindow, StorageError, UserStore, VoltStore};
use volt_types::{BatchOutcome, UserId, UserRecord};

/// Attempts per optimistic write before giving up with `Conflict`.
const WRITE_RETRY_ATTEMPTS: usize = 3;

/// The points ledger facade.
#[derive(Clone)]
pub struct PointsLedger {
    store: Arc<dyn VoltStore>,
}

impl PointsLedger {
    pub fn new(store: Arc<dyn VoltStore>) -> Self {
        Self { store }
    }

    /// Compute a credited copy of `user`. Saturates instead of wrapping;
    /// balances are bounded by gameplay long before `u64::MAX`.
    pub fn prepare_credit(&self, user: &UserRecord, amount: u64) -> Result<UserRecord, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let mut next = user.clone();
        next.points = next.points.saturating_add(amount);
        Ok(next)
    }

    /// Compute a debited copy of `user`, or `InsufficientPoints`.
    pub fn prepare_debit(&self, user: &UserRecord, amount: u64) -> Result<UserRecord, LedgerError> {
        if user.points < amount {
            return Err(LedgerError::InsufficientPoints {
                have: user.points,
                need: amount,
            });
        }
        let mut next = user.clone();
        next.points -= amount;
        Ok(next)
    }

    /// Credit a user's balance.
    pub async fn credit(&self, user_id: &UserId, amount: u64) -> Result<UserRecord, LedgerError> {
        for _ in 0..WRITE_RETRY_ATTEMPTS {
            let user = self.load(user_id).await?;
            let next = self.prepare_credit(&user, amount)?;
            match self.store.save_user(next).await {
                Ok(saved) => return Ok(saved),
                Err(StorageError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(LedgerError::Conflict(format!(
            "credit of {amount} to user {user_id} kept conflicting"
        )))
    }

    /// Debit a user's balance. Fails without touching the record when the
    /// balance cannot cover the amount.
    pub async fn debit(&self, user_id: &UserId, amount: u64) -> Result<UserRecord, LedgerError> {
        for _ in 0..WRITE_RETRY_ATTEMPTS {
            let user = self.load(user_id).await?;
            let next = self.prepare_debit(&user, amount)?;
            match self.store.save_user(next).await {
                Ok(saved) => return Ok(saved),
                Err(StorageError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(LedgerError::Conflict(format!(
            "debit of {amount} from user {user_id} kept conflicting"
        )))
    }

    /// Halve a user's balance, rounding down. Returns `None` without
    /// writing when the balance would not change (already zero).
    pub async fn decay(&self, user_id: &UserId) -> Result<Option<UserRecord>, LedgerError> {
        for _ in 0..WRITE_RETRY_ATTEMPTS {
            let user = self.load(user_id).await?;
            let halved = user.points / 2;
            if halved == user.points {
                return Ok(None);
            }
            let mut next = user;
            next.points = halved;
            match self.store.save_user(next).await {
                Ok(saved) => return Ok(Some(saved)),
                Err(StorageError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(LedgerError::Conflict(format!(
            "decay of user {user_id} kept conflicting"
        )))
    }

    /// Decay every user. Per-user failures are logged and skipped; the
    /// batch always runs to the end of the collection.
    pub async fn decay_all(&self) -> Result<BatchOutcome, LedgerError> {
        let users = self.store.list_users(QueryWindow::default()).await?;
        let mut outcome = BatchOutcome::default();

        for user in users {
            match self.decay(&user.id).await {
                Ok(Some(decayed)) => {
                    tracing::debug!(user_id = %decayed.id, points = decayed.points, "volts decayed");
                    outcome.touch();
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(user_id = %user.id, error = %err, "volt decay failed, skipping user");
                    outcome.fail(user.id.0.clone(), err.to_string());
                }
            }
        }

        Ok(outcome)
    }

    async fn load(&self, user_id: &UserId) -> Result<UserRecord, LedgerError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("user {user_id} not found")))
    }
}

/// Ledger-related errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient points: have {have}, need {need}")]
    InsufficientPoints { have: u64, need: u64 },

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for LedgerError {
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
    use volt_storage::UserStore;
    use volt_types::Role;

    async fn user_with_points(store: &InMemoryVoltStore, points: u64) -> UserRecord {
        let mut user = UserRecord::new("zoe", Role::Child);
        user.points = points;
        store.insert_user(user).await.unwrap()
    }

    fn ledger(store: Arc<InMemoryVoltStore>) -> PointsLedger {
        PointsLedger::new(store)
    }

    #[tokio::test]
    async fn credit_and_debit_round_trip() {
        let store = Arc::new(InMemoryVoltStore::new());
        let user = user_with_points(&store, 0).await;
        let ledger = ledger(store);

        let credited = ledger.credit(&user.id, 25).await.unwrap();
        assert_eq!(credited.points, 25);

        let debited = ledger.debit(&user.id, 10).await.unwrap();
        assert_eq!(debited.points, 15);
    }

    #[tokio::test]
    async fn debit_fails_without_cover() {
        let store = Arc::new(InMemoryVoltStore::new());
        let user = user_with_points(&store, 5).await;
        let ledger = ledger(store.clone());

        let result = ledger.debit(&user.id, 10).await;
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientPoints { have: 5, need: 10 })
        ));

        let unchanged = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(unchanged.points, 5);
        assert_eq!(unchanged.revision, user.revision);
    }

    #[tokio::test]
    async fn credit_saturates_at_the_top() {
        let store = Arc::new(InMemoryVoltStore::new());
        let user = user_with_points(&store, u64::MAX - 5).await;
        let ledger = ledger(store);

        let credited = ledger.credit(&user.id, 100).await.unwrap();
        assert_eq!(credited.points, u64::MAX);
    }

    #[tokio::test]
    async fn zero_amounts_are_rejected() {
        let store = Arc::new(InMemoryVoltStore::new());
        let user = user_with_points(&store, 5).await;
        let ledger = ledger(store);

        assert!(matches!(
            ledger.credit(&user.id, 0).await,
            Err(LedgerError::InvalidAmount)
        ));
    }

    #[tokio::test]
    async fn decay_halves_rounding_down() {
        let store = Arc::new(InMemoryVoltStore::new());
        let user = user_with_points(&store, 25).await;
        let ledger = ledger(store);

        let once = ledger.decay(&user.id).await.unwrap().unwrap();
        assert_eq!(once.points, 12);
        let twice = ledger.decay(&user.id).await.unwrap().unwrap();
        assert_eq!(twice.points, 6);
    }

    #[tokio::test]
    async fn decay_at_zero_is_not_persisted() {
        let store = Arc::new(InMemoryVoltStore::new());
        let user = user_with_points(&store, 0).await;
        let ledger = ledger(store.clone());

        assert!(ledger.decay(&user.id).await.unwrap().is_none());

        let unchanged = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(unchanged.revision, user.revision);
    }

    #[tokio::test]
    async fn decay_all_reports_touched_counts() {
        let store = Arc::new(InMemoryVoltStore::new());
        let mut rich = UserRecord::new("zoe", Role::Child);
        rich.points = 41;
        let rich = store.insert_user(rich).await.unwrap();
        let broke = store
            .insert_user(UserRecord::new("max", Role::Child))
            .await
            .unwrap();
        let ledger = ledger(store.clone());

        let outcome = ledger.decay_all().await.unwrap();
        assert_eq!(outcome.touched, 1);
        assert!(outcome.is_clean());

        assert_eq!(store.get_user(&rich.id).await.unwrap().unwrap().points, 20);
        assert_eq!(store.get_user(&broke.id).await.unwrap().unwrap().points, 0);
    }

    #[tokio::test]
    async fn concurrent_credits_both_land() {
        let store = Arc::new(InMemoryVoltStore::new());
        let user = user_with_points(&store, 0).await;
        let ledger = ledger(store.clone());

        let (a, b) = tokio::join!(ledger.credit(&user.id, 10), ledger.credit(&user.id, 20));
        a.unwrap();
        b.unwrap();

        let final_user = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(final_user.points, 30);
    }
}
