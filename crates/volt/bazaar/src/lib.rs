//! Volt Bazaar - the reward economy's contended resource.
//!
//! A claim couples a stock decrement with a points debit in one
//! revision-checked write: both commit or neither does. The weekly
//! replenishment resets opted-in items to their configured maximum and
//! clears the claim audit set. `max_stock = 0` items are deliberately
//! excluded from replenishment.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use std::sync::Arc;
use thiserror::Error;
use volt_ledger::{LedgerError, PointsLedger};
use volt_storage::{
    BazaarStore, CoupledWriteStore, QueryWindow, StorageError, UserStore, VoltStore,
};
use volt_types::{BatchOutcome, BazaarItemRecord, ItemId, UserId};

/// Attempts per optimistic write before giving up with `Conflict`.
const WRITE_RETRY_ATTEMPTS: usize = 3;

/// The bazaar economy facade. Sole owner of `stock` and `claimed_by`.
#[derive(Clone)]
pub struct BazaarEconomy {
    store: Arc<dyn VoltStore>,
    ledger: PointsLedger,
}

impl BazaarEconomy {
    pub fn new(store: Arc<dyn VoltStore>, ledger: PointsLedger) -> Self {
        Self { store, ledger }
    }

    /// Claim one unit of an item for a user.
    ///
    /// Preconditions (`stock > 0`, `points >= cost`) and both mutations
    /// (stock decrement + points debit) sit inside one coupled write; a
    /// racing writer triggers a bounded re-read-and-retry.
    pub async fn claim(
        &self,
        user_id: &UserId,
        item_id: &ItemId,
    ) -> Result<BazaarItemRecord, BazaarError> {
        for _ in 0..WRITE_RETRY_ATTEMPTS {
            let item = self.load_item(item_id).await?;
            let user = self
                .store
                .get_user(user_id)
                .await?
                .ok_or_else(|| BazaarError::NotFound(format!("user {user_id} not found")))?;

            if item.stock == 0 {
                return Err(BazaarError::InsufficientStock {
                    item: item.item_name,
                });
            }
            let paid = self.ledger.prepare_debit(&user, item.cost)?;

            let mut next = item;
            next.stock -= 1;
            next.claimed_by.insert(user.id.clone());

            match self.store.save_item_with_user(next, paid).await {
                Ok((item, user)) => {
                    tracing::info!(
                        item = %item.item_name,
                        user_id = %user.id,
                        stock = item.stock,
                        points = user.points,
                        "item claimed"
                    );
                    return Ok(item);
                }
                Err(StorageError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(BazaarError::Conflict(format!(
            "claim of item {item_id} kept conflicting"
        )))
    }

    /// Restock a single item. Returns the updated record, or `None` when
    /// the item is already full or opted out (`max_stock = 0`).
    pub async fn replenish(
        &self,
        item_id: &ItemId,
    ) -> Result<Option<BazaarItemRecord>, BazaarError> {
        for _ in 0..WRITE_RETRY_ATTEMPTS {
            let item = self.load_item(item_id).await?;
            if item.max_stock == 0 || item.stock >= item.max_stock {
                return Ok(None);
            }

            let mut next = item;
            next.stock = next.max_stock;
            next.claimed_by.clear();

            match self.store.save_item(next).await {
                Ok(saved) => return Ok(Some(saved)),
                Err(StorageError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(BazaarError::Conflict(format!(
            "replenishment of item {item_id} kept conflicting"
        )))
    }

    /// Restock every item. Per-item failures are logged and skipped; the
    /// batch always runs to the end of the collection.
    pub async fn replenish_all(&self) -> Result<BatchOutcome, BazaarError> {
        let items = self.store.list_items(QueryWindow::default()).await?;
        let mut outcome = BatchOutcome::default();

        for item in items {
            match self.replenish(&item.id).await {
                Ok(Some(stocked)) => {
                    tracing::debug!(
                        item = %stocked.item_name,
                        stock = stocked.stock,
                        "stock replenished"
                    );
                    outcome.touch();
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        item_id = %item.id,
                        error = %err,
                        "replenishment failed, skipping item"
                    );
                    outcome.fail(item.id.0.clone(), err.to_string());
                }
            }
        }

        Ok(outcome)
    }

    async fn load_item(&self, item_id: &ItemId) -> Result<BazaarItemRecord, BazaarError> {
        self.store
            .get_item(item_id)
            .await?
            .ok_or_else(|| BazaarError::NotFound(format!("item {item_id} not found")))
    }
}

/// Bazaar-related errors.
#[derive(Debug, Error)]
pub enum BazaarError {
    #[error("insufficient stock for {item}")]
    InsufficientStock { item: String },

    #[error("insufficient points: have {have}, need {need}")]
    InsufficientPoints { have: u64, need: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for BazaarError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            StorageError::Conflict(msg) => Self::Conflict(msg),
            StorageError::InvalidInput(msg) | StorageError::Backend(msg) => Self::Backend(msg),
        }
    }
}

impl From<LedgerError> for BazaarError {
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

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use volt_storage::memory::InMemoryVoltStore;
    use volt_storage::{BazaarStore, UserStore};
    use volt_types::{Role, UserRecord};

    async fn setup(points: u64, stock: u64, max_stock: u64, cost: u64) -> Fixture {
        let store = Arc::new(InMemoryVoltStore::new());
        let mut user = UserRecord::new("zoe", Role::Child);
        user.points = points;
        let user = store.insert_user(user).await.unwrap();
        let item = store
            .insert_item(BazaarItemRecord::new("Ice Cream Trip", cost, stock, max_stock))
            .await
            .unwrap();
        let bazaar = BazaarEconomy::new(store.clone(), PointsLedger::new(store.clone()));
        Fixture {
            store,
            bazaar,
            user,
            item,
        }
    }

    struct Fixture {
        store: Arc<InMemoryVoltStore>,
        bazaar: BazaarEconomy,
        user: UserRecord,
        item: BazaarItemRecord,
    }

    #[tokio::test]
    async fn claim_debits_and_decrements_together() {
        let fx = setup(25, 5, 5, 10).await;

        let item = fx.bazaar.claim(&fx.user.id, &fx.item.id).await.unwrap();
        assert_eq!(item.stock, 4);
        assert!(item.claimed_by.contains(&fx.user.id));

        let user = fx.store.get_user(&fx.user.id).await.unwrap().unwrap();
        assert_eq!(user.points, 15);
    }

    #[tokio::test]
    async fn empty_stock_fails_and_keeps_points() {
        let fx = setup(100, 0, 5, 10).await;

        let result = fx.bazaar.claim(&fx.user.id, &fx.item.id).await;
        assert!(matches!(result, Err(BazaarError::InsufficientStock { .. })));

        let user = fx.store.get_user(&fx.user.id).await.unwrap().unwrap();
        assert_eq!(user.points, 100);
    }

    #[tokio::test]
    async fn poor_user_fails_and_keeps_stock() {
        let fx = setup(5, 3, 5, 10).await;

        let result = fx.bazaar.claim(&fx.user.id, &fx.item.id).await;
        assert!(matches!(
            result,
            Err(BazaarError::InsufficientPoints { have: 5, need: 10 })
        ));

        let item = fx.store.get_item(&fx.item.id).await.unwrap().unwrap();
        assert_eq!(item.stock, 3);
        assert!(item.claimed_by.is_empty());
    }

    #[tokio::test]
    async fn replenish_resets_stock_and_claims() {
        let fx = setup(100, 5, 5, 10).await;
        fx.bazaar.claim(&fx.user.id, &fx.item.id).await.unwrap();
        fx.bazaar.claim(&fx.user.id, &fx.item.id).await.unwrap();

        let stocked = fx
            .bazaar
            .replenish(&fx.item.id)
            .await
            .unwrap()
            .expect("item should restock");
        assert_eq!(stocked.stock, 5);
        assert!(stocked.claimed_by.is_empty());
    }

    #[tokio::test]
    async fn replenish_is_a_noop_at_capacity() {
        let fx = setup(100, 5, 5, 10).await;
        assert!(fx.bazaar.replenish(&fx.item.id).await.unwrap().is_none());

        let item = fx.store.get_item(&fx.item.id).await.unwrap().unwrap();
        assert_eq!(item.revision, fx.item.revision);
    }

    #[tokio::test]
    async fn opted_out_items_never_restock() {
        let fx = setup(100, 2, 0, 10).await;
        fx.bazaar.claim(&fx.user.id, &fx.item.id).await.unwrap();

        assert!(fx.bazaar.replenish(&fx.item.id).await.unwrap().is_none());
        let item = fx.store.get_item(&fx.item.id).await.unwrap().unwrap();
        assert_eq!(item.stock, 1);
    }

    #[tokio::test]
    async fn replenish_all_skips_opted_out_items() {
        let store = Arc::new(InMemoryVoltStore::new());
        let empty = store
            .insert_item(BazaarItemRecord::new("Pizza Party", 200, 0, 5))
            .await
            .unwrap();
        let unmanaged = store
            .insert_item(BazaarItemRecord::new("Extra Screen Time", 50, 5, 0))
            .await
            .unwrap();
        let bazaar = BazaarEconomy::new(store.clone(), PointsLedger::new(store.clone()));

        let outcome = bazaar.replenish_all().await.unwrap();
        assert_eq!(outcome.touched, 1);
        assert!(outcome.is_clean());

        assert_eq!(store.get_item(&empty.id).await.unwrap().unwrap().stock, 5);
        assert_eq!(
            store.get_item(&unmanaged.id).await.unwrap().unwrap().stock,
            5
        );
    }

    #[derive(Debug, Clone)]
    enum EconomyOp {
        Claim,
        Replenish,
    }

    fn op_strategy() -> impl Strategy<Value = Vec<EconomyOp>> {
        proptest::collection::vec(
            prop_oneof![Just(EconomyOp::Claim), Just(EconomyOp::Replenish)],
            0..24,
        )
    }

    proptest! {
        #[test]
        fn property_stock_stays_within_bounds(ops in op_strategy()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            rt.block_on(async move {
                let fx = setup(u64::MAX / 2, 5, 5, 1).await;

                for op in ops {
                    match op {
                        EconomyOp::Claim => {
                            let _ = fx.bazaar.claim(&fx.user.id, &fx.item.id).await;
                        }
                        EconomyOp::Replenish => {
                            fx.bazaar.replenish(&fx.item.id).await.expect("replenish");
                        }
                    }
                    let item = fx.store.get_item(&fx.item.id).await.unwrap().unwrap();
                    assert!(item.stock <= item.max_stock);
                }
            });
        }
    }
}
