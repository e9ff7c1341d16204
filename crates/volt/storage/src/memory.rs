//! In-memory reference implementation for the volt storage traits.
//!
//! Deterministic and test-friendly. Production deployments put a
//! transactional backend behind the same traits; the coupled writes then
//! map onto one database transaction.

use crate::traits::{
    BazaarStore, CoupledWriteStore, HistoryStore, MissionStore, QueryWindow, UserStore,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use volt_types::{
    BazaarItemRecord, HistoryId, HistoryRecord, ItemId, MissionId, MissionRecord, UserId,
    UserRecord,
};

/// In-memory volt storage adapter.
#[derive(Default)]
pub struct InMemoryVoltStore {
    users: RwLock<HashMap<UserId, UserRecord>>,
    missions: RwLock<HashMap<MissionId, MissionRecord>>,
    history: RwLock<HashMap<HistoryId, HistoryRecord>>,
    items: RwLock<HashMap<ItemId, BazaarItemRecord>>,
}

impl InMemoryVoltStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_revision(stored: u64, incoming: u64, what: &str, id: &str) -> StorageResult<()> {
    if stored != incoming {
        return Err(StorageError::Conflict(format!(
            "{what} {id} revision {incoming} is stale (stored {stored})"
        )));
    }
    Ok(())
}

#[async_trait]
impl UserStore for InMemoryVoltStore {
    async fn insert_user(&self, record: UserRecord) -> StorageResult<UserRecord> {
        let mut guard = self
            .users
            .write()
            .map_err(|_| StorageError::Backend("users lock poisoned".to_string()))?;
        if guard.contains_key(&record.id) {
            return Err(StorageError::Conflict(format!(
                "user {} already exists",
                record.id
            )));
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_user(&self, id: &UserId) -> StorageResult<Option<UserRecord>> {
        let guard = self
            .users
            .read()
            .map_err(|_| StorageError::Backend("users lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn save_user(&self, record: UserRecord) -> StorageResult<UserRecord> {
        let mut guard = self
            .users
            .write()
            .map_err(|_| StorageError::Backend("users lock poisoned".to_string()))?;
        let stored = guard
            .get(&record.id)
            .ok_or_else(|| StorageError::NotFound(format!("user {} not found", record.id)))?;
        check_revision(stored.revision, record.revision, "user", &record.id.0)?;

        let mut next = record;
        next.revision += 1;
        next.updated_at = Utc::now();
        guard.insert(next.id.clone(), next.clone());
        Ok(next)
    }

    async fn list_users(&self, window: QueryWindow) -> StorageResult<Vec<UserRecord>> {
        let guard = self
            .users
            .read()
            .map_err(|_| StorageError::Backend("users lock poisoned".to_string()))?;
        let mut values = guard.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(apply_window(values, window))
    }
}

#[async_trait]
impl MissionStore for InMemoryVoltStore {
    async fn insert_mission(&self, record: MissionRecord) -> StorageResult<MissionRecord> {
        let mut guard = self
            .missions
            .write()
            .map_err(|_| StorageError::Backend("missions lock poisoned".to_string()))?;
        if guard.contains_key(&record.id) {
            return Err(StorageError::Conflict(format!(
                "mission {} already exists",
                record.id
            )));
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_mission(&self, id: &MissionId) -> StorageResult<Option<MissionRecord>> {
        let guard = self
            .missions
            .read()
            .map_err(|_| StorageError::Backend("missions lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn list_missions(&self, window: QueryWindow) -> StorageResult<Vec<MissionRecord>> {
        let guard = self
            .missions
            .read()
            .map_err(|_| StorageError::Backend("missions lock poisoned".to_string()))?;
        let mut values = guard.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(apply_window(values, window))
    }
}

#[async_trait]
impl HistoryStore for InMemoryVoltStore {
    async fn create_history(&self, record: HistoryRecord) -> StorageResult<HistoryRecord> {
        let mut guard = self
            .history
            .write()
            .map_err(|_| StorageError::Backend("history lock poisoned".to_string()))?;
        if guard.contains_key(&record.id) {
            return Err(StorageError::Conflict(format!(
                "history record {} already exists",
                record.id
            )));
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_history(&self, id: &HistoryId) -> StorageResult<Option<HistoryRecord>> {
        let guard = self
            .history
            .read()
            .map_err(|_| StorageError::Backend("history lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn save_history(&self, record: HistoryRecord) -> StorageResult<HistoryRecord> {
        let mut guard = self
            .history
            .write()
            .map_err(|_| StorageError::Backend("history lock poisoned".to_string()))?;
        let stored = guard.get(&record.id).ok_or_else(|| {
            StorageError::NotFound(format!("history record {} not found", record.id))
        })?;
        check_revision(stored.revision, record.revision, "history record", &record.id.0)?;

        let mut next = record;
        next.revision += 1;
        next.updated_at = Utc::now();
        guard.insert(next.id.clone(), next.clone());
        Ok(next)
    }

    async fn list_history(&self, window: QueryWindow) -> StorageResult<Vec<HistoryRecord>> {
        let guard = self
            .history
            .read()
            .map_err(|_| StorageError::Backend("history lock poisoned".to_string()))?;
        let mut values = guard.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(apply_window(values, window))
    }
}

#[async_trait]
impl BazaarStore for InMemoryVoltStore {
    async fn insert_item(&self, record: BazaarItemRecord) -> StorageResult<BazaarItemRecord> {
        let mut guard = self
            .items
            .write()
            .map_err(|_| StorageError::Backend("items lock poisoned".to_string()))?;
        if guard.contains_key(&record.id) {
            return Err(StorageError::Conflict(format!(
                "item {} already exists",
                record.id
            )));
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_item(&self, id: &ItemId) -> StorageResult<Option<BazaarItemRecord>> {
        let guard = self
            .items
            .read()
            .map_err(|_| StorageError::Backend("items lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn save_item(&self, record: BazaarItemRecord) -> StorageResult<BazaarItemRecord> {
        let mut guard = self
            .items
            .write()
            .map_err(|_| StorageError::Backend("items lock poisoned".to_string()))?;
        let stored = guard
            .get(&record.id)
            .ok_or_else(|| StorageError::NotFound(format!("item {} not found", record.id)))?;
        check_revision(stored.revision, record.revision, "item", &record.id.0)?;

        let mut next = record;
        next.revision += 1;
        next.updated_at = Utc::now();
        guard.insert(next.id.clone(), next.clone());
        Ok(next)
    }

    async fn list_items(&self, window: QueryWindow) -> StorageResult<Vec<BazaarItemRecord>> {
        let guard = self
            .items
            .read()
            .map_err(|_| StorageError::Backend("items lock poisoned".to_string()))?;
        let mut values = guard.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(apply_window(values, window))
    }
}

#[async_trait]
impl CoupledWriteStore for InMemoryVoltStore {
    async fn save_item_with_user(
        &self,
        item: BazaarItemRecord,
        user: UserRecord,
    ) -> StorageResult<(BazaarItemRecord, UserRecord)> {
        // Lock order: users before items, matching every other coupled path.
        let mut users = self
            .users
            .write()
            .map_err(|_| StorageError::Backend("users lock poisoned".to_string()))?;
        let mut items = self
            .items
            .write()
            .map_err(|_| StorageError::Backend("items lock poisoned".to_string()))?;

        let stored_user = users
            .get(&user.id)
            .ok_or_else(|| StorageError::NotFound(format!("user {} not found", user.id)))?;
        let stored_item = items
            .get(&item.id)
            .ok_or_else(|| StorageError::NotFound(format!("item {} not found", item.id)))?;
        check_revision(stored_user.revision, user.revision, "user", &user.id.0)?;
        check_revision(stored_item.revision, item.revision, "item", &item.id.0)?;

        let now = Utc::now();
        let mut next_user = user;
        next_user.revision += 1;
        next_user.updated_at = now;
        let mut next_item = item;
        next_item.revision += 1;
        next_item.updated_at = now;

        users.insert(next_user.id.clone(), next_user.clone());
        items.insert(next_item.id.clone(), next_item.clone());
        Ok((next_item, next_user))
    }

    async fn save_history_with_user(
        &self,
        record: HistoryRecord,
        user: UserRecord,
    ) -> StorageResult<(HistoryRecord, UserRecord)> {
        let mut users = self
            .users
            .write()
            .map_err(|_| StorageError::Backend("users lock poisoned".to_string()))?;
        let mut history = self
            .history
            .write()
            .map_err(|_| StorageError::Backend("history lock poisoned".to_string()))?;

        let stored_user = users
            .get(&user.id)
            .ok_or_else(|| StorageError::NotFound(format!("user {} not found", user.id)))?;
        let stored_record = history.get(&record.id).ok_or_else(|| {
            StorageError::NotFound(format!("history record {} not found", record.id))
        })?;
        check_revision(stored_user.revision, user.revision, "user", &user.id.0)?;
        check_revision(
            stored_record.revision,
            record.revision,
            "history record",
            &record.id.0,
        )?;

        let now = Utc::now();
        let mut next_user = user;
        next_user.revision += 1;
        next_user.updated_at = now;
        let mut next_record = record;
        next_record.revision += 1;
        next_record.updated_at = now;

        users.insert(next_user.id.clone(), next_user.clone());
        history.insert(next_record.id.clone(), next_record.clone());
        Ok((next_record, next_user))
    }
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volt_types::Role;

    #[tokio::test]
    async fn save_rejects_stale_revision() {
        let store = InMemoryVoltStore::new();
        let user = store
            .insert_user(UserRecord::new("zoe", Role::Child))
            .await
            .unwrap();

        let fresh = store.save_user(user.clone()).await.unwrap();
        assert_eq!(fresh.revision, user.revision + 1);

        // Writing through the pre-save snapshot again must conflict.
        let result = store.save_user(user).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn insert_twice_conflicts() {
        let store = InMemoryVoltStore::new();
        let item = BazaarItemRecord::new("Pizza Party", 200, 2, 2);
        store.insert_item(item.clone()).await.unwrap();
        let result = store.insert_item(item).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn coupled_write_is_all_or_nothing() {
        let store = InMemoryVoltStore::new();
        let user = store
            .insert_user(UserRecord::new("max", Role::Child))
            .await
            .unwrap();
        let item = store
            .insert_item(BazaarItemRecord::new("Ice Cream Trip", 100, 5, 5))
            .await
            .unwrap();

        // Advance the user behind the caller's back.
        store.save_user(user.clone()).await.unwrap();

        let mut stale_user = user;
        stale_user.points = 999;
        let mut next_item = item.clone();
        next_item.stock -= 1;

        let result = store.save_item_with_user(next_item, stale_user).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));

        // The item leg must not have committed.
        let unchanged = store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(unchanged.stock, 5);
        assert_eq!(unchanged.revision, item.revision);
    }

    #[tokio::test]
    async fn listing_honors_the_window() {
        let store = InMemoryVoltStore::new();
        for name in ["a", "b", "c", "d"] {
            store
                .insert_user(UserRecord::new(name, Role::Child))
                .await
                .unwrap();
        }

        let all = store.list_users(QueryWindow::default()).await.unwrap();
        assert_eq!(all.len(), 4);

        let page = store
            .list_users(QueryWindow {
                limit: 2,
                offset: 1,
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }
}
