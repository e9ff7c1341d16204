use crate::StorageResult;
use async_trait::async_trait;
use volt_types::{
    BazaarItemRecord, HistoryId, HistoryRecord, ItemId, MissionId, MissionRecord, UserId,
    UserRecord,
};

/// Generic query window for paged reads. A zero limit reads everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Storage interface for household member records.
///
/// Account provisioning is external; `insert_user` exists for seeding and
/// tests, not for the request path.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert_user(&self, record: UserRecord) -> StorageResult<UserRecord>;

    async fn get_user(&self, id: &UserId) -> StorageResult<Option<UserRecord>>;

    /// Revision-conditioned write. A stale `revision` is a `Conflict`; the
    /// returned record carries the bumped revision.
    async fn save_user(&self, record: UserRecord) -> StorageResult<UserRecord>;

    async fn list_users(&self, window: QueryWindow) -> StorageResult<Vec<UserRecord>>;
}

/// Storage interface for mission templates. Templates are immutable, so
/// there is no save.
#[async_trait]
pub trait MissionStore: Send + Sync {
    async fn insert_mission(&self, record: MissionRecord) -> StorageResult<MissionRecord>;

    async fn get_mission(&self, id: &MissionId) -> StorageResult<Option<MissionRecord>>;

    async fn list_missions(&self, window: QueryWindow) -> StorageResult<Vec<MissionRecord>>;
}

/// Storage interface for submission history records.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn create_history(&self, record: HistoryRecord) -> StorageResult<HistoryRecord>;

    async fn get_history(&self, id: &HistoryId) -> StorageResult<Option<HistoryRecord>>;

    /// Revision-conditioned write; see [`UserStore::save_user`].
    async fn save_history(&self, record: HistoryRecord) -> StorageResult<HistoryRecord>;

    async fn list_history(&self, window: QueryWindow) -> StorageResult<Vec<HistoryRecord>>;
}

/// Storage interface for bazaar items.
#[async_trait]
pub trait BazaarStore: Send + Sync {
    async fn insert_item(&self, record: BazaarItemRecord) -> StorageResult<BazaarItemRecord>;

    async fn get_item(&self, id: &ItemId) -> StorageResult<Option<BazaarItemRecord>>;

    /// Revision-conditioned write; see [`UserStore::save_user`].
    async fn save_item(&self, record: BazaarItemRecord) -> StorageResult<BazaarItemRecord>;

    async fn list_items(&self, window: QueryWindow) -> StorageResult<Vec<BazaarItemRecord>>;
}

/// Coupled two-record writes.
///
/// A claim pairs a stock decrement with a points debit; an approval pairs a
/// status flip with a points credit. Each leg is revision-conditioned and
/// the pair commits all-or-nothing: on any stale revision the store reports
/// `Conflict` and writes neither record.
#[async_trait]
pub trait CoupledWriteStore: Send + Sync {
    async fn save_item_with_user(
        &self,
        item: BazaarItemRecord,
        user: UserRecord,
    ) -> StorageResult<(BazaarItemRecord, UserRecord)>;

    async fn save_history_with_user(
        &self,
        record: HistoryRecord,
        user: UserRecord,
    ) -> StorageResult<(HistoryRecord, UserRecord)>;
}

/// Unified storage bundle consumed by the economy core.
pub trait VoltStore:
    UserStore + MissionStore + HistoryStore + BazaarStore + CoupledWriteStore + Send + Sync
{
}

impl<T> VoltStore for T where
    T: UserStore + MissionStore + HistoryStore + BazaarStore + CoupledWriteStore + Send + Sync
{
}
