//! Volt Types - record shapes for the chore economy
//!
//! Every mutable record carries a `revision` checked by the store on save;
//! a stale revision is a write conflict, never a silent overwrite.
#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);
impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MissionId(pub String);
impl MissionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
impl std::fmt::Display for MissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryId(pub String);
impl HistoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
impl std::fmt::Display for HistoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub String);
impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account role. Parents adjudicate; children submit and spend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parent,
    Child,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Parent => "parent",
            Role::Child => "child",
        }
    }
    pub fn is_parent(&self) -> bool {
        matches!(self, Role::Parent)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated identity performing an operation.
///
/// Always passed explicitly; no operation reads an ambient "current user".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: UserId::new(id),
            role,
        }
    }
}

/// Decision verbs a reviewer (or resubmitting owner) can issue on a
/// submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
    Redo,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
            Decision::Redo => "redo",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a mission submission.
///
/// `Submitted` exists only inside intake; a freshly created record is
/// already `Review` by the time anyone can observe it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Submitted,
    Review,
    Redo,
    Approved,
    Rejected,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Submitted => "submitted",
            MissionStatus::Review => "review",
            MissionStatus::Redo => "redo",
            MissionStatus::Approved => "approved",
            MissionStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionStatus::Approved | MissionStatus::Rejected)
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A household member. Points are mutated only by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub points: u64,
    pub missions_completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::generate(),
            username: username.into(),
            role,
            points: 0,
            missions_completed: 0,
            avatar_url: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An immutable mission template. Read-only to the workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub id: MissionId,
    pub title: String,
    pub icon: String,
    pub base_points: u64,
    pub is_active: bool,
}

impl MissionRecord {
    pub fn new(title: impl Into<String>, icon: impl Into<String>, base_points: u64) -> Self {
        Self {
            id: MissionId::generate(),
            title: title.into(),
            icon: icon.into(),
            base_points,
            is_active: true,
        }
    }
}

/// One mission submission and its audit trail. Never deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: HistoryId,
    pub user_id: UserId,
    pub mission_id: MissionId,
    pub status: MissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_awarded: Option<u64>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(user_id: UserId, mission_id: MissionId) -> Self {
        let now = Utc::now();
        Self {
            id: HistoryId::generate(),
            user_id,
            mission_id,
            status: MissionStatus::Submitted,
            points_awarded: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A bazaar reward with contended stock.
///
/// `claimed_by` is an audit set of holders since the last replenishment;
/// replenishment is the only thing that clears it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BazaarItemRecord {
    pub id: ItemId,
    pub item_name: String,
    pub cost: u64,
    pub stock: u64,
    /// 0 opts the item out of automatic replenishment.
    pub max_stock: u64,
    pub claimed_by: BTreeSet<UserId>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BazaarItemRecord {
    pub fn new(item_name: impl Into<String>, cost: u64, stock: u64, max_stock: u64) -> Self {
        let now = Utc::now();
        Self {
            id: ItemId::generate(),
            item_name: item_name.into(),
            cost,
            stock,
            max_stock,
            claimed_by: BTreeSet::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A record field as seen by the access-rule language.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int(u64),
    Str(String),
    Bool(bool),
    StrSet(Vec<String>),
}

impl FieldValue {
    /// Textual form used for rule comparisons. Sets have no single text
    /// form and never match a literal.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Int(n) => Some(n.to_string()),
            FieldValue::Str(s) => Some(s.clone()),
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::StrSet(_) => None,
        }
    }
}

/// Typed, by-name field access for rule evaluation. Unknown names return
/// `None`, which the rule engine treats as a denial.
pub trait RecordFields {
    fn field(&self, name: &str) -> Option<FieldValue>;
}

impl RecordFields for UserRecord {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Str(self.id.0.clone())),
            "username" => Some(FieldValue::Str(self.username.clone())),
            "role" => Some(FieldValue::Str(self.role.as_str().to_string())),
            "points" => Some(FieldValue::Int(self.points)),
            "missions_completed" => Some(FieldValue::Int(self.missions_completed)),
            "avatar_url" => self
                .avatar_url
                .as_ref()
                .map(|url| FieldValue::Str(url.clone())),
            _ => None,
        }
    }
}

impl RecordFields for MissionRecord {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Str(self.id.0.clone())),
            "title" => Some(FieldValue::Str(self.title.clone())),
            "icon" => Some(FieldValue::Str(self.icon.clone())),
            "base_points" => Some(FieldValue::Int(self.base_points)),
            "is_active" => Some(FieldValue::Bool(self.is_active)),
            _ => None,
        }
    }
}

impl RecordFields for HistoryRecord {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Str(self.id.0.clone())),
            "user_id" => Some(FieldValue::Str(self.user_id.0.clone())),
            "mission_id" => Some(FieldValue::Str(self.mission_id.0.clone())),
            "status" => Some(FieldValue::Str(self.status.as_str().to_string())),
            "points_awarded" => self.points_awarded.map(FieldValue::Int),
            _ => None,
        }
    }
}

impl RecordFields for BazaarItemRecord {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Str(self.id.0.clone())),
            "item_name" => Some(FieldValue::Str(self.item_name.clone())),
            "cost" => Some(FieldValue::Int(self.cost)),
            "stock" => Some(FieldValue::Int(self.stock)),
            "max_stock" => Some(FieldValue::Int(self.max_stock)),
            "claimed_by" => Some(FieldValue::StrSet(
                self.claimed_by.iter().map(|id| id.0.clone()).collect(),
            )),
            _ => None,
        }
    }
}

/// Aggregate result of a maintenance batch: how many records were written,
/// and which ones failed with what.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub touched: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn touch(&mut self) {
        self.touched += 1;
    }

    pub fn fail(&mut self, record_id: impl Into<String>, reason: impl Into<String>) {
        self.failures.push(BatchFailure {
            record_id: record_id.into(),
            reason: reason.into(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub record_id: String,
    pub reason: String,
}
