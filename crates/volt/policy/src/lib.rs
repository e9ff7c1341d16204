//! Volt Policy - access rules gating every operation in the chore economy.
//!
//! Rules are persisted as plain strings (configuration, loaded once at
//! process start) and compiled into expression trees. Evaluation on the
//! request path is lock-free, side-effect-free, and cannot fail: whatever
//! does not resolve, denies.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod expr;

pub use expr::{CmpOp, Operand, RequestContext, RuleExpr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Policy-related errors. Only ever surfaced at load time.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid rule expression: {0}")]
    InvalidExpression(String),
}

/// The compiled list/view/create/update rules of one collection.
#[derive(Clone, Debug)]
pub struct RuleSet {
    pub list: RuleExpr,
    pub view: RuleExpr,
    pub create: RuleExpr,
    pub update: RuleExpr,
}

impl RuleSet {
    pub fn parse(config: &RuleSetConfig) -> Result<Self, PolicyError> {
        Ok(Self {
            list: RuleExpr::parse(&config.list)?,
            view: RuleExpr::parse(&config.view)?,
            create: RuleExpr::parse(&config.create)?,
            update: RuleExpr::parse(&config.update)?,
        })
    }
}

/// Persisted rule strings for one collection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleSetConfig {
    pub list: String,
    pub view: String,
    pub create: String,
    pub update: String,
}

impl RuleSetConfig {
    fn new(list: &str, view: &str, create: &str, update: &str) -> Self {
        Self {
            list: list.to_string(),
            view: view.to_string(),
            create: create.to_string(),
            update: update.to_string(),
        }
    }
}

/// Rule strings for every collection the core touches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_users_rules")]
    pub users: RuleSetConfig,
    #[serde(default = "default_missions_rules")]
    pub missions: RuleSetConfig,
    #[serde(default = "default_bazaar_rules")]
    pub bazaar: RuleSetConfig,
    #[serde(default = "default_history_rules")]
    pub history: RuleSetConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            users: default_users_rules(),
            missions: default_missions_rules(),
            bazaar: default_bazaar_rules(),
            history: default_history_rules(),
        }
    }
}

// The stock rules of the deployed system. Users are listable by any
// authenticated member (leaderboard); self-service updates only. Missions
// and bazaar items are managed by parents; claiming only needs a login.
// History is the closely guarded one: children create and resubmit their
// own records, parents adjudicate.
fn default_users_rules() -> RuleSetConfig {
    RuleSetConfig::new(
        "@request.auth.id != ''",
        "@request.auth.id != ''",
        "",
        "id = @request.auth.id",
    )
}

fn default_missions_rules() -> RuleSetConfig {
    RuleSetConfig::new(
        "@request.auth.id != ''",
        "@request.auth.id != ''",
        "@request.auth.role = 'parent'",
        "@request.auth.role = 'parent'",
    )
}

fn default_bazaar_rules() -> RuleSetConfig {
    RuleSetConfig::new(
        "@request.auth.id != ''",
        "@request.auth.id != ''",
        "@request.auth.role = 'parent'",
        "@request.auth.id != ''",
    )
}

fn default_history_rules() -> RuleSetConfig {
    RuleSetConfig::new(
        "@request.auth.role = 'parent' || user_id = @request.auth.id",
        "@request.auth.role = 'parent' || user_id = @request.auth.id",
        "@request.auth.id != '' && user_id = @request.auth.id",
        "@request.auth.role = 'parent' || (@request.auth.id = user_id && (status = 'redo' || status = 'review'))",
    )
}

/// Compiled rule sets for every collection, parsed once at startup.
#[derive(Clone, Debug)]
pub struct AccessPolicies {
    pub users: RuleSet,
    pub missions: RuleSet,
    pub bazaar: RuleSet,
    pub history: RuleSet,
}

impl AccessPolicies {
    /// Compile a configuration. A malformed rule string fails the whole
    /// load; nothing is compiled lazily.
    pub fn load(config: &PolicyConfig) -> Result<Self, PolicyError> {
        Ok(Self {
            users: RuleSet::parse(&config.users)?,
            missions: RuleSet::parse(&config.missions)?,
            bazaar: RuleSet::parse(&config.bazaar)?,
            history: RuleSet::parse(&config.history)?,
        })
    }

    /// The stock rules. These are known-good constants; failing to compile
    /// them is a programming error, not a runtime condition.
    pub fn defaults() -> Self {
        Self::load(&PolicyConfig::default()).expect("stock rules compile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volt_types::{Actor, HistoryRecord, MissionId, Role, UserId};

    #[test]
    fn stock_rules_compile() {
        let policies = AccessPolicies::defaults();
        assert!(matches!(policies.users.create, RuleExpr::Unrestricted));
    }

    #[test]
    fn history_create_rule_requires_ownership() {
        let policies = AccessPolicies::defaults();
        let record = HistoryRecord::new(UserId::new("zoe"), MissionId::new("m1"));

        let zoe = Actor::new("zoe", Role::Child);
        let max = Actor::new("max", Role::Child);
        assert!(policies
            .history
            .create
            .evaluate(&RequestContext::new(Some(&zoe), &record)));
        assert!(!policies
            .history
            .create
            .evaluate(&RequestContext::new(Some(&max), &record)));
    }

    #[test]
    fn bad_configuration_fails_load() {
        let mut config = PolicyConfig::default();
        config.history.update = "status ~ 'review'".to_string();
        assert!(matches!(
            AccessPolicies::load(&config),
            Err(PolicyError::InvalidExpression(_))
        ));
    }
}
