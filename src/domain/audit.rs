//! Audit log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::transaction::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    Tenant,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::User => "user",
            Actor::Tenant => "tenant",
        }
    }
}

impl FromStr for Actor {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Actor::User),
            "tenant" => Ok(Actor::Tenant),
            other => Err(UnknownVariant {
                field: "actor",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Success,
    Pending,
    Failed,
    InDispute,
    Resolved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Success => "success",
            AuditAction::Pending => "pending",
            AuditAction::Failed => "failed",
            AuditAction::InDispute => "in_dispute",
            AuditAction::Resolved => "resolved",
        }
    }
}

impl FromStr for AuditAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(AuditAction::Created),
            "success" => Ok(AuditAction::Success),
            "pending" => Ok(AuditAction::Pending),
            "failed" => Ok(AuditAction::Failed),
            "in_dispute" => Ok(AuditAction::InDispute),
            "resolved" => Ok(AuditAction::Resolved),
            other => Err(UnknownVariant {
                field: "action_done",
                value: other.to_string(),
            }),
        }
    }
}

/// Immutable record of who changed what and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub actor: Actor,
    pub action_done: AuditAction,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn for_transaction(
        transaction_id: Uuid,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        action_done: AuditAction,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            user_id: Some(user_id),
            transaction_id: Some(transaction_id),
            actor: Actor::User,
            action_done,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}
