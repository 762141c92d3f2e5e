//! Shared identifier aliases and small cross-cutting types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type AppId = Uuid;
pub type ApiKeyId = Uuid;
pub type WebhookId = Uuid;
pub type DeliveryId = Uuid;
pub type JobId = Uuid;
pub type ScheduleId = Uuid;
pub type MatviewId = Uuid;
pub type TemplateId = Uuid;
pub type StorageObjectId = Uuid;
pub type SmsMessageId = Uuid;

/// Role attached to every request, mirrored into the `ayb.role` session
/// variable consumed by row-level security policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Anon,
    User,
    Admin,
    Service,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Anon => "anon",
            Role::User => "user",
            Role::Admin => "admin",
            Role::Service => "service",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anon" => Ok(Role::Anon),
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "service" => Ok(Role::Service),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-change action as reported by the change-log trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

impl std::str::FromStr for ChangeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeAction::Create),
            "update" => Ok(ChangeAction::Update),
            "delete" => Ok(ChangeAction::Delete),
            other => Err(format!("unknown change action: {other}")),
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short uuid prefix for log fields, keeps trace output readable.
pub fn abbrev_uuid(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::Anon, Role::User, Role::Admin, Role::Service] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn change_action_round_trips_through_str() {
        for action in [ChangeAction::Create, ChangeAction::Update, ChangeAction::Delete] {
            assert_eq!(action.as_str().parse::<ChangeAction>().unwrap(), action);
        }
        assert!("truncate".parse::<ChangeAction>().is_err());
    }

    #[test]
    fn abbrev_uuid_is_eight_chars() {
        let id = Uuid::new_v4();
        assert_eq!(abbrev_uuid(&id).len(), 8);
        assert!(id.to_string().starts_with(&abbrev_uuid(&id)));
    }
}
