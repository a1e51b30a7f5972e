//! Account model backing the credential store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::identity::Role;
use sqlx::FromRow;
use validator::Validate;

/// Library account. Rows are never hard-deleted; `deleted_at` marks removal.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Stored role. The column is constrained to known values, anything else
    /// is treated as the least privileged role.
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::Operation)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Row to insert on registration (password already hashed).
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Partial profile update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct AccountChanges {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl AccountChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }
}

#[derive(Debug, Clone, Validate)]
pub struct RegisterInput {
    #[validate(length(min = 1, max = 100, message = "name must be 1-100 characters"))]
    pub name: String,
    #[validate(email(message = "email is not valid"))]
    pub email: String,
    #[validate(length(min = 1, max = 128, message = "password must be 1-128 characters"))]
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Validate)]
pub struct UpdateInput {
    #[validate(length(min = 1, max = 100, message = "name must be 1-100 characters"))]
    pub name: Option<String>,
    #[validate(email(message = "email is not valid"))]
    pub email: Option<String>,
}

/// Proto `AccountRole` value for a role.
pub fn role_to_proto(role: Role) -> i32 {
    match role {
        Role::Admin => 1,
        Role::Operation => 2,
    }
}

/// Role requested on the wire. Unspecified means the default role.
pub fn role_from_proto(value: i32) -> Option<Role> {
    match value {
        0 | 2 => Some(Role::Operation),
        1 => Some(Role::Admin),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_input_validation() {
        let input = RegisterInput {
            name: "A".to_string(),
            email: "a@x.com".to_string(),
            password: "pw".to_string(),
            role: Role::Operation,
        };
        assert!(input.validate().is_ok());

        let bad = RegisterInput {
            email: "not-an-email".to_string(),
            ..input.clone()
        };
        assert!(bad.validate().is_err());

        let empty_password = RegisterInput {
            password: String::new(),
            ..input
        };
        assert!(empty_password.validate().is_err());
    }

    #[test]
    fn test_update_input_skips_absent_fields() {
        let input = UpdateInput {
            name: None,
            email: Some("b@x.com".to_string()),
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_role_proto_mapping() {
        assert_eq!(role_from_proto(0), Some(Role::Operation));
        assert_eq!(role_from_proto(1), Some(Role::Admin));
        assert_eq!(role_from_proto(7), None);
        assert_eq!(role_to_proto(Role::Admin), 1);
    }
}
