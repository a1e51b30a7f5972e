use serde::{Deserialize, Serialize};
use service_core::identity::Role;

use super::Account;

/// Denormalized copy of an account written at login. Its presence in the
/// revocation table is what keeps issued tokens usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub account_id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
}

impl From<&Account> for SessionSnapshot {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id,
            name: account.name.clone(),
            email: account.email.clone(),
            role: account.role(),
            active: account.active,
        }
    }
}
