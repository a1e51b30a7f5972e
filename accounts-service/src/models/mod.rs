//! Domain models for accounts-service.

mod account;
mod session;

pub use account::{
    role_from_proto, role_to_proto, Account, AccountChanges, NewAccount, RegisterInput,
    UpdateInput,
};
pub use session::SessionSnapshot;
