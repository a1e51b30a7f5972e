//! gRPC module for accounts-service.

pub mod access;
mod service;

pub use service::AccountsServiceImpl;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("library.accounts.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("accounts_descriptor");
}
