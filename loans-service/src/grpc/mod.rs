//! gRPC module for loans-service.

pub mod access;
mod service;

pub use service::LoansServiceImpl;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("library.loans.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("loans_descriptor");
}
