//! gRPC module for catalog-service.

pub mod access;
mod service;

pub use service::CatalogServiceImpl;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("library.catalog.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("catalog_descriptor");
}
