//! gRPC module for annexure-service.

mod convert;
mod service;

pub use service::AnnexureServiceImpl;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("logistics.annexure.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("annexure_descriptor");
}
