#![doc = include_str!("../README.md")]

pub mod common;
pub use common::*;

/// Generated gRPC bindings for the `streamchat` proto package.
pub mod proto {
    tonic::include_proto!("streamchat");

    /// Encoded file descriptor set, used to serve gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("streamchat_descriptor");
}
