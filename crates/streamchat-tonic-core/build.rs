//! Builds the gRPC client and server code for the `streamchat.proto`
//! definition using `tonic-prost-build`.
//!
//! The code generation step processes the Protocol Buffer definitions located
//! in the `proto` directory and emits Rust modules with gRPC bindings into the
//! crate's `OUT_DIR`. A file descriptor set is written alongside the generated
//! code so the server can expose gRPC reflection.

use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("streamchat_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/streamchat.proto"], &["proto"])
        .unwrap();
}
