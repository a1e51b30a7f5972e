use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = PathBuf::from("../proto");

    // Tell cargo to recompile if any proto files change
    println!("cargo:rerun-if-changed=../proto/library/loans/v1/");

    tonic_build::configure()
        .build_server(true)
        .build_client(true) // Tests drive the service through the generated client
        .file_descriptor_set_path(
            PathBuf::from(std::env::var("OUT_DIR")?).join("loans_descriptor.bin"),
        )
        .compile_protos(&["../proto/library/loans/v1/loans.proto"], &[proto_root])?;

    Ok(())
}
