use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = PathBuf::from("../proto");

    // Tell cargo to recompile if any proto files change
    println!("cargo:rerun-if-changed=../proto/library/accounts/v1/");
    println!("cargo:rerun-if-changed=../proto/library/catalog/v1/");

    // Compile accounts service protos (client-side)
    tonic_build::configure()
        .build_server(false) // No server code in service-core
        .build_client(true) // Build clients for calling accounts-service
        .compile_protos(
            &["../proto/library/accounts/v1/accounts.proto"],
            &[&proto_root],
        )?;

    // Compile catalog service protos (client-side)
    tonic_build::configure()
        .build_server(false)
        .build_client(true) // Build clients for calling catalog-service
        .compile_protos(&["../proto/library/catalog/v1/catalog.proto"], &[&proto_root])?;

    Ok(())
}
