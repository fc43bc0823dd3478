fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Ensure protoc is available via vendored binary for reproducible builds
    if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
        std::env::set_var("PROTOC", path);
    }

    // Message formats only; the runtime talks to the broker through its own seam.
    tonic_build::configure()
        .build_server(false)
        .build_client(false)
        .compile(&["proto/common.proto", "proto/testing.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
