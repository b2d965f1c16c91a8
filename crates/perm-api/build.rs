//! Build script for generating Rust code from protobuf definitions.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tell Cargo to rerun if proto files change
    println!("cargo:rerun-if-changed=proto/");

    tonic_build::configure()
        // Generate server code
        .build_server(true)
        // Generate client code (used by the transport tests)
        .build_client(true)
        .compile_protos(
            &[
                "proto/perm/v1/actor.proto",
                "proto/perm/v1/group.proto",
                "proto/perm/v1/permission.proto",
                "proto/perm/v1/role.proto",
            ],
            &["proto/"],
        )?;

    Ok(())
}
