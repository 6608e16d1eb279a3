//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Build script stamping build and target metadata into the daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder()
        .fail_on_error()
        .build_timestamp()
        .cargo_target_triple()
        .cargo_debug()
        .emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
