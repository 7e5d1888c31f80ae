//! ---
//! wq_section: "01-core-functionality"
//! wq_subsection: "binary"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Build script stamping wq-node with build metadata."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder().all_build().all_cargo().emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
