//! Build script for dualpath-health.
//!
//! Intentionally minimal, following Rust best practices for library crates:
//! sets a version env var and configures rebuild triggers. Does not generate
//! documentation (handled automatically by docs.rs).

fn main() {
    println!("cargo:rerun-if-changed=src/");
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!(
        "cargo:rustc-env=DUALPATH_HEALTH_VERSION={}",
        env!("CARGO_PKG_VERSION")
    );
}
