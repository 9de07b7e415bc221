//! Build script: ensures the crate is recompiled when migration files are
//! modified, which `SQLx`'s `migrate!()` macro needs to pick up changes in
//! the migrations directory.

/// Main build script entry point.
///
/// Tells Cargo to rerun the build when files in the migrations directory change,
/// which is required for the `SQLx` migration system to work properly.
fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
