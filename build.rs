use std::path::Path;
use std::{env, fs, process};

/// Release version recorded in `VERSION`, which must match the manifest.
fn check_version(manifest_dir: &Path, package_version: &str) -> Result<(), String> {
    let path = manifest_dir.join("VERSION");
    let recorded = fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;

    match recorded.trim() {
        v if v == package_version => Ok(()),
        v => Err(format!(
            "VERSION says {} but Cargo.toml says {}; bump both together",
            v, package_version
        )),
    }
}

fn main() {
    println!("cargo:rerun-if-changed=VERSION");

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let package_version = env::var("CARGO_PKG_VERSION").unwrap_or_default();

    if let Err(message) = check_version(Path::new(&manifest_dir), &package_version) {
        eprintln!("booking-kit: {}", message);
        process::exit(1);
    }
}
