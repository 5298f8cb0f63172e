//! Build script for limbo-bridge.
//!
//! Embeds the precompiled native server libraries:
//! - Scans `natives/` (or `$LIMBO_BRIDGE_NATIVES_DIR`) for `{os}/{arch}/{file}` entries
//! - Generates `embedded_natives.rs` in `OUT_DIR` with one `include_bytes!` per artifact
//!
//! With no natives directory the table is empty and every launch fails with
//! "artifact not found", which the binary reports with the expected resource path.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const PLATFORMS: &[&str] = &["windows", "macos", "linux"];
const ARCHITECTURES: &[&str] = &["aarch64", "x86_64"];

fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR not set");

    println!("cargo:rerun-if-env-changed=LIMBO_BRIDGE_NATIVES_DIR");
    println!("cargo:rerun-if-env-changed=LIMBO_BRIDGE_LIB_NAME");

    let natives_dir = std::env::var_os("LIMBO_BRIDGE_NATIVES_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(&manifest_dir).join("natives"));
    println!("cargo:rerun-if-changed={}", natives_dir.display());

    let mut table = String::from("pub(crate) static EMBEDDED_NATIVES: &[(&str, &[u8])] = &[\n");
    let mut count = 0usize;

    for os in PLATFORMS {
        for arch in ARCHITECTURES {
            let dir = natives_dir.join(os).join(arch);
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };

            let mut files: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect();
            files.sort();

            for file in files {
                let name = file
                    .file_name()
                    .expect("directory entry has a file name")
                    .to_string_lossy()
                    .into_owned();
                let absolute = file.canonicalize().expect("failed to canonicalize native artifact");
                println!("cargo:rerun-if-changed={}", absolute.display());
                writeln!(
                    table,
                    "    ({:?}, include_bytes!({:?})),",
                    format!("/{os}/{arch}/{name}"),
                    absolute.display().to_string()
                )
                .expect("writing to a String cannot fail");
                count += 1;
            }
        }
    }
    table.push_str("];\n");

    std::fs::write(Path::new(&out_dir).join("embedded_natives.rs"), table)
        .expect("failed to write embedded_natives.rs");

    if count == 0 {
        println!(
            "cargo:warning=No native artifacts found under {}; the launcher will only work with an external bundle",
            natives_dir.display()
        );
    }
}
