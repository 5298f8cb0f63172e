use limbo_bridge::platform::{normalize_arch, resolve_for, OsFamily};
use limbo_bridge::BridgeError;
use proptest::prelude::*;

const SUPPORTED: &[(&str, &str)] = &[
    ("windows", "x86_64"),
    ("macos", "aarch64"),
    ("linux", "x86_64"),
    ("linux", "aarch64"),
];

proptest! {
    #[test]
    fn unknown_os_is_unsupported(os in "[a-z]{1,12}", arch in "(x86_64|aarch64|amd64|arm64)") {
        prop_assume!(OsFamily::parse(&os).is_none());
        let is_unsupported = matches!(
            resolve_for(&os, &arch),
            Err(BridgeError::UnsupportedPlatform { .. })
        );
        prop_assert!(is_unsupported);
    }

    #[test]
    fn resolution_ignores_case(index in 0..SUPPORTED.len(), upper in any::<bool>()) {
        let (os, arch) = SUPPORTED[index];
        let (os_in, arch_in) = if upper {
            (os.to_uppercase(), arch.to_uppercase())
        } else {
            (os.to_string(), arch.to_string())
        };
        let descriptor = resolve_for(&os_in, &arch_in).unwrap();
        prop_assert_eq!(descriptor.architecture, arch);
        prop_assert_eq!(descriptor.os_family.as_str(), os);
        let prefix = format!("/{os}/{arch}/");
        prop_assert!(descriptor.resource_subpath.starts_with(&prefix));
    }

    #[test]
    fn normalization_is_idempotent(arch in "[A-Za-z0-9_-]{1,10}") {
        let once = normalize_arch(&arch);
        prop_assert_eq!(normalize_arch(&once), once.clone());
    }
}

#[test]
fn every_supported_pair_resolves_to_one_descriptor() {
    let mut subpaths: Vec<String> = SUPPORTED
        .iter()
        .map(|(os, arch)| resolve_for(os, arch).unwrap().resource_subpath)
        .collect();
    subpaths.sort();
    subpaths.dedup();
    assert_eq!(subpaths.len(), SUPPORTED.len());
}
