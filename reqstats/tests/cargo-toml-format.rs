// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fs, path::PathBuf};

use rstest::rstest;

const MSRV: &str = "1.89";

#[rstest]
/// Path dependencies between workspace crates need a version so the crates can be published
fn test_cargo_toml_format(
    // .. since workspace root is parent of package root
    #[files("../**/Cargo.toml")]
    #[exclude("/target/")]
    #[exclude("/examples/")]
    toml_path: PathBuf,
) {
    let content = fs::read_to_string(&toml_path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", toml_path.display(), e));
    let toml = toml::from_str::<toml::Value>(&content)
        .unwrap_or_else(|e| panic!("Failed to parse {}: {}", toml_path.display(), e));

    if let Some(deps) = toml.get("dependencies").and_then(|d| d.as_table()) {
        for (name, value) in deps.iter().filter(|(name, _)| name.starts_with("reqstats")) {
            let dep = value
                .as_table()
                .unwrap_or_else(|| panic!("{name} in {} must be a table", toml_path.display()));
            assert!(
                dep.contains_key("path") && dep.contains_key("version"),
                "{name} in {} needs both `path` and `version`",
                toml_path.display()
            );
        }
    }

    let package = toml.get("package").and_then(|p| p.as_table());
    let workspace = toml.get("workspace").and_then(|p| p.as_table());
    assert!(
        package.is_some() || workspace.is_some(),
        "{} is neither a package nor a workspace?",
        toml_path.display()
    );
    if let Some(package) = package {
        assert_eq!(
            package.get("rust-version").and_then(|v| v.as_str()),
            Some(MSRV),
            "package.rust-version in {} must equal the MSRV",
            toml_path.display()
        );
    }
}
