//! Layering guardrails for the workspace manifests.
//!
//! The vocabulary crate (`vgi_matrix`) stays dependency-free so the tables can be read without
//! pulling in the async stack, and the harness keeps its test tooling in `[dev-dependencies]`.

/// Lines of the `[dependencies]` table in `manifest`, comments stripped.
fn dependency_lines(manifest: &str) -> Vec<String> {
    let mut in_dependencies = false;
    let mut lines = Vec::new();

    for raw_line in manifest.lines() {
        let line = raw_line.trim();
        // Track when we enter/exit the `[dependencies]` table.
        if line.starts_with('[') {
            in_dependencies = line == "[dependencies]";
            continue;
        }
        if !in_dependencies || line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no_comment = line.split('#').next().unwrap_or("").trim();
        if !line_no_comment.is_empty() {
            lines.push(line_no_comment.to_string());
        }
    }
    lines
}

#[test]
fn vocabulary_crate_has_no_dependencies() {
    let manifest = include_str!("../crates/vgi_matrix/Cargo.toml");
    let deps = dependency_lines(manifest);
    assert!(deps.is_empty(), "vgi_matrix must stay dependency-free, found: {deps:?}");
}

#[test]
fn test_tooling_stays_out_of_main_dependencies() {
    let manifest = include_str!("../Cargo.toml");
    for line in dependency_lines(manifest) {
        for tool in ["insta", "proptest"] {
            assert!(
                !line.starts_with(tool),
                "`{tool}` must not appear in [dependencies]; use [dev-dependencies] instead"
            );
        }
    }
}
