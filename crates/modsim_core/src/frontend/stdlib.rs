//! Embedded standard library sources, keyed by version tag.

use anyhow::{bail, Result};

pub const DEFAULT_VERSION: &str = "MSL:3.2.3";

const SOURCES: &[(&str, &str, &str)] = &[
    (
        "MSL:3.2.3",
        "Modelica-3.2.3.mo",
        include_str!("msl/Modelica-3.2.3.mo"),
    ),
    (
        "MSL:4.0.0",
        "Modelica-4.0.0.mo",
        include_str!("msl/Modelica-4.0.0.mo"),
    ),
];

/// Accepts `MSL:3.2.3` as well as the bare `3.2.3`.
pub fn normalize(version: &str) -> String {
    if version.starts_with("MSL:") {
        version.to_string()
    } else {
        format!("MSL:{}", version)
    }
}

/// File name and source text of a standard library version.
pub fn source(version: &str) -> Result<(&'static str, &'static str)> {
    let tag = normalize(version);
    match SOURCES.iter().find(|(known, _, _)| *known == tag) {
        Some((_, file, text)) => Ok((file, text)),
        None => bail!(
            "unknown standard library version `{}` (available: {})",
            version,
            versions().join(", ")
        ),
    }
}

pub fn versions() -> Vec<&'static str> {
    SOURCES.iter().map(|(tag, _, _)| *tag).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_versions_resolve_with_or_without_prefix() {
        let (file, text) = source("MSL:4.0.0").expect("4.0.0");
        assert_eq!(file, "Modelica-4.0.0.mo");
        assert!(text.contains("6.67430e-11"));
        assert_eq!(source("3.2.3").expect("3.2.3").0, "Modelica-3.2.3.mo");
    }

    #[test]
    fn unknown_version_lists_alternatives() {
        let err = source("MSL:9.9").expect_err("unknown");
        assert!(err.to_string().contains("MSL:3.2.3"));
    }
}
