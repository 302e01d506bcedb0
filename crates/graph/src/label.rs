//! Target labels of the form `//package/path:name`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique address of a target within a build graph.
///
/// Labels order by package path first, then by name. That order is the
/// canonical order used wherever dependencies must be combined
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label {
    package: String,
    name: String,
}

impl Label {
    /// Create a label from a package path and a target name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLabel`] if either component is malformed.
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let package = package.into();
        let name = name.into();
        validate_package(&package).map_err(|reason| invalid(&package, &name, reason))?;
        validate_name(&name).map_err(|reason| invalid(&package, &name, reason))?;
        Ok(Self { package, name })
    }

    /// Parse an absolute label such as `//lib/core:core` or `//lib/core`.
    ///
    /// When the `:name` part is omitted the name defaults to the last path
    /// segment of the package.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLabel`] if the string is not a well-formed label.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some(body) = raw.strip_prefix("//") else {
            return Err(Error::InvalidLabel {
                label: raw.to_string(),
                reason: "labels must start with '//'".to_string(),
            });
        };

        match body.split_once(':') {
            Some((package, name)) => Self::new(package, name),
            None => {
                let name = body.rsplit('/').next().unwrap_or_default();
                if name.is_empty() {
                    return Err(Error::InvalidLabel {
                        label: raw.to_string(),
                        reason: "label has no target name".to_string(),
                    });
                }
                Self::new(body, name)
            }
        }
    }

    /// Parse a label that may be relative to `package` (`:name`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLabel`] if the string is not a well-formed label.
    pub fn parse_relative(raw: &str, package: &str) -> Result<Self> {
        match raw.strip_prefix(':') {
            Some(name) => Self::new(package, name),
            None => Self::parse(raw),
        }
    }

    /// Package path component (empty for the root package).
    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Target name component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "//{}:{}", self.package, self.name)
    }
}

impl FromStr for Label {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Label {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.to_string()
    }
}

fn invalid(package: &str, name: &str, reason: &str) -> Error {
    Error::InvalidLabel {
        label: format!("//{package}:{name}"),
        reason: reason.to_string(),
    }
}

fn valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+' | '@')
}

pub(crate) fn validate_package(package: &str) -> std::result::Result<(), &'static str> {
    if package.is_empty() {
        return Ok(());
    }
    for segment in package.split('/') {
        if segment.is_empty() {
            return Err("package path has an empty segment");
        }
        if segment == "." || segment == ".." {
            return Err("package path may not contain '.' or '..' segments");
        }
        if !segment.chars().all(valid_char) {
            return Err("package path contains an invalid character");
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("target name is empty");
    }
    if !name.chars().all(valid_char) {
        return Err("target name contains an invalid character");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_label() {
        let label = Label::parse("//lib/core:core_lib").unwrap();
        assert_eq!(label.package(), "lib/core");
        assert_eq!(label.name(), "core_lib");
        assert_eq!(label.to_string(), "//lib/core:core_lib");
    }

    #[test]
    fn name_defaults_to_last_segment() {
        let label = Label::parse("//tools/gen").unwrap();
        assert_eq!(label.package(), "tools/gen");
        assert_eq!(label.name(), "gen");
    }

    #[test]
    fn root_package_label() {
        let label = Label::parse("//:all").unwrap();
        assert_eq!(label.package(), "");
        assert_eq!(label.to_string(), "//:all");
    }

    #[test]
    fn relative_label_uses_package() {
        let label = Label::parse_relative(":helper", "src/app").unwrap();
        assert_eq!(label, Label::new("src/app", "helper").unwrap());

        let absolute = Label::parse_relative("//other:x", "src/app").unwrap();
        assert_eq!(absolute.package(), "other");
    }

    #[test]
    fn rejects_malformed_labels() {
        for raw in ["lib:core", "//lib//core:x", "//lib/../x:y", "//lib:", "//", "//a:b c"] {
            assert!(
                matches!(Label::parse(raw), Err(Error::InvalidLabel { .. })),
                "expected {raw} to be rejected"
            );
        }
    }

    #[test]
    fn orders_by_package_then_name() {
        let mut labels = vec![
            Label::parse("//b:a").unwrap(),
            Label::parse("//a:z").unwrap(),
            Label::parse("//a:b").unwrap(),
        ];
        labels.sort();
        let rendered: Vec<String> = labels.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["//a:b", "//a:z", "//b:a"]);
    }

    #[test]
    fn serde_uses_string_form() {
        let label = Label::parse("//pkg:t").unwrap();
        let json = serde_json::to_string(&label).unwrap();
        assert_eq!(json, "\"//pkg:t\"");
        let back: Label = serde_json::from_str(&json).unwrap();
        assert_eq!(back, label);
        assert!(serde_json::from_str::<Label>("\"pkg:t\"").is_err());
    }
}
