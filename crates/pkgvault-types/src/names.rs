//! Package and tarball name validation.
//!
//! Names end up as map keys, URL segments and filesystem paths, so they are
//! checked once at the edge and carried around as newtypes afterwards.
//!
//! Valid package names:
//! - Must be non-empty and at most 214 characters
//! - Either `name` or `@scope/name`, with exactly one `/` in the scoped form
//! - Must not start with `.` or `_` (per segment)
//! - Must not contain whitespace, `\`, `%`, `:`, `*`, `?`, `"`, `<`, `>`, `|`
//! - Must not contain `..`
//!
//! Valid tarball names are a single path component: non-empty, no `/` or
//! `\`, and not starting with `.`.

use std::fmt;

use crate::error::TypeError;

/// Longest package name a registry accepts.
pub const MAX_NAME_LENGTH: usize = 214;

const FORBIDDEN_CHARS: &[char] = &[
    ' ', '\t', '\n', '\r', '\\', '%', ':', '*', '?', '"', '<', '>', '|',
];

fn invalid_package(name: &str, reason: impl Into<String>) -> TypeError {
    TypeError::InvalidPackageName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn invalid_tarball(name: &str, reason: impl Into<String>) -> TypeError {
    TypeError::InvalidTarballName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn validate_segment(full: &str, segment: &str) -> Result<(), TypeError> {
    if segment.is_empty() {
        return Err(invalid_package(full, "name segments must not be empty"));
    }
    if segment.starts_with('.') || segment.starts_with('_') {
        return Err(invalid_package(full, "must not start with '.' or '_'"));
    }
    if segment.contains('/') {
        return Err(invalid_package(full, "unexpected '/'"));
    }
    Ok(())
}

/// Validate a package name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use pkgvault_types::names::validate_package_name;
///
/// assert!(validate_package_name("left-pad").is_ok());
/// assert!(validate_package_name("@babel/core").is_ok());
/// assert!(validate_package_name("").is_err());
/// assert!(validate_package_name("../etc").is_err());
/// ```
pub fn validate_package_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(invalid_package(name, "package name must not be empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid_package(
            name,
            format!("longer than {MAX_NAME_LENGTH} characters"),
        ));
    }
    if let Some(ch) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control()) {
        return Err(invalid_package(
            name,
            format!("contains forbidden character: {ch:?}"),
        ));
    }
    if name.contains("..") {
        return Err(invalid_package(name, "must not contain '..'"));
    }

    match name.strip_prefix('@') {
        Some(scoped) => {
            let (scope, bare) = scoped
                .split_once('/')
                .ok_or_else(|| invalid_package(name, "scoped names must be '@scope/name'"))?;
            validate_segment(name, scope)?;
            validate_segment(name, bare)
        }
        None => validate_segment(name, name),
    }
}

/// Validate a tarball filename, returning `Ok(())` if valid.
pub fn validate_tarball_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(invalid_tarball(name, "tarball name must not be empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid_tarball(name, "must be a single path component"));
    }
    if name.starts_with('.') {
        return Err(invalid_tarball(name, "must not start with '.'"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid_tarball(name, "contains control characters"));
    }
    Ok(())
}

/// A validated package name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName(String);

impl PackageName {
    /// Validate and wrap `name`.
    pub fn parse(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        validate_package_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scope (without `@`) for scoped names.
    pub fn scope(&self) -> Option<&str> {
        self.0
            .strip_prefix('@')
            .and_then(|rest| rest.split_once('/'))
            .map(|(scope, _)| scope)
    }

    /// The name with its scope stripped.
    pub fn bare_name(&self) -> &str {
        match self.0.rsplit_once('/') {
            Some((_, bare)) => bare,
            None => &self.0,
        }
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated tarball filename.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TarballName(String);

impl TarballName {
    /// Validate and wrap `name`.
    pub fn parse(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        validate_tarball_name(&name)?;
        Ok(Self(name))
    }

    /// Conventional filename for `package` at `version`: `<bare>-<version>.tgz`.
    pub fn for_version(package: &PackageName, version: &str) -> Result<Self, TypeError> {
        Self::parse(format!("{}-{version}.tgz", package.bare_name()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TarballName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TarballName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
