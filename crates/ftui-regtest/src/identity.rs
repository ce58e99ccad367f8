//! Stable test identity and golden artifact naming.
//!
//! A qualified name has the form `<source file>::<path inside the test crate>`.
//! The artifact name keeps only the file stem of the first part, escapes path
//! separators in the second part, and bounds its length with a content hash:
//!
//! ```text
//! crates/app/tests/render.rs::layout::wraps  ->  render.layout::wraps.out
//! (same, sub identifier "narrow")             ->  render.layout::wraps__narrow.out
//! ```
//!
//! Only `/` and `\` are escaped. The `::` of module paths stays in the name,
//! which Unix and macOS filesystems accept but NTFS rejects, so golden files
//! of tests inside modules cannot be checked out on Windows.

use std::fmt;

use sha2::{Digest, Sha512};

/// Separator between the file part and the test part of a qualified name.
pub const TEST_PART_SEPARATOR: &str = "::";

/// Test parts longer than this (in chars) are replaced by a hash.
pub const MAX_TEST_PART_LEN: usize = 100;

/// Number of hex characters kept from the SHA-512 digest.
pub const HASHED_TEST_PART_LEN: usize = 10;

const ARTIFACT_EXTENSION: &str = "out";
const SEPARATOR_ESCAPE: &str = "--";
const CLOSURE_SEGMENT: &str = "{{closure}}";

/// Identity of one test invocation, computed once when the test starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestIdentity {
    qualified_name: String,
    sub_identifier: Option<String>,
}

impl TestIdentity {
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            sub_identifier: None,
        }
    }

    /// Build an identity from `file!()` and a `std::any::type_name` style
    /// function path (`crate::module::test_fn`).
    ///
    /// The leading crate segment and any closure segments are dropped, so a
    /// test keeps its identity whether its body runs directly or in a closure.
    pub fn from_function_path(source_file: &str, function_path: &str) -> Self {
        let segments: Vec<&str> = function_path
            .split(TEST_PART_SEPARATOR)
            .skip(1)
            .filter(|segment| *segment != CLOSURE_SEGMENT)
            .collect();
        let test_part = if segments.is_empty() {
            function_path.to_string()
        } else {
            segments.join(TEST_PART_SEPARATOR)
        };
        Self::new(format!("{source_file}{TEST_PART_SEPARATOR}{test_part}"))
    }

    #[must_use]
    pub fn with_sub_identifier(mut self, sub_identifier: impl Into<String>) -> Self {
        self.sub_identifier = Some(sub_identifier.into());
        self
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn sub_identifier(&self) -> Option<&str> {
        self.sub_identifier.as_deref()
    }

    pub fn artifact_name(&self) -> ArtifactName {
        resolve(&self.qualified_name, self.sub_identifier.as_deref())
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_identifier {
            Some(sub) => write!(f, "{}[{sub}]", self.qualified_name),
            None => f.write_str(&self.qualified_name),
        }
    }
}

/// File name of a golden artifact, e.g. `render.layout::wraps.out`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactName(String);

impl ArtifactName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the artifact name for a qualified test name.
pub fn resolve(qualified_name: &str, sub_identifier: Option<&str>) -> ArtifactName {
    let (file_part, test_part) = qualified_name
        .split_once(TEST_PART_SEPARATOR)
        .unwrap_or((qualified_name, ""));

    let mut name = file_stem(file_part).to_string();
    let test_part = escape_test_part(test_part);
    if !test_part.is_empty() {
        name.push('.');
        name.push_str(&test_part);
    }
    if let Some(sub) = sub_identifier {
        name.push_str("__");
        name.push_str(&escape_separators(sub));
    }
    name.push('.');
    name.push_str(ARTIFACT_EXTENSION);
    ArtifactName(name)
}

fn escape_test_part(test_part: &str) -> String {
    let escaped = escape_separators(test_part);
    if escaped.chars().count() > MAX_TEST_PART_LEN {
        hashed_test_part(&escaped)
    } else {
        escaped
    }
}

fn escape_separators(text: &str) -> String {
    text.replace(['/', '\\'], SEPARATOR_ESCAPE)
}

fn hashed_test_part(test_part: &str) -> String {
    let digest = Sha512::digest(test_part.as_bytes());
    let mut hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex.truncate(HASHED_TEST_PART_LEN);
    hex
}

fn file_stem(file_part: &str) -> &str {
    let base = file_part.rsplit(['/', '\\']).next().unwrap_or(file_part);
    match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    }
}
