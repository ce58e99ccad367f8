//! Text normalization pipeline for captured test output.
//!
//! Captured text passes three stages in a fixed order:
//!
//! 1. **pre-hooks**: user rules, in registration order;
//! 2. **standard rules**: temp-directory paths and object addresses;
//! 3. **post-hooks**: user rules, in registration order.
//!
//! Standard placeholders never match any standard rule themselves, so running
//! the standard stage twice yields the same text as running it once.
//!
//! Path-derived patterns are passed through [`regex_lite::escape`] before
//! compilation. On platforms with `\` separators this keeps every path
//! character literal instead of turning it into a regex escape.

use std::fmt;
use std::path::{MAIN_SEPARATOR, Path};
use std::sync::Arc;

use regex_lite::{Captures, NoExpand, Regex};
use tracing::debug;

use crate::error::{RegtestError, Result};
use crate::identity::TestIdentity;

/// Replaces the temp-directory fixture path of the running test.
pub const FIXTURE_TMPDIR_PLACEHOLDER: &str = "<tmpdir_from_fixture>";
/// Replaces the process temp directory (`std::env::temp_dir()`).
pub const PROCESS_TMPDIR_PLACEHOLDER: &str = "<tmpdir_from_env>";
/// Replaces directories created by `tempfile` inside the process temp directory.
pub const MANAGED_TMPDIR_PLACEHOLDER: &str = "<managed_tmpdir>";
/// Replaces hexadecimal object addresses such as ` 0x7ffd5e8c`.
pub const ADDRESS_PLACEHOLDER: &str = " 0x?????????";

type TextFn = dyn Fn(&str) -> String + Send + Sync;
type ContextFn = dyn Fn(&str, &NormalizeContext<'_>) -> String + Send + Sync;

/// Test metadata available to context-aware rules.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    identity: &'a TestIdentity,
    tmpdir: Option<&'a Path>,
}

impl<'a> NormalizeContext<'a> {
    pub fn new(identity: &'a TestIdentity, tmpdir: Option<&'a Path>) -> Self {
        Self { identity, tmpdir }
    }

    pub fn identity(&self) -> &'a TestIdentity {
        self.identity
    }

    /// Temp-directory fixture path used by the test, if any.
    pub fn tmpdir(&self) -> Option<&'a Path> {
        self.tmpdir
    }
}

#[derive(Clone)]
enum RuleAction {
    Pattern { regex: Regex, replacement: String },
    /// A directory and everything it may be spelled as; a trailing separator
    /// is kept as `/` after the placeholder.
    Path { regex: Regex, placeholder: String },
    TextOnly(Arc<TextFn>),
    WithContext(Arc<ContextFn>),
}

/// A named text rewrite. Two rules with the same name are the same rule.
#[derive(Clone)]
pub struct ConverterRule {
    name: String,
    action: RuleAction,
}

impl ConverterRule {
    /// Regex rule; `replacement` is inserted literally (no `$group` expansion).
    pub fn pattern(
        name: impl Into<String>,
        pattern: &str,
        replacement: impl Into<String>,
    ) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| RegtestError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            name: name.into(),
            action: RuleAction::Pattern {
                regex,
                replacement: replacement.into(),
            },
        })
    }

    /// Rule that replaces every occurrence of `literal`.
    pub fn literal(
        name: impl Into<String>,
        literal: &str,
        replacement: impl Into<String>,
    ) -> Result<Self> {
        Self::pattern(name, &regex_lite::escape(literal), replacement)
    }

    pub fn text_only<F>(name: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            action: RuleAction::TextOnly(Arc::new(rule)),
        }
    }

    pub fn with_context<F>(name: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&str, &NormalizeContext<'_>) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            action: RuleAction::WithContext(Arc::new(rule)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, text: &str, context: &NormalizeContext<'_>) -> String {
        match &self.action {
            RuleAction::Pattern { regex, replacement } => regex
                .replace_all(text, NoExpand(replacement.as_str()))
                .into_owned(),
            RuleAction::Path { regex, placeholder } => regex
                .replace_all(text, |caps: &Captures<'_>| {
                    if caps[0].ends_with(['/', '\\']) {
                        format!("{placeholder}/")
                    } else {
                        placeholder.clone()
                    }
                })
                .into_owned(),
            RuleAction::TextOnly(rule) => rule(text),
            RuleAction::WithContext(rule) => rule(text, context),
        }
    }
}

impl fmt::Debug for ConverterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.action {
            RuleAction::Pattern { regex, .. } => format!("pattern({})", regex.as_str()),
            RuleAction::Path { regex, .. } => format!("path({})", regex.as_str()),
            RuleAction::TextOnly(_) => "text-only".to_string(),
            RuleAction::WithContext(_) => "text+context".to_string(),
        };
        f.debug_struct("ConverterRule")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// Ordered rule registry plus the printable-output policy.
#[derive(Debug, Clone)]
pub struct Normalizer {
    pre: Vec<ConverterRule>,
    post: Vec<ConverterRule>,
    strict_printable: bool,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Normalizer {
    #[must_use]
    pub fn new(strict_printable: bool) -> Self {
        Self {
            pre: Vec::new(),
            post: Vec::new(),
            strict_printable,
        }
    }

    /// Register a rule that runs before the standard rules.
    ///
    /// Returns `false` when a rule with the same name is already registered.
    pub fn register_pre(&mut self, rule: ConverterRule) -> bool {
        register(&mut self.pre, rule)
    }

    /// Register a rule that runs after the standard rules.
    ///
    /// Returns `false` when a rule with the same name is already registered.
    pub fn register_post(&mut self, rule: ConverterRule) -> bool {
        register(&mut self.post, rule)
    }

    pub fn pre_hooks(&self) -> &[ConverterRule] {
        &self.pre
    }

    pub fn post_hooks(&self) -> &[ConverterRule] {
        &self.post
    }

    pub fn strict_printable(&self) -> bool {
        self.strict_printable
    }

    /// Run all three stages over `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`RegtestError::UnprintableOutput`] when the printable check is
    /// strict and the normalized text contains control characters.
    pub fn normalize(&self, raw: &str, context: &NormalizeContext<'_>) -> Result<String> {
        let standard = standard_rules(context.tmpdir())?;
        let text = self
            .pre
            .iter()
            .chain(standard.iter())
            .chain(self.post.iter())
            .fold(raw.to_string(), |text, rule| rule.apply(&text, context));

        if self.strict_printable {
            ensure_printable(&text, context.identity())?;
        }
        debug!(
            identity = %context.identity(),
            raw_len = raw.len(),
            normalized_len = text.len(),
            "normalized captured output"
        );
        Ok(text)
    }
}

fn register(stage: &mut Vec<ConverterRule>, rule: ConverterRule) -> bool {
    if stage.iter().any(|existing| existing.name == rule.name) {
        return false;
    }
    stage.push(rule);
    true
}

/// The fixed standard stage, in application order.
pub fn standard_rules(tmpdir: Option<&Path>) -> Result<Vec<ConverterRule>> {
    let mut rules = Vec::new();
    if let Some(dir) = tmpdir {
        push_path_rules(&mut rules, "fixture-tmpdir", dir, FIXTURE_TMPDIR_PLACEHOLDER)?;
    }
    push_path_rules(
        &mut rules,
        "process-tmpdir",
        &std::env::temp_dir(),
        PROCESS_TMPDIR_PLACEHOLDER,
    )?;
    rules.push(ConverterRule::pattern(
        "managed-tmpdir",
        &format!(
            r"{}[/\\]\.tmp[A-Za-z0-9]{{6,}}",
            regex_lite::escape(PROCESS_TMPDIR_PLACEHOLDER)
        ),
        MANAGED_TMPDIR_PLACEHOLDER,
    )?);
    rules.push(ConverterRule::pattern(
        "object-address",
        r" 0x[0-9a-fA-F]+",
        ADDRESS_PLACEHOLDER,
    )?);
    Ok(rules)
}

/// One rule for every spelling of `path`, applied in a single pass so that
/// replaced text is never scanned again. A form only matches when followed by
/// a separator or a word boundary, so `/tmp` does not match in `/tmpfile`.
fn push_path_rules(
    rules: &mut Vec<ConverterRule>,
    name: &str,
    path: &Path,
    placeholder: &str,
) -> Result<()> {
    let separator_class: String = separators()
        .iter()
        .map(|separator| regex_lite::escape(&separator.to_string()))
        .collect();
    let alternatives: Vec<String> = path_forms(path)
        .iter()
        .map(|form| {
            let ends_in_word = form
                .chars()
                .next_back()
                .is_some_and(|ch| ch.is_ascii_alphanumeric() || ch == '_');
            let tail = if ends_in_word {
                format!(r"(?:[{separator_class}]|\b)")
            } else {
                format!("[{separator_class}]?")
            };
            format!("{}{tail}", regex_lite::escape(form))
        })
        .collect();
    if alternatives.is_empty() {
        return Ok(());
    }

    let pattern = alternatives.join("|");
    let regex = Regex::new(&pattern).map_err(|source| RegtestError::InvalidPattern {
        pattern: pattern.clone(),
        source,
    })?;
    rules.push(ConverterRule {
        name: name.to_string(),
        action: RuleAction::Path {
            regex,
            placeholder: placeholder.to_string(),
        },
    });
    Ok(())
}

fn separators() -> Vec<char> {
    if MAIN_SEPARATOR == '/' {
        vec!['/']
    } else {
        vec![MAIN_SEPARATOR, '/']
    }
}

/// Spellings of `path` as it may appear in output, longest first so that a
/// form containing another one is replaced before the shorter one can split it.
fn path_forms(path: &Path) -> Vec<String> {
    let mut forms = vec![path.to_string_lossy().into_owned()];
    if let Ok(canonical) = path.canonicalize() {
        forms.push(canonical.to_string_lossy().into_owned());
    }
    let mut forms: Vec<String> = forms
        .into_iter()
        .map(|form| form.trim_end_matches(['/', '\\']).to_string())
        .filter(|form| form.chars().count() > 1)
        .collect();
    forms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    forms.dedup();
    forms
}

/// Fail when `text` holds control characters other than `\n`, `\r` and `\t`.
pub fn ensure_printable(text: &str, identity: &TestIdentity) -> Result<()> {
    match text.char_indices().find(|(_, ch)| is_unprintable(*ch)) {
        Some((offset, ch)) => Err(RegtestError::UnprintableOutput {
            identity: identity.to_string(),
            offset,
            found: ch.escape_debug().to_string(),
        }),
        None => Ok(()),
    }
}

fn is_unprintable(ch: char) -> bool {
    ch.is_control() && !matches!(ch, '\n' | '\r' | '\t')
}
