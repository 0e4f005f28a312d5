//! Payload templates.
//!
//! Action payloads may embed placeholders that are expanded when the rule
//! fires:
//!
//! | Placeholder | Expands to |
//! |-------------|------------|
//! | `${payload}` | the trigger payload as text |
//! | `${payload:/a/b}` | the JSON value at pointer `/a/b` in the trigger payload |
//! | `${param:name}` or `${name}` | the current value of parameter `name` |
//!
//! An unterminated `${` is kept verbatim.

use std::sync::LazyLock;

use regex::Regex;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder pattern is valid"));

/// A parsed `${…}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder<'a> {
    Payload,
    PayloadPointer(&'a str),
    Parameter(&'a str),
}

impl<'a> Placeholder<'a> {
    fn parse(inner: &'a str) -> Self {
        let inner = inner.trim();
        if inner == "payload" {
            Self::Payload
        } else if let Some(pointer) = inner.strip_prefix("payload:") {
            Self::PayloadPointer(pointer.trim())
        } else if let Some(name) = inner.strip_prefix("param:") {
            Self::Parameter(name.trim())
        } else {
            Self::Parameter(inner)
        }
    }
}

/// Whether `template` contains at least one placeholder opening.
#[must_use]
pub fn has_placeholders(template: &str) -> bool {
    template.contains("${")
}

/// Expand every placeholder of `template` with `resolve`.
///
/// Placeholders for which `resolve` returns `None` expand to an empty string
/// and are reported to `on_missing`.
pub fn render<'a, R, M>(template: &'a str, mut resolve: R, mut on_missing: M) -> String
where
    R: FnMut(&Placeholder<'a>) -> Option<String>,
    M: FnMut(&Placeholder<'a>),
{
    let mut output = String::with_capacity(template.len());
    let mut last = 0;
    for captures in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        output.push_str(&template[last..whole.start()]);
        let placeholder = Placeholder::parse(inner.as_str());
        match resolve(&placeholder) {
            Some(value) => output.push_str(&value),
            None => on_missing(&placeholder),
        }
        last = whole.end();
    }
    output.push_str(&template[last..]);
    output
}
