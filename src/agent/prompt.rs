//! Instruction template rendering

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*\$([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Replace `{{$name}}` placeholders with values from `args`.
///
/// Unknown names render as the empty string.
pub fn render_template(template: &str, args: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            args.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}
