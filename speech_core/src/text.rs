//! Text helpers shared by the segmenter and the playback queue.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

/// Inline directives such as `[smile:2]` drive other subsystems and are
/// never spoken.
static CONTROL_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[\w:]+\]").expect("control tag pattern is valid"));

/// Leading speaker label, e.g. `Assistant:`.
static ROLE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+:").expect("role prefix pattern is valid"));

pub fn strip_control_tags(text: &str) -> Cow<'_, str> {
    CONTROL_TAG.replace_all(text, "")
}

pub fn strip_role_prefix(text: &str) -> &str {
    match ROLE_PREFIX.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

/// Byte offset just past the right-most sentence ender in `text`.
pub fn last_boundary(text: &str, enders: &[char]) -> Option<usize> {
    text.char_indices()
        .rev()
        .find(|(_, c)| enders.contains(c))
        .map(|(i, c)| i + c.len_utf8())
}
