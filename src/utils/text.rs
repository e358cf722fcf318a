//! UTF-8 safe text helpers.
//!
//! Never slice by byte index: targets, prompts and history items routinely
//! carry CJK text.

/// Return a preview of `s` up to `n` characters, with a trailing `...` when
/// anything was cut.
pub fn preview(s: &str, n: usize) -> String {
    let mut out: String = s.chars().take(n).collect();
    if s.chars().nth(n).is_some() {
        out.push_str("...");
    }
    out
}

/// CJK unified ideographs (basic block).
pub fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}
