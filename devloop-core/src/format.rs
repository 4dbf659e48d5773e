//! Console presentation helpers.

/// Prefix every line of `text` with two spaces.
///
/// Lines are split on `'\n'` exactly, so a trailing newline yields a final
/// line containing only the indent, and the empty string becomes `"  "`.
pub fn indent(text: &str) -> String {
    text.split('\n')
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
