//! Shell argument escaping
//!
//! Task text is passed to the dispatched agent as one single-quoted shell
//! argument. Embedded single quotes use the `'\''` sequence (close quote,
//! escaped quote, reopen quote), which is safe for any byte sequence.

/// Wrap arbitrary text as a single shell argument
pub fn shell_single_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
