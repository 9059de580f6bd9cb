use std::borrow::Cow;

/// Replaces every line break in `value` with the two-character sequence `\n`.
///
/// `\r\n` counts as a single break; lone `\r` and `\n` are each one break.
/// Values without line breaks are returned borrowed.
#[inline]
pub fn escape_line_breaks(value: &str) -> Cow<'_, str> {
    if !value.contains(['\r', '\n']) {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len() + 8);
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }

    Cow::Owned(out)
}

/// First line of `message`, with any stray `\r` / `\n` removed rather than escaped.
pub fn first_line(message: &str) -> String {
    let line = message.split('\n').next().unwrap_or_default();
    line.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}
