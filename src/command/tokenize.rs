//! Command-line tokenizers for each target platform.
//!
//! POSIX lines are split with `shlex`. Windows lines follow the MSVC runtime
//! argv rules instead: a backslash is literal unless it precedes a double
//! quote, and carets are ordinary characters. Running a Windows path such as
//! `C:\Users\me` through POSIX rules would silently eat the backslashes.

use std::borrow::Cow;

/// Split a POSIX command line. Returns `None` on unbalanced quotes.
pub fn split_posix(line: &str) -> Option<Vec<String>> {
    shlex::split(line)
}

/// Quote one token so that `split_posix` reads it back unchanged
///
/// Tokens containing a NUL byte cannot be represented and are returned as
/// `None`.
pub fn quote_posix(token: &str) -> Option<Cow<'_, str>> {
    shlex::try_quote(token).ok()
}

/// Split a Windows command line using MSVC argv rules
///
/// - spaces and tabs separate tokens outside quotes
/// - `2n` backslashes followed by `"` produce `n` backslashes and toggle quoting
/// - `2n+1` backslashes followed by `"` produce `n` backslashes and a literal `"`
/// - `""` inside a quoted run produces a literal `"`
/// - backslashes not followed by `"` are literal
///
/// Returns `Err` with a description when a quoted run is never closed.
pub fn split_windows(line: &str) -> Result<Vec<String>, String> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' if !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
                i += 1;
            }
            '\\' => {
                let run = chars[i..].iter().take_while(|c| **c == '\\').count();
                let next = i + run;
                in_token = true;
                if chars.get(next) == Some(&'"') {
                    push_backslashes(&mut current, run / 2);
                    if run % 2 == 1 {
                        current.push('"');
                        i = next + 1;
                    } else {
                        // The quote itself is handled on the next pass
                        i = next;
                    }
                } else {
                    push_backslashes(&mut current, run);
                    i = next;
                }
            }
            '"' => {
                in_token = true;
                if in_quotes && chars.get(i + 1) == Some(&'"') {
                    current.push('"');
                    i += 2;
                } else {
                    in_quotes = !in_quotes;
                    i += 1;
                }
            }
            c => {
                current.push(c);
                in_token = true;
                i += 1;
            }
        }
    }

    if in_quotes {
        return Err("unbalanced double quote".to_string());
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

/// Quote one token so that `split_windows` reads it back unchanged
pub fn quote_windows(token: &str) -> Cow<'_, str> {
    if !token.is_empty() && !token.contains([' ', '\t', '"']) {
        return Cow::Borrowed(token);
    }

    let mut quoted = String::with_capacity(token.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in token.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                push_backslashes(&mut quoted, backslashes * 2 + 1);
                quoted.push('"');
                backslashes = 0;
            }
            c => {
                push_backslashes(&mut quoted, backslashes);
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    // Trailing backslashes would otherwise escape the closing quote
    push_backslashes(&mut quoted, backslashes * 2);
    quoted.push('"');

    Cow::Owned(quoted)
}

fn push_backslashes(out: &mut String, count: usize) {
    out.extend(std::iter::repeat_n('\\', count));
}
