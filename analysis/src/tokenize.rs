//! Minimal POSIX-shell-like command splitting for compilation database entries.

/// Split `command` into arguments.
///
/// - Runs of unquoted spaces separate arguments.
/// - A backslash outside quotes escapes exactly the next character.
/// - Single and double quotes suppress splitting and escaping until the
///   matching closing quote; they do not nest.
///
/// Quote and escape characters are kept in the output verbatim; only their
/// effect on splitting is applied.
#[must_use]
pub fn tokenize(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in command.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match quote {
            Some(open) => {
                if ch == open {
                    quote = None;
                }
                current.push(ch);
            }
            None => match ch {
                '\\' => {
                    escaped = true;
                    current.push(ch);
                }
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                ' ' => {
                    if !current.is_empty() {
                        args.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(ch),
            },
        }
    }

    if !current.is_empty() {
        args.push(current);
    }
    args
}
