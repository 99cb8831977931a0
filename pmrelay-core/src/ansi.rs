// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! ANSI escape handling for log lines sent to browser viewers.
//!
//! SGR colour and style codes become HTML markup; every other escape
//! sequence is dropped. Text is HTML-escaped.

const FOREGROUND: [&str; 8] = [
    "000", "ff0000", "209805", "e8bf03", "0000ff", "ff00ff", "00ffee", "f0f0f0",
];
const BRIGHT_BLACK: &str = "888";

/// Convert ANSI-coloured text into HTML markup.
pub fn to_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut open: Vec<&'static str> = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            push_escaped(&mut out, c);
            continue;
        }

        if chars.peek() != Some(&'[') {
            // Two-character escape such as ESC c; drop the second char too.
            chars.next();
            continue;
        }
        chars.next();

        let mut params = String::new();
        let mut terminator = None;
        for next in chars.by_ref() {
            if ('\u{40}'..='\u{7e}').contains(&next) {
                terminator = Some(next);
                break;
            }
            params.push(next);
        }

        if terminator == Some('m') {
            apply_sgr(&params, &mut out, &mut open);
        }
    }

    close_all(&mut out, &mut open);
    out
}

fn apply_sgr(params: &str, out: &mut String, open: &mut Vec<&'static str>) {
    if params.is_empty() {
        close_all(out, open);
        return;
    }

    let mut codes = params.split(';');
    while let Some(code) = codes.next() {
        let Ok(code) = code.parse::<u8>() else {
            continue;
        };
        match code {
            0 => close_all(out, open),
            // Extended colours: 38/48;5;n or 38/48;2;r;g;b. Not rendered.
            38 | 48 => {
                let operands = match codes.next() {
                    Some("5") => 1,
                    Some("2") => 3,
                    _ => 0,
                };
                for _ in 0..operands {
                    codes.next();
                }
            }
            1 => open_span(out, open, "font-weight:bold".to_string()),
            2 => open_span(out, open, "opacity:0.5".to_string()),
            3 => open_tag(out, open, "i"),
            4 => open_tag(out, open, "u"),
            8 => open_span(out, open, "display:none".to_string()),
            9 => open_tag(out, open, "del"),
            30..=37 => {
                open_span(out, open, format!("color:#{}", FOREGROUND[(code - 30) as usize]))
            }
            90 => open_span(out, open, format!("color:#{}", BRIGHT_BLACK)),
            91..=97 => {
                open_span(out, open, format!("color:#{}", FOREGROUND[(code - 90) as usize]))
            }
            40..=47 => open_span(
                out,
                open,
                format!("background-color:#{}", FOREGROUND[(code - 40) as usize]),
            ),
            21..=24 | 27..=29 | 39 | 49 => {
                if let Some(tag) = open.pop() {
                    close_tag(out, tag);
                }
            }
            _ => {}
        }
    }
}

fn open_span(out: &mut String, open: &mut Vec<&'static str>, style: String) {
    out.push_str("<span style=\"");
    out.push_str(&style);
    out.push_str("\">");
    open.push("span");
}

fn open_tag(out: &mut String, open: &mut Vec<&'static str>, tag: &'static str) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    open.push(tag);
}

fn close_tag(out: &mut String, tag: &str) {
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn close_all(out: &mut String, open: &mut Vec<&'static str>) {
    while let Some(tag) = open.pop() {
        close_tag(out, tag);
    }
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        _ => out.push(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_escaped() {
        assert_eq!(to_html("a < b && c"), "a &lt; b &amp;&amp; c");
    }

    #[test]
    fn test_colour_and_reset() {
        assert_eq!(
            to_html("\u{1b}[31merror\u{1b}[0m done"),
            "<span style=\"color:#ff0000\">error</span> done"
        );
    }

    #[test]
    fn test_unterminated_style_closed() {
        assert_eq!(
            to_html("\u{1b}[1;32mok"),
            "<span style=\"font-weight:bold\"><span style=\"color:#209805\">ok</span></span>"
        );
    }

    #[test]
    fn test_non_sgr_sequences_stripped() {
        assert_eq!(to_html("\u{1b}[2Kline\u{1b}[1A"), "line");
        assert_eq!(to_html("\u{1b}[4munder\u{1b}[24m"), "<u>under</u>");
    }

    #[test]
    fn test_extended_colours_skipped() {
        assert_eq!(to_html("\u{1b}[38;5;1mplain\u{1b}[0m"), "plain");
        assert_eq!(
            to_html("\u{1b}[1;38;2;255;0;0mbold\u{1b}[0m"),
            "<span style=\"font-weight:bold\">bold</span>"
        );
        assert_eq!(
            to_html("\u{1b}[4;48;5;9;31mx"),
            "<u><span style=\"color:#ff0000\">x</span></u>"
        );
    }
}
