//! Markdown-lite formatter for chat bubbles.
//!
//! Recognises exactly: line breaks, `**bold**`, `*italic*`, `` `code` `` and fenced
//! ```` ``` ```` blocks. Everything else is literal text. Text is never trusted: the HTML
//! renderer escapes every span before wrapping it in tags.
//!
//! Views draw from [`parse`]; the HTML renderer backs transcript export
//! ([`crate::client::transcript_html`]).

use regex::Regex;
use std::sync::OnceLock;

/// One rendered piece of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    LineBreak,
    Bold(String),
    Italic(String),
    Code(String),
    CodeBlock { lang: Option<String>, code: String },
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(.*?)```").expect("fence regex"))
}

/// Bold is listed first so `**x**` wins over `*x*` at the same position.
fn inline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\*\*(.+?)\*\*|\*([^*]+?)\*|`([^`]+)`").expect("inline regex")
    })
}

/// Split `text` into spans. Fenced blocks are cut out first so their contents are not
/// reinterpreted; the remaining prose is split on newlines and scanned for inline markers.
pub fn parse(text: &str) -> Vec<Inline> {
    let mut out = Vec::new();
    let mut last = 0;
    for caps in fence_re().captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        parse_prose(&text[last..whole.start()], &mut out);
        out.push(code_block(body.as_str()));
        last = whole.end();
    }
    parse_prose(&text[last..], &mut out);
    out
}

fn code_block(body: &str) -> Inline {
    // ```lang\n...``` carries an info string on the first line.
    if let Some((first, rest)) = body.split_once('\n') {
        let first = first.trim();
        if !first.is_empty() && !first.contains(char::is_whitespace) {
            return Inline::CodeBlock {
                lang: Some(first.to_string()),
                code: rest.trim_end_matches('\n').to_string(),
            };
        }
        if first.is_empty() {
            return Inline::CodeBlock {
                lang: None,
                code: rest.trim_end_matches('\n').to_string(),
            };
        }
    }
    Inline::CodeBlock {
        lang: None,
        code: body.to_string(),
    }
}

fn parse_prose(text: &str, out: &mut Vec<Inline>) {
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push(Inline::LineBreak);
        }
        parse_line(line, out);
    }
}

fn parse_line(line: &str, out: &mut Vec<Inline>) {
    let mut last = 0;
    for caps in inline_re().captures_iter(line) {
        let Some(whole) = caps.get(0) else { continue };
        push_text(&line[last..whole.start()], out);
        let span = if let Some(m) = caps.get(1) {
            Inline::Bold(m.as_str().to_string())
        } else if let Some(m) = caps.get(2) {
            Inline::Italic(m.as_str().to_string())
        } else if let Some(m) = caps.get(3) {
            Inline::Code(m.as_str().to_string())
        } else {
            Inline::Text(whole.as_str().to_string())
        };
        out.push(span);
        last = whole.end();
    }
    push_text(&line[last..], out);
}

fn push_text(s: &str, out: &mut Vec<Inline>) {
    if s.is_empty() {
        return;
    }
    if let Some(Inline::Text(prev)) = out.last_mut() {
        prev.push_str(s);
    } else {
        out.push(Inline::Text(s.to_string()));
    }
}

/// Escape the five HTML-significant characters.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render spans as HTML. All span text is escaped.
pub fn to_html(spans: &[Inline]) -> String {
    let mut html = String::new();
    for span in spans {
        match span {
            Inline::Text(t) => html.push_str(&escape_html(t)),
            Inline::LineBreak => html.push_str("<br>"),
            Inline::Bold(t) => {
                html.push_str("<strong>");
                html.push_str(&escape_html(t));
                html.push_str("</strong>");
            }
            Inline::Italic(t) => {
                html.push_str("<em>");
                html.push_str(&escape_html(t));
                html.push_str("</em>");
            }
            Inline::Code(t) => {
                html.push_str("<code>");
                html.push_str(&escape_html(t));
                html.push_str("</code>");
            }
            Inline::CodeBlock { lang, code } => {
                match lang {
                    Some(l) => {
                        html.push_str("<pre><code class=\"language-");
                        html.push_str(&escape_html(l));
                        html.push_str("\">");
                    }
                    None => html.push_str("<pre><code>"),
                }
                html.push_str(&escape_html(code));
                html.push_str("</code></pre>");
            }
        }
    }
    html
}

/// `parse` then `to_html`.
pub fn render_html(text: &str) -> String {
    to_html(&parse(text))
}
