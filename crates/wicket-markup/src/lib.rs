//! Wicket Markup
//!
//! Converts a post's raw message to HTML at render time by streaming its
//! characters through a single-pass scanner: no intermediate AST, no
//! backtracking.
//!
//! # Rules
//!
//! - `<` becomes `&lt;` outside code spans (and inside a plain code span;
//!   an html-mode code span preserves it literally).
//! - a space becomes `&nbsp;`, a newline becomes `<br>` — both suppressed
//!   inside code spans, and the `<br>` is further suppressed right after an
//!   `<hr>` so a rule is never immediately followed by a blank line.
//! - a run of three backticks toggles a code span; four toggles an
//!   html-mode code span, where `<` is left untouched.
//! - four equals signs on their own produce `<hr>`.
//! - `>>` followed by a digit run produces a clickable post-reference
//!   anchor carrying the decoded number.
//! - `[...]` wrapping an `http(s)://` URL becomes a link; otherwise the
//!   brackets are kept and the inner text is recursively rendered, so
//!   nesting is bounded only by bracket balance.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// JS handler invoked by a post-reference anchor's `onclick`, called with
/// `(this, longId)`.
const POST_REF_HANDLER: &str = "wicketPostRef";

/// Renders `message` as HTML.
///
/// `allow_html` permits the four-backtick html-mode code span; without it,
/// four backticks behave as two independent three-backtick toggles plus a
/// stray backtick. `max_length`, when non-zero, stops the scan once that
/// many characters have been consumed (the caller gets a truncated but
/// well-formed prefix — unclosed code spans and links are closed out at the
/// end of the scan regardless of where it stopped).
#[must_use]
pub fn render(message: &str, allow_html: bool, max_length: usize) -> String {
    let chars: Vec<char> = message.chars().collect();
    render_chars(&chars, allow_html, max_length)
}

fn render_chars(chars: &[char], allow_html: bool, max_length: usize) -> String {
    let mut out = String::new();
    let mut ignore: usize = 0;
    let mut in_code = false;
    let mut in_code_html = false;
    let mut in_ref: Option<u64> = None;
    let mut in_link: Option<String> = None;
    let mut in_link_pos: usize = 0;

    for (i, &r) in chars.iter().enumerate() {
        if let Some(link) = in_link.as_mut() {
            if r != ']' && r != '[' && r != '`' {
                link.push(r);
            }
        }

        if ignore > 0 {
            ignore -= 1;
            continue;
        }

        if max_length > 0 && i > max_length {
            break;
        }

        if let Some(n) = in_ref {
            if r.is_ascii_digit() {
                in_ref = Some(n.wrapping_mul(10).wrapping_add(u64::from(r as u32 - u32::from('0'))));
                continue;
            }
            if n == 0 {
                out.push_str("&gt;&gt;");
            } else {
                out.push_str(&format!(
                    "<a href='javascript:void(0)' onclick='{POST_REF_HANDLER}(this,{n})'>&gt;&gt;{n}</a>"
                ));
            }
            in_ref = None;
            // fall through: `r` itself still needs handling below
        }

        match r {
            ' ' => out.push_str(if in_code { " " } else { "&nbsp;" }),
            '\n' => {
                if in_code {
                    out.push('\n');
                } else if !out.ends_with("<hr>") {
                    out.push_str("<br>");
                }
            }
            '<' => out.push_str(if in_code_html { "<" } else { "&lt;" }),
            '>' => {
                if in_code_html {
                    out.push('>');
                    continue;
                }
                let (next, after) = peek2(chars, i);
                if next == Some('>') && after.is_some_and(|c| c.is_ascii_digit()) && !in_code {
                    in_ref = Some(0);
                    ignore = 1;
                } else {
                    out.push_str("&gt;");
                }
            }
            '[' => {
                if in_code {
                    out.push('[');
                } else if let Some(pending) = in_link.take() {
                    out.truncate(in_link_pos);
                    out.push('[');
                    out.push_str(&render(&pending, allow_html, 0));
                    in_link = Some(String::new());
                    in_link_pos = out.len();
                } else {
                    in_link = Some(String::new());
                    in_link_pos = out.len();
                }
            }
            ']' => {
                if in_code || in_link.is_none() {
                    out.push(']');
                } else {
                    out.truncate(in_link_pos);
                    let text = in_link.take().unwrap_or_default();
                    if let Some(url) = as_http_url(&text) {
                        out.push_str(&format!("<a href='{url}' target='_blank'>{url}</a>"));
                    } else {
                        out.push('[');
                        out.push_str(&render(&text, allow_html, 0));
                        out.push(']');
                    }
                }
            }
            '=' => {
                let (b, c) = peek2(chars, i);
                let d = chars.get(i + 3).copied();
                if b == Some('=') && c == Some('=') && d == Some('=') && !in_code {
                    out.push_str("<hr>");
                    ignore = 3;
                } else {
                    out.push('=');
                }
            }
            '`' => {
                if let Some(pending) = in_link.take() {
                    out.truncate(in_link_pos);
                    out.push('[');
                    out.push_str(&render(&pending, allow_html, 0));
                    // a backtick can't appear in a URL; the link is abandoned.
                }

                let (b, c) = peek2(chars, i);
                let d = chars.get(i + 3).copied();
                if b == Some('`') && c == Some('`') {
                    if d == Some('`') && allow_html && in_code == in_code_html {
                        in_code = !in_code;
                        in_code_html = !in_code_html;
                        ignore = 3;
                        continue;
                    }
                    if in_code {
                        in_code = false;
                        out.push_str("</code>");
                    } else {
                        in_code = true;
                        out.push_str("<code>");
                    }
                    ignore = 2;
                } else {
                    out.push('`');
                }
            }
            other => out.push(other),
        }
    }

    if let Some(n) = in_ref {
        if n == 0 {
            out.push_str("&gt;&gt;");
        } else {
            out.push_str(&format!(
                "<a href='javascript:void(0)' onclick='{POST_REF_HANDLER}(this,{n})'>&gt;&gt;{n}</a>"
            ));
        }
    }

    if in_code && !in_code_html {
        out.push_str("</code>");
    }

    if let Some(pending) = in_link {
        out.truncate(in_link_pos);
        out.push('[');
        out.push_str(&render(&pending, allow_html, 0));
    }

    out
}

/// Returns the two characters immediately after `chars[i]`, if present.
fn peek2(chars: &[char], i: usize) -> (Option<char>, Option<char>) {
    (chars.get(i + 1).copied(), chars.get(i + 2).copied())
}

/// Parses `text` as an absolute `http`/`https` URL, returning its
/// normalized form.
fn as_http_url(text: &str) -> Option<String> {
    if !text.starts_with("http") {
        return None;
    }
    let parsed = url::Url::parse(text).ok()?;
    matches!(parsed.scheme(), "http" | "https").then(|| parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_angle_brackets_and_spaces() {
        assert_eq!(render("a <b> c", true, 0), "a&nbsp;&lt;b&gt;&nbsp;c");
    }

    #[test]
    fn newline_becomes_br_unless_after_hr() {
        assert_eq!(render("a\nb", true, 0), "a<br>b");
        assert_eq!(render("a\n====\nb", true, 0), "a<br><hr>b");
    }

    #[test]
    fn four_equals_makes_a_rule_three_does_not() {
        assert_eq!(render("====", true, 0), "<hr>");
        assert_eq!(render("===", true, 0), "===");
    }

    #[test]
    fn triple_backtick_toggles_code_span() {
        assert_eq!(render("```a```", true, 0), "<code>a</code>");
        assert_eq!(render("a```b```c", true, 0), "a<code>b</code>c");
    }

    #[test]
    fn unclosed_code_span_is_closed_at_end() {
        assert_eq!(render("```abc", true, 0), "<code>abc</code>");
    }

    #[test]
    fn quad_backtick_html_mode_preserves_angle_brackets() {
        assert_eq!(render("````<b>````", true, 0), "<b>");
    }

    #[test]
    fn quad_backtick_without_html_mode_falls_back_to_a_triple_toggle() {
        // Without allow_html, a run of four backticks is just a three-tick
        // code toggle followed by one literal leftover backtick.
        assert_eq!(render("```a````", true, 0), "<code>a</code>`");
    }

    #[test]
    fn post_reference_emits_onclick_anchor() {
        let html = render(">>1234", true, 0);
        assert!(html.contains("onclick='wicketPostRef(this,1234)'"));
        assert!(html.contains("&gt;&gt;1234"));
    }

    #[test]
    fn bare_angle_brackets_without_digits_are_escaped() {
        assert_eq!(render(">>abc", true, 0), "&gt;&gt;abc");
    }

    #[test]
    fn bracketed_url_becomes_a_link() {
        let html = render("see [http://example.com/x] now", true, 0);
        assert!(html.contains("<a href='http://example.com/x' target='_blank'>"));
    }

    #[test]
    fn non_url_brackets_are_preserved_and_rendered_recursively() {
        assert_eq!(render("[<b>]", true, 0), "[&lt;b&gt;]");
    }

    #[test]
    fn nested_brackets_render_inner_link() {
        let html = render("[a[http://example.com]b]", true, 0);
        assert!(html.contains("[a"));
        assert!(html.contains("<a href='http://example.com/'"));
        assert!(html.ends_with("b]"));
    }

    #[test]
    fn unterminated_bracket_falls_back_to_literal_rendering() {
        assert_eq!(render("[abc", true, 0), "[abc");
    }

    #[test]
    fn max_length_truncates_the_scan() {
        let html = render("abcdefgh", true, 3);
        assert_eq!(html, "abcd");
    }
}
