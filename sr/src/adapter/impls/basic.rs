//! `basic` adapter: one card per `Q:`/`A:` pair in a markdown file.
//!
//! Grounded on `original_source/example_sr_dir/adapters/basic_qa.py`. Ships
//! so the scanner and synchronizer are testable end-to-end without pulling in
//! a full markdown ecosystem; it is not a complete file-format adapter (that
//! remains an external collaborator's job).

use super::super::{AdapterConfig, ParsedCard, SrsAdapter};
use crate::Error;
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct BasicQaAdapter;

#[async_trait]
impl SrsAdapter for BasicQaAdapter {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn parse(
        &self,
        text: &str,
        _path: &str,
        config: &AdapterConfig,
    ) -> Result<Vec<ParsedCard>, Error> {
        let body = strip_frontmatter(text);
        let tags: Vec<String> = config
            .get("tags")
            .map(|raw| raw.split(',').map(|t| t.trim().to_string()).collect())
            .unwrap_or_default();

        let mut cards = Vec::new();
        let mut current_q: Option<String> = None;
        let mut current_a: Option<String> = None;
        let mut current_line = 0i64;
        let mut index = 0i64;

        fn flush(
            q: &mut Option<String>,
            a: &mut Option<String>,
            line: i64,
            index: &mut i64,
            tags: &[String],
            out: &mut Vec<ParsedCard>,
        ) {
            if let (Some(question), Some(answer)) = (q.take(), a.take()) {
                *index += 1;
                out.push(make_card(&question, &answer, *index, line, tags));
            }
        }

        for (line_no, raw_line) in body.lines().chain(std::iter::once("")).enumerate() {
            let stripped = raw_line.trim();
            let (is_q, rest) = match_question_prefix(stripped);

            if is_q {
                flush(
                    &mut current_q,
                    &mut current_a,
                    current_line,
                    &mut index,
                    &tags,
                    &mut cards,
                );
                current_q = Some(rest.to_string());
                current_a = None;
                current_line = line_no as i64 + 1;
            } else if let Some(rest) = match_answer_prefix(stripped) {
                current_a = Some(rest.to_string());
            } else if stripped.is_empty() {
                flush(
                    &mut current_q,
                    &mut current_a,
                    current_line,
                    &mut index,
                    &tags,
                    &mut cards,
                );
            } else if current_a.is_some() {
                let a = current_a.get_or_insert_with(String::new);
                a.push('\n');
                a.push_str(stripped);
            } else if current_q.is_some() {
                let q = current_q.get_or_insert_with(String::new);
                q.push('\n');
                q.push_str(stripped);
            }
        }

        Ok(cards)
    }

    fn render_front(&self, content: &Value) -> String {
        let q = content.get("question").and_then(Value::as_str).unwrap_or("");
        format!("<div>{}</div>", markdown_to_html(q))
    }

    fn render_back(&self, content: &Value) -> String {
        let a = content.get("answer").and_then(Value::as_str).unwrap_or("");
        format!("<div>{}</div>", markdown_to_html(a))
    }
}

fn match_question_prefix(stripped: &str) -> (bool, &str) {
    for prefix in ["Q:", "q:"] {
        if let Some(rest) = stripped.strip_prefix(prefix) {
            return (true, rest.trim());
        }
    }
    (false, "")
}

fn match_answer_prefix(stripped: &str) -> Option<&str> {
    for prefix in ["A:", "a:"] {
        if let Some(rest) = stripped.strip_prefix(prefix) {
            return Some(rest.trim());
        }
    }
    None
}

fn make_card(question: &str, answer: &str, index: i64, source_line: i64, tags: &[String]) -> ParsedCard {
    let content = json!({ "question": question, "answer": answer });
    let display_text: String = question.chars().take(80).collect();
    ParsedCard {
        key: format!("qa_{index}"),
        content,
        display_text,
        gradable: true,
        source_line,
        tags: tags.to_vec(),
        relations: Vec::new(),
    }
}

fn strip_frontmatter(text: &str) -> &str {
    if let Some(stripped) = text.strip_prefix("---") {
        if let Some(end) = stripped.find("\n---") {
            return &stripped[end + 4..];
        }
    }
    text
}

/// Minimal markdown to HTML: fenced/inline code, bold, italic, newlines.
/// Hand-rolled rather than regex-based (the reference Python uses `re`), since
/// this crate does not carry a regex dependency; see DESIGN.md.
fn markdown_to_html(text: &str) -> String {
    let escaped = html_escape(text);
    let with_code_blocks = render_fenced_code(&escaped);
    let with_inline_code = render_delimited(&with_code_blocks, '`', |inner| {
        format!("<code>{inner}</code>")
    });
    let with_bold = render_wrapped(&with_inline_code, "**", |inner| {
        format!("<strong>{inner}</strong>")
    });
    let with_italic = render_delimited(&with_bold, '*', |inner| format!("<em>{inner}</em>"));
    with_italic.replace('\n', "<br>")
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn render_fenced_code(text: &str) -> String {
    let mut out = String::new();
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        let Some(lang_end) = after.find('\n') else {
            out.push_str("```");
            rest = after;
            break;
        };
        let after_lang = &after[lang_end + 1..];
        if let Some(close) = after_lang.find("```") {
            let code = after_lang[..close].trim();
            out.push_str(&format!("<pre><code>{code}</code></pre>"));
            rest = &after_lang[close + 3..];
        } else {
            out.push_str("```");
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

fn render_delimited(text: &str, delim: char, wrap: impl Fn(&str) -> String) -> String {
    let mut out = String::new();
    let mut parts = text.split(delim);
    if let Some(first) = parts.next() {
        out.push_str(first);
    }
    let mut open = true;
    for part in parts {
        if open {
            out.push(delim);
            out.push_str(part);
        } else {
            out.push_str(&wrap(part));
        }
        open = !open;
    }
    out
}

fn render_wrapped(text: &str, delim: &str, wrap: impl Fn(&str) -> String) -> String {
    let mut out = String::new();
    let mut rest = text;
    loop {
        match rest.find(delim) {
            Some(start) => {
                out.push_str(&rest[..start]);
                let after = &rest[start + delim.len()..];
                match after.find(delim) {
                    Some(end) => {
                        out.push_str(&wrap(&after[..end]));
                        rest = &after[end + delim.len()..];
                    }
                    None => {
                        out.push_str(delim);
                        out.push_str(after);
                        return out;
                    }
                }
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn parses_simple_qa_pairs() {
        let adapter = BasicQaAdapter;
        let text = "Q: What is 2+2?\nA: 4\n\nQ: What is 3+3?\nA: 6\n";
        let cards = adapter
            .parse(text, "cards.md", &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].key, "qa_1");
        assert_eq!(cards[0].content["question"], "What is 2+2?");
        assert_eq!(cards[0].content["answer"], "4");
    }

    #[test]
    fn renders_inline_code_and_bold() {
        let html = markdown_to_html("a `code` and **bold**");
        assert_eq!(html, "a <code>code</code> and <strong>bold</strong>");
    }
}
