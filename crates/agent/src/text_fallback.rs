//! Recovery of tool calls that a model wrote as plain text.
//!
//! Some models ignore structured function calling and print the call instead:
//!
//! ```text
//! runjs
//! {"code": "2+2"}
//! ```
//!
//! [`recover_tool_calls`] finds these `name\n{json}` occurrences for known
//! tool names, removes them from the text, and returns synthetic `tool_use`
//! blocks in their place.

use streamloop_core::ContentBlock;
use tracing::{debug, info};

/// A detected occurrence before it is applied to the blocks.
#[derive(Debug)]
struct Detection {
    block: usize,
    start: usize,
    end: usize,
    name: String,
    input: serde_json::Value,
}

/// Scan text blocks for textual tool calls and rewrite them in place.
///
/// Each known name is matched at most once (the first parseable occurrence in
/// block order). Matched occurrences are cut out of their text block and
/// blocks left empty are dropped. The synthesized `tool_use` blocks are
/// returned ordered by their position in the text; the caller appends them.
pub fn recover_tool_calls(blocks: &mut Vec<ContentBlock>, tool_names: &[&str]) -> Vec<ContentBlock> {
    let mut detections: Vec<Detection> = tool_names
        .iter()
        .filter(|name| !name.is_empty())
        .filter_map(|name| find_first(blocks, name))
        .collect();

    if detections.is_empty() {
        return Vec::new();
    }

    detections.sort_by_key(|d| (d.block, d.start));
    // Drop any occurrence nested inside an earlier one in the same block.
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for detection in detections {
        let overlaps = kept
            .last()
            .is_some_and(|prev| prev.block == detection.block && detection.start < prev.end);
        if overlaps {
            debug!(tool = %detection.name, "Skipping overlapping text tool call");
            continue;
        }
        kept.push(detection);
    }

    // Strip back to front so earlier offsets stay valid.
    for detection in kept.iter().rev() {
        if let Some(ContentBlock::Text { text }) = blocks.get_mut(detection.block) {
            text.replace_range(detection.start..detection.end, "");
        }
    }
    // Only blocks that held a call are touched.
    let mut stripped: Vec<usize> = kept.iter().map(|d| d.block).collect();
    stripped.dedup();
    for &index in stripped.iter().rev() {
        let emptied = match blocks.get_mut(index) {
            Some(ContentBlock::Text { text }) => {
                let trimmed = text.trim();
                if trimmed.len() != text.len() {
                    *text = trimmed.to_string();
                }
                text.is_empty()
            }
            _ => false,
        };
        if emptied {
            blocks.remove(index);
        }
    }

    kept.into_iter()
        .map(|d| {
            info!(tool = %d.name, "Recovered text tool call as structured tool_use");
            ContentBlock::tool_use(format!("fallback_{}", uuid::Uuid::new_v4().simple()), d.name, d.input)
        })
        .collect()
}

fn find_first(blocks: &[ContentBlock], name: &str) -> Option<Detection> {
    let needle = format!("{name}\n{{");

    for (index, block) in blocks.iter().enumerate() {
        let ContentBlock::Text { text } = block else {
            continue;
        };

        let mut from = 0;
        while let Some(pos) = text[from..].find(&needle) {
            let start = from + pos;
            from = start + needle.len();

            if !starts_at_word_boundary(text, start) {
                continue;
            }

            let json_start = start + name.len() + 1;
            let Some(json) = extract_balanced_json(&text[json_start..]) else {
                continue;
            };
            match serde_json::from_str::<serde_json::Value>(json) {
                Ok(input @ serde_json::Value::Object(_)) => {
                    return Some(Detection {
                        block: index,
                        start,
                        end: json_start + json.len(),
                        name: name.to_string(),
                        input,
                    });
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(tool = %name, error = %e, "Text tool call candidate is not valid JSON");
                    continue;
                }
            }
        }
    }

    None
}

/// `runjs` must not match inside `myrunjs`.
fn starts_at_word_boundary(text: &str, start: usize) -> bool {
    text[..start]
        .chars()
        .next_back()
        .is_none_or(|c| !(c.is_alphanumeric() || c == '_'))
}

/// Return the balanced `{...}` prefix of `text`, which must start with `{`.
///
/// Braces inside JSON strings are ignored, and escape sequences inside
/// strings are honoured. Returns `None` if the object never closes.
pub fn extract_balanced_json(text: &str) -> Option<&str> {
    if !text.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_blocks(texts: &[&str]) -> Vec<ContentBlock> {
        texts.iter().map(|t| ContentBlock::text(*t)).collect()
    }

    fn name_and_input(block: &ContentBlock) -> (&str, &serde_json::Value) {
        match block {
            ContentBlock::ToolUse { name, input, .. } => (name, input),
            other => panic!("expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn balanced_json_simple() {
        assert_eq!(extract_balanced_json(r#"{"a":1} trailing"#), Some(r#"{"a":1}"#));
    }

    #[test]
    fn balanced_json_nested() {
        let text = r#"{"a":{"b":{"c":[1,2]}}}}"#;
        assert_eq!(extract_balanced_json(text), Some(r#"{"a":{"b":{"c":[1,2]}}}"#));
    }

    #[test]
    fn balanced_json_ignores_braces_in_strings() {
        let text = r#"{"code":"function f() { return '}'; }"} rest"#;
        assert_eq!(
            extract_balanced_json(text),
            Some(r#"{"code":"function f() { return '}'; }"}"#)
        );
    }

    #[test]
    fn balanced_json_honours_escapes() {
        let text = r#"{"s":"quote \" and brace } and backslash \\"} x"#;
        assert_eq!(
            extract_balanced_json(text),
            Some(r#"{"s":"quote \" and brace } and backslash \\"}"#)
        );
    }

    #[test]
    fn balanced_json_unterminated() {
        assert_eq!(extract_balanced_json(r#"{"a": {"b": 1}"#), None);
        assert_eq!(extract_balanced_json("not json"), None);
    }

    #[test]
    fn recovers_stringified_object() {
        let input = json!({
            "code": "const x = {a: 1};\nconsole.log(\"}\")",
            "nested": {"list": [1, 2, {"deep": true}]},
            "unicode": "héllo ✓",
        });
        let text = format!("runjs\n{}", serde_json::to_string(&input).unwrap());
        let mut blocks = text_blocks(&[&text]);

        let calls = recover_tool_calls(&mut blocks, &["runjs"]);
        assert_eq!(calls.len(), 1);
        let (name, recovered) = name_and_input(&calls[0]);
        assert_eq!(name, "runjs");
        assert_eq!(recovered, &input);
        assert!(blocks.is_empty(), "fully consumed text block is removed");
    }

    #[test]
    fn strips_only_the_occurrence() {
        let mut blocks = text_blocks(&["Let me compute that.\nrunjs\n{\"code\":\"2+2\"}\nDone."]);
        let calls = recover_tool_calls(&mut blocks, &["runjs"]);

        assert_eq!(calls.len(), 1);
        assert_eq!(blocks, text_blocks(&["Let me compute that.\n\nDone."]));
    }

    #[test]
    fn neighbouring_blocks_are_left_untouched() {
        let mut blocks = text_blocks(&["  indented code\n", "runjs\n{\"a\":1}"]);
        let calls = recover_tool_calls(&mut blocks, &["runjs"]);

        assert_eq!(calls.len(), 1);
        assert_eq!(blocks, text_blocks(&["  indented code\n"]));
    }

    #[test]
    fn synthesized_ids_are_unique() {
        let mut blocks = text_blocks(&["a\n{}\nb\n{}"]);
        let calls = recover_tool_calls(&mut blocks, &["a", "b"]);
        assert_eq!(calls.len(), 2);
        let ids: Vec<_> = calls
            .iter()
            .map(|c| match c {
                ContentBlock::ToolUse { id, .. } => id.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert!(ids[0].starts_with("fallback_"));
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn first_match_per_name_wins() {
        let mut blocks = text_blocks(&["runjs\n{\"n\":1}", "runjs\n{\"n\":2}"]);
        let calls = recover_tool_calls(&mut blocks, &["runjs"]);

        assert_eq!(calls.len(), 1);
        assert_eq!(name_and_input(&calls[0]).1, &json!({"n": 1}));
        // The second occurrence stays as text
        assert_eq!(blocks, text_blocks(&["runjs\n{\"n\":2}"]));
    }

    #[test]
    fn calls_ordered_by_position() {
        let mut blocks = text_blocks(&["search\n{\"q\":\"x\"}", "runjs\n{\"code\":\"1\"}"]);
        let calls = recover_tool_calls(&mut blocks, &["runjs", "search"]);

        let names: Vec<_> = calls.iter().map(|c| name_and_input(c).0).collect();
        assert_eq!(names, vec!["search", "runjs"]);
    }

    #[test]
    fn unknown_names_ignored() {
        let mut blocks = text_blocks(&["deleteall\n{\"x\":1}"]);
        assert!(recover_tool_calls(&mut blocks, &["runjs"]).is_empty());
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn name_match_is_case_sensitive() {
        let mut blocks = text_blocks(&["RunJS\n{\"code\":\"1\"}"]);
        assert!(recover_tool_calls(&mut blocks, &["runjs"]).is_empty());
    }

    #[test]
    fn name_must_not_be_a_suffix_of_another_word() {
        let mut blocks = text_blocks(&["myrunjs\n{\"code\":\"1\"}"]);
        assert!(recover_tool_calls(&mut blocks, &["runjs"]).is_empty());
    }

    #[test]
    fn arrays_and_invalid_json_do_not_qualify() {
        let mut blocks = text_blocks(&["runjs\n{not json}", "runjs\n{\"a\":"]);
        assert!(recover_tool_calls(&mut blocks, &["runjs"]).is_empty());
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn skips_bad_candidate_and_takes_next() {
        let mut blocks = text_blocks(&["runjs\n{oops}\nrunjs\n{\"code\":\"ok\"}"]);
        let calls = recover_tool_calls(&mut blocks, &["runjs"]);
        assert_eq!(calls.len(), 1);
        assert_eq!(name_and_input(&calls[0]).1, &json!({"code": "ok"}));
        assert_eq!(blocks, text_blocks(&["runjs\n{oops}"]));
    }

    #[test]
    fn non_text_blocks_untouched() {
        let mut blocks = vec![
            ContentBlock::tool_result("t1", "runjs\n{\"code\":\"1\"}", false),
            ContentBlock::text("hello"),
        ];
        assert!(recover_tool_calls(&mut blocks, &["runjs"]).is_empty());
        assert_eq!(blocks.len(), 2);
    }
}
