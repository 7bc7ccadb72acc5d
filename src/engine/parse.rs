//! 从模型自由文本中尽力提取结构化 JSON
//!
//! 候选顺序：先是 ```json ... ``` / ``` ... ``` 代码块，再是正文中每个括号配平的 `{...}` 对象；
//! 第一个能反序列化为目标类型、且满足调用方形状要求的候选胜出。解析结果总是带标签（Parsed / Malformed），由调用方给出回退值。

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

/// 候选对象数量上限，避免病态输入上的二次扫描
const MAX_CANDIDATES: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    /// 没有可用的结构化块；附带原因，仅用于日志
    Malformed(String),
}

impl<T> ParseOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed(v) => Some(v),
            ParseOutcome::Malformed(_) => None,
        }
    }
}

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*\s*\n?(.*?)```").expect("valid regex"))
}

/// 从 start（必须指向 '{'）开始找配平的右括号，字符串内的括号与转义不计
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 按优先级列出候选 JSON 文本
pub fn json_candidates(text: &str) -> Vec<&str> {
    let mut candidates: Vec<&str> = fenced_block_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| s.starts_with('{'))
        .collect();

    let mut search_from = 0;
    while candidates.len() < MAX_CANDIDATES {
        let Some(pos) = text[search_from..].find('{') else {
            break;
        };
        let start = search_from + pos;
        match balanced_object(text, start) {
            Some(obj) => {
                if !candidates.contains(&obj) {
                    candidates.push(obj);
                }
                search_from = start + obj.len();
            }
            None => search_from = start + 1,
        }
    }
    candidates.truncate(MAX_CANDIDATES);
    candidates
}

/// 解析第一个合法且满足 `accept` 的结构化块
///
/// 字段全有默认值的目标类型几乎能接受任意对象（如正文里引用的 `{"path": "."}`），
/// 需要用 `accept` 检查关键字段，继续向后找真正的回复。
pub fn parse_structured<T: DeserializeOwned>(
    text: &str,
    accept: impl Fn(&T) -> bool,
) -> ParseOutcome<T> {
    let candidates = json_candidates(text);
    if candidates.is_empty() {
        return ParseOutcome::Malformed("no JSON object found".to_string());
    }
    let mut first_error = None;
    for candidate in candidates {
        match serde_json::from_str::<T>(candidate) {
            Ok(value) if accept(&value) => return ParseOutcome::Parsed(value),
            Ok(_) => {
                first_error.get_or_insert_with(|| "object lacks the expected fields".to_string());
            }
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }
    ParseOutcome::Malformed(first_error.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        done: bool,
    }

    #[test]
    fn test_fenced_block_preferred() {
        let text = "Sure {\"done\": false}\n```json\n{\"done\": true}\n```";
        assert_eq!(
            parse_structured(text, |_: &Reply| true),
            ParseOutcome::Parsed(Reply { done: true })
        );
    }

    #[test]
    fn test_bare_object_with_braces_in_strings() {
        let text = r#"Here you go: {"done": true, "note": "use {braces} and \"quotes\""} trailing"#;
        let candidates = json_candidates(text);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].ends_with("\"}"));
        assert_eq!(
            parse_structured(text, |_: &Reply| true).ok(),
            Some(Reply { done: true })
        );
    }

    #[test]
    fn test_skips_invalid_candidate() {
        let text = "{not json} then {\"done\": false}";
        assert_eq!(
            parse_structured(text, |_: &Reply| true).ok(),
            Some(Reply { done: false })
        );
    }

    #[test]
    fn test_malformed_when_nothing_parses() {
        assert!(matches!(
            parse_structured("I cannot help with that.", |_: &Reply| true),
            ParseOutcome::Malformed(_)
        ));
        assert!(matches!(
            parse_structured("{\"done\": \"maybe\"", |_: &Reply| true),
            ParseOutcome::Malformed(_)
        ));
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Loose {
        steps: Vec<u32>,
    }

    #[test]
    fn test_predicate_skips_fragment_in_prose() {
        let text = r#"Call it with {"path": "."} first. Then: {"steps": [1, 2]}"#;
        assert_eq!(parse_structured(text, |_: &Loose| true).ok(), Some(Loose::default()));
        assert_eq!(
            parse_structured(text, |l: &Loose| !l.steps.is_empty()).ok(),
            Some(Loose { steps: vec![1, 2] })
        );
        assert!(matches!(
            parse_structured(r#"{"path": "."}"#, |l: &Loose| !l.steps.is_empty()),
            ParseOutcome::Malformed(_)
        ));
    }

    #[test]
    fn test_nested_object_is_one_candidate() {
        let text = r#"{"done": true, "inner": {"a": 1}}"#;
        assert_eq!(json_candidates(text), vec![text]);
    }
}
