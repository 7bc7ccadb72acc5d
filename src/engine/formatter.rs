//! 工具结果格式化：ToolResult → 给模型/用户看的文本

use serde_json::Value;

use crate::tools::ToolResult;

/// 数组最多展示的条目数
const MAX_LIST_ITEMS: usize = 20;

pub fn format_result(result: &ToolResult) -> String {
    if !result.success {
        return format!("❌ Error: {}", result.error_message());
    }
    match &result.data {
        None => "(no output)".to_string(),
        Some(data) => format_value(data),
    }
}

/// 一组带标签的结果，用于合成阶段的上下文
pub fn format_results(results: &[(String, ToolResult)]) -> String {
    results
        .iter()
        .map(|(label, result)| format!("### {}\n{}", label, format_result(result)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_value(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Array(items) => format_list(items),
        Value::Object(_) => serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string()),
        other => other.to_string(),
    }
}

fn format_list(items: &[Value]) -> String {
    if items.is_empty() {
        return "(no items)".to_string();
    }
    let mut lines: Vec<String> = items
        .iter()
        .take(MAX_LIST_ITEMS)
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, format_item(item)))
        .collect();
    if items.len() > MAX_LIST_ITEMS {
        lines.push(format!(
            "... (showing first {} of {} items)",
            MAX_LIST_ITEMS,
            items.len()
        ));
    }
    lines.join("\n")
}

fn format_item(item: &Value) -> String {
    let name = item.get("name").and_then(Value::as_str);
    let kind = item.get("type").and_then(Value::as_str);
    match (name, kind, item) {
        (Some(name), Some(kind), _) => {
            let icon = if matches!(kind, "directory" | "dir") {
                "📁"
            } else {
                "📄"
            };
            format!("{} {} ({})", icon, name, kind)
        }
        (_, _, Value::String(s)) => s.clone(),
        _ => item.to_string(),
    }
}

/// 按字符截断，超出部分以 "..." 结尾
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_renders_error_line() {
        let out = format_result(&ToolResult::err("Path not found: a.txt"));
        assert_eq!(out, "❌ Error: Path not found: a.txt");
    }

    #[test]
    fn test_string_is_verbatim() {
        assert_eq!(format_result(&ToolResult::ok("line1\nline2")), "line1\nline2");
    }

    #[test]
    fn test_list_truncated_to_twenty() {
        let items: Vec<Value> = (0..25).map(|i| json!(i)).collect();
        let out = format_result(&ToolResult::ok(Value::Array(items)));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 21);
        assert_eq!(lines[0], "1. 0");
        assert_eq!(lines[19], "20. 19");
        assert_eq!(lines[20], "... (showing first 20 of 25 items)");
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(format_result(&ToolResult::ok(json!([]))), "(no items)");
    }

    #[test]
    fn test_directory_entries() {
        let out = format_result(&ToolResult::ok(json!([
            {"name": "src", "type": "directory"},
            {"name": "Cargo.toml", "type": "file"},
            "plain"
        ])));
        assert_eq!(out, "1. 📁 src (directory)\n2. 📄 Cargo.toml (file)\n3. plain");
    }

    #[test]
    fn test_object_and_scalars() {
        let out = format_result(&ToolResult::ok(json!({"exit_code": 0})));
        assert!(out.contains("\"exit_code\": 0"));
        assert_eq!(format_result(&ToolResult::ok(json!(42))), "42");
        assert_eq!(format_result(&ToolResult::ok(Value::Null)), "null");
        let no_data = ToolResult {
            success: true,
            data: None,
            error: None,
        };
        assert_eq!(format_result(&no_data), "(no output)");
    }

    #[test]
    fn test_format_results_labels() {
        let out = format_results(&[
            ("list".to_string(), ToolResult::ok("a")),
            ("read".to_string(), ToolResult::err("gone")),
        ]);
        assert_eq!(out, "### list\na\n\n### read\n❌ Error: gone");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé...");
    }
}
