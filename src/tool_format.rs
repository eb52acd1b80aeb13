//! Renders tool invocations found in assistant turns into short text blocks
//! a phone screen can show inline with the conversation.

use serde_json::Value;

const MAX_LINE_CHARS: usize = 160;
const MAX_DIFF_LINES: usize = 12;
const MAX_PREVIEW_LINES: usize = 8;
const MAX_COMMAND_CHARS: usize = 200;
const MAX_INPUT_CHARS: usize = 300;

pub fn render_tool_use(name: &str, input: &Value) -> String {
    match name {
        "Edit" => render_edit(input),
        "MultiEdit" => render_multi_edit(input),
        "Write" => render_write(input),
        "Read" => format!("[Read] {}", file_label(input)),
        "NotebookEdit" => format!("[NotebookEdit] {}", notebook_label(input)),
        "Bash" => render_bash(input),
        "Grep" => render_search("Grep", input),
        "Glob" => render_search("Glob", input),
        "TodoWrite" => render_todos(input),
        "Task" => render_task(input),
        "WebFetch" => format!("[WebFetch] {}", str_field(input, "url").unwrap_or("?")),
        "WebSearch" => format!(
            "[WebSearch] {}",
            str_field(input, "query").unwrap_or("?")
        ),
        other => render_generic(other, input),
    }
}

/// Last path component, accepting either separator.
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(path)
}

/// Cut `text` to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

fn file_label(input: &Value) -> String {
    str_field(input, "file_path")
        .or_else(|| str_field(input, "path"))
        .map(|path| file_name(path).to_string())
        .unwrap_or_else(|| "?".to_string())
}

fn notebook_label(input: &Value) -> String {
    str_field(input, "notebook_path")
        .map(|path| file_name(path).to_string())
        .unwrap_or_else(|| file_label(input))
}

/// Prefix each line of `text`, keeping at most `max_lines`.
fn prefixed_lines(text: &str, prefix: &str, max_lines: usize, out: &mut Vec<String>) {
    let lines: Vec<&str> = text.lines().collect();
    for line in lines.iter().take(max_lines) {
        out.push(format!("{prefix}{}", truncate_chars(line, MAX_LINE_CHARS)));
    }
    if lines.len() > max_lines {
        out.push(format!("… ({} more lines)", lines.len() - max_lines));
    }
}

fn diff_block(old: &str, new: &str, out: &mut Vec<String>) {
    out.push("```diff".to_string());
    prefixed_lines(old, "- ", MAX_DIFF_LINES, out);
    prefixed_lines(new, "+ ", MAX_DIFF_LINES, out);
    out.push("```".to_string());
}

fn render_edit(input: &Value) -> String {
    let mut out = vec![format!("[Edit] {}", file_label(input))];
    diff_block(
        str_field(input, "old_string").unwrap_or_default(),
        str_field(input, "new_string").unwrap_or_default(),
        &mut out,
    );
    out.join("\n")
}

fn render_multi_edit(input: &Value) -> String {
    let edits = input
        .get("edits")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut out = vec![format!(
        "[MultiEdit] {} ({} edits)",
        file_label(input),
        edits.len()
    )];
    for edit in edits {
        diff_block(
            str_field(edit, "old_string").unwrap_or_default(),
            str_field(edit, "new_string").unwrap_or_default(),
            &mut out,
        );
    }
    out.join("\n")
}

fn render_write(input: &Value) -> String {
    let content = str_field(input, "content").unwrap_or_default();
    let mut out = vec![format!(
        "[Write] {} ({} lines)",
        file_label(input),
        content.lines().count()
    )];
    if !content.is_empty() {
        out.push("```".to_string());
        prefixed_lines(content, "+ ", MAX_PREVIEW_LINES, &mut out);
        out.push("```".to_string());
    }
    out.join("\n")
}

fn render_bash(input: &Value) -> String {
    let command = str_field(input, "command").unwrap_or_default();
    let mut rendered = format!("[Bash] $ {}", truncate_chars(command, MAX_COMMAND_CHARS));
    if let Some(description) = str_field(input, "description").filter(|d| !d.is_empty()) {
        rendered.push_str(&format!("\n{description}"));
    }
    rendered
}

fn render_search(tool: &str, input: &Value) -> String {
    let pattern = str_field(input, "pattern").unwrap_or("?");
    match str_field(input, "path").filter(|p| !p.is_empty()) {
        Some(path) => format!("[{tool}] \"{pattern}\" in {}", file_name(path)),
        None => format!("[{tool}] \"{pattern}\""),
    }
}

fn render_todos(input: &Value) -> String {
    let todos = input
        .get("todos")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut out = vec![format!("[TodoWrite] {} items", todos.len())];
    for todo in todos {
        let mark = match str_field(todo, "status") {
            Some("completed") => "[x]",
            Some("in_progress") => "[~]",
            _ => "[ ]",
        };
        let content = str_field(todo, "content").unwrap_or_default();
        out.push(format!("{mark} {}", truncate_chars(content, MAX_LINE_CHARS)));
    }
    out.join("\n")
}

fn render_task(input: &Value) -> String {
    let agent = str_field(input, "subagent_type").unwrap_or("agent");
    let description = str_field(input, "description").unwrap_or_default();
    format!("[Task:{agent}] {description}")
}

fn render_generic(name: &str, input: &Value) -> String {
    let compact = serde_json::to_string(input).unwrap_or_default();
    if compact.is_empty() || compact == "{}" || compact == "null" {
        return format!("[{name}]");
    }
    format!("[{name}] {}", truncate_chars(&compact, MAX_INPUT_CHARS))
}
