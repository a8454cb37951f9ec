use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, INDEX_COMMANDS, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

/// One parsed studio shell line.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn arg_indices(&self, key: &str) -> Vec<usize> {
        self.command_args
            .get(key)
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_u64)
                    .map(|value| value as usize)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    split_args(arg).join(" ")
}

/// History indices are shown 1-based in the shell and stored 0-based here.
/// Tokens that are not positive integers are dropped.
fn parse_indices(arg: &str) -> Vec<Value> {
    arg.split(|ch: char| ch == ',' || ch.is_whitespace())
        .filter_map(|token| token.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .map(|value| Value::from(value - 1))
        .collect()
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return Intent::new("set_prompt", text)
            .with_arg("text", Value::String(raw_trimmed.to_string()));
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return Intent::new("set_prompt", text)
            .with_arg("text", Value::String(raw_trimmed.to_string()));
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
        let key = if action == "redeem" { "code" } else { "text" };
        return Intent::new(action, text).with_arg(key, Value::String(arg.to_string()));
    }

    if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
        return Intent::new(action, text)
            .with_arg("path", Value::String(parse_single_path_arg(arg)));
    }

    if let Some(action) = find_action(&command, INDEX_COMMANDS) {
        return Intent::new(action, text).with_arg("indices", Value::Array(parse_indices(arg)));
    }

    if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
        return Intent::new(action, text);
    }

    Intent::new("unknown", text)
        .with_arg("command", Value::String(command))
        .with_arg("arg", Value::String(arg.to_string()))
}
