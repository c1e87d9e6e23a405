// Argument resolution: turns raw call input into a handler's positional arguments

use crate::declaration::{BindingKind, HandlerRef, ParameterBinding, MAX_PARAMETER_INDEX};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

/// Which MCP operation is resolving arguments. The kind decides which
/// bindings apply and what happens when a handler declares none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Tool,
    Resource,
    Prompt,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Prompt => "prompt",
        }
    }

    fn applies(&self, kind: &BindingKind) -> bool {
        match (self, kind) {
            (Self::Tool, BindingKind::WholeInput) => true,
            (Self::Resource, BindingKind::UriParam(_)) => true,
            (Self::Prompt, BindingKind::PromptArg(_)) => true,
            _ => false,
        }
    }
}

/// Positional arguments handed to a handler.
///
/// Unfilled positions and bound names missing from the input are `Null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs(Vec<Value>);

impl CallArgs {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The value at `index`, treating `Null` as absent.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index).filter(|v| !v.is_null())
    }

    pub fn str(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    /// Deserialize the argument at `index`. A missing argument deserializes
    /// from `null`, so `Option<T>` targets accept it.
    pub fn parse<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self.0.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).with_context(|| format!("Invalid argument at position {}", index))
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

/// Build the positional arguments for `handler`.
///
/// Bindings are applied in registration order, so a later binding on the
/// same index overwrites an earlier one. Tools take only whole-input
/// bindings, resources only URI parameters and prompts only prompt
/// arguments. Without any applicable binding a tool receives the whole
/// input as its only argument, while resources and prompts receive no
/// arguments at all. Bindings past [`MAX_PARAMETER_INDEX`] are skipped.
pub fn resolve(
    bindings: &[ParameterBinding],
    handler: &HandlerRef,
    call: CallKind,
    input: &Value,
) -> CallArgs {
    let applicable: Vec<&ParameterBinding> = bindings
        .iter()
        .filter(|b| &b.handler == handler && call.applies(&b.kind))
        .filter(|b| {
            if b.index > MAX_PARAMETER_INDEX {
                tracing::warn!(handler = %b.handler, index = b.index, "Parameter binding out of range, skipped");
                return false;
            }
            true
        })
        .collect();

    if applicable.is_empty() {
        return match call {
            CallKind::Tool => CallArgs(vec![input.clone()]),
            CallKind::Resource | CallKind::Prompt => CallArgs::default(),
        };
    }

    let len = applicable.iter().map(|b| b.index).max().map_or(0, |max| max + 1);
    let mut args = vec![Value::Null; len];

    for binding in applicable {
        args[binding.index] = match &binding.kind {
            BindingKind::WholeInput => input.clone(),
            BindingKind::UriParam(name) | BindingKind::PromptArg(name) => {
                input.get(name).cloned().unwrap_or(Value::Null)
            }
        };
    }

    CallArgs(args)
}

pub fn resolve_tool_args(bindings: &[ParameterBinding], handler: &HandlerRef, arguments: &Value) -> CallArgs {
    resolve(bindings, handler, CallKind::Tool, arguments)
}

pub fn resolve_uri_args(
    bindings: &[ParameterBinding],
    handler: &HandlerRef,
    captures: &HashMap<String, String>,
) -> CallArgs {
    let input = Value::Object(
        captures
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    );
    resolve(bindings, handler, CallKind::Resource, &input)
}

pub fn resolve_prompt_args(bindings: &[ParameterBinding], handler: &HandlerRef, arguments: &Value) -> CallArgs {
    resolve(bindings, handler, CallKind::Prompt, arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler(name: &str) -> HandlerRef {
        HandlerRef::new(name)
    }

    #[test]
    fn test_tool_without_bindings_gets_whole_input() {
        let input = json!({"a": 1, "b": 2});
        let args = resolve_tool_args(&[], &handler("add"), &input);
        assert_eq!(args.as_slice(), [input]);
    }

    #[test]
    fn test_resource_and_prompt_without_bindings_get_nothing() {
        let mut captures = HashMap::new();
        captures.insert("id".to_string(), "7".to_string());
        assert!(resolve_uri_args(&[], &handler("read"), &captures).is_empty());
        assert!(resolve_prompt_args(&[], &handler("greet"), &json!({"name": "x"})).is_empty());
    }

    #[test]
    fn test_whole_input_repeated_on_every_bound_index() {
        let bindings = vec![
            ParameterBinding::whole_input("echo", 0),
            ParameterBinding::whole_input("echo", 2),
        ];
        let input = json!({"msg": "hi"});
        let args = resolve_tool_args(&bindings, &handler("echo"), &input);
        assert_eq!(args.len(), 3);
        assert_eq!(args.get(0), Some(&input));
        assert_eq!(args.get(1), None);
        assert_eq!(args.get(2), Some(&input));
    }

    #[test]
    fn test_uri_params_placed_by_index() {
        let bindings = vec![
            ParameterBinding::uri_param("file", 1, "name"),
            ParameterBinding::uri_param("file", 0, "folder"),
        ];
        let mut captures = HashMap::new();
        captures.insert("folder".to_string(), "docs".to_string());
        captures.insert("name".to_string(), "readme".to_string());

        let args = resolve_uri_args(&bindings, &handler("file"), &captures);
        assert_eq!(args.str(0), Some("docs"));
        assert_eq!(args.str(1), Some("readme"));
    }

    #[test]
    fn test_missing_prompt_arg_is_null_not_error() {
        let bindings = vec![
            ParameterBinding::prompt_arg("greet", 0, "name"),
            ParameterBinding::prompt_arg("greet", 1, "tone"),
        ];
        let args = resolve_prompt_args(&bindings, &handler("greet"), &json!({"name": "Ada"}));
        assert_eq!(args.len(), 2);
        assert_eq!(args.str(0), Some("Ada"));
        assert!(args.get(1).is_none());
        let tone: Option<String> = args.parse(1).unwrap();
        assert!(tone.is_none());
    }

    #[test]
    fn test_later_binding_overwrites_same_index() {
        let bindings = vec![
            ParameterBinding::prompt_arg("p", 0, "first"),
            ParameterBinding::prompt_arg("p", 0, "second"),
        ];
        let args = resolve_prompt_args(&bindings, &handler("p"), &json!({"first": "1", "second": "2"}));
        assert_eq!(args.as_slice(), [json!("2")]);
    }

    #[test]
    fn test_bindings_of_other_handlers_and_kinds_ignored() {
        let bindings = vec![
            ParameterBinding::uri_param("read", 0, "id"),
            ParameterBinding::prompt_arg("add", 0, "a"),
        ];
        let input = json!({"a": 1});
        // A prompt-arg binding does not apply to a tool call, so the fallback kicks in.
        let args = resolve_tool_args(&bindings, &handler("add"), &input);
        assert_eq!(args.as_slice(), [input]);
    }

    #[test]
    fn test_whole_input_applies_only_to_tools() {
        let bindings = vec![
            ParameterBinding::whole_input("data", 0),
            ParameterBinding::whole_input("review", 0),
        ];
        let mut captures = HashMap::new();
        captures.insert("key".to_string(), "x".to_string());
        assert!(resolve_uri_args(&bindings, &handler("data"), &captures).is_empty());
        assert!(resolve_prompt_args(&bindings, &handler("review"), &json!({"lang": "rust"})).is_empty());

        let bindings = vec![
            ParameterBinding::whole_input("data", 0),
            ParameterBinding::uri_param("data", 1, "key"),
        ];
        let args = resolve_uri_args(&bindings, &handler("data"), &captures);
        assert_eq!(args.as_slice(), [Value::Null, json!("x")]);
    }

    #[test]
    fn test_out_of_range_index_is_skipped() {
        let bindings = vec![
            ParameterBinding::whole_input("echo", usize::MAX),
            ParameterBinding::whole_input("big", MAX_PARAMETER_INDEX + 1),
        ];
        let input = json!({"msg": "hi"});
        // Nothing applicable remains, so the tool fallback applies.
        assert_eq!(resolve_tool_args(&bindings, &handler("echo"), &input).as_slice(), [input.clone()]);
        assert_eq!(resolve_tool_args(&bindings, &handler("big"), &input).as_slice(), [input.clone()]);

        let bindings = vec![ParameterBinding::whole_input("edge", MAX_PARAMETER_INDEX)];
        let args = resolve_tool_args(&bindings, &handler("edge"), &input);
        assert_eq!(args.len(), MAX_PARAMETER_INDEX + 1);
        assert_eq!(args.get(MAX_PARAMETER_INDEX), Some(&input));
    }

    #[test]
    fn test_parse_typed_argument() {
        #[derive(serde::Deserialize)]
        struct Pair {
            a: i64,
            b: i64,
        }
        let args = CallArgs::new(vec![json!({"a": 2, "b": 3})]);
        let pair: Pair = args.parse(0).unwrap();
        assert_eq!(pair.a + pair.b, 5);
        assert!(args.parse::<Pair>(1).is_err());
    }
}
