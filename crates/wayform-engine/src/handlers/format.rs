//! `FORMAT`: interpolates `%1..%N` placeholders in a template string with
//! invoked argument values; `%%` escapes to a literal percent, and an
//! out-of-range placeholder produces an empty string.

use async_trait::async_trait;
use serde_json::Value;

use wayform_core::{AstNode, NodeId, PropertyValue, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;

use super::support::{invoke_or_undefined, scalar_str};

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

fn render(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(digit) if digit.is_ascii_digit() => {
                let mut number = String::new();
                while let Some(digit) = chars.peek() {
                    if digit.is_ascii_digit() {
                        number.push(*digit);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let index = number.parse::<usize>().unwrap_or(0);
                if index >= 1 {
                    if let Some(value) = args.get(index - 1) {
                        out.push_str(value);
                    }
                }
            }
            _ => out.push('%'),
        }
    }

    out
}

#[derive(Debug)]
pub(crate) struct FormatHandler {
    template: String,
    arguments: Vec<NodeId>,
}

impl FormatHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            template: scalar_str(node.properties(), "template").unwrap_or_default().to_string(),
            arguments: match node.properties().get("arguments") {
                Some(PropertyValue::Child(id)) => vec![id.clone()],
                Some(PropertyValue::Children(ids)) => ids.clone(),
                _ => Vec::new(),
            },
        }
    }
}

#[async_trait]
impl Handler for FormatHandler {
    async fn evaluate(&self, _id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let mut args = Vec::with_capacity(self.arguments.len());
        for argument in &self.arguments {
            args.push(stringify(&invoke_or_undefined(invoker, context, argument).await));
        }
        ThunkResult::Value(Value::String(render(&self.template, &args)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_placeholders_in_order() {
        let out = render("%1 scored %2%%", &["Alice".to_string(), "90".to_string()]);
        assert_eq!(out, "Alice scored 90%");
    }

    #[test]
    fn out_of_range_placeholder_is_empty() {
        let out = render("result: %3", &["a".to_string()]);
        assert_eq!(out, "result: ");
    }

    #[test]
    fn escaped_percent_is_literal() {
        assert_eq!(render("100%%", &[]), "100%");
    }
}
