//! The built-in function registry: the string/number/array/date/boolean
//! functions a CONDITION/TRANSFORMER/EFFECT expression can name, plus the
//! override point a host application uses to register its own. Built-ins and
//! user registrations share one flat namespace; a user registration under an
//! existing name shadows the built-in rather than erroring, since form
//! authors commonly want to override `isEmpty`-style predicates per project.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{Duration, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use wayform_core::EngineError;

/// A callable built-in or user-registered function: positional JSON
/// arguments in, one JSON value out.
pub type FunctionImpl = Arc<dyn Fn(&[Value]) -> Result<Value, EngineError> + Send + Sync>;

/// Flat, shadow-on-conflict namespace of named functions.
#[derive(Debug)]
pub struct FunctionRegistry {
    builtins: HashMap<String, FunctionImpl>,
    user: RwLock<HashMap<String, FunctionImpl>>,
}

impl FunctionRegistry {
    /// A registry containing only the built-in functions.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self {
            builtins: builtin_functions(),
            user: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) a function under `name`, shadowing any built-in
    /// of the same name.
    pub fn register(&self, name: impl Into<String>, implementation: FunctionImpl) {
        let name = name.into();
        debug!(function = %name, "registered user function");
        self.user.write().unwrap_or_else(|poison| poison.into_inner()).insert(name, implementation);
    }

    /// Resolve a function by name, preferring a user registration.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<FunctionImpl> {
        if let Some(found) = self.user.read().unwrap_or_else(|poison| poison.into_inner()).get(name) {
            return Some(Arc::clone(found));
        }
        self.builtins.get(name).cloned()
    }

    /// Call a function by name with positional arguments.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::LookupFailed` if no function is registered
    /// under `name`, or whatever the function itself returns.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, EngineError> {
        let function = self
            .get(name)
            .ok_or_else(|| EngineError::lookup_failed(format!("no function registered under '{name}'")))?;
        function(args)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn arg(args: &[Value], index: usize) -> Result<&Value, EngineError> {
    args.get(index)
        .ok_or_else(|| EngineError::type_mismatch(format!("function expected at least {} argument(s)", index + 1)))
}

fn as_str(value: &Value) -> Result<&str, EngineError> {
    value.as_str().ok_or_else(|| EngineError::type_mismatch(format!("expected a string, got {value}")))
}

fn as_f64(value: &Value) -> Result<f64, EngineError> {
    value.as_f64().ok_or_else(|| EngineError::type_mismatch(format!("expected a number, got {value}")))
}

fn as_array(value: &Value) -> Result<&Vec<Value>, EngineError> {
    value.as_array().ok_or_else(|| EngineError::type_mismatch(format!("expected an array, got {value}")))
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn builtin_functions() -> HashMap<String, FunctionImpl> {
    let mut functions: HashMap<String, FunctionImpl> = HashMap::new();

    // String built-ins.
    functions.insert(
        "concat".to_string(),
        Arc::new(|args| {
            let mut out = String::new();
            for value in args {
                out.push_str(&match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
            Ok(Value::String(out))
        }),
    );
    functions.insert(
        "uppercase".to_string(),
        Arc::new(|args| Ok(Value::String(as_str(arg(args, 0)?)?.to_uppercase()))),
    );
    functions.insert(
        "lowercase".to_string(),
        Arc::new(|args| Ok(Value::String(as_str(arg(args, 0)?)?.to_lowercase()))),
    );
    functions.insert(
        "trim".to_string(),
        Arc::new(|args| Ok(Value::String(as_str(arg(args, 0)?)?.trim().to_string()))),
    );
    functions.insert(
        "length".to_string(),
        Arc::new(|args| match arg(args, 0)? {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            other => Err(EngineError::type_mismatch(format!("length: unsupported value {other}"))),
        }),
    );
    functions.insert(
        "includes".to_string(),
        Arc::new(|args| {
            let haystack = arg(args, 0)?;
            let needle = arg(args, 1)?;
            let found = match haystack {
                Value::String(s) => as_str(needle).is_ok_and(|n| s.contains(n)),
                Value::Array(items) => items.contains(needle),
                other => return Err(EngineError::type_mismatch(format!("includes: unsupported value {other}"))),
            };
            Ok(Value::Bool(found))
        }),
    );
    functions.insert(
        "matches".to_string(),
        Arc::new(|args| {
            let value = as_str(arg(args, 0)?)?;
            let pattern = as_str(arg(args, 1)?)?;
            let regex = Regex::new(pattern).map_err(|err| EngineError::type_mismatch(format!("invalid pattern '{pattern}': {err}")))?;
            Ok(Value::Bool(regex.is_match(value)))
        }),
    );
    functions.insert(
        "isEmpty".to_string(),
        Arc::new(|args| Ok(Value::Bool(is_empty_value(arg(args, 0)?)))),
    );

    // Number built-ins.
    functions.insert(
        "add".to_string(),
        Arc::new(|args| Ok(Value::from(as_f64(arg(args, 0)?)? + as_f64(arg(args, 1)?)?))),
    );
    functions.insert(
        "subtract".to_string(),
        Arc::new(|args| Ok(Value::from(as_f64(arg(args, 0)?)? - as_f64(arg(args, 1)?)?))),
    );
    functions.insert(
        "multiply".to_string(),
        Arc::new(|args| Ok(Value::from(as_f64(arg(args, 0)?)? * as_f64(arg(args, 1)?)?))),
    );
    functions.insert(
        "divide".to_string(),
        Arc::new(|args| {
            let divisor = as_f64(arg(args, 1)?)?;
            if divisor == 0.0 {
                return Err(EngineError::evaluation_failed("divide by zero"));
            }
            Ok(Value::from(as_f64(arg(args, 0)?)? / divisor))
        }),
    );
    functions.insert(
        "gt".to_string(),
        Arc::new(|args| Ok(Value::Bool(as_f64(arg(args, 0)?)? > as_f64(arg(args, 1)?)?))),
    );
    functions.insert(
        "gte".to_string(),
        Arc::new(|args| Ok(Value::Bool(as_f64(arg(args, 0)?)? >= as_f64(arg(args, 1)?)?))),
    );
    functions.insert(
        "lt".to_string(),
        Arc::new(|args| Ok(Value::Bool(as_f64(arg(args, 0)?)? < as_f64(arg(args, 1)?)?))),
    );
    functions.insert(
        "lte".to_string(),
        Arc::new(|args| Ok(Value::Bool(as_f64(arg(args, 0)?)? <= as_f64(arg(args, 1)?)?))),
    );

    // Array built-ins.
    functions.insert(
        "first".to_string(),
        Arc::new(|args| Ok(as_array(arg(args, 0)?)?.first().cloned().unwrap_or(Value::Null))),
    );
    functions.insert(
        "last".to_string(),
        Arc::new(|args| Ok(as_array(arg(args, 0)?)?.last().cloned().unwrap_or(Value::Null))),
    );
    functions.insert(
        "join".to_string(),
        Arc::new(|args| {
            let items = as_array(arg(args, 0)?)?;
            let separator = args.get(1).and_then(Value::as_str).unwrap_or(",");
            let joined = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(separator);
            Ok(Value::String(joined))
        }),
    );

    // Date built-ins, ISO-8601 (`YYYY-MM-DD`) in and out.
    functions.insert(
        "now".to_string(),
        Arc::new(|_args| Ok(Value::String(Utc::now().format("%Y-%m-%d").to_string()))),
    );
    functions.insert(
        "addDays".to_string(),
        Arc::new(|args| {
            let date = parse_date(as_str(arg(args, 0)?)?)?;
            let days = as_f64(arg(args, 1)?)? as i64;
            let shifted = date + Duration::days(days);
            Ok(Value::String(shifted.format("%Y-%m-%d").to_string()))
        }),
    );
    functions.insert(
        "isBefore".to_string(),
        Arc::new(|args| Ok(Value::Bool(parse_date(as_str(arg(args, 0)?)?)? < parse_date(as_str(arg(args, 1)?)?)?))),
    );
    functions.insert(
        "isAfter".to_string(),
        Arc::new(|args| Ok(Value::Bool(parse_date(as_str(arg(args, 0)?)?)? > parse_date(as_str(arg(args, 1)?)?)?))),
    );

    // Boolean built-ins, for CONDITION expressions that operate outside a
    // predicate node's AND/OR/XOR/NOT combinators.
    functions.insert(
        "not".to_string(),
        Arc::new(|args| {
            let value = arg(args, 0)?.as_bool().ok_or_else(|| EngineError::type_mismatch("not: expected a boolean"))?;
            Ok(Value::Bool(!value))
        }),
    );

    functions
}

fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|err| EngineError::type_mismatch(format!("invalid date '{raw}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_is_empty_treats_missing_and_blank_as_empty() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.call("isEmpty", &[Value::Null]).unwrap(), Value::Bool(true));
        assert_eq!(registry.call("isEmpty", &[Value::String(String::new())]).unwrap(), Value::Bool(true));
        assert_eq!(registry.call("isEmpty", &[Value::String("hi".to_string())]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn user_registration_shadows_builtin_of_the_same_name() {
        let registry = FunctionRegistry::with_builtins();
        registry.register("isEmpty", Arc::new(|_args| Ok(Value::Bool(false))));
        assert_eq!(registry.call("isEmpty", &[Value::Null]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn add_days_shifts_an_iso_date() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry.call("addDays", &[Value::String("2026-01-01".to_string()), Value::from(5)]).unwrap();
        assert_eq!(result, Value::String("2026-01-06".to_string()));
    }

    #[test]
    fn unknown_function_name_fails_lookup() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.call("doesNotExist", &[]).is_err());
    }
}
