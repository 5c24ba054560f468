//! Input contracts for tasks.
//!
//! A [`Schema`] is an object whose fields are described by a [`Field`] tree.
//! `validate` checks and normalises a JSON input; `describe` exposes the tree
//! for introspection and serialises as `{field -> {type, constraints...}}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Field {
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        integer: bool,
    },
    Boolean,
    Array {
        items: Box<Field>,
    },
    Record {
        values: Box<Field>,
    },
    Object {
        fields: BTreeMap<String, Field>,
    },
    Optional {
        inner: Box<Field>,
    },
    Enum {
        values: Vec<String>,
    },
    Any,
}

impl Field {
    pub fn string() -> Self {
        Self::String {
            min_length: None,
            max_length: None,
        }
    }

    pub fn number() -> Self {
        Self::Number {
            min: None,
            max: None,
            integer: false,
        }
    }

    pub fn integer() -> Self {
        Self::Number {
            min: None,
            max: None,
            integer: true,
        }
    }

    pub fn boolean() -> Self {
        Self::Boolean
    }

    pub fn any() -> Self {
        Self::Any
    }

    pub fn array(items: Field) -> Self {
        Self::Array {
            items: Box::new(items),
        }
    }

    pub fn record(values: Field) -> Self {
        Self::Record {
            values: Box::new(values),
        }
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Field)>) -> Self {
        Self::Object {
            fields: fields.into_iter().map(|(k, f)| (k.into(), f)).collect(),
        }
    }

    pub fn one_of<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        Self::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn optional(self) -> Self {
        Self::Optional {
            inner: Box::new(self),
        }
    }

    /// Lower bound for numbers. No effect on other variants.
    pub fn min(mut self, bound: f64) -> Self {
        if let Self::Number { min, .. } = &mut self {
            *min = Some(bound);
        }
        self
    }

    /// Upper bound for numbers. No effect on other variants.
    pub fn max(mut self, bound: f64) -> Self {
        if let Self::Number { max, .. } = &mut self {
            *max = Some(bound);
        }
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        if let Self::String { min_length, .. } = &mut self {
            *min_length = Some(len);
        }
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        if let Self::String { max_length, .. } = &mut self {
            *max_length = Some(len);
        }
        self
    }

    fn check(&self, value: Option<&Value>, path: &str, out: &mut Vec<Violation>) -> Option<Value> {
        if let Self::Optional { inner } = self {
            return match value {
                None | Some(Value::Null) => None,
                Some(v) => inner.check(Some(v), path, out),
            };
        }
        let Some(value) = value else {
            out.push(Violation::new(path, "required"));
            return None;
        };
        match self {
            Self::String {
                min_length,
                max_length,
            } => {
                let Some(text) = value.as_str() else {
                    out.push(mismatch(path, "string", value));
                    return None;
                };
                let len = text.chars().count();
                if let Some(min) = min_length {
                    if len < *min {
                        out.push(Violation::new(
                            path,
                            format!("must be at least {min} characters"),
                        ));
                    }
                }
                if let Some(max) = max_length {
                    if len > *max {
                        out.push(Violation::new(
                            path,
                            format!("must be at most {max} characters"),
                        ));
                    }
                }
                Some(value.clone())
            }
            Self::Number { min, max, integer } => {
                let Some(number) = value.as_f64() else {
                    out.push(mismatch(path, "number", value));
                    return None;
                };
                if *integer && number.fract() != 0.0 {
                    out.push(Violation::new(path, "expected integer"));
                }
                if let Some(min) = min {
                    if number < *min {
                        out.push(Violation::new(path, format!("must be >= {min}")));
                    }
                }
                if let Some(max) = max {
                    if number > *max {
                        out.push(Violation::new(path, format!("must be <= {max}")));
                    }
                }
                Some(value.clone())
            }
            Self::Boolean => {
                if value.is_boolean() {
                    Some(value.clone())
                } else {
                    out.push(mismatch(path, "boolean", value));
                    None
                }
            }
            Self::Array { items } => {
                let Some(elements) = value.as_array() else {
                    out.push(mismatch(path, "array", value));
                    return None;
                };
                let checked = elements
                    .iter()
                    .enumerate()
                    .map(|(idx, el)| {
                        items
                            .check(Some(el), &format!("{path}[{idx}]"), out)
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                Some(Value::Array(checked))
            }
            Self::Record { values } => {
                let Some(map) = value.as_object() else {
                    out.push(mismatch(path, "object", value));
                    return None;
                };
                let mut checked = Map::new();
                for (key, el) in map {
                    if let Some(v) = values.check(Some(el), &join(path, key), out) {
                        checked.insert(key.clone(), v);
                    }
                }
                Some(Value::Object(checked))
            }
            Self::Object { fields } => {
                let Some(map) = value.as_object() else {
                    out.push(mismatch(path, "object", value));
                    return None;
                };
                Some(Value::Object(check_fields(fields, map, path, out)))
            }
            Self::Enum { values } => match value.as_str() {
                Some(text) if values.iter().any(|v| v == text) => Some(value.clone()),
                _ => {
                    out.push(Violation::new(
                        path,
                        format!("expected one of [{}]", values.join(", ")),
                    ));
                    None
                }
            },
            Self::Any => Some(value.clone()),
            Self::Optional { .. } => None,
        }
    }
}

/// One violated constraint, located by a dotted path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Object-rooted input schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the normalised input, or every violation found.
    ///
    /// Unknown keys are dropped and absent optional fields stay absent.
    pub fn validate(&self, input: &Value) -> Result<Value, Vec<Violation>> {
        let mut violations = Vec::new();
        let Some(map) = input.as_object() else {
            return Err(vec![mismatch("", "object", input)]);
        };
        let normalized = check_fields(&self.fields, map, "", &mut violations);
        if violations.is_empty() {
            Ok(Value::Object(normalized))
        } else {
            Err(violations)
        }
    }

    pub fn describe(&self) -> BTreeMap<String, Field> {
        self.fields.clone()
    }
}

fn check_fields(
    fields: &BTreeMap<String, Field>,
    map: &Map<String, Value>,
    path: &str,
    out: &mut Vec<Violation>,
) -> Map<String, Value> {
    let mut checked = Map::new();
    for (name, field) in fields {
        if let Some(v) = field.check(map.get(name), &join(path, name), out) {
            checked.insert(name.clone(), v);
        }
    }
    checked
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn mismatch(path: &str, expected: &str, value: &Value) -> Violation {
    Violation::new(path, format!("expected {expected}, got {}", type_name(value)))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> Schema {
        Schema::new()
            .field("name", Field::string().min_length(1))
            .field("age", Field::integer().min(0.0))
            .field("tags", Field::array(Field::string()).optional())
    }

    #[test]
    fn validate_drops_unknown_keys() {
        let out = person()
            .validate(&json!({"name": "ada", "age": 36, "extra": true}))
            .expect("valid input");
        assert_eq!(out, json!({"name": "ada", "age": 36}));
    }

    #[test]
    fn validate_collects_every_violation() {
        let err = person()
            .validate(&json!({"name": "", "age": 1.5, "tags": ["a", 2]}))
            .expect_err("invalid input");
        let paths: Vec<_> = err.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["age", "name", "tags[1]"]);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let err = person().validate(&json!({"name": "ada"})).expect_err("missing age");
        assert_eq!(err, vec![Violation::new("age", "required")]);
    }

    #[test]
    fn non_object_input_is_rejected_at_root() {
        let err = Schema::new().validate(&Value::Null).expect_err("null input");
        assert_eq!(err[0].to_string(), "expected object, got null");
    }

    #[test]
    fn nested_objects_and_enums_use_dotted_paths() {
        let schema = Schema::new().field(
            "config",
            Field::object([
                ("mode", Field::one_of(["fast", "slow"])),
                ("limits", Field::record(Field::number().max(10.0))),
            ]),
        );
        let err = schema
            .validate(&json!({"config": {"mode": "medium", "limits": {"a": 11}}}))
            .expect_err("invalid nested input");
        assert_eq!(
            err,
            vec![
                Violation::new("config.limits.a", "must be <= 10"),
                Violation::new("config.mode", "expected one of [fast, slow]"),
            ]
        );
    }

    #[test]
    fn describe_serializes_as_tagged_tree() {
        let described = serde_json::to_value(person().describe()).expect("serialize");
        assert_eq!(
            described,
            json!({
                "age": {"type": "number", "min": 0.0, "integer": true},
                "name": {"type": "string", "min_length": 1},
                "tags": {"type": "optional", "inner": {"type": "array", "items": {"type": "string"}}}
            })
        );
    }
}
