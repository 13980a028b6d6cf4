//! Backend invocation requests.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed parameter value passed to a backend operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Param {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Param::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Bool(v) => write!(f, "{}", v),
            Param::Int(v) => write!(f, "{}", v),
            Param::Float(v) => write!(f, "{}", v),
            Param::Text(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Int(i64::from(v))
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

/// A single invocation of a backend operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// Backend operation name.
    pub operation: String,
    /// Named parameters, in the order the caller supplied them.
    pub params: Vec<(String, Param)>,
}

impl OperationRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Param>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = OperationRequest::new("lookup")
            .with_param("key", 7)
            .with_param("table", "users");

        assert_eq!(req.operation, "lookup");
        assert_eq!(req.param("key"), Some(&Param::Int(7)));
        assert_eq!(req.param("table").and_then(Param::as_text), Some("users"));
        assert!(req.param("missing").is_none());
    }

    #[test]
    fn test_param_display() {
        assert_eq!(Param::Int(3).to_string(), "3");
        assert_eq!(Param::Text("a b".into()).to_string(), "\"a b\"");
        assert_eq!(Param::Bool(true).to_string(), "true");
    }

    #[test]
    fn test_param_untagged_serde() {
        let p: Param = serde_json::from_str("42").unwrap();
        assert_eq!(p, Param::Int(42));
    }
}
