//! Scalar attribute values carried by pixel nodes and edges.
//!
//! Only scalars exist here: graph-markup consumers reject nested
//! structures, so there is no list or map variant to filter out later.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar node or edge attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    String(String),
}

impl AttrValue {
    /// GraphML `attr.type` of this value.
    pub fn graphml_type(&self) -> &'static str {
        match self {
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "double",
            AttrValue::String(_) => "string",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            AttrValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(f) => Some(*f),
            AttrValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for AttrValue { fn from(v: i64) -> Self { AttrValue::Int(v) } }
impl From<u32> for AttrValue { fn from(v: u32) -> Self { AttrValue::Int(v as i64) } }
impl From<f64> for AttrValue { fn from(v: f64) -> Self { AttrValue::Float(v) } }
impl From<f32> for AttrValue { fn from(v: f32) -> Self { AttrValue::Float(v as f64) } }
impl From<String> for AttrValue { fn from(v: String) -> Self { AttrValue::String(v) } }
impl From<&str> for AttrValue { fn from(v: &str) -> Self { AttrValue::String(v.to_owned()) } }

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::String(s) => write!(f, "{s}"),
        }
    }
}
