//! Class-tagged JSON codec.
//!
//! Objects are written as `{"__class__": "<Name>", ...fields}`; maps, sets and
//! dates are wrapped as `{"__type__": "Map"|"Set"|"Date", "value": ...}`; a
//! reference that re-enters an object still being written becomes
//! `{"__circular__": true}`. Reading an object back requires its class name to
//! be present in a [`ClassRegistry`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

use crate::error::{GraphError, GraphResult};

pub const CLASS_KEY: &str = "__class__";
pub const TYPE_KEY: &str = "__type__";
pub const CIRCULAR_KEY: &str = "__circular__";
const VALUE_KEY: &str = "value";

/// Class names accepted by [`from_json`], each bound to a caller-defined tag.
///
/// Populate it once at startup and pass it to every decode.
#[derive(Debug, Clone)]
pub struct ClassRegistry<C> {
    classes: HashMap<String, C>,
}

impl<C: Copy> Default for ClassRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Copy> ClassRegistry<C> {
    pub fn new() -> Self {
        Self {
            classes: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, class: C) -> &mut Self {
        self.classes.insert(name.into(), class);
        self
    }

    pub fn get(&self, name: &str) -> GraphResult<C> {
        self.classes
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::ClassNotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Decoded document, before any class-specific interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum Tree {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Tree>),
    Record(Vec<(String, Tree)>),
    Map(Vec<(Tree, Tree)>),
    Set(Vec<Tree>),
    Date(DateTime<Utc>),
    Instance(Instance),
    Circular,
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub class: String,
    pub fields: Vec<(String, Tree)>,
}

// Field order is not significant: JSON objects do not keep it.
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
            && self.fields.len() == other.fields.len()
            && self.fields.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl Instance {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: Tree) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tree> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Field lookup that treats an absent field as an error.
    pub fn require(&self, name: &str) -> GraphResult<&Tree> {
        self.get(name).ok_or_else(|| {
            GraphError::serialization(format!("{} is missing field '{}'", self.class, name))
        })
    }
}

impl Tree {
    pub fn string(s: impl Into<String>) -> Self {
        Tree::String(s.into())
    }

    pub fn opt_string(s: Option<&str>) -> Self {
        s.map(Tree::string).unwrap_or(Tree::Null)
    }

    pub fn opt_index(n: Option<usize>) -> Self {
        n.map(|n| Tree::Number((n as u64).into())).unwrap_or(Tree::Null)
    }

    /// Lifts an untagged JSON value. Tag keys are not interpreted.
    pub fn from_plain(value: &Value) -> Self {
        match value {
            Value::Null => Tree::Null,
            Value::Bool(b) => Tree::Bool(*b),
            Value::Number(n) => Tree::Number(n.clone()),
            Value::String(s) => Tree::String(s.clone()),
            Value::Array(items) => Tree::Array(items.iter().map(Tree::from_plain).collect()),
            Value::Object(obj) => Tree::Record(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Tree::from_plain(v)))
                    .collect(),
            ),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Tree::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tree::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Tree::Number(n) => n.as_u64().map(|n| n as usize),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Tree]> {
        match self {
            Tree::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Tree::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    /// Plain JSON for scalar leaves; `None` for anything tagged or nested.
    pub fn as_scalar_json(&self) -> Option<Value> {
        match self {
            Tree::Null => Some(Value::Null),
            Tree::Bool(b) => Some(Value::Bool(*b)),
            Tree::Number(n) => Some(Value::Number(n.clone())),
            Tree::String(s) => Some(Value::String(s.clone())),
            _ => None,
        }
    }
}

pub fn to_json(tree: &Tree) -> Value {
    match tree {
        Tree::Null => Value::Null,
        Tree::Bool(b) => Value::Bool(*b),
        Tree::Number(n) => Value::Number(n.clone()),
        Tree::String(s) => Value::String(s.clone()),
        Tree::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        Tree::Record(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
        Tree::Map(entries) => wrapped(
            "Map",
            Value::Array(
                entries
                    .iter()
                    .map(|(k, v)| Value::Array(vec![to_json(k), to_json(v)]))
                    .collect(),
            ),
        ),
        Tree::Set(items) => wrapped("Set", Value::Array(items.iter().map(to_json).collect())),
        Tree::Date(date) => wrapped("Date", Value::String(date.to_rfc3339())),
        Tree::Instance(instance) => {
            let mut obj = Map::new();
            obj.insert(CLASS_KEY.to_string(), Value::String(instance.class.clone()));
            for (k, v) in &instance.fields {
                obj.insert(k.clone(), to_json(v));
            }
            Value::Object(obj)
        }
        Tree::Circular => {
            let mut obj = Map::new();
            obj.insert(CIRCULAR_KEY.to_string(), Value::Bool(true));
            Value::Object(obj)
        }
    }
}

fn wrapped(type_name: &str, value: Value) -> Value {
    let mut obj = Map::new();
    obj.insert(TYPE_KEY.to_string(), Value::String(type_name.to_string()));
    obj.insert(VALUE_KEY.to_string(), value);
    Value::Object(obj)
}

/// Reads a tagged document. Fails on the first unregistered class name.
pub fn from_json<C: Copy>(value: &Value, registry: &ClassRegistry<C>) -> GraphResult<Tree> {
    let tree = match value {
        Value::Array(items) => Tree::Array(
            items
                .iter()
                .map(|item| from_json(item, registry))
                .collect::<GraphResult<_>>()?,
        ),
        Value::Object(obj) => {
            if obj.get(CIRCULAR_KEY).and_then(Value::as_bool) == Some(true) {
                return Ok(Tree::Circular);
            }
            if let Some(type_name) = obj.get(TYPE_KEY).and_then(Value::as_str) {
                return unwrap_special(type_name, obj.get(VALUE_KEY), registry);
            }
            if let Some(class) = obj.get(CLASS_KEY).and_then(Value::as_str) {
                registry.get(class)?;
                let mut instance = Instance::new(class);
                for (k, v) in obj.iter().filter(|(k, _)| k.as_str() != CLASS_KEY) {
                    instance.fields.push((k.clone(), from_json(v, registry)?));
                }
                return Ok(Tree::Instance(instance));
            }
            Tree::Record(
                obj.iter()
                    .map(|(k, v)| Ok((k.clone(), from_json(v, registry)?)))
                    .collect::<GraphResult<_>>()?,
            )
        }
        leaf => Tree::from_plain(leaf),
    };
    Ok(tree)
}

fn unwrap_special<C: Copy>(
    type_name: &str,
    value: Option<&Value>,
    registry: &ClassRegistry<C>,
) -> GraphResult<Tree> {
    let value = value.ok_or_else(|| {
        GraphError::serialization(format!("{} wrapper is missing its value", type_name))
    })?;
    match type_name {
        "Map" => {
            let entries = value
                .as_array()
                .ok_or_else(|| GraphError::serialization("Map value must be an array of pairs"))?;
            let mut pairs = Vec::with_capacity(entries.len());
            for entry in entries {
                match entry.as_array().map(Vec::as_slice) {
                    Some([k, v]) => pairs.push((from_json(k, registry)?, from_json(v, registry)?)),
                    _ => {
                        return Err(GraphError::serialization(
                            "Map entries must be [key, value] pairs",
                        ));
                    }
                }
            }
            Ok(Tree::Map(pairs))
        }
        "Set" => {
            let items = value
                .as_array()
                .ok_or_else(|| GraphError::serialization("Set value must be an array"))?;
            Ok(Tree::Set(
                items
                    .iter()
                    .map(|item| from_json(item, registry))
                    .collect::<GraphResult<_>>()?,
            ))
        }
        "Date" => {
            let raw = value
                .as_str()
                .ok_or_else(|| GraphError::serialization("Date value must be a string"))?;
            let date = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| GraphError::serialization(format!("invalid date {}: {}", raw, e)))?;
            Ok(Tree::Date(date.with_timezone(&Utc)))
        }
        other => Err(GraphError::serialization(format!(
            "unknown wrapped type: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn registry() -> ClassRegistry<u8> {
        let mut registry = ClassRegistry::new();
        registry.register("Point", 1).register("Label", 2);
        registry
    }

    #[test]
    fn instance_carries_class_tag() {
        let tree = Tree::Instance(
            Instance::new("Point")
                .field("x", Tree::Number(1.into()))
                .field("tags", Tree::Set(vec![Tree::string("a")])),
        );
        let value = to_json(&tree);
        assert_eq!(
            value,
            json!({
                "__class__": "Point",
                "x": 1,
                "tags": {"__type__": "Set", "value": ["a"]}
            })
        );
        assert_eq!(from_json(&value, &registry()).unwrap(), tree);
    }

    #[test]
    fn map_and_date_wrappers() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let tree = Tree::Array(vec![
            Tree::Map(vec![(Tree::string("w"), Tree::Number(1280.into()))]),
            Tree::Date(date),
        ]);
        let value = to_json(&tree);
        assert_eq!(value[0], json!({"__type__": "Map", "value": [["w", 1280]]}));
        assert_eq!(value[1]["__type__"], "Date");
        assert_eq!(from_json(&value, &registry()).unwrap(), tree);
    }

    #[test]
    fn unregistered_class_is_fatal() {
        let value = json!({"items": [{"__class__": "Ghost"}]});
        let err = from_json(&value, &registry()).unwrap_err();
        assert_eq!(err.to_string(), "Class Ghost not registered");
    }

    #[test]
    fn circular_sentinel_round_trips_as_marker() {
        let value = to_json(&Tree::Circular);
        assert_eq!(value, json!({"__circular__": true}));
        assert_eq!(from_json(&value, &registry()).unwrap(), Tree::Circular);
    }

    #[test]
    fn malformed_map_is_rejected() {
        let value = json!({"__type__": "Map", "value": [["only-key"]]});
        assert!(from_json(&value, &registry()).is_err());
    }
}
