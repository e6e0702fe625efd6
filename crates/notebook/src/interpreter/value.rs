use super::{Exception, Interpreter, Scope};
use crate::errors::RuntimeError;
use crate::parser::{FunctionDefinition, SourceCode};
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

pub type NativeFunction = Rc<dyn Fn(&mut Interpreter, Value, Vec<Value>) -> Result<Value, Exception>>;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<ArrayRef>),
    Object(Rc<ObjectRef>),
    Function(Rc<Function>),
    Namespace(Rc<Namespace>),
    Promise(Rc<Promise>),
}

impl Value {
    pub fn string(text: impl AsRef<str>) -> Self {
        Self::String(Rc::from(text.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(ArrayRef::new(items)))
    }

    pub fn object(properties: IndexMap<String, Value>) -> Self {
        Self::Object(Rc::new(ObjectRef::new(properties)))
    }

    pub fn object_from<const N: usize>(properties: [(&str, Value); N]) -> Self {
        Self::object(
            properties
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        )
    }

    pub fn native(
        name: &str,
        function: impl Fn(&mut Interpreter, Value, Vec<Value>) -> Result<Value, Exception> + 'static,
    ) -> Self {
        Self::Function(Rc::new(Function {
            name: name.to_string(),
            kind: FunctionKind::Native(Rc::new(function)),
            properties: ObjectRef::default(),
        }))
    }

    pub fn resolved(value: Value) -> Self {
        Self::Promise(Rc::new(Promise::settled(PromiseState::Fulfilled(value))))
    }

    pub fn rejected(exception: Exception) -> Self {
        Self::Promise(Rc::new(Promise::settled(PromiseState::Rejected(exception))))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
            Self::Array(_) | Self::Object(_) | Self::Namespace(_) | Self::Promise(_) => "object",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Boolean(boolean) => *boolean,
            Self::Number(number) => *number != 0.0 && !number.is_nan(),
            Self::String(text) => !text.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Boolean(boolean) => f64::from(u8::from(*boolean)),
            Self::Number(number) => *number,
            Self::String(text) => string_to_number(text),
            Self::Array(array) => {
                let items = array.items.borrow();
                match items.as_slice() {
                    [] => 0.0,
                    [single] => single.to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// String conversion as performed by template literals, `String(value)`
    /// and `+` concatenation.
    pub fn to_js_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Boolean(boolean) => boolean.to_string(),
            Self::Number(number) => number_to_string(*number),
            Self::String(text) => text.to_string(),
            Self::Array(array) => array
                .items
                .borrow()
                .iter()
                .map(|item| {
                    if item.is_nullish() {
                        String::new()
                    } else {
                        item.to_js_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Self::Object(object) => {
                if object.is_error() {
                    let name = object.get("name").to_js_string();
                    let message = object.get("message").to_js_string();
                    if message.is_empty() {
                        name
                    } else {
                        format!("{name}: {message}")
                    }
                } else {
                    "[object Object]".to_string()
                }
            }
            Self::Function(function) => function.source_text(),
            Self::Namespace(_) => "[object Module]".to_string(),
            Self::Promise(_) => "[object Promise]".to_string(),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Number(left), Self::Number(right)) => left == right,
            _ => self == other,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (left, right) if left.is_nullish() && right.is_nullish() => true,
            (left, right) if left.is_nullish() || right.is_nullish() => false,
            (Self::Number(_), Self::String(_))
            | (Self::String(_), Self::Number(_))
            | (Self::Boolean(_), _)
            | (_, Self::Boolean(_)) => self.to_number() == other.to_number(),
            (Self::Array(_) | Self::Object(_), Self::String(_) | Self::Number(_))
            | (Self::String(_) | Self::Number(_), Self::Array(_) | Self::Object(_)) => {
                Value::string(self.to_js_string()).loose_equals(&Value::string(other.to_js_string()))
            }
            _ => self.strict_equals(other),
        }
    }

    /// Converts to JSON the way `JSON.stringify` does. `None` stands for
    /// values `JSON.stringify` omits (`undefined`, functions).
    pub fn to_json(&self) -> Result<Option<serde_json::Value>, String> {
        self.to_json_guarded(&mut Vec::new())
    }

    fn to_json_guarded(
        &self,
        visiting: &mut Vec<*const ()>,
    ) -> Result<Option<serde_json::Value>, String> {
        let json = match self {
            Self::Undefined | Self::Function(_) => return Ok(None),
            Self::Null => serde_json::Value::Null,
            Self::Boolean(boolean) => serde_json::Value::Bool(*boolean),
            Self::Number(number) => number_to_json(*number),
            Self::String(text) => serde_json::Value::String(text.to_string()),
            Self::Promise(_) => serde_json::Value::Object(serde_json::Map::new()),
            Self::Array(array) => {
                let pointer = Rc::as_ptr(array) as *const ();
                enter(visiting, pointer)?;
                let items = array.items.borrow().clone();
                let mut json_items = Vec::with_capacity(items.len());
                for item in &items {
                    json_items.push(item.to_json_guarded(visiting)?.unwrap_or(serde_json::Value::Null));
                }
                visiting.pop();
                serde_json::Value::Array(json_items)
            }
            Self::Object(object) => {
                let pointer = Rc::as_ptr(object) as *const ();
                enter(visiting, pointer)?;
                let properties = object.entries();
                let mut map = serde_json::Map::new();
                for (key, value) in &properties {
                    if let Some(json) = value.to_json_guarded(visiting)? {
                        map.insert(key.clone(), json);
                    }
                }
                visiting.pop();
                serde_json::Value::Object(map)
            }
            Self::Namespace(namespace) => {
                return Value::Object(namespace.exports.clone()).to_json_guarded(visiting);
            }
        };
        Ok(Some(json))
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(boolean) => Self::Boolean(*boolean),
            serde_json::Value::Number(number) => Self::Number(number.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(text) => Self::string(text),
            serde_json::Value::Array(items) => Self::array(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => Self::object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::from_json(value)))
                    .collect(),
            ),
        }
    }
}

fn enter(visiting: &mut Vec<*const ()>, pointer: *const ()) -> Result<(), String> {
    if visiting.contains(&pointer) {
        return Err("Converting circular structure to JSON".to_string());
    }
    visiting.push(pointer);
    Ok(())
}

fn number_to_json(number: f64) -> serde_json::Value {
    if !number.is_finite() {
        return serde_json::Value::Null;
    }
    if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
        return serde_json::Value::from(number as i64);
    }
    serde_json::Number::from_f64(number)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

pub fn number_to_string(number: f64) -> String {
    if number.is_nan() {
        return "NaN".to_string();
    }
    if number.is_infinite() {
        return if number > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if number == 0.0 {
        return "0".to_string();
    }
    let magnitude = number.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let formatted = format!("{number:e}");
        return match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => formatted,
        };
    }
    format!("{number}")
}

pub fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map_or(f64::NAN, |number| number as f64);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.contains(|character: char| character.is_ascii_alphabetic() && character != 'e' && character != 'E') => {
            f64::NAN
        }
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(left), Self::Boolean(right)) => left == right,
            (Self::Number(left), Self::Number(right)) => left == right,
            (Self::String(left), Self::String(right)) => left == right,
            (Self::Array(left), Self::Array(right)) => Rc::ptr_eq(left, right),
            (Self::Object(left), Self::Object(right)) => Rc::ptr_eq(left, right),
            (Self::Function(left), Self::Function(right)) => Rc::ptr_eq(left, right),
            (Self::Namespace(left), Self::Namespace(right)) => Rc::ptr_eq(left, right),
            (Self::Promise(left), Self::Promise(right)) => Rc::ptr_eq(left, right),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Boolean(boolean) => write!(f, "{boolean}"),
            Self::Number(number) => write!(f, "{}", number_to_string(*number)),
            Self::String(text) => write!(f, "{text:?}"),
            Self::Array(array) => f.debug_list().entries(array.items.borrow().iter()).finish(),
            Self::Object(object) => f.debug_map().entries(object.entries()).finish(),
            Self::Function(function) => write!(f, "[Function: {}]", function.name),
            Self::Namespace(namespace) => write!(f, "[Module: {}]", namespace.module),
            Self::Promise(promise) => write!(f, "Promise {{ {:?} }}", promise.state.borrow()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ArrayRef {
    pub items: RefCell<Vec<Value>>,
    frozen: Cell<bool>,
}

impl ArrayRef {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: RefCell::new(items),
            frozen: Cell::new(false),
        }
    }

    pub fn freeze(&self) {
        self.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Value {
        self.items.borrow().get(index).cloned().unwrap_or(Value::Undefined)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectClass {
    #[default]
    Plain,
    /// Created by an error constructor; `origin` is the byte offset in the
    /// evaluated source where it was created.
    Error { origin: Option<usize> },
}

#[derive(Debug, Default)]
pub struct ObjectRef {
    properties: RefCell<IndexMap<String, Value>>,
    frozen: Cell<bool>,
    pub class: ObjectClass,
}

impl ObjectRef {
    pub fn new(properties: IndexMap<String, Value>) -> Self {
        Self {
            properties: RefCell::new(properties),
            frozen: Cell::new(false),
            class: ObjectClass::Plain,
        }
    }

    pub fn with_class(properties: IndexMap<String, Value>, class: ObjectClass) -> Self {
        Self {
            class,
            ..Self::new(properties)
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.class, ObjectClass::Error { .. })
    }

    pub fn get(&self, key: &str) -> Value {
        self.properties.borrow().get(key).cloned().unwrap_or(Value::Undefined)
    }

    pub fn get_own(&self, key: &str) -> Option<Value> {
        self.properties.borrow().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.properties.borrow().contains_key(key)
    }

    /// Returns `false` when the object is frozen and nothing was written.
    pub fn set(&self, key: impl Into<String>, value: Value) -> bool {
        if self.frozen.get() {
            return false;
        }
        self.properties.borrow_mut().insert(key.into(), value);
        true
    }

    pub fn remove(&self, key: &str) -> bool {
        if self.frozen.get() {
            return false;
        }
        self.properties.borrow_mut().shift_remove(key);
        true
    }

    pub fn keys(&self) -> Vec<String> {
        self.properties.borrow().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.properties
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.properties.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.borrow().is_empty()
    }

    pub fn freeze(&self) {
        self.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get()
    }
}

pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    /// Static members, e.g. `Object.keys` or `Promise.resolve`.
    pub properties: ObjectRef,
}

impl Function {
    pub fn closure(definition: Rc<FunctionDefinition>, scope: Scope, source: SourceCode) -> Self {
        Self {
            name: definition.name.clone().unwrap_or_default(),
            kind: FunctionKind::Closure {
                definition,
                scope,
                source,
            },
            properties: ObjectRef::default(),
        }
    }

    pub fn with_properties(mut self, properties: IndexMap<String, Value>) -> Self {
        self.properties = ObjectRef::new(properties);
        self
    }

    pub fn source_text(&self) -> String {
        match &self.kind {
            FunctionKind::Closure {
                definition, source, ..
            } => source
                .as_str()
                .get(definition.span.into_range())
                .map(str::to_string)
                .unwrap_or_else(|| format!("function {}() {{ [code] }}", self.name)),
            FunctionKind::Native(_) => format!("function {}() {{ [native code] }}", self.name),
        }
    }
}

pub enum FunctionKind {
    Closure {
        definition: Rc<FunctionDefinition>,
        scope: Scope,
        source: SourceCode,
    },
    Native(NativeFunction),
}

/// Guarded view over a module's frozen exports.
#[derive(Debug)]
pub struct Namespace {
    pub module: String,
    pub exports: Rc<ObjectRef>,
}

/// Key that promise machinery reads to detect thenables.
pub const THEN_PROBE: &str = "then";

impl Namespace {
    pub fn get(&self, key: &str) -> Result<Value, RuntimeError> {
        if let Some(value) = self.exports.get_own(key) {
            return Ok(value);
        }
        if key == THEN_PROBE {
            return Ok(Value::Undefined);
        }
        Err(RuntimeError::MissingExport {
            module: self.module.clone(),
            export: key.to_string(),
        })
    }
}

#[derive(Debug)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Exception),
}

#[derive(Debug)]
pub struct Promise {
    pub state: RefCell<PromiseState>,
}

impl Promise {
    pub fn settled(state: PromiseState) -> Self {
        Self {
            state: RefCell::new(state),
        }
    }

    pub fn pending() -> Self {
        Self::settled(PromiseState::Pending)
    }

    /// Settles a pending promise; later settlements are ignored.
    pub fn settle(&self, state: PromiseState) {
        let mut current = self.state.borrow_mut();
        if matches!(*current, PromiseState::Pending) {
            *current = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(2.0), "2");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e-7), "1.5e-7");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1f"), 31.0);
        assert_eq!(string_to_number("1e3"), 1000.0);
        assert!(string_to_number("12px").is_nan());
    }

    #[test]
    fn test_equality() {
        assert!(Value::Number(1.0).loose_equals(&Value::string("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.loose_equals(&Value::Number(0.0)));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
        let array = Value::array(vec![]);
        assert!(array.strict_equals(&array.clone()));
        assert!(!array.strict_equals(&Value::array(vec![])));
    }

    #[test]
    fn test_to_json_preserves_insertion_order() {
        let value = Value::object_from([
            ("b", Value::Number(1.0)),
            ("a", Value::array(vec![Value::Undefined, Value::Boolean(true)])),
            ("skip", Value::Undefined),
        ]);
        let json = value.to_json().unwrap().unwrap();
        assert_eq!(json.to_string(), r#"{"b":1,"a":[null,true]}"#);
    }

    #[test]
    fn test_to_json_detects_cycles() {
        let object = Rc::new(ObjectRef::default());
        object.set("me", Value::Object(object.clone()));
        assert!(Value::Object(object.clone()).to_json().is_err());
        // Break the cycle so the test does not leak.
        object.remove("me");
    }

    #[test]
    fn test_frozen_object_rejects_writes() {
        let object = ObjectRef::default();
        assert!(object.set("a", Value::Number(1.0)));
        object.freeze();
        assert!(!object.set("a", Value::Number(2.0)));
        assert_eq!(object.get("a"), Value::Number(1.0));
    }

    #[test]
    fn test_namespace_guard() {
        let exports = Rc::new(ObjectRef::default());
        exports.set("double", Value::Number(2.0));
        exports.freeze();
        let namespace = Namespace {
            module: "utils".to_string(),
            exports,
        };
        assert_eq!(namespace.get("double").unwrap(), Value::Number(2.0));
        assert_eq!(namespace.get(THEN_PROBE).unwrap(), Value::Undefined);
        let error = namespace.get("triple").unwrap_err().to_string();
        assert!(error.contains("utils") && error.contains("triple"));
    }
}
