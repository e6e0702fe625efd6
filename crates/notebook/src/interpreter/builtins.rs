//! Global objects and the methods of built-in value kinds.

use super::value::string_to_number;
use super::{
    ArrayRef, Exception, Function, FunctionKind, Interpreter, ObjectRef, Promise, PromiseState,
    Scope, Value, number_to_string, own_entries,
};
use indexmap::IndexMap;
use serde::Serialize;
use std::cmp::Ordering;
use std::rc::Rc;

type Methods = IndexMap<&'static str, Value>;

/// Methods looked up when a property is missing on a value of each kind.
pub struct Prototypes {
    pub object: Methods,
    pub array: Methods,
    pub string: Methods,
    pub number: Methods,
    pub promise: Methods,
    pub function: Methods,
}

impl Prototypes {
    pub fn new() -> Self {
        Self {
            object: object_prototype(),
            array: array_prototype(),
            string: string_prototype(),
            number: number_prototype(),
            promise: promise_prototype(),
            function: function_prototype(),
        }
    }
}

fn argument(arguments: &[Value], index: usize) -> Value {
    arguments.get(index).cloned().unwrap_or(Value::Undefined)
}

fn callable(interpreter: &Interpreter, value: &Value) -> Result<Value, Exception> {
    match value {
        Value::Function(_) => Ok(value.clone()),
        other => Err(interpreter.type_error(format!("{} is not a function", inspect(other)))),
    }
}

fn with_statics(function: Value, statics: Methods) -> Value {
    let Value::Function(function) = function else {
        return function;
    };
    let FunctionKind::Native(native) = &function.kind else {
        return Value::Function(function);
    };
    Value::Function(Rc::new(
        Function {
            name: function.name.clone(),
            kind: FunctionKind::Native(native.clone()),
            properties: ObjectRef::default(),
        }
        .with_properties(
            statics
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        ),
    ))
}

fn namespace_object(members: Methods) -> Value {
    Value::object(
        members
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

/// Converts a relative index argument (negative counts from the end) into an
/// absolute position clamped to `0..=length`.
fn relative_index(value: &Value, length: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let number = value.to_number();
    let number = if number.is_nan() { 0.0 } else { number.trunc() };
    if number < 0.0 {
        (length as f64 + number).max(0.0) as usize
    } else {
        (number as usize).min(length)
    }
}

/// Text shown for a value by `console.log` and `notebook.log`.
pub fn inspect(value: &Value) -> String {
    match value {
        Value::String(text) => text.to_string(),
        Value::Function(function) if function.name.is_empty() => "[Function (anonymous)]".to_string(),
        Value::Function(function) => format!("[Function: {}]", function.name),
        Value::Object(object) if object.is_error() => object.get("stack").to_js_string(),
        Value::Array(_) | Value::Object(_) | Value::Namespace(_) => value
            .to_json()
            .ok()
            .flatten()
            .map(|json| json.to_string())
            .unwrap_or_else(|| value.to_js_string()),
        other => other.to_js_string(),
    }
}

/// Serializes JSON with `JSON.stringify`'s indentation rules.
pub fn json_text(json: &serde_json::Value, indent: &str) -> String {
    if indent.is_empty() {
        return json.to_string();
    }
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    if json.serialize(&mut serializer).is_err() {
        return json.to_string();
    }
    String::from_utf8(buffer).unwrap_or_else(|_| json.to_string())
}

/// The `resolve` and `reject` functions handed to promise executors and
/// thenables.
pub fn resolving_functions(promise: &Rc<Promise>) -> (Value, Value) {
    let target = promise.clone();
    let resolve = Value::native("resolve", move |interpreter, _, arguments| {
        match interpreter.await_value(argument(&arguments, 0)) {
            Ok(value) => target.settle(PromiseState::Fulfilled(value)),
            Err(exception) if exception.is_catchable() => {
                target.settle(PromiseState::Rejected(exception))
            }
            Err(exception) => return Err(exception),
        }
        Ok(Value::Undefined)
    });
    let target = promise.clone();
    let reject = Value::native("reject", move |_, _, arguments| {
        target.settle(PromiseState::Rejected(Exception::throw(argument(&arguments, 0))));
        Ok(Value::Undefined)
    });
    (resolve, reject)
}

fn settle_with(result: Result<Value, Exception>) -> Result<Value, Exception> {
    match result {
        Ok(promise @ Value::Promise(_)) => Ok(promise),
        Ok(value) => Ok(Value::resolved(value)),
        Err(exception) if exception.is_catchable() => Ok(Value::rejected(exception)),
        Err(exception) => Err(exception),
    }
}

pub fn install_globals(scope: &Scope) {
    let globals: Methods = IndexMap::from([
        ("Object", object_constructor()),
        ("Array", array_constructor()),
        ("Math", math_object()),
        ("JSON", json_object()),
        ("console", console_object()),
        ("Promise", promise_constructor()),
        ("Error", error_constructor("Error")),
        ("TypeError", error_constructor("TypeError")),
        ("RangeError", error_constructor("RangeError")),
        ("ReferenceError", error_constructor("ReferenceError")),
        ("SyntaxError", error_constructor("SyntaxError")),
        (
            "String",
            Value::native("String", |_, _, arguments| {
                Ok(Value::string(match arguments.first() {
                    Some(value) => value.to_js_string(),
                    None => String::new(),
                }))
            }),
        ),
        ("Number", number_constructor()),
        (
            "Boolean",
            Value::native("Boolean", |_, _, arguments| {
                Ok(Value::Boolean(argument(&arguments, 0).is_truthy()))
            }),
        ),
        ("parseInt", Value::native("parseInt", parse_int)),
        ("parseFloat", Value::native("parseFloat", parse_float)),
        (
            "isNaN",
            Value::native("isNaN", |_, _, arguments| {
                Ok(Value::Boolean(argument(&arguments, 0).to_number().is_nan()))
            }),
        ),
        (
            "isFinite",
            Value::native("isFinite", |_, _, arguments| {
                Ok(Value::Boolean(argument(&arguments, 0).to_number().is_finite()))
            }),
        ),
        ("NaN", Value::Number(f64::NAN)),
        ("Infinity", Value::Number(f64::INFINITY)),
    ]);
    for (name, value) in globals {
        scope.declare(name, value, true);
    }
}

fn error_constructor(name: &'static str) -> Value {
    Value::native(name, move |interpreter, _, arguments| {
        let message = match argument(&arguments, 0) {
            Value::Undefined => String::new(),
            message => message.to_js_string(),
        };
        Ok(interpreter.make_error(name, &message))
    })
}

// Object

fn object_constructor() -> Value {
    let constructor = Value::native("Object", |_, _, arguments| {
        Ok(match argument(&arguments, 0) {
            Value::Undefined | Value::Null => Value::Object(Rc::new(ObjectRef::default())),
            value => value,
        })
    });
    with_statics(
        constructor,
        IndexMap::from([
            (
                "keys",
                Value::native("keys", |_, _, arguments| {
                    Ok(Value::array(
                        own_entries(&argument(&arguments, 0))
                            .into_iter()
                            .map(|(key, _)| Value::string(key))
                            .collect(),
                    ))
                }),
            ),
            (
                "values",
                Value::native("values", |_, _, arguments| {
                    Ok(Value::array(
                        own_entries(&argument(&arguments, 0))
                            .into_iter()
                            .map(|(_, value)| value)
                            .collect(),
                    ))
                }),
            ),
            (
                "entries",
                Value::native("entries", |_, _, arguments| {
                    Ok(Value::array(
                        own_entries(&argument(&arguments, 0))
                            .into_iter()
                            .map(|(key, value)| Value::array(vec![Value::string(key), value]))
                            .collect(),
                    ))
                }),
            ),
            (
                "assign",
                Value::native("assign", |interpreter, _, arguments| {
                    let target = argument(&arguments, 0);
                    if target.is_nullish() {
                        return Err(interpreter.type_error("Cannot convert undefined or null to object"));
                    }
                    for source in arguments.iter().skip(1) {
                        for (key, value) in own_entries(source) {
                            interpreter.set_property(&target, &key, value)?;
                        }
                    }
                    Ok(target)
                }),
            ),
            (
                "freeze",
                Value::native("freeze", |_, _, arguments| {
                    let value = argument(&arguments, 0);
                    match &value {
                        Value::Object(object) => object.freeze(),
                        Value::Array(array) => array.freeze(),
                        Value::Function(function) => function.properties.freeze(),
                        _ => {}
                    }
                    Ok(value)
                }),
            ),
            (
                "isFrozen",
                Value::native("isFrozen", |_, _, arguments| {
                    Ok(Value::Boolean(match argument(&arguments, 0) {
                        Value::Object(object) => object.is_frozen(),
                        Value::Array(array) => array.is_frozen(),
                        Value::Function(function) => function.properties.is_frozen(),
                        _ => true,
                    }))
                }),
            ),
            (
                "fromEntries",
                Value::native("fromEntries", |interpreter, _, arguments| {
                    let object = ObjectRef::default();
                    for entry in interpreter.iterate(&argument(&arguments, 0))? {
                        let key = interpreter.get_property(&entry, "0")?;
                        let value = interpreter.get_property(&entry, "1")?;
                        object.set(key.to_js_string(), value);
                    }
                    Ok(Value::Object(Rc::new(object)))
                }),
            ),
        ]),
    )
}

fn object_prototype() -> Methods {
    IndexMap::from([
        (
            "hasOwnProperty",
            Value::native("hasOwnProperty", |_, this, arguments| {
                let key = argument(&arguments, 0).to_js_string();
                Ok(Value::Boolean(
                    own_entries(&this).iter().any(|(own_key, _)| *own_key == key),
                ))
            }),
        ),
        ("toString", to_string_method()),
    ])
}

fn to_string_method() -> Value {
    Value::native("toString", |_, this, _| Ok(Value::string(this.to_js_string())))
}

// Array

fn this_array(interpreter: &Interpreter, this: &Value, method: &str) -> Result<Rc<ArrayRef>, Exception> {
    match this {
        Value::Array(array) => Ok(array.clone()),
        _ => Err(interpreter.type_error(format!("Array.prototype.{method} called on a non-array"))),
    }
}

fn mutable_array(
    interpreter: &Interpreter,
    this: &Value,
    method: &str,
) -> Result<Rc<ArrayRef>, Exception> {
    let array = this_array(interpreter, this, method)?;
    if array.is_frozen() {
        return Err(interpreter.type_error(format!(
            "Cannot {method} on a frozen array, object is not extensible"
        )));
    }
    Ok(array)
}

/// Calls `callback(item, index, array)` for every item until `visit` returns
/// `Some`.
fn for_each_item<T>(
    interpreter: &mut Interpreter,
    this: &Value,
    method: &str,
    arguments: &[Value],
    mut visit: impl FnMut(usize, &Value, Value) -> Option<T>,
) -> Result<Option<T>, Exception> {
    let array = this_array(interpreter, this, method)?;
    let callback = callable(interpreter, &argument(arguments, 0))?;
    let items = array.items.borrow().clone();
    for (index, item) in items.iter().enumerate() {
        let result = interpreter.call_function(
            &callback,
            Value::Undefined,
            vec![item.clone(), Value::Number(index as f64), this.clone()],
        )?;
        if let Some(found) = visit(index, item, result) {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn same_value_zero(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) if left.is_nan() && right.is_nan() => true,
        _ => left.strict_equals(right),
    }
}

fn default_sort_order(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Undefined, Value::Undefined) => Ordering::Equal,
        (Value::Undefined, _) => Ordering::Greater,
        (_, Value::Undefined) => Ordering::Less,
        _ => left.to_js_string().cmp(&right.to_js_string()),
    }
}

fn flatten_into(items: &[Value], depth: f64, output: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) if depth >= 1.0 => {
                flatten_into(&inner.items.borrow(), depth - 1.0, output)
            }
            other => output.push(other.clone()),
        }
    }
}

fn array_constructor() -> Value {
    let constructor = Value::native("Array", |interpreter, _, arguments| {
        if let [Value::Number(length)] = arguments.as_slice() {
            if *length < 0.0 || length.fract() != 0.0 {
                return Err(interpreter.throw_error("RangeError", "Invalid array length"));
            }
            return Ok(Value::array(vec![Value::Undefined; *length as usize]));
        }
        Ok(Value::array(arguments))
    });
    with_statics(
        constructor,
        IndexMap::from([
            (
                "isArray",
                Value::native("isArray", |_, _, arguments| {
                    Ok(Value::Boolean(matches!(argument(&arguments, 0), Value::Array(_))))
                }),
            ),
            (
                "of",
                Value::native("of", |_, _, arguments| Ok(Value::array(arguments))),
            ),
            (
                "from",
                Value::native("from", |interpreter, _, arguments| {
                    let source = argument(&arguments, 0);
                    let items = match &source {
                        Value::Array(_) | Value::String(_) => interpreter.iterate(&source)?,
                        Value::Object(object) => {
                            let length = object.get("length").to_number();
                            let length = if length.is_finite() && length > 0.0 {
                                length as usize
                            } else {
                                0
                            };
                            (0..length)
                                .map(|index| object.get(&index.to_string()))
                                .collect()
                        }
                        _ => Vec::new(),
                    };
                    let map = argument(&arguments, 1);
                    if map.is_nullish() {
                        return Ok(Value::array(items));
                    }
                    let map = callable(interpreter, &map)?;
                    let mut mapped = Vec::with_capacity(items.len());
                    for (index, item) in items.into_iter().enumerate() {
                        mapped.push(interpreter.call_function(
                            &map,
                            Value::Undefined,
                            vec![item, Value::Number(index as f64)],
                        )?);
                    }
                    Ok(Value::array(mapped))
                }),
            ),
        ]),
    )
}

fn array_prototype() -> Methods {
    IndexMap::from([
        (
            "map",
            Value::native("map", |interpreter, this, arguments| {
                let mut mapped = Vec::new();
                for_each_item(interpreter, &this, "map", &arguments, |_, _, result| {
                    mapped.push(result);
                    None::<()>
                })?;
                Ok(Value::array(mapped))
            }),
        ),
        (
            "filter",
            Value::native("filter", |interpreter, this, arguments| {
                let mut kept = Vec::new();
                for_each_item(interpreter, &this, "filter", &arguments, |_, item, result| {
                    if result.is_truthy() {
                        kept.push(item.clone());
                    }
                    None::<()>
                })?;
                Ok(Value::array(kept))
            }),
        ),
        (
            "forEach",
            Value::native("forEach", |interpreter, this, arguments| {
                for_each_item(interpreter, &this, "forEach", &arguments, |_, _, _| None::<()>)?;
                Ok(Value::Undefined)
            }),
        ),
        (
            "find",
            Value::native("find", |interpreter, this, arguments| {
                let found = for_each_item(interpreter, &this, "find", &arguments, |_, item, result| {
                    result.is_truthy().then(|| item.clone())
                })?;
                Ok(found.unwrap_or(Value::Undefined))
            }),
        ),
        (
            "findIndex",
            Value::native("findIndex", |interpreter, this, arguments| {
                let found = for_each_item(interpreter, &this, "findIndex", &arguments, |index, _, result| {
                    result.is_truthy().then_some(index)
                })?;
                Ok(Value::Number(found.map_or(-1.0, |index| index as f64)))
            }),
        ),
        (
            "some",
            Value::native("some", |interpreter, this, arguments| {
                let found = for_each_item(interpreter, &this, "some", &arguments, |_, _, result| {
                    result.is_truthy().then_some(())
                })?;
                Ok(Value::Boolean(found.is_some()))
            }),
        ),
        (
            "every",
            Value::native("every", |interpreter, this, arguments| {
                let failed = for_each_item(interpreter, &this, "every", &arguments, |_, _, result| {
                    (!result.is_truthy()).then_some(())
                })?;
                Ok(Value::Boolean(failed.is_none()))
            }),
        ),
        (
            "reduce",
            Value::native("reduce", |interpreter, this, arguments| {
                let array = this_array(interpreter, &this, "reduce")?;
                let callback = callable(interpreter, &argument(&arguments, 0))?;
                let items = array.items.borrow().clone();
                let mut items = items.into_iter().enumerate();
                let mut accumulator = match arguments.get(1) {
                    Some(initial) => initial.clone(),
                    None => match items.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(interpreter
                                .type_error("Reduce of empty array with no initial value"));
                        }
                    },
                };
                for (index, item) in items {
                    accumulator = interpreter.call_function(
                        &callback,
                        Value::Undefined,
                        vec![accumulator, item, Value::Number(index as f64), this.clone()],
                    )?;
                }
                Ok(accumulator)
            }),
        ),
        (
            "includes",
            Value::native("includes", |interpreter, this, arguments| {
                let array = this_array(interpreter, &this, "includes")?;
                let needle = argument(&arguments, 0);
                let found = array.items.borrow().iter().any(|item| same_value_zero(item, &needle));
                Ok(Value::Boolean(found))
            }),
        ),
        (
            "indexOf",
            Value::native("indexOf", |interpreter, this, arguments| {
                let array = this_array(interpreter, &this, "indexOf")?;
                let needle = argument(&arguments, 0);
                let position = array.items.borrow().iter().position(|item| item.strict_equals(&needle));
                Ok(Value::Number(position.map_or(-1.0, |index| index as f64)))
            }),
        ),
        (
            "join",
            Value::native("join", |interpreter, this, arguments| {
                let array = this_array(interpreter, &this, "join")?;
                let separator = match argument(&arguments, 0) {
                    Value::Undefined => ",".to_string(),
                    separator => separator.to_js_string(),
                };
                let joined = array
                    .items
                    .borrow()
                    .iter()
                    .map(|item| if item.is_nullish() { String::new() } else { item.to_js_string() })
                    .collect::<Vec<_>>()
                    .join(&separator);
                Ok(Value::string(joined))
            }),
        ),
        (
            "slice",
            Value::native("slice", |interpreter, this, arguments| {
                let array = this_array(interpreter, &this, "slice")?;
                let items = array.items.borrow();
                let start = relative_index(&argument(&arguments, 0), items.len(), 0);
                let end = relative_index(&argument(&arguments, 1), items.len(), items.len());
                Ok(Value::array(items.get(start..end.max(start)).unwrap_or_default().to_vec()))
            }),
        ),
        (
            "concat",
            Value::native("concat", |interpreter, this, arguments| {
                let array = this_array(interpreter, &this, "concat")?;
                let mut items = array.items.borrow().clone();
                for argument in arguments {
                    match argument {
                        Value::Array(other) => items.extend(other.items.borrow().iter().cloned()),
                        other => items.push(other),
                    }
                }
                Ok(Value::array(items))
            }),
        ),
        (
            "push",
            Value::native("push", |interpreter, this, arguments| {
                let array = mutable_array(interpreter, &this, "push")?;
                let mut items = array.items.borrow_mut();
                items.extend(arguments);
                Ok(Value::Number(items.len() as f64))
            }),
        ),
        (
            "pop",
            Value::native("pop", |interpreter, this, _| {
                let array = mutable_array(interpreter, &this, "pop")?;
                let popped = array.items.borrow_mut().pop();
                Ok(popped.unwrap_or(Value::Undefined))
            }),
        ),
        (
            "shift",
            Value::native("shift", |interpreter, this, _| {
                let array = mutable_array(interpreter, &this, "shift")?;
                let mut items = array.items.borrow_mut();
                Ok(if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                })
            }),
        ),
        (
            "unshift",
            Value::native("unshift", |interpreter, this, arguments| {
                let array = mutable_array(interpreter, &this, "unshift")?;
                let mut items = array.items.borrow_mut();
                items.splice(0..0, arguments);
                Ok(Value::Number(items.len() as f64))
            }),
        ),
        (
            "reverse",
            Value::native("reverse", |interpreter, this, _| {
                let array = mutable_array(interpreter, &this, "reverse")?;
                array.items.borrow_mut().reverse();
                Ok(this)
            }),
        ),
        (
            "sort",
            Value::native("sort", |interpreter, this, arguments| {
                let array = mutable_array(interpreter, &this, "sort")?;
                let comparator = match argument(&arguments, 0) {
                    Value::Undefined => None,
                    comparator => Some(callable(interpreter, &comparator)?),
                };
                let mut items = array.items.borrow().clone();
                let mut failure = None;
                items.sort_by(|left, right| {
                    let Some(comparator) = &comparator else {
                        return default_sort_order(left, right);
                    };
                    if failure.is_some() {
                        return Ordering::Equal;
                    }
                    match interpreter.call_function(
                        comparator,
                        Value::Undefined,
                        vec![left.clone(), right.clone()],
                    ) {
                        Ok(order) => order.to_number().partial_cmp(&0.0).unwrap_or(Ordering::Equal),
                        Err(exception) => {
                            failure = Some(exception);
                            Ordering::Equal
                        }
                    }
                });
                if let Some(exception) = failure {
                    return Err(exception);
                }
                *array.items.borrow_mut() = items;
                Ok(this)
            }),
        ),
        (
            "flat",
            Value::native("flat", |interpreter, this, arguments| {
                let array = this_array(interpreter, &this, "flat")?;
                let depth = match argument(&arguments, 0) {
                    Value::Undefined => 1.0,
                    depth => depth.to_number(),
                };
                let mut flattened = Vec::new();
                flatten_into(&array.items.borrow(), depth, &mut flattened);
                Ok(Value::array(flattened))
            }),
        ),
        (
            "keys",
            Value::native("keys", |interpreter, this, _| {
                let array = this_array(interpreter, &this, "keys")?;
                Ok(Value::array(
                    (0..array.len()).map(|index| Value::Number(index as f64)).collect(),
                ))
            }),
        ),
        (
            "at",
            Value::native("at", |interpreter, this, arguments| {
                let array = this_array(interpreter, &this, "at")?;
                let index = argument(&arguments, 0).to_number();
                let index = if index < 0.0 { array.len() as f64 + index } else { index };
                if index < 0.0 || index.is_nan() {
                    return Ok(Value::Undefined);
                }
                Ok(array.get(index as usize))
            }),
        ),
        ("toString", to_string_method()),
    ])
}

// String

fn this_text(this: &Value) -> String {
    this.to_js_string()
}

fn string_prototype() -> Methods {
    IndexMap::from([
        (
            "split",
            Value::native("split", |_, this, arguments| {
                let text = this_text(&this);
                let mut parts: Vec<Value> = match argument(&arguments, 0) {
                    Value::Undefined => vec![Value::string(&text)],
                    separator => {
                        let separator = separator.to_js_string();
                        if separator.is_empty() {
                            text.chars().map(|character| Value::string(character.to_string())).collect()
                        } else {
                            text.split(separator.as_str()).map(Value::string).collect()
                        }
                    }
                };
                if let Value::Number(limit) = argument(&arguments, 1) {
                    parts.truncate(limit.max(0.0) as usize);
                }
                Ok(Value::array(parts))
            }),
        ),
        (
            "trim",
            Value::native("trim", |_, this, _| Ok(Value::string(this_text(&this).trim()))),
        ),
        (
            "trimStart",
            Value::native("trimStart", |_, this, _| {
                Ok(Value::string(this_text(&this).trim_start()))
            }),
        ),
        (
            "trimEnd",
            Value::native("trimEnd", |_, this, _| Ok(Value::string(this_text(&this).trim_end()))),
        ),
        (
            "toUpperCase",
            Value::native("toUpperCase", |_, this, _| {
                Ok(Value::string(this_text(&this).to_uppercase()))
            }),
        ),
        (
            "toLowerCase",
            Value::native("toLowerCase", |_, this, _| {
                Ok(Value::string(this_text(&this).to_lowercase()))
            }),
        ),
        (
            "startsWith",
            Value::native("startsWith", |_, this, arguments| {
                let needle = argument(&arguments, 0).to_js_string();
                Ok(Value::Boolean(this_text(&this).starts_with(&needle)))
            }),
        ),
        (
            "endsWith",
            Value::native("endsWith", |_, this, arguments| {
                let needle = argument(&arguments, 0).to_js_string();
                Ok(Value::Boolean(this_text(&this).ends_with(&needle)))
            }),
        ),
        (
            "includes",
            Value::native("includes", |_, this, arguments| {
                let needle = argument(&arguments, 0).to_js_string();
                Ok(Value::Boolean(this_text(&this).contains(&needle)))
            }),
        ),
        (
            "indexOf",
            Value::native("indexOf", |_, this, arguments| {
                let text = this_text(&this);
                let needle = argument(&arguments, 0).to_js_string();
                let position = text
                    .find(&needle)
                    .map(|byte_index| text[..byte_index].chars().count() as f64);
                Ok(Value::Number(position.unwrap_or(-1.0)))
            }),
        ),
        (
            "slice",
            Value::native("slice", |_, this, arguments| {
                let characters: Vec<char> = this_text(&this).chars().collect();
                let start = relative_index(&argument(&arguments, 0), characters.len(), 0);
                let end = relative_index(&argument(&arguments, 1), characters.len(), characters.len());
                let slice: String = characters
                    .get(start..end.max(start))
                    .unwrap_or_default()
                    .iter()
                    .collect();
                Ok(Value::string(slice))
            }),
        ),
        (
            "substring",
            Value::native("substring", |_, this, arguments| {
                let characters: Vec<char> = this_text(&this).chars().collect();
                let clamp = |value: Value, default: usize| match value {
                    Value::Undefined => default,
                    value => {
                        let number = value.to_number();
                        if number.is_nan() || number < 0.0 {
                            0
                        } else {
                            (number as usize).min(characters.len())
                        }
                    }
                };
                let start = clamp(argument(&arguments, 0), 0);
                let end = clamp(argument(&arguments, 1), characters.len());
                let (start, end) = (start.min(end), start.max(end));
                Ok(Value::string(characters[start..end].iter().collect::<String>()))
            }),
        ),
        (
            "replace",
            Value::native("replace", |interpreter, this, arguments| {
                replace(interpreter, &this_text(&this), &arguments, false)
            }),
        ),
        (
            "replaceAll",
            Value::native("replaceAll", |interpreter, this, arguments| {
                replace(interpreter, &this_text(&this), &arguments, true)
            }),
        ),
        (
            "repeat",
            Value::native("repeat", |interpreter, this, arguments| {
                let count = argument(&arguments, 0).to_number();
                if count < 0.0 || count.is_infinite() {
                    return Err(interpreter.throw_error(
                        "RangeError",
                        &format!("Invalid count value: {}", number_to_string(count)),
                    ));
                }
                let count = if count.is_nan() { 0 } else { count as usize };
                Ok(Value::string(this_text(&this).repeat(count)))
            }),
        ),
        (
            "padStart",
            Value::native("padStart", |_, this, arguments| {
                Ok(Value::string(pad(&this_text(&this), &arguments, true)))
            }),
        ),
        (
            "padEnd",
            Value::native("padEnd", |_, this, arguments| {
                Ok(Value::string(pad(&this_text(&this), &arguments, false)))
            }),
        ),
        (
            "charAt",
            Value::native("charAt", |_, this, arguments| {
                let index = argument(&arguments, 0).to_number();
                let index = if index.is_nan() { 0.0 } else { index };
                let character = if index < 0.0 {
                    None
                } else {
                    this_text(&this).chars().nth(index as usize)
                };
                Ok(Value::string(character.map(String::from).unwrap_or_default()))
            }),
        ),
        (
            "at",
            Value::native("at", |_, this, arguments| {
                let characters: Vec<char> = this_text(&this).chars().collect();
                let index = argument(&arguments, 0).to_number();
                let index = if index < 0.0 { characters.len() as f64 + index } else { index };
                if index < 0.0 || index.is_nan() {
                    return Ok(Value::Undefined);
                }
                Ok(characters
                    .get(index as usize)
                    .map(|character| Value::string(character.to_string()))
                    .unwrap_or(Value::Undefined))
            }),
        ),
        ("toString", to_string_method()),
    ])
}

fn replace(
    interpreter: &mut Interpreter,
    text: &str,
    arguments: &[Value],
    all: bool,
) -> Result<Value, Exception> {
    let pattern = argument(arguments, 0).to_js_string();
    let replacement = argument(arguments, 1);
    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;
    let matches: Vec<usize> = if pattern.is_empty() {
        vec![0]
    } else if all {
        text.match_indices(pattern.as_str()).map(|(index, _)| index).collect()
    } else {
        text.find(pattern.as_str()).into_iter().collect()
    };
    for index in matches {
        result.push_str(&text[last_end..index]);
        let substitute = match &replacement {
            Value::Function(_) => interpreter
                .call_function(
                    &replacement,
                    Value::Undefined,
                    vec![
                        Value::string(&pattern),
                        Value::Number(text[..index].chars().count() as f64),
                        Value::string(text),
                    ],
                )?
                .to_js_string(),
            other => other.to_js_string().replace("$&", &pattern),
        };
        result.push_str(&substitute);
        last_end = index + pattern.len();
    }
    result.push_str(&text[last_end..]);
    Ok(Value::string(result))
}

fn pad(text: &str, arguments: &[Value], at_start: bool) -> String {
    let target = argument(arguments, 0).to_number();
    let fill = match argument(arguments, 1) {
        Value::Undefined => " ".to_string(),
        fill => fill.to_js_string(),
    };
    let length = text.chars().count();
    if target.is_nan() || target as usize <= length || fill.is_empty() {
        return text.to_string();
    }
    let padding: String = fill.chars().cycle().take(target as usize - length).collect();
    if at_start {
        format!("{padding}{text}")
    } else {
        format!("{text}{padding}")
    }
}

// Number

fn number_constructor() -> Value {
    let constructor = Value::native("Number", |_, _, arguments| {
        Ok(Value::Number(match arguments.first() {
            Some(value) => value.to_number(),
            None => 0.0,
        }))
    });
    with_statics(
        constructor,
        IndexMap::from([
            (
                "isInteger",
                Value::native("isInteger", |_, _, arguments| {
                    Ok(Value::Boolean(matches!(
                        argument(&arguments, 0),
                        Value::Number(number) if number.is_finite() && number.fract() == 0.0
                    )))
                }),
            ),
            (
                "isFinite",
                Value::native("isFinite", |_, _, arguments| {
                    Ok(Value::Boolean(matches!(
                        argument(&arguments, 0),
                        Value::Number(number) if number.is_finite()
                    )))
                }),
            ),
            (
                "isNaN",
                Value::native("isNaN", |_, _, arguments| {
                    Ok(Value::Boolean(matches!(
                        argument(&arguments, 0),
                        Value::Number(number) if number.is_nan()
                    )))
                }),
            ),
            ("parseInt", Value::native("parseInt", parse_int)),
            ("parseFloat", Value::native("parseFloat", parse_float)),
            ("MAX_SAFE_INTEGER", Value::Number(9_007_199_254_740_991.0)),
            ("EPSILON", Value::Number(f64::EPSILON)),
        ]),
    )
}

fn parse_int(_: &mut Interpreter, _: Value, arguments: Vec<Value>) -> Result<Value, Exception> {
    let text = argument(&arguments, 0).to_js_string();
    let mut text = text.trim_start();
    let mut sign = 1.0;
    if let Some(rest) = text.strip_prefix('-') {
        sign = -1.0;
        text = rest;
    } else if let Some(rest) = text.strip_prefix('+') {
        text = rest;
    }
    let mut radix = match argument(&arguments, 1) {
        Value::Undefined => 10,
        radix => radix.to_number() as u32,
    };
    if radix == 0 {
        radix = 10;
    }
    if radix == 16 || matches!(argument(&arguments, 1), Value::Undefined) {
        if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            text = rest;
            radix = 16;
        }
    }
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }
    let digits: String = text.chars().take_while(|character| character.is_digit(radix)).collect();
    if digits.is_empty() {
        return Ok(Value::Number(f64::NAN));
    }
    let value = digits.chars().fold(0.0, |total, character| {
        total * f64::from(radix) + f64::from(character.to_digit(radix).unwrap_or(0))
    });
    Ok(Value::Number(sign * value))
}

fn parse_float(_: &mut Interpreter, _: Value, arguments: Vec<Value>) -> Result<Value, Exception> {
    let text = argument(&arguments, 0).to_js_string();
    let text = text.trim_start();
    for prefix in ["Infinity", "+Infinity", "-Infinity"] {
        if text.starts_with(prefix) {
            return Ok(Value::Number(string_to_number(prefix)));
        }
    }
    let longest = (1..=text.len())
        .rev()
        .filter(|end| text.is_char_boundary(*end))
        .find_map(|end| {
            let candidate = &text[..end];
            let valid = candidate
                .chars()
                .all(|character| character.is_ascii_digit() || "+-.eE".contains(character));
            valid.then(|| candidate.parse::<f64>().ok()).flatten()
        });
    Ok(Value::Number(longest.unwrap_or(f64::NAN)))
}

fn number_prototype() -> Methods {
    IndexMap::from([
        (
            "toFixed",
            Value::native("toFixed", |interpreter, this, arguments| {
                let number = this.to_number();
                let digits = argument(&arguments, 0).to_number();
                let digits = if digits.is_nan() { 0.0 } else { digits };
                if !(0.0..=100.0).contains(&digits) {
                    return Err(interpreter.throw_error(
                        "RangeError",
                        "toFixed() digits argument must be between 0 and 100",
                    ));
                }
                if !number.is_finite() {
                    return Ok(Value::string(number_to_string(number)));
                }
                Ok(Value::string(format!("{:.*}", digits as usize, number)))
            }),
        ),
        (
            "toString",
            Value::native("toString", |interpreter, this, arguments| {
                let number = this.to_number();
                let radix = match argument(&arguments, 0) {
                    Value::Undefined => 10,
                    radix => radix.to_number() as u32,
                };
                if !(2..=36).contains(&radix) {
                    return Err(interpreter
                        .throw_error("RangeError", "toString() radix must be between 2 and 36"));
                }
                if radix == 10 || !number.is_finite() || number.fract() != 0.0 {
                    return Ok(Value::string(number_to_string(number)));
                }
                let mut magnitude = number.abs() as u64;
                let mut digits = Vec::new();
                loop {
                    let digit = (magnitude % u64::from(radix)) as u32;
                    digits.push(char::from_digit(digit, radix).unwrap_or('0'));
                    magnitude /= u64::from(radix);
                    if magnitude == 0 {
                        break;
                    }
                }
                if number < 0.0 {
                    digits.push('-');
                }
                Ok(Value::string(digits.iter().rev().collect::<String>()))
            }),
        ),
    ])
}

// Math

fn math_object() -> Value {
    fn unary(name: &'static str, operation: fn(f64) -> f64) -> (&'static str, Value) {
        (
            name,
            Value::native(name, move |_, _, arguments| {
                Ok(Value::Number(operation(argument(&arguments, 0).to_number())))
            }),
        )
    }

    fn extremum(name: &'static str, initial: f64, pick: fn(f64, f64) -> f64) -> (&'static str, Value) {
        (
            name,
            Value::native(name, move |_, _, arguments| {
                let mut result = initial;
                for argument in &arguments {
                    let number = argument.to_number();
                    if number.is_nan() {
                        return Ok(Value::Number(f64::NAN));
                    }
                    result = pick(result, number);
                }
                Ok(Value::Number(result))
            }),
        )
    }

    namespace_object(IndexMap::from([
        unary("floor", f64::floor),
        unary("ceil", f64::ceil),
        unary("round", |number| (number + 0.5).floor()),
        unary("abs", f64::abs),
        unary("sqrt", f64::sqrt),
        unary("trunc", f64::trunc),
        unary("log", f64::ln),
        unary("sign", |number| {
            if number.is_nan() || number == 0.0 {
                number
            } else {
                number.signum()
            }
        }),
        extremum("min", f64::INFINITY, f64::min),
        extremum("max", f64::NEG_INFINITY, f64::max),
        (
            "pow",
            Value::native("pow", |_, _, arguments| {
                Ok(Value::Number(
                    argument(&arguments, 0)
                        .to_number()
                        .powf(argument(&arguments, 1).to_number()),
                ))
            }),
        ),
        ("PI", Value::Number(std::f64::consts::PI)),
        ("E", Value::Number(std::f64::consts::E)),
    ]))
}

// JSON

fn json_object() -> Value {
    namespace_object(IndexMap::from([
        (
            "stringify",
            Value::native("stringify", |interpreter, _, arguments| {
                let json = argument(&arguments, 0)
                    .to_json()
                    .map_err(|message| interpreter.type_error(message))?;
                let Some(json) = json else {
                    return Ok(Value::Undefined);
                };
                let indent = match argument(&arguments, 2) {
                    Value::Number(width) => " ".repeat(width.clamp(0.0, 10.0) as usize),
                    Value::String(indent) => indent.chars().take(10).collect(),
                    _ => String::new(),
                };
                Ok(Value::string(json_text(&json, &indent)))
            }),
        ),
        (
            "parse",
            Value::native("parse", |interpreter, _, arguments| {
                let text = argument(&arguments, 0).to_js_string();
                serde_json::from_str::<serde_json::Value>(&text)
                    .map(|json| Value::from_json(&json))
                    .map_err(|error| {
                        interpreter.throw_error("SyntaxError", &format!("Unexpected token in JSON: {error}"))
                    })
            }),
        ),
    ]))
}

// console

fn console_object() -> Value {
    fn method(name: &'static str, level: log::Level) -> (&'static str, Value) {
        (
            name,
            Value::native(name, move |interpreter, _, arguments| {
                let message = arguments.iter().map(inspect).collect::<Vec<_>>().join(" ");
                interpreter.log(level, message);
                Ok(Value::Undefined)
            }),
        )
    }

    namespace_object(IndexMap::from([
        method("log", log::Level::Info),
        method("info", log::Level::Info),
        method("debug", log::Level::Debug),
        method("warn", log::Level::Warn),
        method("error", log::Level::Error),
    ]))
}

// Promise

fn promise_constructor() -> Value {
    let constructor = Value::native("Promise", |interpreter, _, arguments| {
        let executor = callable(interpreter, &argument(&arguments, 0))?;
        let promise = Rc::new(Promise::pending());
        let (resolve, reject) = resolving_functions(&promise);
        if let Err(exception) = interpreter.call_function(&executor, Value::Undefined, vec![resolve, reject]) {
            if !exception.is_catchable() {
                return Err(exception);
            }
            promise.settle(PromiseState::Rejected(exception));
        }
        Ok(Value::Promise(promise))
    });
    with_statics(
        constructor,
        IndexMap::from([
            (
                "resolve",
                Value::native("resolve", |_, _, arguments| {
                    Ok(match argument(&arguments, 0) {
                        promise @ Value::Promise(_) => promise,
                        value => Value::resolved(value),
                    })
                }),
            ),
            (
                "reject",
                Value::native("reject", |_, _, arguments| {
                    Ok(Value::rejected(Exception::throw(argument(&arguments, 0))))
                }),
            ),
            (
                "all",
                Value::native("all", |interpreter, _, arguments| {
                    let mut values = Vec::new();
                    for item in interpreter.iterate(&argument(&arguments, 0))? {
                        match interpreter.await_value(item) {
                            Ok(value) => values.push(value),
                            Err(exception) if exception.is_catchable() => {
                                return Ok(Value::rejected(exception));
                            }
                            Err(exception) => return Err(exception),
                        }
                    }
                    Ok(Value::resolved(Value::array(values)))
                }),
            ),
        ]),
    )
}

fn promise_outcome(interpreter: &Interpreter, this: &Value) -> Result<Result<Value, Exception>, Exception> {
    let Value::Promise(promise) = this else {
        return Err(interpreter.type_error("Promise method called on a non-promise"));
    };
    let outcome = match &*promise.state.borrow() {
        PromiseState::Fulfilled(value) => Ok(Ok(value.clone())),
        PromiseState::Rejected(exception) => Ok(Err(exception.clone())),
        PromiseState::Pending => Err(Exception::Interrupted(
            "Attached a handler to a promise that can never settle".to_string(),
        )),
    };
    outcome
}

fn promise_then(
    interpreter: &mut Interpreter,
    this: &Value,
    on_fulfilled: Value,
    on_rejected: Value,
) -> Result<Value, Exception> {
    let result = match promise_outcome(interpreter, this)? {
        Ok(value) if matches!(on_fulfilled, Value::Function(_)) => {
            interpreter.call_function(&on_fulfilled, Value::Undefined, vec![value])
        }
        Ok(value) => Ok(value),
        Err(exception) => match (exception.thrown_value(), &on_rejected) {
            (Some(reason), Value::Function(_)) => {
                interpreter.call_function(&on_rejected, Value::Undefined, vec![reason.clone()])
            }
            _ => return Ok(Value::rejected(exception)),
        },
    };
    settle_with(result)
}

fn promise_prototype() -> Methods {
    IndexMap::from([
        (
            "then",
            Value::native("then", |interpreter, this, arguments| {
                promise_then(interpreter, &this, argument(&arguments, 0), argument(&arguments, 1))
            }),
        ),
        (
            "catch",
            Value::native("catch", |interpreter, this, arguments| {
                promise_then(interpreter, &this, Value::Undefined, argument(&arguments, 0))
            }),
        ),
        (
            "finally",
            Value::native("finally", |interpreter, this, arguments| {
                promise_outcome(interpreter, &this)?;
                let callback = argument(&arguments, 0);
                if matches!(callback, Value::Function(_)) {
                    if let Err(exception) = interpreter.call_function(&callback, Value::Undefined, Vec::new()) {
                        return settle_with(Err(exception));
                    }
                }
                Ok(this)
            }),
        ),
    ])
}

// Function

fn function_prototype() -> Methods {
    IndexMap::from([
        ("toString", to_string_method()),
        (
            "call",
            Value::native("call", |interpreter, this, mut arguments| {
                let receiver = if arguments.is_empty() {
                    Value::Undefined
                } else {
                    arguments.remove(0)
                };
                interpreter.call_function(&this, receiver, arguments)
            }),
        ),
        (
            "apply",
            Value::native("apply", |interpreter, this, arguments| {
                let receiver = argument(&arguments, 0);
                let list = match argument(&arguments, 1) {
                    Value::Undefined | Value::Null => Vec::new(),
                    list => interpreter.iterate(&list)?,
                };
                interpreter.call_function(&this, receiver, list)
            }),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Limits;
    use crate::parser::{SourceCode, parse_program};

    fn evaluate(code: &str) -> Value {
        let source = SourceCode::new(format!("let __result;\n{code}"));
        let program = parse_program(source.as_str()).expect("test program should parse");
        let mut interpreter = Interpreter::new(source, Limits::default());
        if let Err(exception) = interpreter.run_program(&program) {
            panic!("{code:?} threw {}", exception.message());
        }
        let result = interpreter.globals().lookup("__result").unwrap_or(Value::Undefined);
        interpreter.release();
        result
    }

    fn json(code: &str) -> String {
        inspect(&evaluate(code))
    }

    #[test]
    fn test_array_methods() {
        assert_eq!(
            json("__result = [3, 1, 2].map(x => x * 2).filter(x => x > 2).sort((a, b) => a - b)"),
            "[4,6]"
        );
        assert_eq!(json("__result = [1, 2, 3].reduce((sum, x) => sum + x, 10)"), "16");
        assert_eq!(json("__result = [[1, [2]], 3].flat()"), "[1,[2],3]");
        assert_eq!(json("__result = [1, 2, 3].slice(-2).concat([4], 5)"), "[2,3,4,5]");
        assert_eq!(json("__result = [10, 1, 2].sort()"), "[1,10,2]");
        assert_eq!(json("__result = [NaN].includes(NaN) && [1].indexOf(2) === -1"), "true");
        assert_eq!(json("__result = Array.from({ length: 3 }, (_, i) => i * i)"), "[0,1,4]");
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(json("__result = ' a,b '.trim().split(',')"), r#"["a","b"]"#);
        assert_eq!(json("__result = 'abc'.slice(-2).toUpperCase()"), "BC");
        assert_eq!(json("__result = '7'.padStart(3, '0') + 'x'.repeat(2)"), "007xx");
        assert_eq!(json("__result = 'a-b-c'.replace('-', '+') + 'a-b-c'.replaceAll('-', '')"), "a+b-cabc");
        assert_eq!(json("__result = 'hello'.substring(4, 1)"), "ell");
    }

    #[test]
    fn test_object_statics() {
        assert_eq!(
            json("__result = Object.entries(Object.assign({ a: 1 }, { b: 2 }))"),
            r#"[["a",1],["b",2]]"#
        );
        assert_eq!(
            json("__result = Object.fromEntries([['x', 1]]).x + Object.keys({ p: 1, q: 2 }).length"),
            "3"
        );
        assert_eq!(json("__result = Object.isFrozen(Object.freeze({}))"), "true");
    }

    #[test]
    fn test_json_round_trip_preserves_key_order() {
        assert_eq!(
            json("__result = JSON.stringify(JSON.parse('{\"b\":1,\"a\":[true,null]}'))"),
            r#"{"b":1,"a":[true,null]}"#
        );
        assert_eq!(
            json("__result = JSON.stringify({ a: [1] }, null, 2)"),
            "{\n  \"a\": [\n    1\n  ]\n}"
        );
    }

    #[test]
    fn test_numbers_and_math() {
        assert_eq!(json("__result = (1.005).toFixed(1) + '|' + (255).toString(16)"), "1.0|ff");
        assert_eq!(json("__result = parseInt('42px') + parseFloat('1.5e1abc')"), "57");
        assert_eq!(json("__result = Math.max(1, 5, 3) + Math.round(2.5) + Math.min()"), "Infinity");
        assert_eq!(json("__result = Number('') + Number.isInteger(5)"), "1");
    }

    #[test]
    fn test_promise_methods() {
        let code = "
            const doubled = await Promise.resolve(2).then(x => x * 2);
            const recovered = await Promise.reject(new Error('x')).catch(e => e.message);
            const all = await Promise.all([1, Promise.resolve(2), new Promise(r => r(3))]);
            __result = [doubled, recovered, all];
        ";
        assert_eq!(json(code), r#"[4,"x",[1,2,3]]"#);
    }

    #[test]
    fn test_inspect() {
        assert_eq!(inspect(&Value::string("plain")), "plain");
        assert_eq!(json("__result = function named() {}"), "[Function: named]");
        assert_eq!(json("__result = new TypeError('bad').stack.split('\\n')[0]"), "TypeError: bad");
    }
}
