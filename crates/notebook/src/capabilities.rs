//! The capability object handed to user code as its only link to the host.

use crate::interpreter::{Value, inspect};
use indexmap::IndexMap;
use std::sync::Arc;

/// Canvas access provided by the embedding host.
pub trait CanvasHost: Send + Sync {
    /// Nodes matching `selector`, searched below `root` or the whole canvas.
    fn query_nodes(&self, root: Option<&serde_json::Value>, selector: &str) -> Vec<serde_json::Value>;
}

/// Host without a canvas. Every query is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCanvas;

impl CanvasHost for NoCanvas {
    fn query_nodes(&self, _root: Option<&serde_json::Value>, _selector: &str) -> Vec<serde_json::Value> {
        Vec::new()
    }
}

#[derive(Clone)]
pub struct Capabilities {
    pub host: Arc<dyn CanvasHost>,
    pub inputs: IndexMap<String, serde_json::Value>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            host: Arc::new(NoCanvas),
            inputs: IndexMap::new(),
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

impl Capabilities {
    pub fn with_host(mut self, host: Arc<dyn CanvasHost>) -> Self {
        self.host = host;
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Builds the frozen object user code sees.
    pub fn to_value(&self) -> Value {
        let host = self.host.clone();
        let query_nodes = Value::native("queryNodes", move |interpreter, _, arguments| {
            let (root, selector) = match arguments.as_slice() {
                [selector] => (None, selector.to_js_string()),
                [root, selector, ..] => (
                    root.to_json().map_err(|message| interpreter.type_error(message))?,
                    selector.to_js_string(),
                ),
                [] => return Err(interpreter.type_error("queryNodes expects a selector")),
            };
            let nodes = host
                .query_nodes(root.as_ref(), &selector)
                .iter()
                .map(Value::from_json)
                .collect();
            Ok(Value::resolved(Value::array(nodes)))
        });
        let log = Value::native("log", |interpreter, _, arguments| {
            let message = arguments.iter().map(inspect).collect::<Vec<_>>().join(" ");
            interpreter.log(log::Level::Info, message);
            Ok(Value::Undefined)
        });
        let inputs = Value::from_json(&serde_json::Value::Object(
            self.inputs.clone().into_iter().collect(),
        ));
        freeze(&inputs);
        let capability = Value::object_from([("log", log), ("queryNodes", query_nodes), ("inputs", inputs)]);
        freeze(&capability);
        capability
    }
}

fn freeze(value: &Value) {
    match value {
        Value::Object(object) => object.freeze(),
        Value::Array(array) => array.freeze(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{Interpreter, Limits};
    use crate::parser::{SourceCode, parse_program};
    use serde_json::json;

    struct Fixed;

    impl CanvasHost for Fixed {
        fn query_nodes(&self, root: Option<&serde_json::Value>, selector: &str) -> Vec<serde_json::Value> {
            vec![json!({ "selector": selector, "root": root.cloned() })]
        }
    }

    fn run(capabilities: &Capabilities, code: &str) -> (Value, Vec<String>) {
        let source = SourceCode::new(format!("let __result;\nasync function main(notebook) {{\n{code}\n}}"));
        let program = parse_program(source.as_str()).expect("test program should parse");
        let mut interpreter = Interpreter::new(source, Limits::default());
        interpreter.run_program(&program).expect("declarations run");
        let main = interpreter.globals().lookup("main").unwrap_or(Value::Undefined);
        let result = interpreter
            .call_function(&main, Value::Undefined, vec![capabilities.to_value()])
            .and_then(|promise| interpreter.await_value(promise))
            .unwrap_or_else(|exception| panic!("{}", exception.message()));
        let logs = interpreter.take_logs().into_iter().map(|entry| entry.message).collect();
        interpreter.release();
        (result, logs)
    }

    #[test]
    fn test_log_and_inputs() {
        let capabilities = Capabilities::default().with_input("count", json!(3));
        let (result, logs) = run(
            &capabilities,
            "notebook.log('count', notebook.inputs.count, { a: 1 });\nreturn Object.isFrozen(notebook) && Object.isFrozen(notebook.inputs);",
        );
        assert_eq!(result, Value::Boolean(true));
        assert_eq!(logs, vec![r#"count 3 {"a":1}"#.to_string()]);
    }

    #[test]
    fn test_query_nodes_delegates_to_host() {
        let capabilities = Capabilities::default().with_host(Arc::new(Fixed));
        let (result, _) = run(
            &capabilities,
            "const [node] = await notebook.queryNodes({ id: '1:2' }, 'TEXT');\nreturn node.selector + ' ' + node.root.id;",
        );
        assert_eq!(result, Value::string("TEXT 1:2"));

        let (result, _) = run(&Capabilities::default(), "return (await notebook.queryNodes('FRAME')).length;");
        assert_eq!(result, Value::Number(0.0));
    }

    #[test]
    fn test_capability_object_is_frozen() {
        let (result, _) = run(
            &Capabilities::default(),
            "try { notebook.log = null; return 'assigned'; } catch (error) { return error.name; }",
        );
        assert_eq!(result, Value::string("TypeError"));
    }
}
