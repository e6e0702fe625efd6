//! Assembles wrapped fragments into one generated unit, evaluates it and
//! collects the last statement value and unit test outcomes.

use crate::errors::{ExecutionError, LineMapper, RuntimeError, SourceRegion, WrappedError};
use crate::interpreter::{
    Exception, Interpreter, Limits, LogEntry, Namespace, ObjectClass, ObjectRef, Value,
};
use crate::parser::{SourceCode, Spanned, Statement, SyntaxIssue, parse_program};
use crate::symbols::{HarnessSymbols, Role};
use indexmap::IndexMap;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitTestOutcome {
    pub expression: String,
    /// `None` for a test slot without an expression.
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct ScriptResult {
    pub last_statement_value: Value,
    pub unit_test_outcomes: Vec<UnitTestOutcome>,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug)]
pub enum ModuleSlot {
    Loading,
    Loaded(Rc<ObjectRef>),
    Failed(Exception),
}

/// Load outcomes of one invocation, keyed by module-table name.
#[derive(Debug, Default)]
pub struct ImportCache {
    slots: HashMap<String, ModuleSlot>,
    /// Modules whose bodies are currently running, outermost first.
    loading: Vec<String>,
}

impl ImportCache {
    pub fn slot(&self, name: &str) -> Option<&ModuleSlot> {
        self.slots.get(name)
    }

    fn begin(&mut self, name: &str) {
        self.slots.insert(name.to_string(), ModuleSlot::Loading);
        self.loading.push(name.to_string());
    }

    fn finish(&mut self, name: &str, slot: ModuleSlot) {
        self.loading.retain(|loading| loading != name);
        self.slots.insert(name.to_string(), slot);
    }

    fn cycle(&self, name: &str) -> Vec<String> {
        let start = self
            .loading
            .iter()
            .position(|loading| loading == name)
            .unwrap_or(0);
        let mut cycle = self.loading[start..].to_vec();
        cycle.push(name.to_string());
        cycle
    }
}

/// State owned by a single invocation and dropped with it.
pub struct InvocationContext {
    imports: Rc<RefCell<ImportCache>>,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self {
            imports: Rc::default(),
        }
    }

    /// Native called by the generated import helpers as
    /// `importer(moduleTable, name, requestedNames, namespace)`.
    fn importer(&self) -> Value {
        let imports = self.imports.clone();
        Value::native("importer", move |interpreter, _, arguments| {
            let mut arguments = arguments.into_iter();
            let table = arguments.next().unwrap_or(Value::Undefined);
            let name = arguments.next().unwrap_or(Value::Undefined).to_js_string();
            let requested = match arguments.next() {
                Some(names) => interpreter.iterate(&names)?,
                None => Vec::new(),
            };
            let namespace = arguments.next().is_some_and(|namespace| namespace.is_truthy());
            let exports = load(interpreter, &imports, &table, &name)?;
            if namespace {
                return Ok(Value::Namespace(Rc::new(Namespace {
                    module: name,
                    exports,
                })));
            }
            for export in requested {
                let export = export.to_js_string();
                if !exports.contains_key(&export) {
                    return Err(RuntimeError::MissingExport {
                        module: name,
                        export,
                    }
                    .into());
                }
            }
            Ok(Value::Object(exports))
        })
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new()
    }
}

fn load(
    interpreter: &mut Interpreter,
    imports: &RefCell<ImportCache>,
    table: &Value,
    name: &str,
) -> Result<Rc<ObjectRef>, Exception> {
    match imports.borrow().slot(name) {
        Some(ModuleSlot::Loaded(exports)) => return Ok(exports.clone()),
        Some(ModuleSlot::Failed(exception)) => return Err(exception.clone()),
        Some(ModuleSlot::Loading) => {
            return Err(RuntimeError::ImportCycle {
                cycle: imports.borrow().cycle(name),
            }
            .into());
        }
        None => {}
    }
    let loader = match table {
        Value::Object(table) => table.get_own(name),
        _ => None,
    };
    let Some(loader) = loader else {
        return Err(RuntimeError::ModuleNotFound {
            module: name.to_string(),
        }
        .into());
    };

    log::debug!("Evaluating module '{name}'");
    imports.borrow_mut().begin(name);
    let result = interpreter
        .call_function(&loader, Value::Undefined, Vec::new())
        .and_then(|exports| interpreter.await_value(exports));
    match result {
        Ok(Value::Object(exports)) => {
            imports
                .borrow_mut()
                .finish(name, ModuleSlot::Loaded(exports.clone()));
            Ok(exports)
        }
        Ok(other) => {
            let exception = interpreter.type_error(format!(
                "Module '{name}' produced {} instead of its exports",
                other.type_of()
            ));
            imports
                .borrow_mut()
                .finish(name, ModuleSlot::Failed(exception.clone()));
            Err(exception)
        }
        Err(exception) => {
            imports
                .borrow_mut()
                .finish(name, ModuleSlot::Failed(exception.clone()));
            Err(exception)
        }
    }
}

/// Native called as `check(expressionText, thunk)` for each unit test.
fn check() -> Value {
    Value::native("check", |interpreter, _, arguments| {
        let mut arguments = arguments.into_iter();
        let expression = arguments.next().unwrap_or(Value::Undefined).to_js_string();
        let thunk = arguments.next().unwrap_or(Value::Undefined);
        let outcome = interpreter
            .call_function(&thunk, Value::Undefined, Vec::new())
            .and_then(|value| interpreter.await_value(value));
        let (passed, error) = match outcome {
            Ok(value) => (value.is_truthy(), None),
            Err(exception) if exception.is_catchable() => (false, Some(exception.message())),
            Err(exception) => return Err(exception),
        };
        let mut properties = IndexMap::new();
        properties.insert("expression".to_string(), Value::string(expression));
        properties.insert("passed".to_string(), Value::Boolean(passed));
        if let Some(error) = error {
            properties.insert("error".to_string(), Value::string(error));
        }
        Ok(Value::object(properties))
    })
}

pub struct Harness<'a> {
    symbols: &'a HarnessSymbols,
    limits: Limits,
    capability_name: String,
}

impl<'a> Harness<'a> {
    pub fn new(symbols: &'a HarnessSymbols, limits: Limits, capability_name: impl Into<String>) -> Self {
        Self {
            symbols,
            limits,
            capability_name: capability_name.into(),
        }
    }

    /// Builds the text of the generated unit: one function declaration taking
    /// the capability object, the importer and the unit test checker.
    pub fn assemble(
        &self,
        wrapped_modules: &IndexMap<String, String>,
        wrapped_body: &str,
        last_statement_text: &str,
        unit_test_expressions: &[String],
    ) -> String {
        let symbols = self.symbols;
        let name = |role: Role| symbols.name(role);
        let modules = wrapped_modules
            .iter()
            .enumerate()
            .map(|(index, (module, wrapped))| {
                format!(
                    "{}: async function {}() {{\n{wrapped}\n}}",
                    quote(module),
                    self.symbols.indexed(Role::Module, index)
                )
            })
            .collect::<Vec<_>>()
            .join(",\n");
        let tests = unit_test_expressions
            .iter()
            .enumerate()
            .map(|(index, expression)| {
                let binding = self.symbols.indexed(Role::Test, index);
                if expression.trim().is_empty() {
                    return format!("const {binding} = {{ expression: {}, passed: null }};", quote(expression));
                }
                let thunk = match expression_issue(expression) {
                    None => format!("async () => (\n{expression}\n)"),
                    Some(message) => format!("() => {{ throw new SyntaxError({}); }}", quote(&message)),
                };
                format!("const {binding} = {}({}, {thunk});", name(Role::Check), quote(expression))
            })
            .collect::<Vec<_>>();
        let test_bindings = (0..unit_test_expressions.len())
            .map(|index| self.symbols.indexed(Role::Test, index))
            .collect::<Vec<_>>()
            .join(", ");

        let mut unit = String::new();
        unit.push_str(&format!(
            "function {}({}, {}, {}) {{\n",
            name(Role::Entry),
            self.capability_name,
            name(Role::Importer),
            name(Role::Check)
        ));
        unit.push_str(&format!("const {} = Object.freeze({{\n", name(Role::ModuleTable)));
        if !modules.is_empty() {
            unit.push_str(&modules);
            unit.push('\n');
        }
        unit.push_str("});\n");
        unit.push_str(&format!(
            "async function {}(name, ...names) {{ return {}({}, name, names, false); }}\n",
            name(Role::Import),
            name(Role::Importer),
            name(Role::ModuleTable)
        ));
        unit.push_str(&format!(
            "async function {}(name) {{ return {}({}, name, [], true); }}\n",
            name(Role::ImportAll),
            name(Role::Importer),
            name(Role::ModuleTable)
        ));
        unit.push_str(&format!("async function {}() {{\n", name(Role::Define)));
        unit.push_str(wrapped_body);
        unit.push('\n');
        unit.push_str(&format!("const {} = (\n{last_statement_text}\n);\n", name(Role::Last)));
        for test in tests {
            unit.push_str(&test);
            unit.push('\n');
        }
        unit.push_str(&format!(
            "return {{ lastStatement: {}, unitTests: [{test_bindings}] }};\n}}\n",
            name(Role::Last)
        ));
        unit.push_str(&format!("return {}();\n}}", name(Role::Define)));
        unit
    }

    pub fn execute(
        &self,
        wrapped_modules: &IndexMap<String, String>,
        wrapped_body: &str,
        last_statement_text: &str,
        capability: Value,
        unit_test_expressions: &[String],
        mapper: &LineMapper,
    ) -> Result<ScriptResult, ExecutionError> {
        let generated = self.assemble(
            wrapped_modules,
            wrapped_body,
            last_statement_text,
            unit_test_expressions,
        );
        let source = SourceCode::new(generated.as_str());
        let program = match parse_program(&generated) {
            Ok(program) => program,
            Err(issues) => {
                let offset = issues.first().map_or(0, |issue| issue.range.start);
                let message = first_message(&issues);
                let stack = format!("SyntaxError: {message}");
                return Err(wrap(
                    "SyntaxError",
                    &message,
                    stack,
                    &source,
                    generated.clone(),
                    offset,
                    mapper,
                )
                .into());
            }
        };

        let context = InvocationContext::new();
        let mut interpreter = Interpreter::new(source.clone(), self.limits);
        let outcome = self.run(&mut interpreter, &program, &context, capability);
        log::debug!("Invocation finished after {} steps", interpreter.steps());
        let logs = interpreter.take_logs();
        let generated_source = match interpreter.globals().lookup(self.symbols.name(Role::Entry)) {
            Some(Value::Function(entry)) => entry.source_text(),
            _ => generated,
        };
        interpreter.release();

        let (last_statement_value, unit_test_outcomes) = match outcome {
            Ok(result) => result,
            Err(exception) => {
                return Err(wrap_exception(exception, &source, generated_source, mapper));
            }
        };
        Ok(ScriptResult {
            last_statement_value,
            unit_test_outcomes,
            logs,
        })
    }

    fn run(
        &self,
        interpreter: &mut Interpreter,
        program: &[Spanned<Statement>],
        context: &InvocationContext,
        capability: Value,
    ) -> Result<(Value, Vec<UnitTestOutcome>), Exception> {
        interpreter.run_program(program)?;
        let entry = interpreter
            .globals()
            .lookup(self.symbols.name(Role::Entry))
            .unwrap_or(Value::Undefined);
        let result = interpreter.call_function(
            &entry,
            Value::Undefined,
            vec![capability, context.importer(), check()],
        )?;
        let result = interpreter.await_value(result)?;
        let last_statement_value = interpreter.get_property(&result, "lastStatement")?;
        let unit_tests = interpreter.get_property(&result, "unitTests")?;
        let mut outcomes = Vec::new();
        for unit_test in interpreter.iterate(&unit_tests)? {
            let expression = interpreter.get_property(&unit_test, "expression")?;
            let passed = interpreter.get_property(&unit_test, "passed")?;
            let error = interpreter.get_property(&unit_test, "error")?;
            outcomes.push(UnitTestOutcome {
                expression: expression.to_js_string(),
                passed: match passed {
                    Value::Boolean(passed) => Some(passed),
                    _ => None,
                },
                error: match error {
                    Value::Undefined => None,
                    error => Some(error.to_js_string()),
                },
            });
        }
        Ok((last_statement_value, outcomes))
    }
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{text}\""))
}

/// Why `expression` cannot be pasted into a test thunk, if it cannot. Text
/// that parses only as several statements would escape the thunk.
fn expression_issue(expression: &str) -> Option<String> {
    let wrapped = format!("(\n{expression}\n);");
    match parse_program(&wrapped) {
        Ok(statements) => match statements.as_slice() {
            [
                Spanned {
                    node: Statement::Expression(_),
                    span,
                },
            ] if span.start == 0 && span.end == wrapped.len() => None,
            _ => Some("Test must be a single expression".to_string()),
        },
        Err(issues) => Some(first_message(&issues)),
    }
}

fn first_message(issues: &[SyntaxIssue]) -> String {
    issues
        .first()
        .map(|issue| issue.message.clone())
        .unwrap_or_else(|| "Invalid or unexpected token".to_string())
}

fn wrap_exception(
    exception: Exception,
    source: &SourceCode,
    generated_source: String,
    mapper: &LineMapper,
) -> ExecutionError {
    match exception {
        Exception::Link(error) => ExecutionError::Link(error),
        Exception::Interrupted(reason) => ExecutionError::Interrupted(reason),
        Exception::Throw { value, offset } => {
            let (name, message, stack, origin) = match &value {
                Value::Object(object) if object.is_error() => {
                    let origin = match object.class {
                        ObjectClass::Error { origin } => origin,
                        ObjectClass::Plain => None,
                    };
                    (
                        object.get("name").to_js_string(),
                        object.get("message").to_js_string(),
                        object.get("stack").to_js_string(),
                        origin,
                    )
                }
                other => {
                    let message = crate::interpreter::inspect(other);
                    ("Error".to_string(), message.clone(), format!("Uncaught {message}"), None)
                }
            };
            let offset = origin.or(offset).unwrap_or(0);
            wrap(&name, &message, stack, source, generated_source, offset, mapper).into()
        }
    }
}

fn wrap(
    name: &str,
    message: &str,
    stack: String,
    source: &SourceCode,
    generated_source: String,
    offset: usize,
    mapper: &LineMapper,
) -> WrappedError {
    let (line, column) = source.line_col(offset);
    let region = mapper.locate(&generated_source, line);
    let report = mapper.render(&region, column, &format!("{name}: {message}"));
    WrappedError {
        name: name.to_string(),
        message: message.to_string(),
        stack,
        generated_source,
        region: Some(region),
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::{Bundler, Module};
    use crate::resolver::{DEFAULT_PACKAGE_CDN, Resolver};
    use pretty_assertions::assert_eq;

    fn execute(entry: &str, modules: &[Module], tests: &[&str]) -> Result<ScriptResult, ExecutionError> {
        let symbols = HarnessSymbols::generate();
        let resolver = Resolver::new(modules.iter().map(|module| module.name.clone()), DEFAULT_PACKAGE_CDN);
        let bundle = Bundler::new(&symbols, &resolver).bundle(entry, modules, false);
        let tests: Vec<String> = tests.iter().map(|test| test.to_string()).collect();
        Harness::new(&symbols, Limits::default(), "notebook").execute(
            &bundle.wrapped_modules,
            &bundle.wrapped_body,
            &bundle.last_statement_text,
            Value::object(IndexMap::new()),
            &tests,
            &bundle.mapper,
        )
    }

    fn utils() -> Module {
        Module::new("utils", "export function double(x) {\n  return x * 2;\n}")
    }

    #[test]
    fn test_last_statement_value() {
        let result = execute("const a = 20;\na + 22;", &[], &[]).expect("runs");
        assert_eq!(result.last_statement_value, Value::Number(42.0));
        assert!(result.unit_test_outcomes.is_empty());
    }

    #[test]
    fn test_named_and_namespace_imports() {
        let entry = "import { double } from \"utils\";\nimport * as u from \"utils\";\ndouble(3) + u.double(1);";
        let result = execute(entry, &[utils()], &[]).expect("runs");
        assert_eq!(result.last_statement_value, Value::Number(8.0));
    }

    #[test]
    fn test_unit_test_outcomes() {
        let entry = "import { double } from \"utils\";";
        let result = execute(
            entry,
            &[utils()],
            &["double(3) === 6", "double(2) === 5", "", "missing()", "(("],
        )
        .expect("runs");
        let outcomes = result.unit_test_outcomes;
        assert_eq!(outcomes[0].passed, Some(true));
        assert_eq!(outcomes[1].passed, Some(false));
        assert_eq!(outcomes[1].error, None);
        assert_eq!(outcomes[2].passed, None);
        assert_eq!(outcomes[3].passed, Some(false));
        assert!(outcomes[3].error.as_deref().unwrap_or_default().contains("missing is not defined"));
        assert_eq!(outcomes[4].passed, Some(false));
        assert!(outcomes[4].error.as_deref().unwrap_or_default().starts_with("SyntaxError"));
        assert_eq!(
            outcomes.iter().map(|outcome| outcome.expression.as_str()).collect::<Vec<_>>(),
            vec!["double(3) === 6", "double(2) === 5", "", "missing()", "(("]
        );
    }

    #[test]
    fn test_expression_spanning_statements_fails_its_own_slot() {
        let entry = "import { double } from \"utils\";";
        let result = execute(entry, &[utils()], &["1); foo(", "double(3) === 6", "1) + (2"]).expect("runs");
        let outcomes = result.unit_test_outcomes;
        assert_eq!(outcomes[0].passed, Some(false));
        assert!(outcomes[0].error.as_deref().unwrap_or_default().starts_with("SyntaxError"));
        assert_eq!(outcomes[1].passed, Some(true));
        assert_eq!(outcomes[2].passed, Some(true));
    }

    #[test]
    fn test_expression_issue() {
        assert_eq!(expression_issue("a === 1 // trailing comment"), None);
        assert!(expression_issue("1); foo(").is_some());
        assert!(expression_issue("((").is_some());
        assert!(expression_issue("const a = 1").is_some());
    }

    #[test]
    fn test_link_errors() {
        let error = execute("import { triple } from \"utils\";", &[utils()], &[]).unwrap_err();
        let ExecutionError::Link(RuntimeError::MissingExport { module, export }) = error else {
            panic!("expected a missing export, got {error:?}");
        };
        assert_eq!((module.as_str(), export.as_str()), ("utils", "triple"));

        let error = execute("import * as u from \"utils\";\nu.triple;", &[utils()], &[]).unwrap_err();
        assert!(matches!(error, ExecutionError::Link(RuntimeError::MissingExport { .. })));

        let error = execute("import \"nowhere\";", &[], &[]).unwrap_err();
        assert_eq!(error.to_string(), "RuntimeError: Module https://cdn.skypack.dev/nowhere not found");
    }

    #[test]
    fn test_import_cycle_fails_fast() {
        let modules = [
            Module::new("a", "import { b } from \"b\";\nexport const a = 1;"),
            Module::new("b", "import { a } from \"a\";\nexport const b = 2;"),
        ];
        let error = execute("import { a } from \"a\";", &modules, &[]).unwrap_err();
        assert_eq!(
            error,
            ExecutionError::Link(RuntimeError::ImportCycle {
                cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()]
            })
        );
    }

    #[test]
    fn test_thrown_error_is_wrapped_and_mapped() {
        let modules = [Module::new("utils", "export const ok = 1;\nthrow new TypeError(\"broken\");")];
        let error = execute("import { ok } from \"utils\";\nok;", &modules, &[]).unwrap_err();
        let ExecutionError::Evaluation(wrapped) = error else {
            panic!("expected an evaluation error, got {error:?}");
        };
        assert_eq!(wrapped.name, "TypeError");
        assert_eq!(wrapped.message, "broken");
        assert!(wrapped.generated_source.starts_with("function __nb_entry_"));
        assert_eq!(
            wrapped.region,
            Some(SourceRegion::Module {
                name: "utils".to_string(),
                line: 2
            })
        );
        assert!(wrapped.report.unwrap_or_default().contains("broken"));
    }

    #[test]
    fn test_error_in_last_statement_maps_to_entry() {
        let error = execute("const a = 1;\n\nmissing + a;", &[], &[]).unwrap_err();
        let ExecutionError::Evaluation(wrapped) = error else {
            panic!("expected an evaluation error, got {error:?}");
        };
        assert_eq!(wrapped.name, "ReferenceError");
        assert_eq!(wrapped.region, Some(SourceRegion::Entry { line: 3 }));
    }

    #[test]
    fn test_syntax_error_is_wrapped() {
        let error = execute("const a = ;", &[], &[]).unwrap_err();
        let ExecutionError::Evaluation(wrapped) = error else {
            panic!("expected an evaluation error, got {error:?}");
        };
        assert_eq!(wrapped.name, "SyntaxError");
        assert_eq!(wrapped.region, Some(SourceRegion::Entry { line: 1 }));
    }
}
