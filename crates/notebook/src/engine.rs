//! Run, test and introspection surfaces over the bundler and harness.
//!
//! Every invocation gets its own thread, symbols, module table and import
//! cache. Nothing interpreter-side outlives the thread; responses are plain
//! serializable data.

use crate::bundler::{Bundler, Module};
use crate::capabilities::Capabilities;
use crate::config::EngineConfig;
use crate::errors::ExecutionError;
use crate::harness::{Harness, UnitTestOutcome};
use crate::interpreter::{LogEntry, Value, json_text};
use crate::resolver::Resolver;
use crate::symbols::HarnessSymbols;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

const INVOCATION_STACK_SIZE: usize = 64 * 1024 * 1024;

const SUPPORTED_LANGUAGES: [&str; 2] = ["javascript", "js"];

fn default_language() -> String {
    "javascript".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRequest {
    #[serde(default = "default_language")]
    pub language: String,
    pub entry_body: String,
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub unit_test_expressions: Vec<String>,
}

impl ScriptRequest {
    pub fn new(entry_body: impl Into<String>) -> Self {
        Self {
            language: default_language(),
            entry_body: entry_body.into(),
            modules: Vec::new(),
            unit_test_expressions: Vec::new(),
        }
    }

    pub fn with_module(mut self, name: impl Into<String>, source_text: impl Into<String>) -> Self {
        self.modules.push(Module::new(name, source_text));
        self
    }

    pub fn with_tests<I, S>(mut self, expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unit_test_expressions
            .extend(expressions.into_iter().map(Into::into));
        self
    }

    pub fn code_hash(&self) -> String {
        code_hash(&self.language, &self.entry_body)
    }
}

pub type RunRequest = ScriptRequest;
pub type IntrospectRequest = ScriptRequest;

/// A script plus the helper definitions its test expressions rely on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRequest {
    #[serde(flatten)]
    pub script: ScriptRequest,
    /// Evaluated after the entry body, in the same scope.
    #[serde(default)]
    pub test_body: String,
}

/// Typed rendering of a final value, or the failure that replaced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Output {
    Plaintext {
        code: String,
    },
    Json {
        code: String,
    },
    Svg {
        code: String,
    },
    Undefined,
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
        /// Source excerpt pointing at the failing line of user code.
        #[serde(skip_serializing_if = "Option::is_none")]
        report: Option<String>,
    },
}

impl Output {
    pub fn error(message: impl Into<String>) -> Self {
        Output::Error {
            message: message.into(),
            stack: None,
            report: None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Output::Error { .. })
    }

    /// Renders a value by its runtime type.
    pub fn classify(value: &Value) -> Self {
        match value {
            Value::Undefined => Output::Undefined,
            Value::String(text) if text.trim_start().starts_with("<svg") => Output::Svg {
                code: text.to_string(),
            },
            Value::String(text) => Output::Plaintext {
                code: text.to_string(),
            },
            other => match other.to_json() {
                Ok(Some(json)) => Output::Json {
                    code: json_text(&json, "  "),
                },
                Ok(None) => Output::Undefined,
                Err(message) => Output::error(format!("TypeError: {message}")),
            },
        }
    }
}

impl From<ExecutionError> for Output {
    fn from(error: ExecutionError) -> Self {
        match error {
            ExecutionError::Evaluation(wrapped) => Output::Error {
                message: wrapped.to_string(),
                stack: Some(wrapped.stack),
                report: wrapped.report,
            },
            other => Output::error(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub output: Output,
    pub unit_tests: Vec<UnitTestOutcome>,
    pub logs: Vec<LogEntry>,
    pub code_hash: String,
}

impl Response {
    /// 1-based indices of tests with an expression that did not pass.
    pub fn failed_tests(&self) -> Vec<usize> {
        failed_tests(&self.unit_tests)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectionResponse {
    pub symbols: IndexMap<String, Output>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Output>,
    pub logs: Vec<LogEntry>,
    pub code_hash: String,
}

pub fn code_hash(language: &str, code: &str) -> String {
    let digest = Sha256::digest(format!("{language}:::{code}").as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub fn failed_tests(outcomes: &[UnitTestOutcome]) -> Vec<usize> {
    outcomes
        .iter()
        .enumerate()
        .filter(|(_, outcome)| !outcome.expression.is_empty() && outcome.passed == Some(false))
        .map(|(index, _)| index + 1)
        .collect()
}

/// `Test case 2 failed.` or `Test cases 1, 3 failed.`
pub fn failure_report(failed: &[usize]) -> Option<String> {
    match failed {
        [] => None,
        [single] => Some(format!("Test case {single} failed.")),
        many => {
            let indices = many.iter().map(usize::to_string).collect::<Vec<_>>();
            Some(format!("Test cases {} failed.", indices.join(", ")))
        }
    }
}

/// Everything an invocation produced, already detached from the interpreter.
struct Evaluation {
    output: Output,
    symbols: IndexMap<String, Output>,
    unit_tests: Vec<UnitTestOutcome>,
    logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
    capabilities: Capabilities,
    externals: Arc<IndexMap<String, String>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Makes a package importable by source text instead of over the network.
    /// The specifier is resolved against the configured package CDN, so
    /// `"lodash"` and its CDN URL register the same module.
    pub fn register_external(&mut self, specifier: &str, source_text: impl Into<String>) {
        let location = Resolver::new(std::iter::empty::<String>(), &self.config.package_cdn)
            .resolve(specifier)
            .resolved_location;
        log::debug!("Registered external module {location}");
        Arc::make_mut(&mut self.externals).insert(location, source_text.into());
    }

    pub fn run(&self, request: &RunRequest) -> Response {
        let code_hash = request.code_hash();
        if let Some(output) = unsupported(&request.language) {
            return failure(output, code_hash);
        }
        match self.invoke(request.entry_body.clone(), request, false) {
            Ok(evaluation) => respond(evaluation, code_hash),
            Err(error) => failure(error.into(), code_hash),
        }
    }

    pub fn test(&self, request: &TestRequest) -> Response {
        let script = &request.script;
        let code_hash = script.code_hash();
        if let Some(output) = unsupported(&script.language) {
            return failure(output, code_hash);
        }
        if script.entry_body.trim().is_empty() {
            return failure(Output::error("Nothing to test: the entry body is empty."), code_hash);
        }
        if script.unit_test_expressions.is_empty() {
            return failure(Output::error("Nothing to test: no test expressions were given."), code_hash);
        }
        let body = if request.test_body.trim().is_empty() {
            script.entry_body.clone()
        } else {
            format!("{}\n{}", script.entry_body, request.test_body)
        };
        match self.invoke(body, script, false) {
            Ok(evaluation) => respond(evaluation, code_hash),
            Err(error) => failure(error.into(), code_hash),
        }
    }

    pub fn introspect(&self, request: &IntrospectRequest) -> IntrospectionResponse {
        let code_hash = request.code_hash();
        let outcome = match unsupported(&request.language) {
            Some(output) => Err(output),
            None => self
                .invoke(request.entry_body.clone(), request, true)
                .map_err(Output::from),
        };
        match outcome {
            Ok(evaluation) => IntrospectionResponse {
                symbols: evaluation.symbols,
                error: None,
                logs: evaluation.logs,
                code_hash,
            },
            Err(output) => IntrospectionResponse {
                symbols: IndexMap::new(),
                error: Some(output),
                logs: Vec::new(),
                code_hash,
            },
        }
    }

    fn invoke(&self, entry_body: String, request: &ScriptRequest, introspect: bool) -> Result<Evaluation, ExecutionError> {
        let config = self.config.clone();
        let capabilities = self.capabilities.clone();
        let externals = self.externals.clone();
        let modules = request.modules.clone();
        let unit_tests = if introspect {
            Vec::new()
        } else {
            request.unit_test_expressions.clone()
        };
        let handle = thread::Builder::new()
            .name("notebook-invocation".to_string())
            .stack_size(INVOCATION_STACK_SIZE)
            .spawn(move || {
                evaluate(
                    &config,
                    &capabilities,
                    &externals,
                    &entry_body,
                    &modules,
                    &unit_tests,
                    introspect,
                )
            })
            .map_err(|error| ExecutionError::Interrupted(format!("Failed to start invocation: {error}")))?;
        handle
            .join()
            .map_err(|_| ExecutionError::Interrupted("Invocation aborted unexpectedly".to_string()))?
    }
}

fn evaluate(
    config: &EngineConfig,
    capabilities: &Capabilities,
    externals: &IndexMap<String, String>,
    entry_body: &str,
    modules: &[Module],
    unit_tests: &[String],
    introspect: bool,
) -> Result<Evaluation, ExecutionError> {
    let symbols = HarnessSymbols::generate();
    let resolver = Resolver::new(modules.iter().map(|module| module.name.clone()), &config.package_cdn);
    let mut table = modules.to_vec();
    for (location, source) in externals.iter() {
        if resolver.is_internal(location) {
            log::warn!("Request module '{location}' shadows the registered external module");
            continue;
        }
        table.push(Module::new(location.as_str(), source.as_str()));
    }
    let bundle = Bundler::new(&symbols, &resolver).bundle(entry_body, &table, introspect);
    for location in &bundle.external_imports {
        if !externals.contains_key(location) {
            log::warn!("No source registered for external module {location}");
        }
    }

    let capture = bundle.declared_symbols.as_ref().map(capture_expression);
    let last_statement_text = capture.as_deref().unwrap_or(bundle.last_statement_text.as_str());
    let harness = Harness::new(&symbols, config.limits(), config.capability_name.as_str());
    let result = harness.execute(
        &bundle.wrapped_modules,
        &bundle.wrapped_body,
        last_statement_text,
        capabilities.to_value(),
        unit_tests,
        &bundle.mapper,
    )?;

    let symbols = match (&bundle.declared_symbols, &result.last_statement_value) {
        (Some(_), Value::Object(captured)) => captured
            .entries()
            .into_iter()
            .map(|(name, value)| (name, Output::classify(&value)))
            .collect(),
        _ => IndexMap::new(),
    };
    Ok(Evaluation {
        output: Output::classify(&result.last_statement_value),
        symbols,
        unit_tests: result.unit_test_outcomes,
        logs: result.logs,
    })
}

/// `({ a, b })`, an object literal holding every declared name.
fn capture_expression(names: &BTreeSet<String>) -> String {
    if names.is_empty() {
        return "({})".to_string();
    }
    let names = names.iter().map(String::as_str).collect::<Vec<_>>();
    format!("({{ {} }})", names.join(", "))
}

fn unsupported(language: &str) -> Option<Output> {
    let normalized = language.trim().to_ascii_lowercase();
    (!SUPPORTED_LANGUAGES.contains(&normalized.as_str()))
        .then(|| Output::error(format!("Unsupported language: {language}")))
}

fn respond(evaluation: Evaluation, code_hash: String) -> Response {
    let failed = failed_tests(&evaluation.unit_tests);
    let output = match failure_report(&failed) {
        Some(message) => Output::error(message),
        None => evaluation.output,
    };
    Response {
        output,
        unit_tests: evaluation.unit_tests,
        logs: evaluation.logs,
        code_hash,
    }
}

fn failure(output: Output, code_hash: String) -> Response {
    Response {
        output,
        unit_tests: Vec::new(),
        logs: Vec::new(),
        code_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn outcome(expression: &str, passed: Option<bool>) -> UnitTestOutcome {
        UnitTestOutcome {
            expression: expression.to_string(),
            passed,
            error: None,
        }
    }

    #[test]
    fn test_failure_report() {
        let outcomes = vec![
            outcome("a", Some(false)),
            outcome("b", Some(true)),
            outcome("", Some(false)),
            outcome("c", Some(false)),
            outcome("d", None),
        ];
        assert_eq!(failed_tests(&outcomes), vec![1, 4]);
        assert_eq!(failure_report(&[1, 4]).as_deref(), Some("Test cases 1, 4 failed."));
        assert_eq!(failure_report(&[2]).as_deref(), Some("Test case 2 failed."));
        assert_eq!(failure_report(&[]), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(Output::classify(&Value::Undefined), Output::Undefined);
        assert_eq!(
            Output::classify(&Value::string("hi")),
            Output::Plaintext { code: "hi".to_string() }
        );
        assert!(matches!(
            Output::classify(&Value::string("  <svg width=\"1\"></svg>")),
            Output::Svg { .. }
        ));
        let value = Value::object_from([("a", Value::Number(1.0)), ("b", Value::array(vec![Value::Boolean(true)]))]);
        assert_eq!(
            Output::classify(&value),
            Output::Json {
                code: "{\n  \"a\": 1,\n  \"b\": [\n    true\n  ]\n}".to_string()
            }
        );
    }

    #[test]
    fn test_output_serialization() {
        let json = serde_json::to_value(Output::Plaintext { code: "x".to_string() }).expect("serializes");
        assert_eq!(json, serde_json::json!({ "type": "PLAINTEXT", "code": "x" }));
        let json = serde_json::to_value(Output::error("boom")).expect("serializes");
        assert_eq!(json, serde_json::json!({ "type": "ERROR", "message": "boom" }));
        let json = serde_json::to_value(Output::Undefined).expect("serializes");
        assert_eq!(json, serde_json::json!({ "type": "UNDEFINED" }));
    }

    #[test]
    fn test_code_hash_depends_on_language() {
        let hash = code_hash("javascript", "1 + 1;");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, code_hash("js", "1 + 1;"));
        assert_eq!(hash, ScriptRequest::new("1 + 1;").code_hash());
    }

    #[test]
    fn test_capture_expression() {
        let names = ["b", "a"].into_iter().map(String::from).collect();
        assert_eq!(capture_expression(&names), "({ a, b })");
        assert_eq!(capture_expression(&BTreeSet::new()), "({})");
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: TestRequest = serde_json::from_str(
            r#"{ "entryBody": "const x = 1;", "modules": [{ "name": "m", "sourceText": "export const y = 2;" }], "unitTestExpressions": ["x === 1"], "testBody": "const z = 3;" }"#,
        )
        .expect("deserializes");
        assert_eq!(request.script.language, "javascript");
        assert_eq!(request.script.modules, vec![Module::new("m", "export const y = 2;")]);
        assert_eq!(request.test_body, "const z = 3;");
    }

    #[test]
    fn test_unsupported_language() {
        let mut request = ScriptRequest::new("1;");
        request.language = "python".to_string();
        let response = Engine::default().run(&request);
        assert_eq!(response.output, Output::error("Unsupported language: python"));
    }
}
