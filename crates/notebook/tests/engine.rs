use notebook::{
    Capabilities, Engine, EngineConfig, Output, ScriptRequest, TestRequest, failure_report,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn utils() -> (&'static str, &'static str) {
    ("utils", "export const double = (x) => x * 2;")
}

fn plaintext(code: &str) -> Output {
    Output::Plaintext {
        code: code.to_string(),
    }
}

fn json_output(code: &str) -> Output {
    Output::Json {
        code: code.to_string(),
    }
}

fn error_message(output: &Output) -> &str {
    match output {
        Output::Error { message, .. } => message,
        other => panic!("expected an error output, got {other:?}"),
    }
}

#[test]
fn last_expression_is_the_answer() {
    let response = Engine::default().run(&ScriptRequest::new("1 + 1;"));
    assert_eq!(response.output, json_output("2"));
    assert!(response.unit_tests.is_empty());
}

#[test]
fn strings_and_missing_values() {
    let engine = Engine::default();
    assert_eq!(
        engine.run(&ScriptRequest::new("const name = 'canvas';\n`hello ${name}`")).output,
        plaintext("hello canvas")
    );
    assert_eq!(engine.run(&ScriptRequest::new("const a = 1;")).output, Output::Undefined);
    assert!(matches!(
        engine.run(&ScriptRequest::new("'<svg viewBox=\"0 0 1 1\"></svg>'")).output,
        Output::Svg { .. }
    ));
}

#[test]
fn structured_values_are_pretty_printed() {
    let response = Engine::default().run(&ScriptRequest::new("({ a: [1, 2], b: { c: null } })"));
    assert_eq!(
        response.output,
        json_output("{\n  \"a\": [\n    1,\n    2\n  ],\n  \"b\": {\n    \"c\": null\n  }\n}")
    );
}

#[test]
fn named_imports_bind_module_exports() {
    let (name, source) = utils();
    let request = ScriptRequest::new("import { double } from \"utils\";\ndouble(3);").with_module(name, source);
    assert_eq!(Engine::default().run(&request).output, json_output("6"));
}

#[test]
fn aliased_default_and_re_exports() {
    let request = ScriptRequest::new(
        "import total, { double as twice } from \"reexport\";\nimport * as all from \"reexport\";\n[total, twice(2), all.double(5)];",
    )
    .with_module("utils", "export const double = (x) => x * 2;\nexport default 10;")
    .with_module(
        "reexport",
        "import base from \"utils\";\nexport { double } from \"utils\";\nexport default base + 1;",
    );
    assert_eq!(
        Engine::default().run(&request).output,
        json_output("[\n  11,\n  4,\n  10\n]")
    );
}

#[test]
fn missing_export_names_module_and_export() {
    let (name, source) = utils();
    let request = ScriptRequest::new("import { triple } from \"utils\";\ntriple(1);").with_module(name, source);
    let response = Engine::default().run(&request);
    let message = error_message(&response.output);
    assert!(message.starts_with("RuntimeError"), "{message}");
    assert!(message.contains("utils"), "{message}");
    assert!(message.contains("triple"), "{message}");
}

#[test]
fn unknown_module_is_a_runtime_error() {
    let response = Engine::default().run(&ScriptRequest::new("import { x } from \"./nowhere.js\";\nx;"));
    assert!(error_message(&response.output).contains("not found"));
}

#[test]
fn unit_test_outcomes_come_back_in_order() {
    let (name, source) = utils();
    let request = ScriptRequest::new("import { double } from \"utils\";")
        .with_module(name, source)
        .with_tests(["double(2) === 4", "double(2) === 5"]);
    let response = Engine::default().run(&request);
    let outcomes = response
        .unit_tests
        .iter()
        .map(|outcome| (outcome.expression.as_str(), outcome.passed))
        .collect::<Vec<_>>();
    assert_eq!(
        outcomes,
        vec![("double(2) === 4", Some(true)), ("double(2) === 5", Some(false))]
    );
    assert_eq!(response.failed_tests(), vec![2]);
    assert_eq!(response.output, Output::error("Test case 2 failed."));
}

#[test]
fn a_module_body_runs_once_per_invocation() {
    let request = ScriptRequest::new(
        "import { value } from \"counter\";\nimport * as again from \"counter\";\nimport \"counter\";\nvalue + again.value;",
    )
    .with_module("counter", "notebook.log('evaluated');\nexport const value = 21;");
    let response = Engine::default().run(&request);
    assert_eq!(response.output, json_output("42"));
    let evaluated = response
        .logs
        .iter()
        .filter(|entry| entry.message == "evaluated")
        .count();
    assert_eq!(evaluated, 1);
}

#[test]
fn each_invocation_gets_a_fresh_module_cache() {
    let engine = Engine::default();
    let first = ScriptRequest::new("import { v } from \"m\";\nv;").with_module("m", "export const v = 1;");
    let second = ScriptRequest::new("import { v } from \"m\";\nv;").with_module("m", "export const v = 2;");
    assert_eq!(engine.run(&first).output, json_output("1"));
    assert_eq!(engine.run(&second).output, json_output("2"));
    assert_eq!(engine.run(&first).output, json_output("1"));
}

#[test]
fn import_cycles_fail_fast() {
    let request = ScriptRequest::new("import { a } from \"a\";\na;")
        .with_module("a", "import { b } from \"b\";\nexport const a = b;")
        .with_module("b", "import { a } from \"a\";\nexport const b = 1;");
    let response = Engine::default().run(&request);
    assert_eq!(
        response.output,
        Output::error("RuntimeError: Import cycle detected: a -> b -> a")
    );
}

#[test]
fn exports_are_frozen() {
    let request = ScriptRequest::new(
        "import * as m from \"m\";\nimport { box } from \"m\";\nlet seen = [];\ntry { m.extra = 1; } catch (error) { seen.push(error.name); }\ntry { box.v = 2; } catch (error) { seen.push(error.name); }\nseen;",
    )
    .with_module("m", "export const box = Object.freeze({ v: 1 });");
    let response = Engine::default().run(&request);
    assert_eq!(response.output, json_output("[\n  \"TypeError\",\n  \"TypeError\"\n]"));
}

#[test]
fn thrown_errors_carry_stack_and_report() {
    let request = ScriptRequest::new("import { ok } from \"broken\";\nok;")
        .with_module("broken", "export const ok = 1;\nthrow new Error('bad module');");
    let response = Engine::default().run(&request);
    let Output::Error { message, stack, report } = &response.output else {
        panic!("expected an error, got {:?}", response.output);
    };
    assert_eq!(message, "Error: bad module");
    assert!(stack.as_deref().unwrap_or_default().starts_with("Error: bad module"));
    let report = report.as_deref().unwrap_or_default();
    assert!(report.contains("broken"), "{report}");
    assert!(report.contains("throw new Error('bad module');"), "{report}");
}

#[test]
fn test_surface_aggregates_failures() {
    let request = TestRequest {
        script: ScriptRequest::new("const base = 2;")
            .with_tests(["square(base) === 4", "square(3) === 10", "", "square(1) === 2"]),
        test_body: "function square(x) { return x * x; }".to_string(),
    };
    let response = Engine::default().test(&request);
    assert_eq!(response.failed_tests(), vec![2, 4]);
    assert_eq!(response.output, Output::error("Test cases 2, 4 failed."));
    assert_eq!(response.unit_tests[2].passed, None);
}

#[test]
fn test_surface_requires_a_body_and_tests() {
    let engine = Engine::default();
    let empty_body = TestRequest {
        script: ScriptRequest::new("  ").with_tests(["true"]),
        test_body: String::new(),
    };
    assert!(engine.test(&empty_body).output.is_error());
    let no_tests = TestRequest {
        script: ScriptRequest::new("1;"),
        test_body: String::new(),
    };
    assert!(engine.test(&no_tests).output.is_error());
    let passing = TestRequest {
        script: ScriptRequest::new("const x = 1;\nx;").with_tests(["x === 1"]),
        test_body: String::new(),
    };
    assert_eq!(engine.test(&passing).output, json_output("1"));
}

#[test]
fn introspection_maps_every_declared_symbol() {
    let (name, source) = utils();
    let request = ScriptRequest::new(
        "import { double } from \"utils\";\nconst label = 'x';\nlet count = double(2);\nfunction helper() {}\ncount + 1;",
    )
    .with_module(name, source);
    let response = Engine::default().introspect(&request);
    assert_eq!(response.error, None);
    assert_eq!(response.symbols.get("label"), Some(&plaintext("x")));
    assert_eq!(response.symbols.get("count"), Some(&json_output("4")));
    assert_eq!(response.symbols.get("helper"), Some(&Output::Undefined));
}

#[test]
fn capability_object_reaches_user_code() {
    let capabilities = Capabilities::default().with_input("threshold", json!(5));
    let engine = Engine::default().with_capabilities(capabilities);
    let response = engine.run(&ScriptRequest::new("notebook.inputs.threshold * 2;"));
    assert_eq!(response.output, json_output("10"));
}

#[test]
fn capability_parameter_name_is_configurable() {
    let config = EngineConfig::from_toml_str("capability_name = \"host\"").expect("valid config");
    let engine = Engine::new(config);
    let response = engine.run(&ScriptRequest::new("typeof host.log;"));
    assert_eq!(response.output, plaintext("function"));
}

#[test]
fn registered_external_modules_are_importable() {
    let mut engine = Engine::default();
    engine.register_external("tiny-math", "export const add = (a, b) => a + b;");
    let response = engine.run(&ScriptRequest::new("import { add } from \"tiny-math\";\nadd(2, 3);"));
    assert_eq!(response.output, json_output("5"));
}

#[test]
fn request_modules_shadow_registered_externals() {
    let mut engine = Engine::default();
    engine.register_external("tiny-math", "export const source = 'registered';");
    let request = ScriptRequest::new(
        "import { source } from \"https://cdn.skypack.dev/tiny-math\";\nsource;",
    )
    .with_module("https://cdn.skypack.dev/tiny-math", "export const source = 'request';");
    assert_eq!(engine.run(&request).output, plaintext("request"));
}

#[test]
fn runaway_loops_are_interrupted() {
    let config = EngineConfig::from_toml_str("max_steps = 1000").expect("valid config");
    let response = Engine::new(config).run(&ScriptRequest::new("while (true) {}"));
    assert!(error_message(&response.output).contains("1000 steps"));
}

#[test]
fn deep_nesting_is_a_syntax_error() {
    let code = format!("{}1{};", "[".repeat(50_000), "]".repeat(50_000));
    let response = Engine::default().run(&ScriptRequest::new(code));
    assert!(error_message(&response.output).contains("Nesting exceeds the limit"));

    let chain = format!("1{};", " + 1".repeat(50_000));
    let response = Engine::default().run(&ScriptRequest::new(chain));
    assert!(error_message(&response.output).contains("Nesting exceeds the limit"));
}

#[test]
fn evaluation_depth_is_limited() {
    let config = EngineConfig::from_toml_str("max_eval_depth = 100").expect("valid config");
    let request = ScriptRequest::new("function f(n) { return n > 0 ? 1 + f(n - 1) : 0; }\nf(150);");
    let response = Engine::new(config).run(&request);
    assert!(error_message(&response.output).contains("Maximum evaluation depth exceeded"));
}

#[test]
fn failure_report_wording() {
    assert_eq!(failure_report(&[1, 3]).as_deref(), Some("Test cases 1, 3 failed."));
}

#[test]
fn responses_serialize_with_camel_case() {
    let response = Engine::default().run(&ScriptRequest::new("'ok'").with_tests(["true"]));
    let json = serde_json::to_value(&response).expect("serializes");
    assert_eq!(json["output"], json!({ "type": "PLAINTEXT", "code": "ok" }));
    assert_eq!(json["unitTests"], json!([{ "expression": "true", "passed": true }]));
    assert_eq!(json["codeHash"].as_str().map(str::len), Some(64));
}
