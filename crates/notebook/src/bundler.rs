//! Turns independently authored fragments into wrapped bodies that the
//! harness stitches into one generated unit.
//!
//! Module syntax is rewritten textually into calls of the per-invocation
//! import and export helpers. Every rewrite keeps the line count of the
//! statement it replaces, so a line below a sentinel comment is still the
//! same line of the original fragment.

use crate::errors::{LINE_SENTINEL, LineMapper, RETURN_SENTINEL};
use crate::parser::{
    ExportDeclaration, ImportDeclaration, Spanned, Statement, SyntaxIssue, parse_program,
};
use crate::resolver::Resolver;
use crate::symbols::{HarnessSymbols, Role};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;

/// Text captured when the entry body has no trailing expression.
pub const UNDEFINED_PLACEHOLDER: &str = "undefined";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub name: String,
    pub source_text: String,
}

impl Module {
    pub fn new(name: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_text: source_text.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bundle {
    /// Wrapped module bodies keyed by module-table name, in input order.
    pub wrapped_modules: IndexMap<String, String>,
    pub wrapped_body: String,
    pub last_statement_text: String,
    /// 1-based entry line the last statement starts on.
    pub last_statement_line: usize,
    /// Top-level names declared by the entry, in introspection mode.
    pub declared_symbols: Option<BTreeSet<String>>,
    /// Resolved locations of imports that point outside the request.
    pub external_imports: BTreeSet<String>,
    /// Fragments that did not parse. They are passed through unchanged and
    /// fail again when the generated unit is evaluated.
    pub syntax_issues: Vec<(String, Vec<SyntaxIssue>)>,
    pub mapper: LineMapper,
}

pub struct Bundler<'a> {
    symbols: &'a HarnessSymbols,
    resolver: &'a Resolver,
}

type Edit = (Range<usize>, String);

impl<'a> Bundler<'a> {
    pub fn new(symbols: &'a HarnessSymbols, resolver: &'a Resolver) -> Self {
        Self { symbols, resolver }
    }

    pub fn bundle(&self, entry_body: &str, modules: &[Module], introspect: bool) -> Bundle {
        let mut mapper = LineMapper::new();
        let mut external_imports = BTreeSet::new();
        let mut syntax_issues = Vec::new();

        let mut wrapped_modules = IndexMap::new();
        for module in modules {
            if wrapped_modules.contains_key(&module.name) {
                log::warn!("Module '{}' is defined more than once, keeping the first", module.name);
                continue;
            }
            let code = match parse_program(&module.source_text) {
                Ok(statements) => {
                    let edits = self.module_edits(&module.source_text, &statements, &mut external_imports);
                    apply_edits(&module.source_text, edits)
                }
                Err(issues) => {
                    log::debug!("Module '{}' does not parse, passing it through", module.name);
                    syntax_issues.push((module.name.clone(), issues));
                    module.source_text.clone()
                }
            };
            let wrapped = format!(
                "{}\n{code}\nreturn Object.freeze({});",
                self.preamble(),
                self.symbols.name(Role::Exports)
            );
            mapper.add_module(&module.name, &module.source_text);
            wrapped_modules.insert(module.name.clone(), wrapped);
        }

        let mut last_statement_text = UNDEFINED_PLACEHOLDER.to_string();
        let mut last_statement_line = line_count(entry_body);
        let mut declared_symbols = introspect.then(BTreeSet::new);
        let body = match parse_program(entry_body) {
            Ok(statements) => {
                let mut edits = self.module_edits(entry_body, &statements, &mut external_imports);
                if let Some(symbols) = &mut declared_symbols {
                    symbols.extend(statements.iter().flat_map(|statement| statement.node.declared_names()));
                }
                if let Some(Spanned {
                    node: Statement::Expression(_),
                    span,
                }) = statements.last()
                {
                    let range = span.into_range();
                    last_statement_text = strip_last_semicolon(&entry_body[range.clone()]);
                    last_statement_line = entry_body[..range.start].matches('\n').count() + 1;
                    if !introspect {
                        edits.push((range.clone(), blank(&entry_body[range])));
                    }
                }
                apply_edits(entry_body, edits)
            }
            Err(issues) => {
                log::debug!("Entry body does not parse, passing it through");
                syntax_issues.push(("main".to_string(), issues));
                entry_body.to_string()
            }
        };
        let wrapped_body = format!("{}\n{body}\n{RETURN_SENTINEL}", self.preamble());
        mapper.set_entry(entry_body, last_statement_line, &last_statement_text);

        for location in &external_imports {
            log::debug!("External import {location}");
        }

        Bundle {
            wrapped_modules,
            wrapped_body,
            last_statement_text,
            last_statement_line,
            declared_symbols,
            external_imports,
            syntax_issues,
            mapper,
        }
    }

    /// Declares the export collector and helper on one line ending with the
    /// line sentinel.
    fn preamble(&self) -> String {
        let exports = self.symbols.name(Role::Exports);
        let export = self.symbols.name(Role::Export);
        format!(
            "const {exports} = {{}}; function {export}(...args) {{ for (let i = 0; i < args.length; i += 2) {{ const key = args[i]; if (!key) {{ Object.assign({exports}, args[i + 1]); }} else {{ {exports}[key] = args[i + 1]; }} }} }} {LINE_SENTINEL}"
        )
    }

    fn module_edits(
        &self,
        source: &str,
        statements: &[Spanned<Statement>],
        external_imports: &mut BTreeSet<String>,
    ) -> Vec<Edit> {
        let mut edits = Vec::new();
        for statement in statements {
            let replacement = match &statement.node {
                Statement::Import(import) => self.rewrite_import(import, external_imports),
                Statement::Export(export) => self.rewrite_export(source, export, external_imports),
                _ => continue,
            };
            edits.push((statement.span.into_range(), replacement));
        }
        edits
    }

    fn location(&self, specifier: &str, external_imports: &mut BTreeSet<String>) -> String {
        let resolved = self.resolver.resolve(specifier);
        if !resolved.is_internal {
            external_imports.insert(resolved.resolved_location.clone());
        }
        quote(&resolved.resolved_location)
    }

    fn import_call(&self, location: &str, names: &[&str]) -> String {
        let mut arguments = vec![location.to_string()];
        arguments.extend(names.iter().map(|name| quote(name)));
        format!("await {}({})", self.symbols.name(Role::Import), arguments.join(", "))
    }

    fn import_all_call(&self, location: &str) -> String {
        format!("await {}({location})", self.symbols.name(Role::ImportAll))
    }

    fn rewrite_import(&self, import: &ImportDeclaration, external_imports: &mut BTreeSet<String>) -> String {
        let location = self.location(&import.source, external_imports);
        if let Some(namespace) = &import.namespace {
            let mut declaration = format!("const {namespace} = {}", self.import_all_call(&location));
            if let Some(default) = &import.default {
                declaration.push_str(&format!(", {default} = {namespace}[\"default\"]"));
            }
            return format!("{declaration};");
        }
        let mut names = Vec::new();
        let mut properties = Vec::new();
        if let Some(default) = &import.default {
            names.push("default");
            properties.push(format!("default: {default}"));
        }
        for specifier in &import.named {
            names.push(specifier.imported.as_str());
            if specifier.imported == specifier.local {
                properties.push(specifier.local.clone());
            } else {
                properties.push(format!("{}: {}", specifier.imported, specifier.local));
            }
        }
        let call = self.import_call(&location, &names);
        if properties.is_empty() {
            return format!("{call};");
        }
        format!("const {{ {} }} = {call};", properties.join(", "))
    }

    fn rewrite_export(
        &self,
        source: &str,
        export: &ExportDeclaration,
        external_imports: &mut BTreeSet<String>,
    ) -> String {
        let export_function = self.symbols.name(Role::Export);
        match export {
            ExportDeclaration::Declaration(declaration) => {
                let text = source[declaration.span.into_range()].trim_end_matches(';');
                let pairs = declaration
                    .node
                    .declared_names()
                    .iter()
                    .map(|name| format!("{}, {name}", quote(name)))
                    .collect::<Vec<_>>();
                format!("{text}; {export_function}({});", pairs.join(", "))
            }
            ExportDeclaration::Named {
                specifiers,
                source: None,
            } => {
                let pairs = specifiers
                    .iter()
                    .map(|specifier| format!("{}, {}", quote(&specifier.exported), specifier.local))
                    .collect::<Vec<_>>();
                format!("{export_function}({});", pairs.join(", "))
            }
            ExportDeclaration::Named {
                specifiers,
                source: Some(specifier),
            } => {
                let location = self.location(specifier, external_imports);
                let pairs = specifiers
                    .iter()
                    .map(|specifier| {
                        format!(
                            "{}, ({})[{}]",
                            quote(&specifier.exported),
                            self.import_call(&location, &[specifier.local.as_str()]),
                            quote(&specifier.local)
                        )
                    })
                    .collect::<Vec<_>>();
                format!("{export_function}({});", pairs.join(", "))
            }
            ExportDeclaration::Default(expression) => format!(
                "{export_function}(\"default\", ({}));",
                &source[expression.span.into_range()]
            ),
            ExportDeclaration::All {
                source: specifier,
                alias: None,
            } => {
                let location = self.location(specifier, external_imports);
                format!("{export_function}(null, {});", self.import_call(&location, &[]))
            }
            ExportDeclaration::All {
                source: specifier,
                alias: Some(alias),
            } => {
                let location = self.location(specifier, external_imports);
                format!(
                    "{export_function}({}, {});",
                    quote(alias),
                    self.import_all_call(&location)
                )
            }
        }
    }
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{text}\""))
}

fn line_count(text: &str) -> usize {
    text.split('\n').count()
}

/// Drops a single trailing semicolon and the whitespace around it.
pub fn strip_last_semicolon(code: &str) -> String {
    let trimmed = code.trim_end();
    trimmed
        .strip_suffix(';')
        .unwrap_or(trimmed)
        .trim_end()
        .to_string()
}

/// Spaces out `text` but keeps its line breaks.
fn blank(text: &str) -> String {
    text.chars()
        .map(|character| if character == '\n' { '\n' } else { ' ' })
        .collect()
}

fn apply_edits(source: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|(range, _)| range.start);
    let mut output = String::with_capacity(source.len());
    let mut cursor = 0;
    for (range, replacement) in edits {
        if range.start < cursor {
            continue;
        }
        output.push_str(&source[cursor..range.start]);
        let original = &source[range.clone()];
        output.push_str(&replacement);
        let missing = original
            .matches('\n')
            .count()
            .saturating_sub(replacement.matches('\n').count());
        output.extend(std::iter::repeat('\n').take(missing));
        cursor = range.end;
    }
    output.push_str(&source[cursor..]);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bundle(entry: &str, modules: &[Module], introspect: bool) -> (Bundle, HarnessSymbols) {
        let symbols = HarnessSymbols::generate();
        let resolver = Resolver::new(
            modules.iter().map(|module| module.name.clone()),
            crate::resolver::DEFAULT_PACKAGE_CDN,
        );
        let bundle = Bundler::new(&symbols, &resolver).bundle(entry, modules, introspect);
        (bundle, symbols)
    }

    /// Replaces the synthetic names so assertions can spell them out.
    fn readable(text: &str, symbols: &HarnessSymbols) -> String {
        [
            (Role::Import, "IMPORT"),
            (Role::ImportAll, "IMPORT_ALL"),
            (Role::Export, "EXPORT"),
            (Role::Exports, "EXPORTS"),
        ]
        .into_iter()
        .fold(text.to_string(), |text, (role, name)| text.replace(symbols.name(role), name))
    }

    fn user_lines(wrapped: &str) -> Vec<&str> {
        wrapped.split('\n').skip(1).collect()
    }

    #[test]
    fn test_last_statement_extraction() {
        let (bundle, _) = bundle("const a = 1;\na + 1;", &[], false);
        assert_eq!(bundle.last_statement_text, "a + 1");
        assert_eq!(bundle.last_statement_line, 2);
        let lines = user_lines(&bundle.wrapped_body);
        assert_eq!(lines, vec!["const a = 1;", "      ", RETURN_SENTINEL]);
    }

    #[test]
    fn test_missing_last_expression_is_placeholder() {
        let (bundle, _) = bundle("const a = 1;", &[], false);
        assert_eq!(bundle.last_statement_text, UNDEFINED_PLACEHOLDER);
        let (bundle, _) = self::bundle("", &[], false);
        assert_eq!(bundle.last_statement_text, UNDEFINED_PLACEHOLDER);
    }

    #[test]
    fn test_import_rewrites() {
        let entry = "import { double, half as h } from \"utils\";\nimport * as all from \"utils\";\nimport confetti from \"canvas-confetti\";\nimport \"https://esm.sh/x\";\ndouble(2);";
        let modules = [Module::new("utils", "export const double = x => x * 2;")];
        let (bundle, symbols) = bundle(entry, &modules, false);
        let body = readable(&bundle.wrapped_body, &symbols);
        let lines = user_lines(&body);
        assert_eq!(
            lines[..4].to_vec(),
            vec![
                "const { double, half: h } = await IMPORT(\"utils\", \"double\", \"half\");",
                "const all = await IMPORT_ALL(\"utils\");",
                "const { default: confetti } = await IMPORT(\"https://cdn.skypack.dev/canvas-confetti\", \"default\");",
                "await IMPORT(\"https://esm.sh/x\");",
            ]
        );
        assert_eq!(
            bundle.external_imports.into_iter().collect::<Vec<_>>(),
            vec![
                "https://cdn.skypack.dev/canvas-confetti".to_string(),
                "https://esm.sh/x".to_string()
            ]
        );
    }

    #[test]
    fn test_export_rewrites() {
        let module = "export const a = 1, { b } = { b: 2 };\nexport function f() {\n  return a;\n}\nexport { a as c };\nexport default a + 1;\nexport * from \"other\";\nexport * as o from \"other\";\nexport { x as y } from \"other\";";
        let modules = [Module::new("m", module), Module::new("other", "export const x = 1;")];
        let (bundle, symbols) = bundle("", &modules, false);
        let wrapped = readable(&bundle.wrapped_modules["m"], &symbols);
        let lines = user_lines(&wrapped);
        assert_eq!(
            lines,
            vec![
                "const a = 1, { b } = { b: 2 }; EXPORT(\"a\", a, \"b\", b);",
                "function f() {",
                "  return a;",
                "}; EXPORT(\"f\", f);",
                "EXPORT(\"c\", a);",
                "EXPORT(\"default\", (a + 1));",
                "EXPORT(null, await IMPORT(\"other\"));",
                "EXPORT(\"o\", await IMPORT_ALL(\"other\"));",
                "EXPORT(\"y\", (await IMPORT(\"other\", \"x\"))[\"x\"]);",
                "return Object.freeze(EXPORTS);",
            ]
        );
        assert!(lines.len() == module.split('\n').count() + 1);
    }

    #[test]
    fn test_preamble_carries_sentinel() {
        let (bundle, symbols) = bundle("1", &[Module::new("m", "")], false);
        let first_line = bundle.wrapped_modules["m"].split('\n').next().unwrap_or_default();
        assert!(first_line.ends_with(LINE_SENTINEL));
        assert!(first_line.contains(symbols.name(Role::Exports)));
        assert!(bundle.wrapped_body.ends_with(RETURN_SENTINEL));
    }

    #[test]
    fn test_introspection_symbols() {
        let entry = "import { double } from \"m\";\nconst a = 1;\nlet [b, ...c] = [];\nfunction f() {}\na;";
        let (bundle, _) = bundle(entry, &[Module::new("m", "")], true);
        let symbols = bundle.declared_symbols.expect("introspection records symbols");
        assert_eq!(
            symbols.into_iter().collect::<Vec<_>>(),
            vec!["a", "b", "c", "double", "f"]
        );
        // The trailing expression still runs in introspection mode.
        assert!(bundle.wrapped_body.contains("\na;\n"));
    }

    #[test]
    fn test_unparsable_fragment_passes_through() {
        let (bundle, _) = bundle("let = ;", &[], false);
        assert_eq!(bundle.syntax_issues.len(), 1);
        assert!(bundle.wrapped_body.contains("\nlet = ;\n"));
        assert_eq!(bundle.last_statement_text, UNDEFINED_PLACEHOLDER);
    }

    #[test]
    fn test_multiline_import_keeps_line_count() {
        let entry = "import {\n  a,\n  b\n} from \"m\";\nb;";
        let (bundle, _) = bundle(entry, &[Module::new("m", "")], false);
        assert_eq!(bundle.wrapped_body.split('\n').count(), entry.split('\n').count() + 2);
        assert_eq!(bundle.last_statement_line, 5);
    }

    #[test]
    fn test_first_definition_of_a_module_wins() {
        let modules = [Module::new("m", "export const v = 1;"), Module::new("m", "export const v = 2;")];
        let (bundle, _) = bundle("import { v } from \"m\";\nv;", &modules, false);
        assert_eq!(bundle.wrapped_modules.len(), 1);
        assert!(bundle.wrapped_modules["m"].contains("const v = 1;"));
        assert!(!bundle.wrapped_modules["m"].contains("v = 2"));
    }
}
