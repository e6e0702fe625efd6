//! Link errors, wrapped evaluation errors and the sentinel based line mapper
//! that attributes a line of the generated unit to the fragment it came from.

use ariadne::{Config, IndexType, Label, Report, ReportKind, Source};
use serde::Serialize;
use std::ops::Range;

/// Marks the line right before user code inside a wrapped module or body.
pub const LINE_SENTINEL: &str = "// __CHECK_FOR_LINE_NUMBER__";

/// Marks the start of synthesized trailing code after the entry body.
pub const RETURN_SENTINEL: &str = "// __CHECK_FOR_RETURN_STATEMENT__";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("Module {module} not found")]
    ModuleNotFound { module: String },
    #[error("The requested module '{module}' does not provide an export named '{export}'")]
    MissingExport { module: String, export: String },
    #[error("Import cycle detected: {}", cycle.join(" -> "))]
    ImportCycle { cycle: Vec<String> },
}

/// An exception that escaped the generated unit, with that unit's full text
/// attached so callers can rerun the sentinel search against it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct WrappedError {
    pub name: String,
    pub message: String,
    pub stack: String,
    pub generated_source: String,
    /// Where the failing line lives, when it could be attributed.
    pub region: Option<SourceRegion>,
    /// Plain text `ariadne` report against the original fragment.
    pub report: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("RuntimeError: {0}")]
    Link(#[from] RuntimeError),
    #[error(transparent)]
    Evaluation(#[from] WrappedError),
    #[error("{0}")]
    Interrupted(String),
}

/// Index of the first line at or after `start` that contains `sentinel`.
pub fn find_sentinel(lines: &[&str], start: usize, sentinel: &str) -> Option<usize> {
    lines
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, line)| line.contains(sentinel))
        .map(|(index, _)| index)
}

/// Part of the generated unit a line belongs to. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SourceRegion {
    Module { name: String, line: usize },
    Entry { line: usize },
    Generated { line: usize },
}

#[derive(Debug, Clone)]
struct Fragment {
    /// `None` for the entry body.
    module: Option<String>,
    source: String,
    line_count: usize,
}

/// Translates generated lines back to fragment lines.
///
/// Fragments are registered in the order their wrapped bodies appear in the
/// generated unit: every module, then the entry body. Each fragment opens at
/// the first line sentinel past the previous fragment's lines, so sentinel
/// text inside user code is never mistaken for a fragment boundary.
#[derive(Debug, Clone, Default)]
pub struct LineMapper {
    fragments: Vec<Fragment>,
    last_statement_line: usize,
    last_statement_line_count: usize,
}

impl LineMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, name: &str, source: &str) {
        self.fragments.push(Fragment {
            module: Some(name.to_string()),
            source: source.to_string(),
            line_count: line_count(source),
        });
    }

    /// `last_statement_line` is the 1-based entry line the extracted last
    /// statement starts on.
    pub fn set_entry(&mut self, source: &str, last_statement_line: usize, last_statement_text: &str) {
        self.fragments.push(Fragment {
            module: None,
            source: source.to_string(),
            line_count: line_count(source),
        });
        self.last_statement_line = last_statement_line;
        self.last_statement_line_count = line_count(last_statement_text);
    }

    /// Attributes the 1-based `generated_line` of `generated_source`.
    pub fn locate(&self, generated_source: &str, generated_line: usize) -> SourceRegion {
        let lines: Vec<&str> = generated_source.split('\n').collect();
        let Some(target) = generated_line.checked_sub(1) else {
            return SourceRegion::Generated { line: generated_line };
        };
        let mut search_from = 0;
        for fragment in &self.fragments {
            let Some(sentinel) = find_sentinel(&lines, search_from, LINE_SENTINEL) else {
                break;
            };
            search_from = sentinel + 1 + fragment.line_count;
            if target > sentinel && target <= sentinel + fragment.line_count {
                let line = target - sentinel;
                return match &fragment.module {
                    Some(name) => SourceRegion::Module {
                        name: name.clone(),
                        line,
                    },
                    None => SourceRegion::Entry { line },
                };
            }
        }
        if let Some(return_sentinel) = find_sentinel(&lines, search_from, RETURN_SENTINEL) {
            // The line after the sentinel opens the captured expression.
            let first = return_sentinel + 2;
            if target >= first && target < first + self.last_statement_line_count {
                return SourceRegion::Entry {
                    line: self.last_statement_line + (target - first),
                };
            }
        }
        SourceRegion::Generated { line: generated_line }
    }

    /// Renders a report for `region`, pointing at `column` (1-based) of the
    /// fragment line. `None` when the region has no original fragment.
    pub fn render(&self, region: &SourceRegion, column: usize, message: &str) -> Option<String> {
        let (filename, source, line) = match region {
            SourceRegion::Module { name, line } => {
                let fragment = self
                    .fragments
                    .iter()
                    .find(|fragment| fragment.module.as_deref() == Some(name.as_str()))?;
                (name.as_str(), fragment.source.as_str(), *line)
            }
            SourceRegion::Entry { line } => {
                let fragment = self.fragments.iter().find(|fragment| fragment.module.is_none())?;
                ("main", fragment.source.as_str(), *line)
            }
            SourceRegion::Generated { .. } => return None,
        };
        let range = line_span(source, line, column)?;
        render_report(filename, source, range, message)
    }
}

fn line_count(text: &str) -> usize {
    text.split('\n').count()
}

/// Byte range from `column` to the end of the 1-based `line`.
fn line_span(source: &str, line: usize, column: usize) -> Option<Range<usize>> {
    let mut start = 0;
    for (index, text) in source.split('\n').enumerate() {
        if index + 1 == line {
            let offset = text
                .char_indices()
                .nth(column.saturating_sub(1))
                .map(|(offset, _)| offset)
                .unwrap_or(0);
            let end = (start + text.len()).max(start + offset + 1).min(source.len());
            return Some(start + offset..end);
        }
        start += text.len() + 1;
    }
    None
}

/// `range` is a byte range of `source`.
pub fn render_report(filename: &str, source: &str, range: Range<usize>, message: &str) -> Option<String> {
    let mut report_bytes = Vec::new();
    Report::build(ReportKind::Error, (filename, range.clone()))
        .with_config(
            Config::default()
                .with_color(false)
                .with_index_type(IndexType::Byte),
        )
        .with_message(message)
        .with_label(Label::new((filename, range)).with_message(message))
        .finish()
        .write((filename, Source::from(source)), &mut report_bytes)
        .ok()?;
    String::from_utf8(report_bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GENERATED: &str = "\
function entry() {
const modules = {
\"utils\": async function () {
const EXPORTS = {}; // __CHECK_FOR_LINE_NUMBER__
export const double = x => x * 2;
throw new Error(\"utils\");
return EXPORTS;
},
};
async function body() {
const EXPORTS = {}; // __CHECK_FOR_LINE_NUMBER__
const a = 1;


// __CHECK_FOR_RETURN_STATEMENT__
const last = (
a +
  missing
);
return last;
}
}";

    fn mapper() -> LineMapper {
        let mut mapper = LineMapper::new();
        mapper.add_module("utils", "export const double = x => x * 2;\nthrow new Error(\"utils\");");
        mapper.set_entry("const a = 1;\na +\n  missing", 2, "a +\n  missing");
        mapper
    }

    #[test]
    fn test_find_sentinel() {
        let lines: Vec<&str> = GENERATED.split('\n').collect();
        assert_eq!(find_sentinel(&lines, 0, LINE_SENTINEL), Some(3));
        assert_eq!(find_sentinel(&lines, 4, LINE_SENTINEL), Some(10));
        assert_eq!(find_sentinel(&lines, 11, LINE_SENTINEL), None);
        assert_eq!(find_sentinel(&lines, 0, RETURN_SENTINEL), Some(14));
    }

    #[test]
    fn test_locate_regions() {
        let mapper = mapper();
        assert_eq!(
            mapper.locate(GENERATED, 6),
            SourceRegion::Module {
                name: "utils".to_string(),
                line: 2
            }
        );
        assert_eq!(mapper.locate(GENERATED, 12), SourceRegion::Entry { line: 1 });
        assert_eq!(mapper.locate(GENERATED, 18), SourceRegion::Entry { line: 3 });
        assert_eq!(mapper.locate(GENERATED, 2), SourceRegion::Generated { line: 2 });
        assert_eq!(mapper.locate(GENERATED, 19), SourceRegion::Generated { line: 19 });
    }

    #[test]
    fn test_sentinel_text_inside_a_fragment() {
        let generated = GENERATED.replace(
            "export const double = x => x * 2;",
            "export const marker = \"// __CHECK_FOR_LINE_NUMBER__\";",
        );
        let mut mapper = LineMapper::new();
        mapper.add_module(
            "utils",
            "export const marker = \"// __CHECK_FOR_LINE_NUMBER__\";\nthrow new Error(\"utils\");",
        );
        mapper.set_entry("const a = 1;\na +\n  missing", 2, "a +\n  missing");
        assert_eq!(
            mapper.locate(&generated, 6),
            SourceRegion::Module {
                name: "utils".to_string(),
                line: 2
            }
        );
        assert_eq!(mapper.locate(&generated, 12), SourceRegion::Entry { line: 1 });
        assert_eq!(mapper.locate(&generated, 18), SourceRegion::Entry { line: 3 });
    }

    #[test]
    fn test_render_points_at_fragment() {
        let mapper = mapper();
        let report = mapper
            .render(&SourceRegion::Entry { line: 3 }, 3, "missing is not defined")
            .expect("entry regions render");
        assert!(report.contains("missing is not defined"), "{report}");
        assert!(report.contains("main"), "{report}");
        assert_eq!(mapper.render(&SourceRegion::Generated { line: 1 }, 1, "x"), None);
    }

    #[test]
    fn test_report_after_multibyte_text() {
        let source = "const s = \"😀😀😀😀\";\nmissing + 1 + 2 + 3 + 4 + 5;";
        let mut mapper = LineMapper::new();
        mapper.set_entry(source, 2, "missing + 1 + 2 + 3 + 4 + 5");
        let report = mapper
            .render(&SourceRegion::Entry { line: 2 }, 1, "missing is not defined")
            .expect("entry regions render");
        assert!(report.contains("main:2:1 ]") || report.contains("main:2:1]"), "{report}");
    }

    #[test]
    fn test_runtime_error_messages() {
        let cycle = RuntimeError::ImportCycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(cycle.to_string(), "Import cycle detected: a -> b -> a");
        let missing = RuntimeError::MissingExport {
            module: "utils".into(),
            export: "triple".into(),
        };
        assert!(missing.to_string().contains("'utils'"));
        assert!(missing.to_string().contains("'triple'"));
    }
}
