//! Notebook test files.
//!
//! ```text
//! // module: utils
//! export const double = (x) => x * 2;
//! // test: doubles
//! import { double } from "utils";
//! double(21);
//! // expect: 42
//! ```
//!
//! Modules declared anywhere in the file are available to every test in it.
//! A test without an `expect` line only has to run without an error.

use notebook::Module;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub code: String,
    pub expected: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestFile {
    pub modules: Vec<Module>,
    pub cases: Vec<TestCase>,
}

enum Section {
    None,
    Module(Module),
    Case(TestCase),
}

pub fn parse(content: &str) -> TestFile {
    let mut file = TestFile::default();
    let mut section = Section::None;

    for line in content.lines() {
        if let Some(name) = line.strip_prefix("// module:") {
            close(&mut file, std::mem::replace(&mut section, Section::Module(Module::new(name.trim(), ""))));
        } else if let Some(name) = line.strip_prefix("// test:") {
            let case = TestCase {
                name: name.trim().to_string(),
                code: String::new(),
                expected: None,
            };
            close(&mut file, std::mem::replace(&mut section, Section::Case(case)));
        } else if let Some(expected) = line.strip_prefix("// expect:") {
            if let Section::Case(mut case) = std::mem::replace(&mut section, Section::None) {
                case.expected = Some(expected.trim().to_string());
                file.cases.push(case);
            }
        } else {
            match &mut section {
                Section::Module(module) => append(&mut module.source_text, line),
                Section::Case(case) => append(&mut case.code, line),
                Section::None => {}
            }
        }
    }
    close(&mut file, section);
    file
}

fn close(file: &mut TestFile, section: Section) {
    match section {
        Section::Module(module) => file.modules.push(module),
        Section::Case(case) => file.cases.push(case),
        Section::None => {}
    }
}

fn append(text: &mut String, line: &str) {
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(line);
}
