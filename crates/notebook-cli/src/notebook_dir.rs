//! A notebook on disk: `main.js` is the entry body, every sibling `*.js`
//! file is a module named by its file stem, and `tests.txt` holds one test
//! expression per line.

use anyhow::{Context, Result, bail};
use notebook::ScriptRequest;
use std::fs;
use std::path::Path;

pub const ENTRY_FILE: &str = "main.js";
pub const TESTS_FILE: &str = "tests.txt";

pub fn load(directory: &Path) -> Result<ScriptRequest> {
    let entry_path = directory.join(ENTRY_FILE);
    if !entry_path.is_file() {
        bail!("{} has no {ENTRY_FILE}", directory.display());
    }
    let entry_body = fs::read_to_string(&entry_path)
        .with_context(|| format!("Failed to read {}", entry_path.display()))?;
    let mut request = ScriptRequest::new(entry_body);

    let mut module_paths = fs::read_dir(directory)
        .with_context(|| format!("Failed to list {}", directory.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension().is_some_and(|extension| extension == "js")
                && path.file_name().is_some_and(|name| name != ENTRY_FILE)
        })
        .collect::<Vec<_>>();
    module_paths.sort();
    for path in module_paths {
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let source = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        log::debug!("Module '{name}' from {}", path.display());
        request = request.with_module(name, source);
    }

    let tests_path = directory.join(TESTS_FILE);
    if tests_path.is_file() {
        let tests = fs::read_to_string(&tests_path)
            .with_context(|| format!("Failed to read {}", tests_path.display()))?;
        request = request.with_tests(tests.lines().map(str::trim).filter(|line| !line.is_empty()));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_directory() {
        let directory = std::env::temp_dir().join(format!("notebook-dir-{}", std::process::id()));
        fs::create_dir_all(&directory).expect("temp dir");
        fs::write(directory.join(ENTRY_FILE), "import { a } from \"lib\";\na;").expect("write entry");
        fs::write(directory.join("lib.js"), "export const a = 1;").expect("write module");
        fs::write(directory.join("notes.md"), "ignored").expect("write notes");
        fs::write(directory.join(TESTS_FILE), "a === 1\n\n a > 0 \n").expect("write tests");

        let request = load(&directory).expect("loads");
        assert_eq!(request.entry_body, "import { a } from \"lib\";\na;");
        assert_eq!(request.modules.len(), 1);
        assert_eq!(request.modules[0].name, "lib");
        assert_eq!(request.unit_test_expressions, vec!["a === 1", "a > 0"]);
        let _ = fs::remove_dir_all(&directory);
    }

    #[test]
    fn test_missing_entry() {
        let directory = std::env::temp_dir().join(format!("notebook-empty-{}", std::process::id()));
        fs::create_dir_all(&directory).expect("temp dir");
        assert!(load(&directory).is_err());
        let _ = fs::remove_dir_all(&directory);
    }
}
