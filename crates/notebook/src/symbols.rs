//! Per-invocation synthetic identifiers.
//!
//! The generated unit and user code share one lexical scope, so every name
//! the harness introduces carries a fresh ULID that user code cannot guess.

use std::collections::BTreeMap;
use ulid::Ulid;

pub type SymbolId = Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    ModuleTable,
    Import,
    ImportAll,
    Export,
    Exports,
    Module,
    Define,
    Entry,
    Importer,
    Check,
    Last,
    Test,
}

impl Role {
    pub const ALL: [Role; 12] = [
        Role::ModuleTable,
        Role::Import,
        Role::ImportAll,
        Role::Export,
        Role::Exports,
        Role::Module,
        Role::Define,
        Role::Entry,
        Role::Importer,
        Role::Check,
        Role::Last,
        Role::Test,
    ];

    fn prefix(self) -> &'static str {
        match self {
            Role::ModuleTable => "modules",
            Role::Import => "import",
            Role::ImportAll => "import_all",
            Role::Export => "export",
            Role::Exports => "exports",
            Role::Module => "module",
            Role::Define => "def",
            Role::Entry => "entry",
            Role::Importer => "importer",
            Role::Check => "check",
            Role::Last => "last",
            Role::Test => "test",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessSymbols {
    names: BTreeMap<Role, String>,
}

impl HarnessSymbols {
    /// Draws a fresh identifier for every role.
    pub fn generate() -> Self {
        let names = Role::ALL
            .into_iter()
            .map(|role| {
                let id: SymbolId = Ulid::new();
                let name = format!("__nb_{}_{}", role.prefix(), id.to_string().to_lowercase());
                (role, name)
            })
            .collect();
        Self { names }
    }

    pub fn name(&self, role: Role) -> &str {
        self.names.get(&role).map(String::as_str).unwrap_or_default()
    }

    /// Name of the `index`-th member of a numbered role, e.g. the function
    /// wrapping the third module.
    pub fn indexed(&self, role: Role, index: usize) -> String {
        format!("{}_{index}", self.name(role))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.values().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_names_are_fresh_per_invocation() {
        let first = HarnessSymbols::generate();
        let second = HarnessSymbols::generate();
        for role in Role::ALL {
            assert!(first.name(role).starts_with("__nb_"));
            assert_ne!(first.name(role), second.name(role));
        }
        let distinct: BTreeSet<&str> = first.names().collect();
        assert_eq!(distinct.len(), Role::ALL.len());
    }

    #[test]
    fn test_indexed_names() {
        let symbols = HarnessSymbols::generate();
        let module = symbols.indexed(Role::Module, 2);
        assert!(module.starts_with(symbols.name(Role::Module)));
        assert!(module.ends_with("_2"));
    }
}
