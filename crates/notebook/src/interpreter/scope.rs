use super::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignError {
    NotDefined,
    Constant,
}

#[derive(Debug)]
struct Binding {
    value: Value,
    mutable: bool,
}

#[derive(Debug, Default)]
struct ScopeData {
    bindings: RefCell<HashMap<String, Binding>>,
    parent: Option<Scope>,
}

/// Lexical environment. Cloning shares the same bindings.
#[derive(Debug, Clone, Default)]
pub struct Scope(Rc<ScopeData>);

impl Scope {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self(Rc::new(ScopeData {
            bindings: RefCell::default(),
            parent: Some(self.clone()),
        }))
    }

    pub fn declare(&self, name: impl Into<String>, value: Value, mutable: bool) {
        self.0
            .bindings
            .borrow_mut()
            .insert(name.into(), Binding { value, mutable });
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.0.bindings.borrow().contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(binding) = scope.0.bindings.borrow().get(name) {
                return Some(binding.value.clone());
            }
            scope = scope.0.parent.as_ref()?;
        }
    }

    pub fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        let mut scope = self;
        loop {
            if let Some(binding) = scope.0.bindings.borrow_mut().get_mut(name) {
                if !binding.mutable {
                    return Err(AssignError::Constant);
                }
                binding.value = value;
                return Ok(());
            }
            scope = scope.0.parent.as_ref().ok_or(AssignError::NotDefined)?;
        }
    }

    /// Drops every binding, breaking reference cycles between closures and
    /// the scopes they capture.
    pub fn clear(&self) {
        let bindings = std::mem::take(&mut *self.0.bindings.borrow_mut());
        drop(bindings);
    }
}
