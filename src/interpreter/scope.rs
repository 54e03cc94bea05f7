use std::{cell::RefCell, fmt::Debug, rc::Rc};

use rustc_hash::FxHashMap;

use super::Value;

/// A single link in the runtime scope chain. Scopes are shared through
/// `Rc<RefCell<..>>` so closures keep the scopes they captured alive after
/// the interpreter has moved on.
#[derive(Clone, Default)]
pub struct VariableScope {
    values: FxHashMap<String, Value>,
    parent: Option<Rc<RefCell<VariableScope>>>,
}

impl VariableScope {
    pub fn boxed(parent: Option<Rc<RefCell<VariableScope>>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            values: FxHashMap::default(),
            parent,
        }))
    }

    /// Defines or redefines a name in this scope only.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Looks up a name in this scope only, without climbing.
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    /// Assigns to an existing binding in this scope only.
    pub fn assign_local(&mut self, name: &str, value: Value) -> bool {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Looks up a name by climbing the parent chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.values.get(name) {
            return Some(value.clone());
        }
        self.parent
            .as_ref()
            .and_then(|parent| parent.borrow().get(name))
    }

    fn climb(scope: Rc<RefCell<VariableScope>>, hops: usize) -> Rc<RefCell<VariableScope>> {
        let mut scope = scope;
        for _ in 0..hops {
            let parent = scope.borrow().parent.clone();
            scope = match parent {
                Some(parent) => parent,
                None => return scope,
            };
        }
        scope
    }

    /// Reads a name from the scope exactly `hops` parent links up. The
    /// resolution pass guarantees the binding lives precisely there.
    pub fn get_at(scope: Rc<RefCell<VariableScope>>, hops: usize, name: &str) -> Option<Value> {
        Self::climb(scope, hops).borrow().get_local(name)
    }

    /// Writes a name in the scope exactly `hops` parent links up.
    pub fn assign_at(
        scope: Rc<RefCell<VariableScope>>,
        hops: usize,
        name: &str,
        value: Value,
    ) -> bool {
        Self::climb(scope, hops).borrow_mut().assign_local(name, value)
    }
}

impl Debug for VariableScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableScope")
            .field("names", &self.values.keys().collect::<Vec<_>>())
            .field("parent", &self.parent.as_ref().map(Rc::as_ptr))
            .finish()
    }
}
