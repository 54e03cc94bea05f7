use std::{fmt::Debug, rc::Rc};

use super::{RuntimeError, Value};

/// A function implemented by the host and exposed to scripts through a
/// native module.
#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    pub arity: usize,
    function: Rc<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        arity: usize,
        function: impl Fn(&[Value]) -> Result<Value, RuntimeError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            function: Rc::new(function),
        }
    }

    pub fn call(&self, arguments: &[Value]) -> Result<Value, RuntimeError> {
        (self.function)(arguments)
    }
}

impl Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// A named collection of host functions. Scripts bring a module's functions
/// into scope wholesale with `using <module>;` or bind a single function with
/// `native fun <module>.<name>(..);`.
#[derive(Debug, Clone, Default)]
pub struct NativeModule {
    name: String,
    functions: Vec<NativeFunction>,
}

impl NativeModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_function(
        mut self,
        name: impl Into<String>,
        arity: usize,
        function: impl Fn(&[Value]) -> Result<Value, RuntimeError> + 'static,
    ) -> Self {
        self.functions.push(NativeFunction::new(name, arity, function));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn functions(&self) -> &[NativeFunction] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&NativeFunction> {
        self.functions.iter().find(|function| function.name == name)
    }
}
