use std::{cell::RefCell, fmt::Display, rc::Rc};

use rustc_hash::FxHashMap;

use crate::{ast::FunctionDeclaration, tokenizer::Token};

use super::{
    class::{Class, Instance},
    module::NativeFunction,
    scope::VariableScope,
    Interpreter, Interrupt, RuntimeError, Value,
};

/// A function declared in script code, closed over the scope it was declared
/// in. Methods additionally close over a `this` scope created by `bind`.
#[derive(Clone)]
pub struct ScriptFunction {
    pub declaration: Rc<FunctionDeclaration>,
    pub closure: Rc<RefCell<VariableScope>>,
    pub is_constructor: bool,
}

impl ScriptFunction {
    pub fn bind(&self, instance: &Rc<RefCell<Instance>>) -> Self {
        let scope = VariableScope::boxed(Some(self.closure.clone()));
        scope
            .borrow_mut()
            .define("this", Value::Instance(instance.clone()));
        Self {
            declaration: self.declaration.clone(),
            closure: scope,
            is_constructor: self.is_constructor,
        }
    }

    fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let scope = VariableScope::boxed(Some(self.closure.clone()));
        for (parameter, argument) in self.declaration.parameters.iter().zip(arguments) {
            scope.borrow_mut().define(parameter.lexeme.clone(), argument);
        }

        // The body runs directly in the parameter scope; resolution counted
        // its hops the same way.
        let result = interpreter.with_scope(scope, |interpreter| {
            for statement in &self.declaration.body {
                interpreter.execute(statement)?;
            }
            Ok(Value::Nil)
        });

        let value = match result {
            Ok(value) | Err(Interrupt::Return(value)) => value,
            Err(Interrupt::Error(error)) => return Err(error),
            Err(Interrupt::Break | Interrupt::Continue) => {
                return Err(RuntimeError::plain(
                    "Loop control flow escaped the function body.",
                ));
            }
        };

        if self.is_constructor {
            // Constructors always hand back the receiver that `bind` stored.
            return self
                .closure
                .borrow()
                .get_local("this")
                .ok_or_else(|| RuntimeError::plain("Constructor invoked without a receiver."));
        }
        Ok(value)
    }
}

impl std::fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("name", &self.declaration.name.lexeme)
            .field("closure", &self.closure.as_ptr())
            .field("is_constructor", &self.is_constructor)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Callable {
    Function(ScriptFunction),
    Native(NativeFunction),
    Constructor(Rc<Class>),
}

impl Callable {
    pub fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
        at: &Token,
    ) -> Result<Value, RuntimeError> {
        match self {
            Callable::Function(function) => function.call(interpreter, arguments),
            Callable::Native(function) => function
                .call(&arguments)
                .map_err(|error| error.or_at(at)),
            Callable::Constructor(class) => Self::instantiate(interpreter, class, arguments),
        }
    }

    /// Creates an instance: field defaults are seeded first, then the declared
    /// constructor runs. A class without a constructor is instantiated with
    /// zero arguments and field seeding only.
    fn instantiate(
        interpreter: &mut Interpreter,
        class: &Rc<Class>,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let instance = Rc::new(RefCell::new(Instance {
            class: class.clone(),
            fields: FxHashMap::default(),
        }));

        for (field, owner) in class.all_fields() {
            let scope = VariableScope::boxed(Some(owner.closure.clone()));
            scope
                .borrow_mut()
                .define("this", Value::Instance(instance.clone()));
            let value = match &field.initializer {
                Some(initializer) => interpreter
                    .with_scope(scope, |interpreter| interpreter.evaluate(initializer))?,
                None => Value::Nil,
            };
            instance
                .borrow_mut()
                .fields
                .insert(field.name.lexeme.clone(), value);
        }

        if let Some(constructor) = &class.constructor {
            constructor.bind(&instance).call(interpreter, arguments)?;
        }
        Ok(Value::Instance(instance))
    }

    pub fn arity(&self) -> usize {
        match self {
            Callable::Function(function) => function.declaration.parameters.len(),
            Callable::Native(function) => function.arity,
            Callable::Constructor(class) => class
                .constructor
                .as_ref()
                .map_or(0, |constructor| constructor.declaration.parameters.len()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Callable::Function(function) => &function.declaration.name.lexeme,
            Callable::Native(function) => &function.name,
            Callable::Constructor(class) => &class.name,
        }
    }
}

impl Display for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Function(function) => {
                write!(f, "<function {}>", function.declaration.name.lexeme)
            }
            Callable::Native(function) => write!(f, "<native function {}>", function.name),
            Callable::Constructor(class) => write!(f, "<class {}>", class.name),
        }
    }
}
