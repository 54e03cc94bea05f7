pub mod callable;
pub mod class;
pub mod module;
pub mod scope;

use std::{
    cell::RefCell,
    fmt::{Debug, Display},
    rc::Rc,
};

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    ast::{ClassDeclaration, ExprId, Expression, Literal, Statement},
    tokenizer::{Token, TokenType},
};

use self::{
    callable::{Callable, ScriptFunction},
    class::{Class, Instance},
    module::NativeModule,
    scope::VariableScope,
};

#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    String(String),
    Char(char),
    Boolean(bool),
    Array(Rc<RefCell<Vec<Value>>>),
    Callable(Rc<Callable>),
    Instance(Rc<RefCell<Instance>>),
    Nil,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Boolean(b) => *b,
            _ => true,
        }
    }

    /// Value equality. Numbers compare numerically with NaN equal to itself,
    /// arrays compare element-wise, instances and callables by identity.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b
                }
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| a.equals(b))
            }
            (Value::Callable(a), Value::Callable(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Nil, Value::Nil) => true,
            _ => false,
        }
    }
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Number(n) => Value::Number(*n),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Char(c) => Value::Char(*c),
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Nil => Value::Nil,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Char(c) => write!(f, "{}", c),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Array(values) => {
                write!(f, "[")?;
                for (i, value) in values.borrow().iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, "]")
            }
            Value::Callable(callable) => write!(f, "{}", callable),
            Value::Instance(instance) => {
                write!(f, "<instance of {}>", instance.borrow().class.name)
            }
            Value::Nil => write!(f, "nil"),
        }
    }
}

/// An error raised while evaluating script code, pointing at the offending
/// token when one is known.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub token: Option<Token>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, token: &Token) -> Self {
        Self {
            message: message.into(),
            token: Some(token.clone()),
        }
    }

    pub fn plain(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            token: None,
        }
    }

    pub fn or_at(mut self, token: &Token) -> Self {
        if self.token.is_none() {
            self.token = Some(token.clone());
        }
        self
    }
}

/// Non-error control flow travelling up the statement walk, kept separate
/// from runtime errors so loops and calls can intercept exactly the signals
/// addressed to them.
#[derive(Debug)]
pub enum Interrupt {
    Break,
    Continue,
    Return(Value),
    Error(RuntimeError),
}

impl From<RuntimeError> for Interrupt {
    fn from(error: RuntimeError) -> Self {
        Interrupt::Error(error)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Interpreter has already run; restore it before interpreting again.")]
    IllegalReuse,
    #[error("A control flow signal escaped the script body.")]
    StrayControlFlow,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Knobs the embedding host can set before a script runs.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// How deep array comprehensions may nest.
    pub max_comprehension_depth: usize,
    /// Whether `using` and `native fun` declarations are permitted.
    pub allow_native_access: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_comprehension_depth: 10,
            allow_native_access: true,
        }
    }
}

/// Tree-walking evaluator. An interpreter instance runs one script and is
/// then spent; `restore` resets it for reuse.
pub struct Interpreter {
    global_scope: Rc<RefCell<VariableScope>>,
    visiting_scope: Rc<RefCell<VariableScope>>,
    locals: FxHashMap<ExprId, usize>,
    modules: FxHashMap<String, Rc<NativeModule>>,
    options: ExecutionOptions,
    comprehension_depth: usize,
    has_run: bool,
    output: Rc<RefCell<dyn std::io::Write>>,
}

impl Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("locals", &self.locals)
            .field("has_run", &self.has_run)
            .finish()
    }
}

impl Interpreter {
    pub fn new(output: Rc<RefCell<dyn std::io::Write>>) -> Self {
        let global_scope = Self::fresh_globals();
        Self {
            visiting_scope: global_scope.clone(),
            global_scope,
            locals: FxHashMap::default(),
            modules: FxHashMap::default(),
            options: ExecutionOptions::default(),
            comprehension_depth: 0,
            has_run: false,
            output,
        }
    }

    fn fresh_globals() -> Rc<RefCell<VariableScope>> {
        let globals = VariableScope::boxed(None);
        globals.borrow_mut().define(
            "clock",
            Value::Callable(Rc::new(Callable::Native(module::NativeFunction::new(
                "clock",
                0,
                |_: &[Value]| {
                    Ok(Value::Number(
                        std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .map_or(0.0, |elapsed| elapsed.as_secs_f64()),
                    ))
                },
            )))),
        );
        globals
    }

    pub fn set_options(&mut self, options: ExecutionOptions) {
        self.options = options;
    }

    pub fn load_modules(&mut self, modules: &FxHashMap<String, Rc<NativeModule>>) {
        self.modules = modules.clone();
    }

    /// Records a resolved reference: `hops` parent links separate the use
    /// from the scope declaring the name. Unrecorded references are global.
    pub fn resolve(&mut self, id: ExprId, hops: usize) {
        self.locals.insert(id, hops);
    }

    pub fn distance(&self, id: ExprId) -> Option<usize> {
        self.locals.get(&id).copied()
    }

    /// Resets the interpreter to a freshly constructed state, dropping all
    /// script state while keeping the configured modules and options.
    pub fn restore(&mut self) {
        self.global_scope = Self::fresh_globals();
        self.visiting_scope = self.global_scope.clone();
        self.locals.clear();
        self.comprehension_depth = 0;
        self.has_run = false;
    }

    pub fn interpret(&mut self, statements: &[Statement]) -> Result<(), ExecutionError> {
        if self.has_run {
            return Err(ExecutionError::IllegalReuse);
        }
        self.has_run = true;
        debug!("interpreting {} top-level statements", statements.len());

        for statement in statements {
            match self.execute(statement) {
                Ok(()) => {}
                Err(Interrupt::Error(error)) => return Err(error.into()),
                Err(Interrupt::Break | Interrupt::Continue | Interrupt::Return(_)) => {
                    return Err(ExecutionError::StrayControlFlow);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn execute(&mut self, statement: &Statement) -> Result<(), Interrupt> {
        match statement {
            Statement::Expression(expression) => {
                self.evaluate(expression)?;
            }
            Statement::Print(expression) => {
                let value = self.evaluate(expression)?;
                writeln!(self.output.borrow_mut(), "{}", value)
                    .map_err(|error| RuntimeError::plain(format!("IO error: {}", error)))?;
            }
            Statement::Var { name, initializer } => {
                let value = match initializer {
                    Some(initializer) => self.evaluate(initializer)?,
                    None => Value::Nil,
                };
                self.visiting_scope
                    .borrow_mut()
                    .define(name.lexeme.clone(), value);
            }
            Statement::Block(statements) => {
                let scope = VariableScope::boxed(Some(self.visiting_scope.clone()));
                self.with_scope(scope, |interpreter| {
                    for statement in statements {
                        interpreter.execute(statement)?;
                    }
                    Ok::<(), Interrupt>(())
                })?;
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)?;
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)?;
                }
            }
            Statement::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute(body) {
                        Err(Interrupt::Break) => break,
                        Err(Interrupt::Continue) => {}
                        other => other?,
                    }
                }
            }
            Statement::DoWhile { body, condition } => loop {
                match self.execute(body) {
                    Err(Interrupt::Break) => break,
                    Err(Interrupt::Continue) => {}
                    other => other?,
                }
                if !self.evaluate(condition)?.is_truthy() {
                    break;
                }
            },
            Statement::For {
                initializer,
                condition,
                increment,
                body,
            } => {
                let scope = VariableScope::boxed(Some(self.visiting_scope.clone()));
                self.with_scope(scope, |interpreter| {
                    if let Some(initializer) = initializer {
                        interpreter.execute(initializer)?;
                    }
                    loop {
                        if let Some(condition) = condition {
                            if !interpreter.evaluate(condition)?.is_truthy() {
                                break;
                            }
                        }
                        match interpreter.execute(body) {
                            Err(Interrupt::Break) => break,
                            // The increment still runs after a continue.
                            Err(Interrupt::Continue) => {}
                            other => other?,
                        }
                        if let Some(increment) = increment {
                            interpreter.evaluate(increment)?;
                        }
                    }
                    Ok::<(), Interrupt>(())
                })?;
            }
            Statement::ForEach {
                variable,
                iterable,
                body,
            } => {
                let values = self.iterable_values(iterable)?;
                let scope = VariableScope::boxed(Some(self.visiting_scope.clone()));
                self.with_scope(scope, |interpreter| {
                    for value in values {
                        interpreter
                            .visiting_scope
                            .borrow_mut()
                            .define(variable.lexeme.clone(), value);
                        match interpreter.execute(body) {
                            Err(Interrupt::Break) => break,
                            Err(Interrupt::Continue) => {}
                            other => other?,
                        }
                    }
                    Ok::<(), Interrupt>(())
                })?;
            }
            Statement::Repeat { count, body } => {
                let value = self.evaluate(count)?;
                let times = match value {
                    Value::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as usize,
                    value => {
                        return Err(RuntimeError::new(
                            format!("Repeat count must be a non-negative whole number, got {}.", value),
                            count.token(),
                        )
                        .into());
                    }
                };
                for _ in 0..times {
                    match self.execute(body) {
                        Err(Interrupt::Break) => break,
                        Err(Interrupt::Continue) => {}
                        other => other?,
                    }
                }
            }
            Statement::Switch {
                subject,
                cases,
                default,
            } => {
                let value = self.evaluate(subject)?;
                let matched = cases
                    .iter()
                    .find(|case| value.equals(&Value::from(&case.value)));
                let result = match matched {
                    Some(case) => self.execute(&case.body),
                    None => match default {
                        Some(default) => self.execute(default),
                        None => Ok(()),
                    },
                };
                match result {
                    // A break leaves the switch, not any enclosing loop.
                    Err(Interrupt::Break) => {}
                    other => other?,
                }
            }
            Statement::Break(_) => return Err(Interrupt::Break),
            Statement::Continue(_) => return Err(Interrupt::Continue),
            Statement::Return { value, .. } => {
                let value = match value {
                    Some(value) => self.evaluate(value)?,
                    None => Value::Nil,
                };
                return Err(Interrupt::Return(value));
            }
            Statement::Function { declaration, .. } => {
                let function = ScriptFunction {
                    declaration: declaration.clone(),
                    closure: self.visiting_scope.clone(),
                    is_constructor: false,
                };
                self.visiting_scope.borrow_mut().define(
                    declaration.name.lexeme.clone(),
                    Value::Callable(Rc::new(Callable::Function(function))),
                );
            }
            Statement::Class(class) => self.execute_class_declaration(class)?,
            Statement::NativeFunction {
                name,
                module,
                parameters,
            } => {
                let function = self.native_function(module, name)?;
                if function.arity != parameters.len() {
                    return Err(RuntimeError::new(
                        format!(
                            "Native function '{}' takes {} parameters, but {} were declared.",
                            name.lexeme,
                            function.arity,
                            parameters.len()
                        ),
                        name,
                    )
                    .into());
                }
                self.visiting_scope.borrow_mut().define(
                    name.lexeme.clone(),
                    Value::Callable(Rc::new(Callable::Native(function))),
                );
            }
            Statement::Using { module } => {
                let native_module = self.module(module)?;
                for function in native_module.functions() {
                    self.global_scope.borrow_mut().define(
                        function.name.clone(),
                        Value::Callable(Rc::new(Callable::Native(function.clone()))),
                    );
                }
            }
        }
        Ok(())
    }

    fn execute_class_declaration(&mut self, class: &ClassDeclaration) -> Result<(), Interrupt> {
        let superclass = match &class.superclass {
            Some(superclass) => {
                let name = superclass.token();
                match self.evaluate(superclass)? {
                    Value::Callable(callable) => match callable.as_ref() {
                        Callable::Constructor(superclass) => Some(superclass.clone()),
                        _ => {
                            return Err(RuntimeError::new(
                                format!("Superclass must be a class, got {}.", callable),
                                name,
                            )
                            .into());
                        }
                    },
                    value => {
                        return Err(RuntimeError::new(
                            format!("Superclass must be a class, got {}.", value),
                            name,
                        )
                        .into());
                    }
                }
            }
            None => None,
        };

        // Reject cyclic hierarchies before anything can recurse through them.
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        visited.insert(&class.name.lexeme);
        let mut ancestor = superclass.as_deref();
        while let Some(current) = ancestor {
            if !visited.insert(&current.name) {
                return Err(RuntimeError::new(
                    format!("Cyclic inheritance involving class '{}'.", current.name),
                    &class.name,
                )
                .into());
            }
            ancestor = current.superclass.as_deref();
        }

        let closure = match &superclass {
            Some(superclass) => {
                let scope = VariableScope::boxed(Some(self.visiting_scope.clone()));
                scope.borrow_mut().define(
                    "super",
                    Value::Callable(Rc::new(Callable::Constructor(superclass.clone()))),
                );
                scope
            }
            None => self.visiting_scope.clone(),
        };

        let constructor = class.constructor.as_ref().map(|declaration| ScriptFunction {
            declaration: declaration.clone(),
            closure: closure.clone(),
            is_constructor: true,
        });
        let methods = class
            .methods
            .iter()
            .map(|method| {
                (
                    method.name.lexeme.clone(),
                    ScriptFunction {
                        declaration: method.clone(),
                        closure: closure.clone(),
                        is_constructor: false,
                    },
                )
            })
            .collect();

        self.visiting_scope.borrow_mut().define(
            class.name.lexeme.clone(),
            Value::Callable(Rc::new(Callable::Constructor(Rc::new(Class {
                name: class.name.lexeme.clone(),
                superclass,
                constructor,
                methods,
                fields: class.fields.clone(),
                closure,
            })))),
        );
        Ok(())
    }

    pub(crate) fn with_scope<T, E>(
        &mut self,
        scope: Rc<RefCell<VariableScope>>,
        f: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E> {
        let previous = std::mem::replace(&mut self.visiting_scope, scope);
        let result = f(self);
        self.visiting_scope = previous;
        result
    }

    pub(crate) fn evaluate(&mut self, expression: &Expression) -> Result<Value, RuntimeError> {
        match expression {
            Expression::Literal { value, .. } => Ok(Value::from(value)),
            Expression::Grouping(inner) => self.evaluate(inner),
            Expression::Variable { id, name } => self.look_up(*id, name),
            Expression::Assign { id, name, value } => {
                let value = self.evaluate(value)?;
                self.assign(*id, name, value.clone())?;
                Ok(value)
            }
            Expression::CompoundAssign {
                id,
                name,
                operator,
                value,
            } => {
                let current = self.look_up(*id, name)?;
                let operand = self.evaluate(value)?;
                let base = operator.token_type.assigns_with().ok_or_else(|| {
                    RuntimeError::new(
                        format!("'{}' is not a compound assignment operator.", operator.lexeme),
                        operator,
                    )
                })?;
                let updated = self.binary_operation(current, base, operand, operator)?;
                self.assign(*id, name, updated.clone())?;
                Ok(updated)
            }
            Expression::PrefixStep { id, operator, name } => {
                let updated = self.stepped_value(*id, name, operator)?;
                self.assign(*id, name, updated.clone())?;
                Ok(updated)
            }
            Expression::PostfixStep { id, name, operator } => {
                let current = self.look_up(*id, name)?;
                let updated = self.stepped_value(*id, name, operator)?;
                self.assign(*id, name, updated)?;
                Ok(current)
            }
            Expression::Unary { operator, right } => {
                let value = self.evaluate(right)?;
                match operator.token_type {
                    TokenType::Bang => Ok(Value::Boolean(!value.is_truthy())),
                    TokenType::Minus => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        value => Err(RuntimeError::new(
                            format!("Operand of '-' must be a number, got {}.", value),
                            operator,
                        )),
                    },
                    TokenType::Complement => {
                        let bits = self.integer_operand(&value, operator)?;
                        Ok(Value::Number(!bits as f64))
                    }
                    _ => Err(RuntimeError::new(
                        format!("Unknown unary operator '{}'.", operator.lexeme),
                        operator,
                    )),
                }
            }
            Expression::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.binary_operation(left, operator.token_type, right, operator)
            }
            Expression::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?.is_truthy();
                match operator.token_type {
                    TokenType::Or => {
                        if left {
                            return Ok(Value::Boolean(true));
                        }
                        Ok(Value::Boolean(self.evaluate(right)?.is_truthy()))
                    }
                    TokenType::And => {
                        if !left {
                            return Ok(Value::Boolean(false));
                        }
                        Ok(Value::Boolean(self.evaluate(right)?.is_truthy()))
                    }
                    TokenType::Xor => {
                        let right = self.evaluate(right)?.is_truthy();
                        Ok(Value::Boolean(left ^ right))
                    }
                    _ => Err(RuntimeError::new(
                        format!("Unknown logical operator '{}'.", operator.lexeme),
                        operator,
                    )),
                }
            }
            Expression::Range {
                start,
                operator,
                end,
            } => {
                let start = self.evaluate(start)?;
                let end = self.evaluate(end)?;
                let start = self.integer_operand(&start, operator)?;
                let end = self.integer_operand(&end, operator)?;
                let values: Vec<Value> = if start <= end {
                    (start..=end).map(|n| Value::Number(n as f64)).collect()
                } else {
                    (end..=start)
                        .rev()
                        .map(|n| Value::Number(n as f64))
                        .collect()
                };
                Ok(Value::Array(Rc::new(RefCell::new(values))))
            }
            Expression::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(then_branch)
                } else {
                    self.evaluate(else_branch)
                }
            }
            Expression::Elvis {
                condition,
                alternative,
            } => {
                let value = self.evaluate(condition)?;
                if matches!(value, Value::Nil) {
                    self.evaluate(alternative)
                } else {
                    Ok(value)
                }
            }
            Expression::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;
                let mut evaluated = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    evaluated.push(self.evaluate(argument)?);
                }

                let callable = match callee {
                    Value::Callable(callable) => callable,
                    value => {
                        return Err(RuntimeError::new(
                            format!("Can only call functions and classes, got {}.", value),
                            paren,
                        ));
                    }
                };
                if evaluated.len() != callable.arity() {
                    return Err(RuntimeError::new(
                        format!(
                            "Expected {} arguments to '{}' but got {}.",
                            callable.arity(),
                            callable.name(),
                            evaluated.len()
                        ),
                        paren,
                    ));
                }
                callable.call(self, evaluated, paren)
            }
            Expression::Get { object, name } => {
                let object = self.evaluate(object)?;
                let instance = match object {
                    Value::Instance(instance) => instance,
                    value => {
                        return Err(RuntimeError::new(
                            format!("Only instances have properties, got {}.", value),
                            name,
                        ));
                    }
                };
                if let Some(value) = instance.borrow().fields.get(&name.lexeme) {
                    return Ok(value.clone());
                }
                if let Some(method) = instance.borrow().class.find_method(&name.lexeme) {
                    return Ok(Value::Callable(Rc::new(Callable::Function(
                        method.bind(&instance),
                    ))));
                }
                Err(RuntimeError::new(
                    format!("Undefined property '{}'.", name.lexeme),
                    name,
                ))
            }
            Expression::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object)?;
                let instance = match object {
                    Value::Instance(instance) => instance,
                    value => {
                        return Err(RuntimeError::new(
                            format!("Only instances have fields, got {}.", value),
                            name,
                        ));
                    }
                };
                let value = self.evaluate(value)?;
                instance
                    .borrow_mut()
                    .fields
                    .insert(name.lexeme.clone(), value.clone());
                Ok(value)
            }
            Expression::This { id, keyword } => self.look_up(*id, keyword),
            Expression::Super {
                id,
                keyword,
                method,
            } => {
                let hops = self.distance(*id).ok_or_else(|| {
                    RuntimeError::new("Cannot use 'super' here.", keyword)
                })?;
                let superclass =
                    VariableScope::get_at(self.visiting_scope.clone(), hops, "super");
                let Some(Value::Callable(callable)) = superclass else {
                    return Err(RuntimeError::new("Undefined variable 'super'.", keyword));
                };
                let Callable::Constructor(superclass) = callable.as_ref() else {
                    return Err(RuntimeError::new("Undefined variable 'super'.", keyword));
                };

                // The `this` scope sits one link below the `super` scope.
                let this = VariableScope::get_at(self.visiting_scope.clone(), hops - 1, "this");
                let Some(Value::Instance(instance)) = this else {
                    return Err(RuntimeError::new("Undefined variable 'this'.", keyword));
                };

                let Some(found) = superclass.find_method(&method.lexeme) else {
                    return Err(RuntimeError::new(
                        format!("Undefined property '{}'.", method.lexeme),
                        method,
                    ));
                };
                Ok(Value::Callable(Rc::new(Callable::Function(
                    found.bind(&instance),
                ))))
            }
            Expression::ArrayLiteral { elements, .. } => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.evaluate(element)?);
                }
                Ok(Value::Array(Rc::new(RefCell::new(values))))
            }
            Expression::ArrayComprehension {
                open,
                element,
                variable,
                iterable,
                condition,
                alternative,
            } => {
                if self.comprehension_depth >= self.options.max_comprehension_depth {
                    return Err(RuntimeError::new(
                        format!(
                            "Array comprehensions may not nest deeper than {} levels.",
                            self.options.max_comprehension_depth
                        ),
                        open,
                    ));
                }
                self.comprehension_depth += 1;
                let result = self.evaluate_comprehension(
                    element,
                    variable,
                    iterable,
                    condition.as_deref(),
                    alternative.as_deref(),
                );
                self.comprehension_depth -= 1;
                result
            }
            Expression::ArrayGet { id, name, index } => {
                let array = self.array_value(*id, name)?;
                let index = self.array_index(&array, index, name)?;
                let value = array.borrow()[index].clone();
                Ok(value)
            }
            Expression::ArraySet {
                id,
                name,
                index,
                value,
            } => {
                let array = self.array_value(*id, name)?;
                let index = self.array_index(&array, index, name)?;
                let value = self.evaluate(value)?;
                array.borrow_mut()[index] = value.clone();
                Ok(value)
            }
            Expression::Prefix { name, right } => {
                let function = self.named_function(name)?;
                let argument = self.evaluate(right)?;
                self.apply_operator_function(function, vec![argument], name)
            }
            Expression::Infix { left, name, right } => {
                let function = self.named_function(name)?;
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.apply_operator_function(function, vec![left, right], name)
            }
        }
    }

    fn evaluate_comprehension(
        &mut self,
        element: &Expression,
        variable: &Token,
        iterable: &Expression,
        condition: Option<&Expression>,
        alternative: Option<&Expression>,
    ) -> Result<Value, RuntimeError> {
        let values = self.iterable_values(iterable)?;
        let scope = VariableScope::boxed(Some(self.visiting_scope.clone()));
        self.with_scope(scope, |interpreter| {
            let mut collected = Vec::new();
            for value in values {
                interpreter
                    .visiting_scope
                    .borrow_mut()
                    .define(variable.lexeme.clone(), value);
                match condition {
                    Some(condition) => {
                        if interpreter.evaluate(condition)?.is_truthy() {
                            collected.push(interpreter.evaluate(element)?);
                        } else if let Some(alternative) = alternative {
                            collected.push(interpreter.evaluate(alternative)?);
                        }
                    }
                    None => collected.push(interpreter.evaluate(element)?),
                }
            }
            Ok(Value::Array(Rc::new(RefCell::new(collected))))
        })
    }

    fn iterable_values(&mut self, iterable: &Expression) -> Result<Vec<Value>, RuntimeError> {
        let value = self.evaluate(iterable)?;
        match value {
            Value::Array(values) => Ok(values.borrow().clone()),
            Value::String(s) => Ok(s.chars().map(Value::Char).collect()),
            value => Err(RuntimeError::new(
                format!("Can only iterate over arrays and strings, got {}.", value),
                iterable.token(),
            )),
        }
    }

    fn stepped_value(
        &mut self,
        id: ExprId,
        name: &Token,
        operator: &Token,
    ) -> Result<Value, RuntimeError> {
        let current = self.look_up(id, name)?;
        let Value::Number(n) = current else {
            return Err(RuntimeError::new(
                format!("Operand of '{}' must be a number, got {}.", operator.lexeme, current),
                operator,
            ));
        };
        let delta = if operator.token_type == TokenType::PlusPlus {
            1.0
        } else {
            -1.0
        };
        Ok(Value::Number(n + delta))
    }

    fn binary_operation(
        &mut self,
        left: Value,
        operator: TokenType,
        right: Value,
        at: &Token,
    ) -> Result<Value, RuntimeError> {
        match operator {
            TokenType::Plus => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b))),
                (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
                (Value::Char(a), Value::Char(b)) => Ok(Value::String(format!("{}{}", a, b))),
                (Value::Array(a), b) => {
                    let mut values = a.borrow().clone();
                    values.push(b);
                    Ok(Value::Array(Rc::new(RefCell::new(values))))
                }
                (a, b) => Err(RuntimeError::new(
                    format!("Cannot add {} and {}.", a, b),
                    at,
                )),
            },
            TokenType::Minus => self.numeric_operation(left, right, at, "-", |a, b| a - b),
            TokenType::Star => self.numeric_operation(left, right, at, "*", |a, b| a * b),
            TokenType::Slash => self.numeric_operation(left, right, at, "/", |a, b| a / b),
            TokenType::Modulo => self.numeric_operation(left, right, at, "%", |a, b| a % b),
            TokenType::Greater
            | TokenType::GreaterEqual
            | TokenType::Less
            | TokenType::LessEqual => {
                let (a, b) = self.numeric_operands(left, right, at)?;
                Ok(Value::Boolean(match operator {
                    TokenType::Greater => a > b,
                    TokenType::GreaterEqual => a >= b,
                    TokenType::Less => a < b,
                    _ => a <= b,
                }))
            }
            TokenType::EqualEqual => Ok(Value::Boolean(left.equals(&right))),
            TokenType::BangEqual => Ok(Value::Boolean(!left.equals(&right))),
            TokenType::ShiftLeft
            | TokenType::ShiftRight
            | TokenType::LogicalShiftRight
            | TokenType::BitwiseAnd
            | TokenType::BitwiseOr => {
                let a = self.integer_operand(&left, at)?;
                let b = self.integer_operand(&right, at)?;
                let result = match operator {
                    TokenType::BitwiseAnd => a & b,
                    TokenType::BitwiseOr => a | b,
                    shift => {
                        if !(0..64).contains(&b) {
                            return Err(RuntimeError::new(
                                format!("Shift amount must be between 0 and 63, got {}.", b),
                                at,
                            ));
                        }
                        match shift {
                            TokenType::ShiftLeft => a << b,
                            TokenType::ShiftRight => a >> b,
                            _ => ((a as u64) >> b) as i64,
                        }
                    }
                };
                Ok(Value::Number(result as f64))
            }
            _ => Err(RuntimeError::new(
                format!("Unknown binary operator '{}'.", at.lexeme),
                at,
            )),
        }
    }

    fn numeric_operation(
        &self,
        left: Value,
        right: Value,
        at: &Token,
        symbol: &str,
        apply: impl FnOnce(f64, f64) -> f64,
    ) -> Result<Value, RuntimeError> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(apply(a, b))),
            (a, b) => Err(RuntimeError::new(
                format!("Operands of '{}' must be numbers, got {} and {}.", symbol, a, b),
                at,
            )),
        }
    }

    fn numeric_operands(
        &self,
        left: Value,
        right: Value,
        at: &Token,
    ) -> Result<(f64, f64), RuntimeError> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok((a, b)),
            (a, b) => Err(RuntimeError::new(
                format!("Operands of '{}' must be numbers, got {} and {}.", at.lexeme, a, b),
                at,
            )),
        }
    }

    fn integer_operand(&self, value: &Value, at: &Token) -> Result<i64, RuntimeError> {
        match value {
            Value::Number(n) if n.fract() == 0.0 => Ok(*n as i64),
            value => Err(RuntimeError::new(
                format!("Operand of '{}' must be a whole number, got {}.", at.lexeme, value),
                at,
            )),
        }
    }

    fn look_up(&self, id: ExprId, name: &Token) -> Result<Value, RuntimeError> {
        let value = match self.distance(id) {
            Some(hops) => VariableScope::get_at(self.visiting_scope.clone(), hops, &name.lexeme),
            None => self.global_scope.borrow().get_local(&name.lexeme),
        };
        value.ok_or_else(|| {
            RuntimeError::new(format!("Undefined variable '{}'.", name.lexeme), name)
        })
    }

    fn assign(&mut self, id: ExprId, name: &Token, value: Value) -> Result<(), RuntimeError> {
        let assigned = match self.distance(id) {
            Some(hops) => {
                VariableScope::assign_at(self.visiting_scope.clone(), hops, &name.lexeme, value)
            }
            None => self.global_scope.borrow_mut().assign_local(&name.lexeme, value),
        };
        if assigned {
            Ok(())
        } else {
            Err(RuntimeError::new(
                format!("Undefined variable '{}'.", name.lexeme),
                name,
            ))
        }
    }

    fn array_value(&self, id: ExprId, name: &Token) -> Result<Rc<RefCell<Vec<Value>>>, RuntimeError> {
        match self.look_up(id, name)? {
            Value::Array(values) => Ok(values),
            value => Err(RuntimeError::new(
                format!("'{}' is not an array, got {}.", name.lexeme, value),
                name,
            )),
        }
    }

    fn array_index(
        &mut self,
        array: &Rc<RefCell<Vec<Value>>>,
        index: &Expression,
        name: &Token,
    ) -> Result<usize, RuntimeError> {
        let value = self.evaluate(index)?;
        let index = self.integer_operand(&value, index.token())?;
        let len = array.borrow().len();
        if index < 0 || index as usize >= len {
            return Err(RuntimeError::new(
                format!(
                    "Index {} is out of bounds for array '{}' of length {}.",
                    index, name.lexeme, len
                ),
                name,
            ));
        }
        Ok(index as usize)
    }

    /// Operator functions are looked up dynamically through the visiting
    /// scope chain, falling back to the globals.
    fn named_function(&self, name: &Token) -> Result<Rc<Callable>, RuntimeError> {
        let value = self
            .visiting_scope
            .borrow()
            .get(&name.lexeme)
            .or_else(|| self.global_scope.borrow().get_local(&name.lexeme));
        match value {
            Some(Value::Callable(callable)) => Ok(callable),
            Some(value) => Err(RuntimeError::new(
                format!("'{}' is not a function, got {}.", name.lexeme, value),
                name,
            )),
            None => Err(RuntimeError::new(
                format!("Undefined function '{}'.", name.lexeme),
                name,
            )),
        }
    }

    fn apply_operator_function(
        &mut self,
        function: Rc<Callable>,
        arguments: Vec<Value>,
        name: &Token,
    ) -> Result<Value, RuntimeError> {
        if arguments.len() != function.arity() {
            return Err(RuntimeError::new(
                format!(
                    "Expected {} arguments to '{}' but got {}.",
                    function.arity(),
                    name.lexeme,
                    arguments.len()
                ),
                name,
            ));
        }
        function.call(self, arguments, name)
    }

    fn module(&self, name: &Token) -> Result<Rc<NativeModule>, RuntimeError> {
        if !self.options.allow_native_access {
            return Err(RuntimeError::new(
                "Native module access is not allowed in this runtime.",
                name,
            ));
        }
        self.modules.get(&name.lexeme).cloned().ok_or_else(|| {
            RuntimeError::new(format!("Unknown native module '{}'.", name.lexeme), name)
        })
    }

    fn native_function(
        &self,
        module: &Token,
        name: &Token,
    ) -> Result<module::NativeFunction, RuntimeError> {
        let native_module = self.module(module)?;
        native_module.function(&name.lexeme).cloned().ok_or_else(|| {
            RuntimeError::new(
                format!(
                    "Native module '{}' has no function '{}'.",
                    module.lexeme, name.lexeme
                ),
                name,
            )
        })
    }
}
