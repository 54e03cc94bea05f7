use rustc_hash::FxHashMap;

use crate::{
    ast::{ClassDeclaration, ExprId, Expression, FunctionDeclaration, Statement},
    interpreter::Interpreter,
    tokenizer::Token,
};

#[derive(Debug, Clone, Copy)]
enum BindingState {
    Declared,
    Defined,
}

#[derive(Debug, Clone, Copy)]
enum FunctionType {
    None,
    Function,
    Constructor,
    Method,
}

#[derive(Debug, Clone, Copy)]
enum ClassType {
    None,
    Class,
    Subclass,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}")]
pub struct ResolutionError {
    pub token: Token,
    pub kind: ResolutionErrorKind,
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum ResolutionErrorKind {
    #[error("Cannot use 'this' outside of a class.")]
    ThisOutsideClass,
    #[error("Cannot use 'super' outside of a class.")]
    SuperOutsideClass,
    #[error("Cannot use 'super' in a class with no super class.")]
    SuperWithoutSuperclass,
    #[error("Cannot return from top-level code.")]
    ReturnOutsideFunction,
    #[error("Cannot return a value from a constructor.")]
    ReturnValueFromConstructor,
    #[error("Cannot read local variable in its own initializer.")]
    ReadInOwnInitializer,
    #[error("Variable with this name already declared in this scope.")]
    DuplicateDeclaration,
    #[error("Cannot use 'break' outside of a loop or switch.")]
    BreakOutsideLoop,
    #[error("Cannot use 'continue' outside of a loop.")]
    ContinueOutsideLoop,
}

/// Static resolution pass. Walks the syntax tree with a scope stack that
/// mirrors the runtime scope chain and records, per reference node, how many
/// parent scopes the interpreter has to traverse. Names that are not found in
/// any lexical scope stay unresolved and are looked up in the global scope at
/// runtime.
pub struct Resolver<'i> {
    interpreter: &'i mut Interpreter,
    scopes: Vec<FxHashMap<String, BindingState>>,
    function_type: FunctionType,
    class_type: ClassType,
    loop_depth: usize,
    switch_depth: usize,
}

impl<'i> Resolver<'i> {
    pub fn new(interpreter: &'i mut Interpreter) -> Self {
        Self {
            interpreter,
            scopes: Vec::new(),
            function_type: FunctionType::None,
            class_type: ClassType::None,
            loop_depth: 0,
            switch_depth: 0,
        }
    }

    pub fn resolve(&mut self, statements: &[Statement]) -> Result<(), ResolutionError> {
        for statement in statements {
            self.resolve_statement(statement)?;
        }
        Ok(())
    }

    fn resolve_statement(&mut self, statement: &Statement) -> Result<(), ResolutionError> {
        match statement {
            Statement::Expression(expression) | Statement::Print(expression) => {
                self.resolve_expression(expression)?;
            }
            Statement::Block(statements) => {
                self.begin_scope();
                let result = self.resolve(statements);
                self.end_scope();
                result?;
            }
            Statement::Var { name, initializer } => {
                self.declare(name)?;
                if let Some(initializer) = initializer {
                    self.resolve_expression(initializer)?;
                }
                self.define(name);
            }
            Statement::Function { declaration, .. } => {
                self.declare(&declaration.name)?;
                self.define(&declaration.name);
                self.resolve_function(declaration, FunctionType::Function)?;
            }
            Statement::Class(class) => self.resolve_class(class)?,
            Statement::NativeFunction { name, .. } => {
                self.declare(name)?;
                self.define(name);
            }
            Statement::Using { .. } => {}
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expression(condition)?;
                self.resolve_statement(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.resolve_statement(else_branch)?;
                }
            }
            Statement::While { condition, body } => {
                self.resolve_expression(condition)?;
                self.resolve_loop_body(body)?;
            }
            Statement::DoWhile { body, condition } => {
                self.resolve_loop_body(body)?;
                self.resolve_expression(condition)?;
            }
            Statement::For {
                initializer,
                condition,
                increment,
                body,
            } => {
                self.begin_scope();
                let result = (|| {
                    if let Some(initializer) = initializer {
                        self.resolve_statement(initializer)?;
                    }
                    if let Some(condition) = condition {
                        self.resolve_expression(condition)?;
                    }
                    if let Some(increment) = increment {
                        self.resolve_expression(increment)?;
                    }
                    self.resolve_loop_body(body)
                })();
                self.end_scope();
                result?;
            }
            Statement::ForEach {
                variable,
                iterable,
                body,
            } => {
                self.resolve_expression(iterable)?;
                self.begin_scope();
                let result = (|| {
                    self.declare(variable)?;
                    self.define(variable);
                    self.resolve_loop_body(body)
                })();
                self.end_scope();
                result?;
            }
            Statement::Repeat { count, body } => {
                self.resolve_expression(count)?;
                self.resolve_loop_body(body)?;
            }
            Statement::Switch {
                subject,
                cases,
                default,
            } => {
                self.resolve_expression(subject)?;
                // Case bodies may use 'break' to leave the switch.
                self.switch_depth += 1;
                let result = (|| {
                    for case in cases {
                        self.resolve_statement(&case.body)?;
                    }
                    if let Some(default) = default {
                        self.resolve_statement(default)?;
                    }
                    Ok(())
                })();
                self.switch_depth -= 1;
                result?;
            }
            Statement::Break(token) => {
                if self.loop_depth == 0 && self.switch_depth == 0 {
                    return Err(ResolutionError {
                        token: token.clone(),
                        kind: ResolutionErrorKind::BreakOutsideLoop,
                    });
                }
            }
            Statement::Continue(token) => {
                if self.loop_depth == 0 {
                    return Err(ResolutionError {
                        token: token.clone(),
                        kind: ResolutionErrorKind::ContinueOutsideLoop,
                    });
                }
            }
            Statement::Return { keyword, value } => {
                match self.function_type {
                    FunctionType::None => {
                        return Err(ResolutionError {
                            token: keyword.clone(),
                            kind: ResolutionErrorKind::ReturnOutsideFunction,
                        });
                    }
                    FunctionType::Constructor if value.is_some() => {
                        return Err(ResolutionError {
                            token: keyword.clone(),
                            kind: ResolutionErrorKind::ReturnValueFromConstructor,
                        });
                    }
                    _ => {}
                }
                if let Some(value) = value {
                    self.resolve_expression(value)?;
                }
            }
        }
        Ok(())
    }

    fn resolve_class(&mut self, class: &ClassDeclaration) -> Result<(), ResolutionError> {
        self.declare(&class.name)?;
        self.define(&class.name);

        let enclosing_class = self.class_type;
        self.class_type = if class.superclass.is_some() {
            ClassType::Subclass
        } else {
            ClassType::Class
        };

        let result = (|| {
            if let Some(superclass) = &class.superclass {
                self.resolve_expression(superclass)?;
                self.begin_scope();
                self.define_name("super");
            }
            self.begin_scope();
            self.define_name("this");

            let inner = (|| {
                for field in &class.fields {
                    if let Some(initializer) = &field.initializer {
                        self.resolve_expression(initializer)?;
                    }
                }
                if let Some(constructor) = &class.constructor {
                    self.resolve_function(constructor, FunctionType::Constructor)?;
                }
                for method in &class.methods {
                    self.resolve_function(method, FunctionType::Method)?;
                }
                Ok(())
            })();

            self.end_scope();
            if class.superclass.is_some() {
                self.end_scope();
            }
            inner
        })();

        self.class_type = enclosing_class;
        result
    }

    /// Function bodies resolve directly in the parameter scope; the runtime
    /// call path executes them the same way, without an extra block scope.
    fn resolve_function(
        &mut self,
        declaration: &FunctionDeclaration,
        function_type: FunctionType,
    ) -> Result<(), ResolutionError> {
        let enclosing_function = self.function_type;
        let enclosing_loop_depth = self.loop_depth;
        let enclosing_switch_depth = self.switch_depth;
        self.function_type = function_type;
        self.loop_depth = 0;
        self.switch_depth = 0;

        self.begin_scope();
        let result = (|| {
            for parameter in &declaration.parameters {
                self.declare(parameter)?;
                self.define(parameter);
            }
            self.resolve(&declaration.body)
        })();
        self.end_scope();

        self.function_type = enclosing_function;
        self.loop_depth = enclosing_loop_depth;
        self.switch_depth = enclosing_switch_depth;
        result
    }

    fn resolve_loop_body(&mut self, body: &Statement) -> Result<(), ResolutionError> {
        self.loop_depth += 1;
        let result = self.resolve_statement(body);
        self.loop_depth -= 1;
        result
    }

    fn resolve_expression(&mut self, expression: &Expression) -> Result<(), ResolutionError> {
        match expression {
            Expression::Literal { .. } => {}
            Expression::Grouping(inner) => self.resolve_expression(inner)?,
            Expression::Variable { id, name } => {
                if let Some(BindingState::Declared) =
                    self.scopes.last().and_then(|scope| scope.get(&name.lexeme))
                {
                    return Err(ResolutionError {
                        token: name.clone(),
                        kind: ResolutionErrorKind::ReadInOwnInitializer,
                    });
                }
                self.resolve_local(*id, &name.lexeme);
            }
            Expression::Assign { id, name, value } => {
                self.resolve_expression(value)?;
                self.resolve_local(*id, &name.lexeme);
            }
            Expression::CompoundAssign {
                id, name, value, ..
            } => {
                self.resolve_expression(value)?;
                self.resolve_local(*id, &name.lexeme);
            }
            Expression::PrefixStep { id, name, .. } | Expression::PostfixStep { id, name, .. } => {
                self.resolve_local(*id, &name.lexeme);
            }
            Expression::Unary { right, .. } => self.resolve_expression(right)?,
            Expression::Binary { left, right, .. }
            | Expression::Logical { left, right, .. }
            | Expression::Infix { left, right, .. } => {
                self.resolve_expression(left)?;
                self.resolve_expression(right)?;
            }
            Expression::Range { start, end, .. } => {
                self.resolve_expression(start)?;
                self.resolve_expression(end)?;
            }
            Expression::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expression(condition)?;
                self.resolve_expression(then_branch)?;
                self.resolve_expression(else_branch)?;
            }
            Expression::Elvis {
                condition,
                alternative,
            } => {
                self.resolve_expression(condition)?;
                self.resolve_expression(alternative)?;
            }
            Expression::Call {
                callee, arguments, ..
            } => {
                self.resolve_expression(callee)?;
                for argument in arguments {
                    self.resolve_expression(argument)?;
                }
            }
            Expression::Get { object, .. } => self.resolve_expression(object)?,
            Expression::Set { object, value, .. } => {
                self.resolve_expression(object)?;
                self.resolve_expression(value)?;
            }
            Expression::This { id, keyword } => {
                if matches!(self.class_type, ClassType::None) {
                    return Err(ResolutionError {
                        token: keyword.clone(),
                        kind: ResolutionErrorKind::ThisOutsideClass,
                    });
                }
                self.resolve_local(*id, "this");
            }
            Expression::Super { id, keyword, .. } => {
                match self.class_type {
                    ClassType::None => {
                        return Err(ResolutionError {
                            token: keyword.clone(),
                            kind: ResolutionErrorKind::SuperOutsideClass,
                        });
                    }
                    ClassType::Class => {
                        return Err(ResolutionError {
                            token: keyword.clone(),
                            kind: ResolutionErrorKind::SuperWithoutSuperclass,
                        });
                    }
                    ClassType::Subclass => {}
                }
                self.resolve_local(*id, "super");
            }
            Expression::ArrayLiteral { elements, .. } => {
                for element in elements {
                    self.resolve_expression(element)?;
                }
            }
            Expression::ArrayComprehension {
                element,
                variable,
                iterable,
                condition,
                alternative,
                ..
            } => {
                self.resolve_expression(iterable)?;
                self.begin_scope();
                let result = (|| {
                    self.declare(variable)?;
                    self.define(variable);
                    self.resolve_expression(element)?;
                    if let Some(condition) = condition {
                        self.resolve_expression(condition)?;
                    }
                    if let Some(alternative) = alternative {
                        self.resolve_expression(alternative)?;
                    }
                    Ok(())
                })();
                self.end_scope();
                result?;
            }
            Expression::ArrayGet { id, name, index } => {
                self.resolve_expression(index)?;
                self.resolve_local(*id, &name.lexeme);
            }
            Expression::ArraySet {
                id,
                name,
                index,
                value,
            } => {
                self.resolve_expression(index)?;
                self.resolve_expression(value)?;
                self.resolve_local(*id, &name.lexeme);
            }
            Expression::Prefix { right, .. } => self.resolve_expression(right)?,
        }
        Ok(())
    }

    fn resolve_local(&mut self, id: ExprId, name: &str) {
        for (hops, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(name) {
                self.interpreter.resolve(id, hops);
                return;
            }
        }
    }

    fn begin_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &Token) -> Result<(), ResolutionError> {
        if let Some(scope) = self.scopes.last_mut() {
            if scope.contains_key(&name.lexeme) {
                return Err(ResolutionError {
                    token: name.clone(),
                    kind: ResolutionErrorKind::DuplicateDeclaration,
                });
            }
            scope.insert(name.lexeme.clone(), BindingState::Declared);
        }
        Ok(())
    }

    fn define(&mut self, name: &Token) {
        self.define_name(&name.lexeme);
    }

    fn define_name(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), BindingState::Defined);
        }
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::{parser::Parser, tokenizer::Tokenizer};

    fn resolve(source: &str) -> Result<(), ResolutionError> {
        let tokens = Tokenizer::new(source)
            .scan_tokens()
            .expect("tokenize should succeed");
        let statements = Parser::new(&tokens).parse().expect("parse should succeed");
        let mut interpreter = Interpreter::new(Rc::new(RefCell::new(Vec::<u8>::new())));
        Resolver::new(&mut interpreter).resolve(&statements)
    }

    fn resolve_err(source: &str) -> ResolutionErrorKind {
        resolve(source).expect_err("resolution should fail").kind
    }

    #[test]
    fn test_this_outside_class() {
        assert!(matches!(
            resolve_err("print this;"),
            ResolutionErrorKind::ThisOutsideClass
        ));
    }

    #[test]
    fn test_super_without_superclass() {
        assert!(matches!(
            resolve_err("class A { fun f() { super.f(); } }"),
            ResolutionErrorKind::SuperWithoutSuperclass
        ));
    }

    #[test]
    fn test_super_with_superclass_is_allowed() {
        assert!(resolve("class A { fun f() { } } class B extends A { fun f() { super.f(); } }").is_ok());
    }

    #[test]
    fn test_return_outside_function() {
        assert!(matches!(
            resolve_err("return 1;"),
            ResolutionErrorKind::ReturnOutsideFunction
        ));
    }

    #[test]
    fn test_return_value_from_constructor() {
        assert!(matches!(
            resolve_err("class A { constructor() { return 1; } }"),
            ResolutionErrorKind::ReturnValueFromConstructor
        ));
    }

    #[test]
    fn test_bare_return_from_constructor_is_allowed() {
        assert!(resolve("class A { constructor() { return; } }").is_ok());
    }

    #[test]
    fn test_read_in_own_initializer() {
        assert!(matches!(
            resolve_err("fun f() { var a = a; }"),
            ResolutionErrorKind::ReadInOwnInitializer
        ));
    }

    #[test]
    fn test_duplicate_declaration_in_local_scope() {
        assert!(matches!(
            resolve_err("fun f() { var a = 1; var a = 2; }"),
            ResolutionErrorKind::DuplicateDeclaration
        ));
    }

    #[test]
    fn test_duplicate_declaration_in_globals_is_allowed() {
        assert!(resolve("var a = 1; var a = 2;").is_ok());
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(matches!(
            resolve_err("break;"),
            ResolutionErrorKind::BreakOutsideLoop
        ));
    }

    #[test]
    fn test_continue_in_function_inside_loop_is_rejected() {
        assert!(matches!(
            resolve_err("while (true) { fun f() { continue; } }"),
            ResolutionErrorKind::ContinueOutsideLoop
        ));
    }

    #[test]
    fn test_break_inside_loop_is_allowed() {
        assert!(resolve("while (true) { break; }").is_ok());
    }

    #[test]
    fn test_break_inside_switch_is_allowed() {
        assert!(resolve("switch (1) { case 1: print 1; break; }").is_ok());
    }

    #[test]
    fn test_break_in_function_inside_switch_is_rejected() {
        assert!(matches!(
            resolve_err("switch (1) { case 1: fun f() { break; } }"),
            ResolutionErrorKind::BreakOutsideLoop
        ));
    }
}
