use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::{
    ast::{
        ClassDeclaration, ExprId, Expression, FieldDeclaration, FunctionDeclaration, FunctionKind,
        Literal, Statement, SwitchCase,
    },
    tokenizer::{Token, TokenType},
};

pub const MAX_NUM_OF_ARGUMENTS: usize = 8;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub token: Token,
}

impl ParseError {
    fn new(message: impl Into<String>, token: &Token) -> Self {
        Self {
            message: message.into(),
            token: token.clone(),
        }
    }
}

/// Recursive descent parser over the scanned tokens. Aborts at the first
/// violation; recovery is left to the caller rerunning the phase.
pub struct Parser<'t> {
    tokens: &'t [Token],
    current: usize,
    next_id: ExprId,
    prefix_functions: FxHashSet<String>,
    infix_functions: FxHashSet<String>,
}

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            current: 0,
            next_id: 0,
            prefix_functions: FxHashSet::default(),
            infix_functions: FxHashSet::default(),
        }
    }

    pub fn parse(mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.statement()?);
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        if (self.check(TokenType::Prefix) || self.check(TokenType::Infix))
            && self.peek_next().map(|t| t.token_type) == Some(TokenType::Fun)
        {
            let kind = if self.advance().token_type == TokenType::Prefix {
                FunctionKind::Prefix
            } else {
                FunctionKind::Infix
            };
            self.advance();
            return self.function_declaration(kind);
        }
        if self.matches(TokenType::Fun) {
            return self.function_declaration(FunctionKind::Plain);
        }
        if self.matches(TokenType::Class) {
            return self.class_declaration();
        }
        if self.matches(TokenType::Native) {
            return self.native_function_declaration();
        }
        if self.matches(TokenType::Var) {
            return self.var_declaration();
        }
        if self.matches(TokenType::If) {
            return self.if_statement();
        }
        if self.matches(TokenType::While) {
            return self.while_statement();
        }
        if self.matches(TokenType::Do) {
            return self.do_while_statement();
        }
        if self.matches(TokenType::For) {
            return self.for_statement();
        }
        if self.matches(TokenType::Repeat) {
            return self.repeat_statement();
        }
        if self.matches(TokenType::Switch) {
            return self.switch_statement();
        }
        if self.matches(TokenType::Break) {
            let token = self.previous().clone();
            self.expect_after(TokenType::Semicolon, "break")?;
            return Ok(Statement::Break(token));
        }
        if self.matches(TokenType::Continue) {
            let token = self.previous().clone();
            self.expect_after(TokenType::Semicolon, "continue")?;
            return Ok(Statement::Continue(token));
        }
        if self.matches(TokenType::Return) {
            return self.return_statement();
        }
        if self.matches(TokenType::Print) {
            return self.print_statement();
        }
        if self.matches(TokenType::Using) {
            let module = self.expect(TokenType::Identifier, "module name")?;
            self.expect_after(TokenType::Semicolon, "module name")?;
            return Ok(Statement::Using { module });
        }
        if self.matches(TokenType::LeftBrace) {
            return Ok(Statement::Block(self.block_statements()?));
        }
        self.expression_statement()
    }

    fn var_declaration(&mut self) -> Result<Statement, ParseError> {
        let name = self.expect(TokenType::Identifier, "variable name")?;
        let initializer = if self.matches(TokenType::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect_after(TokenType::Semicolon, "variable declaration")?;
        Ok(Statement::Var { name, initializer })
    }

    fn function_declaration(&mut self, kind: FunctionKind) -> Result<Statement, ParseError> {
        let name = self.expect(TokenType::Identifier, "function name")?;
        match kind {
            FunctionKind::Prefix => {
                self.prefix_functions.insert(name.lexeme.clone());
            }
            FunctionKind::Infix => {
                self.infix_functions.insert(name.lexeme.clone());
            }
            FunctionKind::Plain => {}
        }

        let parameters = self.function_parameters("function name")?;
        match kind {
            FunctionKind::Prefix if parameters.len() != 1 => {
                return Err(ParseError::new(
                    "Prefix functions must declare exactly 1 parameter.",
                    &name,
                ));
            }
            FunctionKind::Infix if parameters.len() != 2 => {
                return Err(ParseError::new(
                    "Infix functions must declare exactly 2 parameters.",
                    &name,
                ));
            }
            _ => {}
        }

        self.expect_before(TokenType::LeftBrace, "function body")?;
        let body = self.block_statements()?;
        Ok(Statement::Function {
            kind,
            declaration: Rc::new(FunctionDeclaration {
                name,
                parameters,
                body,
            }),
        })
    }

    fn function_parameters(&mut self, after: &str) -> Result<Vec<Token>, ParseError> {
        self.expect_after(TokenType::LeftParen, after)?;
        let mut parameters = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if parameters.len() >= MAX_NUM_OF_ARGUMENTS {
                    return Err(ParseError::new(
                        format!("Cannot have more than {} parameters.", MAX_NUM_OF_ARGUMENTS),
                        self.peek(),
                    ));
                }
                parameters.push(self.expect(TokenType::Identifier, "parameter name")?);
                if !self.matches(TokenType::Comma) {
                    break;
                }
            }
        }
        self.expect_after(TokenType::RightParen, "parameters")?;
        Ok(parameters)
    }

    fn class_declaration(&mut self) -> Result<Statement, ParseError> {
        let name = self.expect(TokenType::Identifier, "class name")?;

        let superclass = if self.matches(TokenType::Extends) {
            let superclass_name = self.expect(TokenType::Identifier, "super class name")?;
            Some(Expression::Variable {
                id: self.fresh_id(),
                name: superclass_name,
            })
        } else {
            None
        };

        self.expect_before(TokenType::LeftBrace, "class body")?;

        let mut constructor = None;
        let mut methods = Vec::new();
        let mut fields = Vec::new();
        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            if self.matches(TokenType::Constructor) {
                let keyword = self.previous().clone();
                if constructor.is_some() {
                    return Err(ParseError::new("Duplicate constructor.", &keyword));
                }
                let parameters = self.function_parameters("constructor")?;
                self.expect_before(TokenType::LeftBrace, "constructor body")?;
                let body = self.block_statements()?;
                constructor = Some(Rc::new(FunctionDeclaration {
                    name: keyword,
                    parameters,
                    body,
                }));
            } else if self.matches(TokenType::Fun) {
                let method_name = self.expect(TokenType::Identifier, "method name")?;
                let parameters = self.function_parameters("method name")?;
                self.expect_before(TokenType::LeftBrace, "method body")?;
                let body = self.block_statements()?;
                methods.push(Rc::new(FunctionDeclaration {
                    name: method_name,
                    parameters,
                    body,
                }));
            } else if self.matches(TokenType::Var) {
                let field_name = self.expect(TokenType::Identifier, "field name")?;
                let initializer = if self.matches(TokenType::Equal) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.expect_after(TokenType::Semicolon, "field declaration")?;
                fields.push(FieldDeclaration {
                    name: field_name,
                    initializer,
                });
            } else {
                return Err(ParseError::new(
                    format!("Unsupported class body statement starting at {}.", self.peek()),
                    self.peek(),
                ));
            }
        }

        self.expect_after(TokenType::RightBrace, "class body")?;

        Ok(Statement::Class(ClassDeclaration {
            name,
            superclass,
            constructor,
            methods,
            fields,
        }))
    }

    fn native_function_declaration(&mut self) -> Result<Statement, ParseError> {
        self.expect(TokenType::Fun, "fun keyword")?;
        let mut module = self.expect(TokenType::Identifier, "module name")?;
        while self.matches(TokenType::Colon) {
            let part = self.expect(TokenType::Identifier, "module name")?;
            module.lexeme = format!("{}.{}", module.lexeme, part.lexeme);
        }

        self.expect_before(TokenType::Dot, "function name")?;
        let name = self.expect(TokenType::Identifier, "function name")?;
        let parameters = self.function_parameters("function name")?;
        self.expect_after(TokenType::Semicolon, "native function declaration")?;

        Ok(Statement::NativeFunction {
            name,
            module,
            parameters,
        })
    }

    fn if_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_after(TokenType::LeftParen, "if")?;
        let condition = self.expression()?;
        self.expect_after(TokenType::RightParen, "if condition")?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.matches(TokenType::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Statement::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_after(TokenType::LeftParen, "while")?;
        let condition = self.expression()?;
        self.expect_after(TokenType::RightParen, "while condition")?;
        let body = Box::new(self.statement()?);
        Ok(Statement::While { condition, body })
    }

    fn do_while_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_before(TokenType::LeftBrace, "do body")?;
        let body = Box::new(Statement::Block(self.block_statements()?));
        self.expect_after(TokenType::While, "do body")?;
        self.expect_after(TokenType::LeftParen, "while")?;
        let condition = self.expression()?;
        self.expect_after(TokenType::RightParen, "while condition")?;
        self.expect_after(TokenType::Semicolon, "do-while")?;
        Ok(Statement::DoWhile { body, condition })
    }

    fn for_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_after(TokenType::LeftParen, "for")?;

        if self.matches(TokenType::Var) {
            let name = self.expect(TokenType::Identifier, "variable name")?;
            if self.matches(TokenType::In) {
                let iterable = self.expression()?;
                self.expect_after(TokenType::RightParen, "for collection")?;
                let body = Box::new(self.statement()?);
                return Ok(Statement::ForEach {
                    variable: name,
                    iterable,
                    body,
                });
            }

            let initializer = if self.matches(TokenType::Equal) {
                Some(self.expression()?)
            } else {
                None
            };
            self.expect_after(TokenType::Semicolon, "variable declaration")?;
            return self.finish_for(Some(Box::new(Statement::Var { name, initializer })));
        }

        let initializer = if self.matches(TokenType::Semicolon) {
            None
        } else {
            Some(Box::new(self.expression_statement()?))
        };
        self.finish_for(initializer)
    }

    fn finish_for(&mut self, initializer: Option<Box<Statement>>) -> Result<Statement, ParseError> {
        let condition = if self.check(TokenType::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_after(TokenType::Semicolon, "for condition")?;

        let increment = if self.check(TokenType::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_after(TokenType::RightParen, "for clauses")?;

        let body = Box::new(self.statement()?);
        Ok(Statement::For {
            initializer,
            condition,
            increment,
            body,
        })
    }

    fn repeat_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_after(TokenType::LeftParen, "repeat")?;
        let count = self.expression()?;
        self.expect_after(TokenType::RightParen, "repeat value")?;
        let body = Box::new(self.statement()?);
        Ok(Statement::Repeat { count, body })
    }

    fn switch_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_after(TokenType::LeftParen, "switch")?;
        let subject = self.expression()?;
        self.expect_after(TokenType::RightParen, "expression")?;
        self.expect_after(TokenType::LeftBrace, "switch")?;

        let mut cases: Vec<SwitchCase> = Vec::new();
        let mut default = None;
        while self.check(TokenType::Case) || self.check(TokenType::Default) {
            let keyword = self.advance().clone();
            if keyword.token_type == TokenType::Case {
                let pattern = self.advance().clone();
                let value = match &pattern.literal {
                    Some(literal) => literal.clone(),
                    None => {
                        return Err(ParseError::new(
                            "Case expression must be a literal.",
                            &pattern,
                        ))
                    }
                };
                if cases.iter().any(|case| case.value == value) {
                    return Err(ParseError::new(
                        format!("Duplicate case expression '{}'.", value),
                        &pattern,
                    ));
                }
                let body = self.case_body()?;
                cases.push(SwitchCase {
                    pattern,
                    value,
                    body,
                });
            } else {
                if default.is_some() {
                    return Err(ParseError::new("Duplicate default case.", &keyword));
                }
                default = Some(Box::new(self.case_body()?));
            }
        }

        self.expect_after(TokenType::RightBrace, "switch")?;
        Ok(Statement::Switch {
            subject,
            cases,
            default,
        })
    }

    /// A `:` body runs until the next case, default or closing brace; there is
    /// no fallthrough between arms. A `->` body is a single expression.
    fn case_body(&mut self) -> Result<Statement, ParseError> {
        if self.matches(TokenType::Colon) {
            let mut statements = Vec::new();
            while !self.check(TokenType::Case)
                && !self.check(TokenType::Default)
                && !self.check(TokenType::RightBrace)
                && !self.is_at_end()
            {
                statements.push(self.statement()?);
            }
            Ok(Statement::Block(statements))
        } else if self.matches(TokenType::Arrow) {
            self.expression_statement()
        } else {
            Err(ParseError::new("Expected ':' or '->'.", self.peek()))
        }
    }

    fn return_statement(&mut self) -> Result<Statement, ParseError> {
        let keyword = self.previous().clone();
        let value = if self.check(TokenType::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_after(TokenType::Semicolon, "return value")?;
        Ok(Statement::Return { keyword, value })
    }

    fn print_statement(&mut self) -> Result<Statement, ParseError> {
        let expression = self.expression()?;
        self.expect_after(TokenType::Semicolon, "print value")?;
        Ok(Statement::Print(expression))
    }

    fn expression_statement(&mut self) -> Result<Statement, ParseError> {
        let expression = self.expression()?;
        self.expect_after(TokenType::Semicolon, "expression")?;
        Ok(Statement::Expression(expression))
    }

    fn block_statements(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            statements.push(self.statement()?);
        }
        self.expect_after(TokenType::RightBrace, "block")?;
        Ok(statements)
    }

    fn expression(&mut self) -> Result<Expression, ParseError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expression, ParseError> {
        let expression = self.elvis()?;

        if self.matches(TokenType::Equal) {
            let equals = self.previous().clone();
            let value = Box::new(self.assignment()?);

            return match expression {
                Expression::Variable { name, .. } => Ok(Expression::Assign {
                    id: self.fresh_id(),
                    name,
                    value,
                }),
                Expression::ArrayGet { name, index, .. } => Ok(Expression::ArraySet {
                    id: self.fresh_id(),
                    name,
                    index,
                    value,
                }),
                Expression::Get { object, name } => Ok(Expression::Set {
                    object,
                    name,
                    value,
                }),
                _ => Err(ParseError::new("Invalid assignment target.", &equals)),
            };
        }
        Ok(expression)
    }

    fn elvis(&mut self) -> Result<Expression, ParseError> {
        let expression = self.ternary()?;
        if self.matches(TokenType::Elvis) {
            let alternative = self.ternary()?;
            return Ok(Expression::Elvis {
                condition: Box::new(expression),
                alternative: Box::new(alternative),
            });
        }
        Ok(expression)
    }

    fn ternary(&mut self) -> Result<Expression, ParseError> {
        let expression = self.bitwise()?;

        if self.matches(TokenType::QuestionMark) {
            let then_branch = self.logical()?;
            self.expect_after(TokenType::Colon, "expression")?;
            let else_branch = self.logical()?;
            return Ok(Expression::Ternary {
                condition: Box::new(expression),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            });
        }
        Ok(expression)
    }

    fn bitwise(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.logical()?;
        while self.matches_any(&[
            TokenType::ShiftLeft,
            TokenType::ShiftRight,
            TokenType::LogicalShiftRight,
            TokenType::BitwiseOr,
            TokenType::BitwiseAnd,
        ]) {
            let operator = self.previous().clone();
            let right = self.logical()?;
            expression = Expression::Binary {
                left: Box::new(expression),
                operator,
                right: Box::new(right),
            };
        }
        Ok(expression)
    }

    fn logical(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.equality()?;
        while self.matches_any(&[TokenType::Or, TokenType::Xor, TokenType::And]) {
            let operator = self.previous().clone();
            let right = self.equality()?;
            expression = Expression::Logical {
                left: Box::new(expression),
                operator,
                right: Box::new(right),
            };
        }
        Ok(expression)
    }

    fn equality(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.range()?;
        while self.matches_any(&[TokenType::BangEqual, TokenType::EqualEqual]) {
            let operator = self.previous().clone();
            let right = self.range()?;
            expression = Expression::Binary {
                left: Box::new(expression),
                operator,
                right: Box::new(right),
            };
        }
        Ok(expression)
    }

    fn range(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.compound_assignment()?;
        while self.matches(TokenType::Range) {
            let operator = self.previous().clone();
            let end = self.compound_assignment()?;
            expression = Expression::Range {
                start: Box::new(expression),
                operator,
                end: Box::new(end),
            };
        }
        Ok(expression)
    }

    fn compound_assignment(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.prefix_function_call()?;
        while self.peek().token_type.assigns_with().is_some() {
            let operator = self.advance().clone();
            let value = self.prefix_function_call()?;
            expression = match expression {
                Expression::Variable { name, .. } => Expression::CompoundAssign {
                    id: self.fresh_id(),
                    name,
                    operator,
                    value: Box::new(value),
                },
                _ => return Err(ParseError::new("Invalid assignment target.", &operator)),
            };
        }
        Ok(expression)
    }

    fn prefix_function_call(&mut self) -> Result<Expression, ParseError> {
        if self.check(TokenType::Identifier) && self.prefix_functions.contains(&self.peek().lexeme)
        {
            let name = self.advance().clone();
            let right = self.comparison()?;
            return Ok(Expression::Prefix {
                name,
                right: Box::new(right),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.addition()?;
        while self.matches_any(&[
            TokenType::Greater,
            TokenType::GreaterEqual,
            TokenType::Less,
            TokenType::LessEqual,
        ]) {
            let operator = self.previous().clone();
            let right = self.addition()?;
            expression = Expression::Binary {
                left: Box::new(expression),
                operator,
                right: Box::new(right),
            };
        }
        Ok(expression)
    }

    fn addition(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.multiplication()?;
        while self.matches_any(&[TokenType::Minus, TokenType::Plus]) {
            let operator = self.previous().clone();
            let right = self.multiplication()?;
            expression = Expression::Binary {
                left: Box::new(expression),
                operator,
                right: Box::new(right),
            };
        }
        Ok(expression)
    }

    fn multiplication(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.infix_function_call()?;
        while self.matches_any(&[TokenType::Slash, TokenType::Star, TokenType::Modulo]) {
            let operator = self.previous().clone();
            let right = self.infix_function_call()?;
            expression = Expression::Binary {
                left: Box::new(expression),
                operator,
                right: Box::new(right),
            };
        }
        Ok(expression)
    }

    fn infix_function_call(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.unary()?;
        while self.check(TokenType::Identifier) && self.infix_functions.contains(&self.peek().lexeme)
        {
            let name = self.advance().clone();
            let right = self.unary()?;
            expression = Expression::Infix {
                left: Box::new(expression),
                name,
                right: Box::new(right),
            };
        }
        Ok(expression)
    }

    fn unary(&mut self) -> Result<Expression, ParseError> {
        if self.matches_any(&[TokenType::Bang, TokenType::Minus, TokenType::Complement]) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            return Ok(Expression::Unary {
                operator,
                right: Box::new(right),
            });
        }
        if self.matches_any(&[TokenType::PlusPlus, TokenType::MinusMinus]) {
            let operator = self.previous().clone();
            let operand = self.unary()?;
            return match operand {
                Expression::Variable { name, .. } => Ok(Expression::PrefixStep {
                    id: self.fresh_id(),
                    operator,
                    name,
                }),
                _ => Err(ParseError::new("Invalid assignment target.", &operator)),
            };
        }
        self.call()
    }

    fn call(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.primary()?;
        loop {
            if self.matches(TokenType::LeftParen) {
                expression = self.finish_call(expression)?;
            } else if self.matches(TokenType::Dot) {
                let name = self.expect_after(TokenType::Identifier, "'.'")?;
                expression = Expression::Get {
                    object: Box::new(expression),
                    name,
                };
            } else if self.matches_any(&[TokenType::PlusPlus, TokenType::MinusMinus]) {
                let operator = self.previous().clone();
                expression = match expression {
                    Expression::Variable { name, .. } => Expression::PostfixStep {
                        id: self.fresh_id(),
                        name,
                        operator,
                    },
                    _ => return Err(ParseError::new("Invalid assignment target.", &operator)),
                };
            } else {
                break;
            }
        }
        Ok(expression)
    }

    fn finish_call(&mut self, callee: Expression) -> Result<Expression, ParseError> {
        let paren = self.previous().clone();
        let mut arguments = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if arguments.len() >= MAX_NUM_OF_ARGUMENTS {
                    return Err(ParseError::new(
                        format!("Cannot have more than {} arguments.", MAX_NUM_OF_ARGUMENTS),
                        self.peek(),
                    ));
                }
                arguments.push(self.expression()?);
                if !self.matches(TokenType::Comma) {
                    break;
                }
            }
        }
        self.expect_after(TokenType::RightParen, "arguments")?;
        Ok(Expression::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        })
    }

    fn primary(&mut self) -> Result<Expression, ParseError> {
        if self.matches_any(&[
            TokenType::False,
            TokenType::True,
            TokenType::Nil,
            TokenType::Number,
            TokenType::String,
            TokenType::Char,
        ]) {
            let token = self.previous().clone();
            let value = token.literal.clone().unwrap_or(Literal::Nil);
            return Ok(Expression::Literal { token, value });
        }
        if self.matches(TokenType::This) {
            return Ok(Expression::This {
                id: self.fresh_id(),
                keyword: self.previous().clone(),
            });
        }
        if self.matches(TokenType::Super) {
            let keyword = self.previous().clone();
            self.expect_after(TokenType::Dot, "super")?;
            let method = self.expect(TokenType::Identifier, "super class method name")?;
            return Ok(Expression::Super {
                id: self.fresh_id(),
                keyword,
                method,
            });
        }
        if self.matches(TokenType::Identifier) {
            return self.identifier_expression();
        }
        if self.matches(TokenType::LeftParen) {
            let expression = self.expression()?;
            self.expect_after(TokenType::RightParen, "expression")?;
            return Ok(Expression::Grouping(Box::new(expression)));
        }
        if self.matches(TokenType::ArrayOpen) {
            return self.complex_array();
        }
        Err(ParseError::new(
            format!("Expected expression, but found {}.", self.peek()),
            self.peek(),
        ))
    }

    fn identifier_expression(&mut self) -> Result<Expression, ParseError> {
        let name = self.previous().clone();
        if self.matches(TokenType::ArrayOpen) {
            let index = self.expression()?;
            self.expect_after(TokenType::ArrayClose, "index")?;
            return Ok(Expression::ArrayGet {
                id: self.fresh_id(),
                name,
                index: Box::new(index),
            });
        }
        Ok(Expression::Variable {
            id: self.fresh_id(),
            name,
        })
    }

    fn complex_array(&mut self) -> Result<Expression, ParseError> {
        let open = self.previous().clone();
        if self.matches(TokenType::ArrayClose) {
            return Ok(Expression::ArrayLiteral {
                open,
                elements: Vec::new(),
            });
        }

        let first = self.expression()?;
        if self.matches(TokenType::ArrayClose) {
            return Ok(Expression::ArrayLiteral {
                open,
                elements: vec![first],
            });
        }
        if self.matches(TokenType::Comma) {
            let mut elements = vec![first];
            loop {
                elements.push(self.expression()?);
                if !self.matches(TokenType::Comma) {
                    break;
                }
            }
            self.expect_after(TokenType::ArrayClose, "array")?;
            return Ok(Expression::ArrayLiteral { open, elements });
        }
        self.array_comprehension(open, first)
    }

    fn array_comprehension(
        &mut self,
        open: Token,
        element: Expression,
    ) -> Result<Expression, ParseError> {
        self.expect_after(TokenType::For, "expression")?;
        let variable = self.expect(TokenType::Identifier, "variable name")?;
        self.expect_after(TokenType::In, "variable name")?;
        let iterable = self.expression()?;

        let condition = if self.matches(TokenType::If) {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        let alternative = if self.matches(TokenType::Else) {
            Some(Box::new(self.expression()?))
        } else {
            None
        };

        self.expect_after(TokenType::ArrayClose, "array")?;
        Ok(Expression::ArrayComprehension {
            open,
            element: Box::new(element),
            variable,
            iterable: Box::new(iterable),
            condition,
            alternative,
        })
    }

    fn fresh_id(&mut self) -> ExprId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn expect(&mut self, token_type: TokenType, what: &str) -> Result<Token, ParseError> {
        if self.check(token_type) {
            return Ok(self.advance().clone());
        }
        Err(ParseError::new(
            format!("Expected {}, but found {}.", what, self.peek()),
            self.peek(),
        ))
    }

    fn expect_after(&mut self, token_type: TokenType, after: &str) -> Result<Token, ParseError> {
        if self.check(token_type) {
            return Ok(self.advance().clone());
        }
        Err(ParseError::new(
            format!(
                "Expected '{}' after {}, but found {}.",
                token_type.representation(),
                after,
                self.peek()
            ),
            self.peek(),
        ))
    }

    fn expect_before(&mut self, token_type: TokenType, before: &str) -> Result<Token, ParseError> {
        if self.check(token_type) {
            return Ok(self.advance().clone());
        }
        Err(ParseError::new(
            format!(
                "Expected '{}' before {}, but found {}.",
                token_type.representation(),
                before,
                self.peek()
            ),
            self.peek(),
        ))
    }

    fn matches(&mut self, token_type: TokenType) -> bool {
        if self.check(token_type) {
            self.advance();
            return true;
        }
        false
    }

    fn matches_any(&mut self, token_types: &[TokenType]) -> bool {
        for token_type in token_types {
            if self.check(*token_type) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn check(&self, token_type: TokenType) -> bool {
        !self.is_at_end() && self.peek().token_type == token_type
    }

    fn advance(&mut self) -> &'t Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn previous(&self) -> &'t Token {
        &self.tokens[self.current - 1]
    }

    fn peek(&self) -> &'t Token {
        &self.tokens[self.current]
    }

    fn peek_next(&self) -> Option<&'t Token> {
        self.tokens.get(self.current + 1)
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tokenizer::Tokenizer;

    fn parse(source: &str) -> Result<Vec<Statement>, ParseError> {
        let tokens = Tokenizer::new(source)
            .scan_tokens()
            .expect("tokenize should succeed");
        Parser::new(&tokens).parse()
    }

    fn parse_expression(source: &str) -> Expression {
        let statements = parse(&format!("{};", source)).expect("parse should succeed");
        match statements.into_iter().next() {
            Some(Statement::Expression(expression)) => expression,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        let expression = parse_expression("1 + 2 * 3");
        let Expression::Binary { operator, right, .. } = expression else {
            panic!("expected binary expression");
        };
        assert_eq!(operator.token_type, TokenType::Plus);
        assert!(matches!(
            *right,
            Expression::Binary { ref operator, .. } if operator.token_type == TokenType::Star
        ));
    }

    #[test]
    fn test_assignment_targets() {
        assert!(matches!(parse_expression("x = 1"), Expression::Assign { .. }));
        assert!(matches!(parse_expression("xs[0] = 1"), Expression::ArraySet { .. }));
        assert!(matches!(parse_expression("a.b = 1"), Expression::Set { .. }));

        let error = parse("1 = 2;").unwrap_err();
        assert_eq!(error.message, "Invalid assignment target.");
    }

    #[test]
    fn test_compound_assignment_requires_variable() {
        assert!(matches!(
            parse_expression("x += 1"),
            Expression::CompoundAssign { .. }
        ));
        assert!(parse("1 += 2;").is_err());
    }

    #[test]
    fn test_steps_require_variable() {
        assert!(matches!(parse_expression("++x"), Expression::PrefixStep { .. }));
        assert!(matches!(parse_expression("x++"), Expression::PostfixStep { .. }));
        assert!(parse("++1;").is_err());
    }

    #[test]
    fn test_ternary_and_elvis() {
        assert!(matches!(parse_expression("a ? b : c"), Expression::Ternary { .. }));
        assert!(matches!(parse_expression("a ?: b"), Expression::Elvis { .. }));
    }

    #[test]
    fn test_range() {
        assert!(matches!(parse_expression("1..5"), Expression::Range { .. }));
    }

    #[test]
    fn test_argument_limit() {
        let error = parse("f(1, 2, 3, 4, 5, 6, 7, 8, 9);").unwrap_err();
        assert_eq!(error.message, "Cannot have more than 8 arguments.");
    }

    #[test]
    fn test_prefix_function_is_recognized_after_declaration() {
        let statements =
            parse("prefix fun negated(n) { return -n; } var x = negated 3;").expect("parse");
        let Statement::Var { initializer, .. } = &statements[1] else {
            panic!("expected var declaration");
        };
        assert!(matches!(initializer, Some(Expression::Prefix { .. })));
    }

    #[test]
    fn test_infix_function_is_recognized_after_declaration() {
        let statements =
            parse("infix fun plus(a, b) { return a + b; } var x = 1 plus 2;").expect("parse");
        let Statement::Var { initializer, .. } = &statements[1] else {
            panic!("expected var declaration");
        };
        assert!(matches!(initializer, Some(Expression::Infix { .. })));
    }

    #[test]
    fn test_prefix_function_arity_is_enforced() {
        let error = parse("prefix fun negated(a, b) { return a; }").unwrap_err();
        assert_eq!(error.message, "Prefix functions must declare exactly 1 parameter.");
    }

    #[test]
    fn test_switch_cases_must_be_literals() {
        let error = parse("switch (x) { case y: print 1; }").unwrap_err();
        assert_eq!(error.message, "Case expression must be a literal.");
    }

    #[test]
    fn test_switch_rejects_duplicate_cases() {
        let error = parse("switch (x) { case 1: print 1; case 1: print 2; }").unwrap_err();
        assert_eq!(error.message, "Duplicate case expression '1'.");
    }

    #[test]
    fn test_switch_rejects_duplicate_default() {
        let error =
            parse("switch (x) { default: print 1; default: print 2; }").unwrap_err();
        assert_eq!(error.message, "Duplicate default case.");
    }

    #[test]
    fn test_for_each() {
        let statements = parse("for (var x in xs) { print x; }").expect("parse");
        assert!(matches!(statements[0], Statement::ForEach { .. }));
    }

    #[test]
    fn test_classic_for() {
        let statements = parse("for (var i = 0; i < 10; i = i + 1) { print i; }").expect("parse");
        assert!(matches!(statements[0], Statement::For { .. }));
    }

    #[test]
    fn test_native_function_declaration() {
        let statements = parse("native fun math:trig.sin(n);").expect("parse");
        let Statement::NativeFunction { module, name, parameters } = &statements[0] else {
            panic!("expected native function statement");
        };
        assert_eq!(module.lexeme, "math.trig");
        assert_eq!(name.lexeme, "sin");
        assert_eq!(parameters.len(), 1);
    }

    #[test]
    fn test_class_declaration() {
        let statements = parse(
            "class Dog extends Animal { var name = \"Rex\"; constructor(name) { this.name = name; } fun bark() { print \"woof\"; } }",
        )
        .expect("parse");
        let Statement::Class(class) = &statements[0] else {
            panic!("expected class statement");
        };
        assert!(class.superclass.is_some());
        assert!(class.constructor.is_some());
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class.fields.len(), 1);
    }

    #[test]
    fn test_array_comprehension() {
        let expression = parse_expression("[x * 2 for x in xs if x > 1 else 0]");
        let Expression::ArrayComprehension { condition, alternative, .. } = expression else {
            panic!("expected array comprehension");
        };
        assert!(condition.is_some());
        assert!(alternative.is_some());
    }
}
