use std::fmt::Display;
use std::rc::Rc;

use crate::tokenizer::Token;

/// Identifier of a resolvable reference node, assigned by the parser and used
/// as the key of the interpreter's resolution table.
pub type ExprId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Char(char),
    Boolean(bool),
    Nil,
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "{}", s),
            Literal::Char(c) => write!(f, "{}", c),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Nil => write!(f, "nil"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expression {
    Literal {
        token: Token,
        value: Literal,
    },
    Grouping(Box<Expression>),
    Variable {
        id: ExprId,
        name: Token,
    },
    Assign {
        id: ExprId,
        name: Token,
        value: Box<Expression>,
    },
    /// Compound assignment such as `x += 1`; `operator` is the base operator
    /// the compound token applies with.
    CompoundAssign {
        id: ExprId,
        name: Token,
        operator: Token,
        value: Box<Expression>,
    },
    /// `++x` / `--x`, evaluating to the updated value.
    PrefixStep {
        id: ExprId,
        operator: Token,
        name: Token,
    },
    /// `x++` / `x--`, evaluating to the value before the step.
    PostfixStep {
        id: ExprId,
        name: Token,
        operator: Token,
    },
    Unary {
        operator: Token,
        right: Box<Expression>,
    },
    Binary {
        left: Box<Expression>,
        operator: Token,
        right: Box<Expression>,
    },
    Logical {
        left: Box<Expression>,
        operator: Token,
        right: Box<Expression>,
    },
    Range {
        start: Box<Expression>,
        operator: Token,
        end: Box<Expression>,
    },
    Ternary {
        condition: Box<Expression>,
        then_branch: Box<Expression>,
        else_branch: Box<Expression>,
    },
    Elvis {
        condition: Box<Expression>,
        alternative: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        paren: Token,
        arguments: Vec<Expression>,
    },
    Get {
        object: Box<Expression>,
        name: Token,
    },
    Set {
        object: Box<Expression>,
        name: Token,
        value: Box<Expression>,
    },
    This {
        id: ExprId,
        keyword: Token,
    },
    Super {
        id: ExprId,
        keyword: Token,
        method: Token,
    },
    ArrayLiteral {
        open: Token,
        elements: Vec<Expression>,
    },
    ArrayComprehension {
        open: Token,
        element: Box<Expression>,
        variable: Token,
        iterable: Box<Expression>,
        condition: Option<Box<Expression>>,
        alternative: Option<Box<Expression>>,
    },
    ArrayGet {
        id: ExprId,
        name: Token,
        index: Box<Expression>,
    },
    ArraySet {
        id: ExprId,
        name: Token,
        index: Box<Expression>,
        value: Box<Expression>,
    },
    /// Application of a user-declared prefix operator function.
    Prefix {
        name: Token,
        right: Box<Expression>,
    },
    /// Application of a user-declared infix operator function.
    Infix {
        left: Box<Expression>,
        name: Token,
        right: Box<Expression>,
    },
}

impl Expression {
    /// The token diagnostics should point at for this expression.
    pub fn token(&self) -> &Token {
        match self {
            Expression::Literal { token, .. } => token,
            Expression::Grouping(inner) => inner.token(),
            Expression::Variable { name, .. } => name,
            Expression::Assign { name, .. } => name,
            Expression::CompoundAssign { name, .. } => name,
            Expression::PrefixStep { name, .. } => name,
            Expression::PostfixStep { name, .. } => name,
            Expression::Unary { operator, .. } => operator,
            Expression::Binary { operator, .. } => operator,
            Expression::Logical { operator, .. } => operator,
            Expression::Range { operator, .. } => operator,
            Expression::Ternary { condition, .. } => condition.token(),
            Expression::Elvis { condition, .. } => condition.token(),
            Expression::Call { paren, .. } => paren,
            Expression::Get { name, .. } => name,
            Expression::Set { name, .. } => name,
            Expression::This { keyword, .. } => keyword,
            Expression::Super { keyword, .. } => keyword,
            Expression::ArrayLiteral { open, .. } => open,
            Expression::ArrayComprehension { open, .. } => open,
            Expression::ArrayGet { name, .. } => name,
            Expression::ArraySet { name, .. } => name,
            Expression::Prefix { name, .. } => name,
            Expression::Infix { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    Expression(Expression),
    Print(Expression),
    Block(Vec<Statement>),
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    DoWhile {
        body: Box<Statement>,
        condition: Expression,
    },
    For {
        initializer: Option<Box<Statement>>,
        condition: Option<Expression>,
        increment: Option<Expression>,
        body: Box<Statement>,
    },
    ForEach {
        variable: Token,
        iterable: Expression,
        body: Box<Statement>,
    },
    Repeat {
        count: Expression,
        body: Box<Statement>,
    },
    Switch {
        subject: Expression,
        cases: Vec<SwitchCase>,
        default: Option<Box<Statement>>,
    },
    Break(Token),
    Continue(Token),
    Return {
        keyword: Token,
        value: Option<Expression>,
    },
    Var {
        name: Token,
        initializer: Option<Expression>,
    },
    Function {
        kind: FunctionKind,
        declaration: Rc<FunctionDeclaration>,
    },
    Class(ClassDeclaration),
    NativeFunction {
        name: Token,
        module: Token,
        parameters: Vec<Token>,
    },
    /// `using name;` imports a native module's functions into scope.
    Using {
        module: Token,
    },
}

/// How a function declaration may be applied at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Plain,
    Prefix,
    Infix,
}

#[derive(Debug, Clone)]
pub struct FunctionDeclaration {
    pub name: Token,
    pub parameters: Vec<Token>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct ClassDeclaration {
    pub name: Token,
    pub superclass: Option<Expression>,
    pub constructor: Option<Rc<FunctionDeclaration>>,
    pub methods: Vec<Rc<FunctionDeclaration>>,
    pub fields: Vec<FieldDeclaration>,
}

#[derive(Debug, Clone)]
pub struct FieldDeclaration {
    pub name: Token,
    pub initializer: Option<Expression>,
}

/// A `case <literal>:` or `case <literal> ->` arm of a switch statement.
#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub pattern: Token,
    pub value: Literal,
    pub body: Statement,
}
