use std::fmt::Display;

use crate::ast::Literal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    // Single-character tokens
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    ArrayOpen,
    ArrayClose,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,
    Modulo,
    Colon,
    QuestionMark,
    BitwiseAnd,
    BitwiseOr,
    Complement,

    // One or more character tokens
    Arrow,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    PlusPlus,
    MinusMinus,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    ModuloEqual,
    ShiftLeft,
    ShiftRight,
    LogicalShiftRight,
    Elvis,
    Range,

    // Literals
    Identifier,
    String,
    Char,
    Number,

    // Keywords
    And,
    Break,
    Case,
    Class,
    Constructor,
    Continue,
    Default,
    Do,
    Else,
    Extends,
    False,
    For,
    Fun,
    If,
    In,
    Infix,
    Native,
    Nil,
    Or,
    Prefix,
    Print,
    Repeat,
    Return,
    Super,
    Switch,
    This,
    True,
    Using,
    Var,
    While,
    Xor,

    // End of file
    Eof,
}

impl TokenType {
    pub fn keyword(&self) -> bool {
        matches!(
            self,
            TokenType::And
                | TokenType::Break
                | TokenType::Case
                | TokenType::Class
                | TokenType::Constructor
                | TokenType::Continue
                | TokenType::Default
                | TokenType::Do
                | TokenType::Else
                | TokenType::Extends
                | TokenType::False
                | TokenType::For
                | TokenType::Fun
                | TokenType::If
                | TokenType::In
                | TokenType::Infix
                | TokenType::Native
                | TokenType::Nil
                | TokenType::Or
                | TokenType::Prefix
                | TokenType::Print
                | TokenType::Repeat
                | TokenType::Return
                | TokenType::Super
                | TokenType::Switch
                | TokenType::This
                | TokenType::True
                | TokenType::Using
                | TokenType::Var
                | TokenType::While
                | TokenType::Xor
        )
    }

    /// The base operator applied by a compound assignment token, if any.
    pub fn assigns_with(&self) -> Option<TokenType> {
        match self {
            TokenType::PlusEqual => Some(TokenType::Plus),
            TokenType::MinusEqual => Some(TokenType::Minus),
            TokenType::StarEqual => Some(TokenType::Star),
            TokenType::SlashEqual => Some(TokenType::Slash),
            TokenType::ModuloEqual => Some(TokenType::Modulo),
            _ => None,
        }
    }

    pub fn representation(&self) -> &'static str {
        match self {
            TokenType::LeftParen => "(",
            TokenType::RightParen => ")",
            TokenType::LeftBrace => "{",
            TokenType::RightBrace => "}",
            TokenType::ArrayOpen => "[",
            TokenType::ArrayClose => "]",
            TokenType::Comma => ",",
            TokenType::Dot => ".",
            TokenType::Minus => "-",
            TokenType::Plus => "+",
            TokenType::Semicolon => ";",
            TokenType::Slash => "/",
            TokenType::Star => "*",
            TokenType::Modulo => "%",
            TokenType::Colon => ":",
            TokenType::QuestionMark => "?",
            TokenType::BitwiseAnd => "&",
            TokenType::BitwiseOr => "|",
            TokenType::Complement => "~",
            TokenType::Arrow => "->",
            TokenType::Bang => "!",
            TokenType::BangEqual => "!=",
            TokenType::Equal => "=",
            TokenType::EqualEqual => "==",
            TokenType::Greater => ">",
            TokenType::GreaterEqual => ">=",
            TokenType::Less => "<",
            TokenType::LessEqual => "<=",
            TokenType::PlusPlus => "++",
            TokenType::MinusMinus => "--",
            TokenType::PlusEqual => "+=",
            TokenType::MinusEqual => "-=",
            TokenType::StarEqual => "*=",
            TokenType::SlashEqual => "/=",
            TokenType::ModuloEqual => "%=",
            TokenType::ShiftLeft => "<<",
            TokenType::ShiftRight => ">>",
            TokenType::LogicalShiftRight => ">>>",
            TokenType::Elvis => "?:",
            TokenType::Range => "..",
            TokenType::Identifier => "identifier",
            TokenType::String => "string",
            TokenType::Char => "char",
            TokenType::Number => "number",
            TokenType::And => "and",
            TokenType::Break => "break",
            TokenType::Case => "case",
            TokenType::Class => "class",
            TokenType::Constructor => "constructor",
            TokenType::Continue => "continue",
            TokenType::Default => "default",
            TokenType::Do => "do",
            TokenType::Else => "else",
            TokenType::Extends => "extends",
            TokenType::False => "false",
            TokenType::For => "for",
            TokenType::Fun => "fun",
            TokenType::If => "if",
            TokenType::In => "in",
            TokenType::Infix => "infix",
            TokenType::Native => "native",
            TokenType::Nil => "nil",
            TokenType::Or => "or",
            TokenType::Prefix => "prefix",
            TokenType::Print => "print",
            TokenType::Repeat => "repeat",
            TokenType::Return => "return",
            TokenType::Super => "super",
            TokenType::Switch => "switch",
            TokenType::This => "this",
            TokenType::True => "true",
            TokenType::Using => "using",
            TokenType::Var => "var",
            TokenType::While => "while",
            TokenType::Xor => "xor",
            TokenType::Eof => "<eof>",
        }
    }
}

impl Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.representation())
    }
}

/// A single scanned token. Lines are 1-based, columns are 0-based character
/// offsets within the line, matching how diagnostics point into the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub literal: Option<Literal>,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(token_type: TokenType, lexeme: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            token_type,
            lexeme: lexeme.into(),
            literal: None,
            line,
            column,
        }
    }

    pub fn with_literal(mut self, literal: Literal) -> Self {
        self.literal = Some(literal);
        self
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}'", self.lexeme)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenizeError {
    #[error("Unexpected character '{character}'")]
    UnexpectedCharacter { character: char, line: usize, column: usize },
    #[error("Unterminated string")]
    UnterminatedString { line: usize, column: usize },
    #[error("Unterminated character literal")]
    UnterminatedChar { line: usize, column: usize },
}

impl TokenizeError {
    pub fn line(&self) -> usize {
        match self {
            TokenizeError::UnexpectedCharacter { line, .. }
            | TokenizeError::UnterminatedString { line, .. }
            | TokenizeError::UnterminatedChar { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            TokenizeError::UnexpectedCharacter { column, .. }
            | TokenizeError::UnterminatedString { column, .. }
            | TokenizeError::UnterminatedChar { column, .. } => *column,
        }
    }
}

pub struct Tokenizer {
    chars: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
}

impl Tokenizer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            column: 0,
            start_line: 1,
            start_column: 0,
        }
    }

    pub fn scan_tokens(mut self) -> Result<Vec<Token>, TokenizeError> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_column = self.column;
            self.scan_token()?;
        }
        self.tokens
            .push(Token::new(TokenType::Eof, "", self.line, self.column));
        Ok(self.tokens)
    }

    fn scan_token(&mut self) -> Result<(), TokenizeError> {
        let c = self.advance();
        match c {
            '(' => self.add_token(TokenType::LeftParen),
            ')' => self.add_token(TokenType::RightParen),
            '{' => self.add_token(TokenType::LeftBrace),
            '}' => self.add_token(TokenType::RightBrace),
            '[' => self.add_token(TokenType::ArrayOpen),
            ']' => self.add_token(TokenType::ArrayClose),
            ',' => self.add_token(TokenType::Comma),
            ';' => self.add_token(TokenType::Semicolon),
            ':' => self.add_token(TokenType::Colon),
            '&' => self.add_token(TokenType::BitwiseAnd),
            '|' => self.add_token(TokenType::BitwiseOr),
            '~' => self.add_token(TokenType::Complement),
            '.' => {
                let token = if self.matches('.') { TokenType::Range } else { TokenType::Dot };
                self.add_token(token);
            }
            '-' => {
                let token = if self.matches('-') {
                    TokenType::MinusMinus
                } else if self.matches('=') {
                    TokenType::MinusEqual
                } else if self.matches('>') {
                    TokenType::Arrow
                } else {
                    TokenType::Minus
                };
                self.add_token(token);
            }
            '+' => {
                let token = if self.matches('+') {
                    TokenType::PlusPlus
                } else if self.matches('=') {
                    TokenType::PlusEqual
                } else {
                    TokenType::Plus
                };
                self.add_token(token);
            }
            '*' => {
                let token = if self.matches('=') { TokenType::StarEqual } else { TokenType::Star };
                self.add_token(token);
            }
            '%' => {
                let token = if self.matches('=') { TokenType::ModuloEqual } else { TokenType::Modulo };
                self.add_token(token);
            }
            '/' => {
                if self.matches('/') {
                    while self.peek() != Some('\n') && !self.is_at_end() {
                        self.advance();
                    }
                } else if self.matches('=') {
                    self.add_token(TokenType::SlashEqual);
                } else {
                    self.add_token(TokenType::Slash);
                }
            }
            '!' => {
                let token = if self.matches('=') { TokenType::BangEqual } else { TokenType::Bang };
                self.add_token(token);
            }
            '=' => {
                let token = if self.matches('=') { TokenType::EqualEqual } else { TokenType::Equal };
                self.add_token(token);
            }
            '<' => {
                let token = if self.matches('<') {
                    TokenType::ShiftLeft
                } else if self.matches('=') {
                    TokenType::LessEqual
                } else {
                    TokenType::Less
                };
                self.add_token(token);
            }
            '>' => {
                let token = if self.matches('>') {
                    if self.matches('>') {
                        TokenType::LogicalShiftRight
                    } else {
                        TokenType::ShiftRight
                    }
                } else if self.matches('=') {
                    TokenType::GreaterEqual
                } else {
                    TokenType::Greater
                };
                self.add_token(token);
            }
            '?' => {
                let token = if self.matches(':') { TokenType::Elvis } else { TokenType::QuestionMark };
                self.add_token(token);
            }
            '"' => self.string()?,
            '\'' => self.char_literal()?,
            c if c.is_ascii_digit() => self.number(),
            c if c.is_ascii_alphabetic() || c == '_' => self.identifier(),
            c if c.is_whitespace() => {}
            c => {
                return Err(TokenizeError::UnexpectedCharacter {
                    character: c,
                    line: self.start_line,
                    column: self.start_column,
                })
            }
        }
        Ok(())
    }

    fn string(&mut self) -> Result<(), TokenizeError> {
        while self.peek() != Some('"') && !self.is_at_end() {
            self.advance();
        }
        if self.is_at_end() {
            return Err(TokenizeError::UnterminatedString {
                line: self.start_line,
                column: self.start_column,
            });
        }
        self.advance();

        let value: String = self.chars[self.start + 1..self.current - 1].iter().collect();
        self.add_literal_token(TokenType::String, Literal::String(value));
        Ok(())
    }

    fn char_literal(&mut self) -> Result<(), TokenizeError> {
        let unterminated = TokenizeError::UnterminatedChar {
            line: self.start_line,
            column: self.start_column,
        };
        if self.is_at_end() {
            return Err(unterminated);
        }
        let value = self.advance();
        if !self.matches('\'') {
            return Err(unterminated);
        }
        self.add_literal_token(TokenType::Char, Literal::Char(value));
        Ok(())
    }

    fn number(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        // A '.' may also start a range expression; only consume it for a fraction.
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let lexeme: String = self.chars[self.start..self.current].iter().collect();
        let value = lexeme.parse().unwrap_or(f64::NAN);
        self.add_literal_token(TokenType::Number, Literal::Number(value));
    }

    fn identifier(&mut self) {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.advance();
        }
        let lexeme: String = self.chars[self.start..self.current].iter().collect();
        match keyword(&lexeme) {
            Some(TokenType::True) => self.add_literal_token(TokenType::True, Literal::Boolean(true)),
            Some(TokenType::False) => self.add_literal_token(TokenType::False, Literal::Boolean(false)),
            Some(TokenType::Nil) => self.add_literal_token(TokenType::Nil, Literal::Nil),
            Some(token_type) => self.add_token(token_type),
            None => self.add_token(TokenType::Identifier),
        }
    }

    fn add_token(&mut self, token_type: TokenType) {
        let lexeme: String = self.chars[self.start..self.current].iter().collect();
        self.tokens
            .push(Token::new(token_type, lexeme, self.start_line, self.start_column));
    }

    fn add_literal_token(&mut self, token_type: TokenType, literal: Literal) {
        let lexeme: String = self.chars[self.start..self.current].iter().collect();
        self.tokens.push(
            Token::new(token_type, lexeme, self.start_line, self.start_column).with_literal(literal),
        );
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        c
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).copied()
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }
}

fn keyword(lexeme: &str) -> Option<TokenType> {
    let token_type = match lexeme {
        "and" => TokenType::And,
        "break" => TokenType::Break,
        "case" => TokenType::Case,
        "class" => TokenType::Class,
        "constructor" => TokenType::Constructor,
        "continue" => TokenType::Continue,
        "default" => TokenType::Default,
        "do" => TokenType::Do,
        "else" => TokenType::Else,
        "extends" => TokenType::Extends,
        "false" => TokenType::False,
        "for" => TokenType::For,
        "fun" => TokenType::Fun,
        "if" => TokenType::If,
        "in" => TokenType::In,
        "infix" => TokenType::Infix,
        "native" => TokenType::Native,
        "nil" => TokenType::Nil,
        "or" => TokenType::Or,
        "prefix" => TokenType::Prefix,
        "print" => TokenType::Print,
        "repeat" => TokenType::Repeat,
        "return" => TokenType::Return,
        "super" => TokenType::Super,
        "switch" => TokenType::Switch,
        "this" => TokenType::This,
        "true" => TokenType::True,
        "using" => TokenType::Using,
        "var" => TokenType::Var,
        "while" => TokenType::While,
        "xor" => TokenType::Xor,
        _ => return None,
    };
    Some(token_type)
}

#[cfg(test)]
mod test {
    use super::*;

    fn types(source: &str) -> Vec<TokenType> {
        Tokenizer::new(source)
            .scan_tokens()
            .expect("tokenize should succeed")
            .into_iter()
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn test_var_declaration() {
        assert_eq!(
            types("var x = 1;"),
            vec![
                TokenType::Var,
                TokenType::Identifier,
                TokenType::Equal,
                TokenType::Number,
                TokenType::Semicolon,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            types("var x = 1; // comment"),
            vec![
                TokenType::Var,
                TokenType::Identifier,
                TokenType::Equal,
                TokenType::Number,
                TokenType::Semicolon,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_range_does_not_eat_fraction() {
        assert_eq!(
            types("1..5"),
            vec![TokenType::Number, TokenType::Range, TokenType::Number, TokenType::Eof]
        );
        assert_eq!(types("1.5"), vec![TokenType::Number, TokenType::Eof]);
    }

    #[test]
    fn test_shift_operators() {
        assert_eq!(
            types("a >> b >>> c << d"),
            vec![
                TokenType::Identifier,
                TokenType::ShiftRight,
                TokenType::Identifier,
                TokenType::LogicalShiftRight,
                TokenType::Identifier,
                TokenType::ShiftLeft,
                TokenType::Identifier,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_elvis_and_ternary() {
        assert_eq!(
            types("a ?: b"),
            vec![TokenType::Identifier, TokenType::Elvis, TokenType::Identifier, TokenType::Eof]
        );
        assert_eq!(
            types("a ? b : c"),
            vec![
                TokenType::Identifier,
                TokenType::QuestionMark,
                TokenType::Identifier,
                TokenType::Colon,
                TokenType::Identifier,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_compound_assignment() {
        assert_eq!(
            types("x += 1;"),
            vec![
                TokenType::Identifier,
                TokenType::PlusEqual,
                TokenType::Number,
                TokenType::Semicolon,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_literals_carry_values() {
        let tokens = Tokenizer::new("\"hello\" 'c' 4.5 true nil")
            .scan_tokens()
            .expect("tokenize should succeed");
        assert_eq!(tokens[0].literal, Some(Literal::String("hello".to_string())));
        assert_eq!(tokens[1].literal, Some(Literal::Char('c')));
        assert_eq!(tokens[2].literal, Some(Literal::Number(4.5)));
        assert_eq!(tokens[3].literal, Some(Literal::Boolean(true)));
        assert_eq!(tokens[4].literal, Some(Literal::Nil));
    }

    #[test]
    fn test_positions() {
        let tokens = Tokenizer::new("var x;\nprint x;")
            .scan_tokens()
            .expect("tokenize should succeed");
        let print = tokens.iter().find(|t| t.token_type == TokenType::Print).unwrap();
        assert_eq!(print.line, 2);
        assert_eq!(print.column, 0);
        let x = tokens.iter().rev().find(|t| t.token_type == TokenType::Identifier).unwrap();
        assert_eq!(x.line, 2);
        assert_eq!(x.column, 6);
    }

    #[test]
    fn test_unexpected_character() {
        let error = Tokenizer::new("var a = #;").scan_tokens().unwrap_err();
        assert!(matches!(error, TokenizeError::UnexpectedCharacter { character: '#', .. }));
        assert_eq!(error.line(), 1);
        assert_eq!(error.column(), 8);
    }

    #[test]
    fn test_unterminated_string() {
        let error = Tokenizer::new("var a = \"abc").scan_tokens().unwrap_err();
        assert!(matches!(error, TokenizeError::UnterminatedString { .. }));
    }
}
