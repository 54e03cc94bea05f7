use std::{cell::RefCell, error::Error, fmt::Display, rc::Rc};

use log::debug;
use rustc_hash::FxHashMap;

use crate::{
    ast::Statement,
    interpreter::{module::NativeModule, ExecutionError, ExecutionOptions, Interpreter},
    parser::Parser,
    resolver::Resolver,
    tokenizer::{Token, Tokenizer},
};

/// The stages a script passes through, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Tokenizing,
    Parsing,
    Resolving,
    Interpreting,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Tokenizing,
        Phase::Parsing,
        Phase::Resolving,
        Phase::Interpreting,
    ];
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Tokenizing => "tokenizing",
            Phase::Parsing => "parsing",
            Phase::Resolving => "resolving",
            Phase::Interpreting => "interpreting",
        };
        write!(f, "{}", name)
    }
}

/// A hook the host can register to rewrite the script between phases. Each
/// customizer is invoked right before the phase it declares, so a tokenizing
/// customizer sees the raw source and a parsing customizer sees the tokens.
pub trait CodeCustomizer {
    fn phase(&self) -> Phase;
    fn customize(&self, context: &mut ScriptContext);
}

/// A phase failure annotated with where in the pipeline and in the source it
/// happened. The underlying phase error stays available through `source()`.
#[derive(Debug)]
pub struct ScriptError {
    pub phase: Phase,
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
    snippet: Option<String>,
    cause: Option<Box<dyn Error>>,
}

impl ScriptError {
    fn new(phase: Phase, message: impl Into<String>, cause: impl Error + 'static) -> Self {
        Self {
            phase,
            message: message.into(),
            line: None,
            column: None,
            snippet: None,
            cause: Some(Box::new(cause)),
        }
    }

    /// Lines are 1-based, columns 0-based offsets into the line.
    fn positioned(mut self, line: usize, column: usize, source: &str) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self.snippet = source.lines().nth(line.saturating_sub(1)).map(str::to_owned);
        self
    }

    fn at_token(self, token: &Token, source: &str) -> Self {
        let (line, column) = (token.line, token.column);
        self.positioned(line, column, source)
    }
}

impl Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self.message.trim_end_matches('.');
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(
                    f,
                    "{} while {} at line {}, column {}.",
                    message, self.phase, line, column
                )?;
                if let Some(snippet) = &self.snippet {
                    write!(f, "\n{}\n{}^", snippet, " ".repeat(column))?;
                }
                Ok(())
            }
            _ => write!(f, "{} while {}.", message, self.phase),
        }
    }
}

impl Error for ScriptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref()
    }
}

/// Everything one run of a script accumulates. Artifacts of completed phases
/// stay available even when a later phase fails.
pub struct ScriptContext {
    pub source: String,
    pub tokens: Option<Vec<Token>>,
    pub statements: Option<Vec<Statement>>,
    interpreter: Interpreter,
    errors: Vec<ScriptError>,
}

impl ScriptContext {
    pub fn errors(&self) -> &[ScriptError] {
        &self.errors
    }

    pub fn first_error(&self) -> Option<&ScriptError> {
        self.errors.first()
    }

    pub fn interpreter(&mut self) -> &mut Interpreter {
        &mut self.interpreter
    }
}

/// Orchestrates the phases over a shared context. The runtime itself is
/// reusable; each `run` builds a fresh context and interpreter around the
/// configured modules, options and output sink.
pub struct ScriptRuntime {
    modules: FxHashMap<String, Rc<NativeModule>>,
    options: ExecutionOptions,
    customizers: Vec<Rc<dyn CodeCustomizer>>,
    output: Rc<RefCell<dyn std::io::Write>>,
}

impl ScriptRuntime {
    pub fn new(output: Rc<RefCell<dyn std::io::Write>>) -> Self {
        Self {
            modules: FxHashMap::default(),
            options: ExecutionOptions::default(),
            customizers: Vec::new(),
            output,
        }
    }

    pub fn with_module(mut self, module: NativeModule) -> Self {
        self.modules.insert(module.name().to_owned(), Rc::new(module));
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_customizer(mut self, customizer: Rc<dyn CodeCustomizer>) -> Self {
        self.customizers.push(customizer);
        self
    }

    pub fn create_context(&self, source: impl Into<String>) -> ScriptContext {
        let mut interpreter = Interpreter::new(self.output.clone());
        interpreter.set_options(self.options.clone());
        interpreter.load_modules(&self.modules);
        ScriptContext {
            source: source.into(),
            tokens: None,
            statements: None,
            interpreter,
            errors: Vec::new(),
        }
    }

    /// Runs phases in order up to and including `until`, stopping at the
    /// first phase that records an error.
    pub fn run(&self, source: impl Into<String>, until: Phase) -> ScriptContext {
        let mut context = self.create_context(source);
        for phase in Phase::ALL {
            if phase > until {
                break;
            }
            self.run_phase(&mut context, phase);
            if !context.errors.is_empty() {
                break;
            }
        }
        context
    }

    /// Re-executes exactly one phase against the context's current artifacts.
    /// Resolving restores the interpreter first, so a context can be resolved
    /// and interpreted repeatedly.
    pub fn run_phase(&self, context: &mut ScriptContext, phase: Phase) {
        debug!("running {} phase", phase);
        for customizer in &self.customizers {
            if customizer.phase() == phase {
                customizer.customize(context);
            }
        }
        match phase {
            Phase::Tokenizing => self.tokenize(context),
            Phase::Parsing => self.parse(context),
            Phase::Resolving => self.resolve(context),
            Phase::Interpreting => self.interpret(context),
        }
    }

    fn tokenize(&self, context: &mut ScriptContext) {
        match Tokenizer::new(&context.source).scan_tokens() {
            Ok(tokens) => {
                debug!("tokenized {} tokens", tokens.len());
                context.tokens = Some(tokens);
            }
            Err(error) => {
                let script_error = ScriptError::new(Phase::Tokenizing, error.to_string(), error.clone())
                    .positioned(error.line(), error.column(), &context.source);
                context.errors.push(script_error);
            }
        }
    }

    fn parse(&self, context: &mut ScriptContext) {
        let Some(tokens) = &context.tokens else {
            context.errors.push(ScriptError {
                phase: Phase::Parsing,
                message: "No tokens available; run the tokenizing phase first".to_owned(),
                line: None,
                column: None,
                snippet: None,
                cause: None,
            });
            return;
        };
        match Parser::new(tokens).parse() {
            Ok(statements) => {
                debug!("parsed {} top-level statements", statements.len());
                context.statements = Some(statements);
            }
            Err(error) => {
                let script_error = ScriptError::new(Phase::Parsing, error.to_string(), error.clone())
                    .at_token(&error.token, &context.source);
                context.errors.push(script_error);
            }
        }
    }

    fn resolve(&self, context: &mut ScriptContext) {
        let Some(statements) = context.statements.take() else {
            context.errors.push(ScriptError {
                phase: Phase::Resolving,
                message: "No statements available; run the parsing phase first".to_owned(),
                line: None,
                column: None,
                snippet: None,
                cause: None,
            });
            return;
        };
        // Resolution hops and the single-use flag belong to one interpreter
        // lifetime; start that lifetime over before re-resolving.
        context.interpreter.restore();
        let result = Resolver::new(&mut context.interpreter).resolve(&statements);
        context.statements = Some(statements);
        if let Err(error) = result {
            let script_error = ScriptError::new(Phase::Resolving, error.to_string(), error.clone())
                .at_token(&error.token, &context.source);
            context.errors.push(script_error);
        }
    }

    fn interpret(&self, context: &mut ScriptContext) {
        let Some(statements) = context.statements.take() else {
            context.errors.push(ScriptError {
                phase: Phase::Interpreting,
                message: "No statements available; run the resolving phase first".to_owned(),
                line: None,
                column: None,
                snippet: None,
                cause: None,
            });
            return;
        };
        let result = context.interpreter.interpret(&statements);
        context.statements = Some(statements);
        if let Err(error) = result {
            let token = match &error {
                ExecutionError::Runtime(runtime_error) => runtime_error.token.clone(),
                _ => None,
            };
            let mut script_error = ScriptError::new(Phase::Interpreting, error.to_string(), error);
            if let Some(token) = token {
                script_error = script_error.at_token(&token, &context.source);
            }
            context.errors.push(script_error);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn runtime_with_buffer() -> (ScriptRuntime, Rc<RefCell<Vec<u8>>>) {
        let buffer = Rc::new(RefCell::new(Vec::<u8>::new()));
        let output: Rc<RefCell<dyn std::io::Write>> = buffer.clone();
        (ScriptRuntime::new(output), buffer)
    }

    fn output_of(buffer: &Rc<RefCell<Vec<u8>>>) -> String {
        String::from_utf8_lossy(&buffer.borrow()).to_string()
    }

    #[test]
    fn test_full_pipeline_prints() {
        let (runtime, buffer) = runtime_with_buffer();
        let context = runtime.run("print 1 + 2 * 3;", Phase::Interpreting);
        assert!(context.errors().is_empty());
        assert_eq!(output_of(&buffer), "7\n");
    }

    #[test]
    fn test_run_stops_at_requested_phase() {
        let (runtime, buffer) = runtime_with_buffer();
        let context = runtime.run("print 1;", Phase::Parsing);
        assert!(context.errors().is_empty());
        assert!(context.tokens.is_some());
        assert!(context.statements.is_some());
        assert_eq!(output_of(&buffer), "");
    }

    #[test]
    fn test_parse_error_diagnostic_carries_position_and_caret() {
        let (runtime, _) = runtime_with_buffer();
        let context = runtime.run("var x = ;", Phase::Interpreting);
        let error = context.first_error().expect("parse should fail");
        assert_eq!(error.phase, Phase::Parsing);
        let rendered = error.to_string();
        assert!(rendered.contains("while parsing at line 1, column 8."), "{rendered}");
        assert!(rendered.contains("var x = ;"), "{rendered}");
        assert!(rendered.ends_with("        ^"), "{rendered}");
        assert!(error.source().is_some());
    }

    #[test]
    fn test_runtime_error_diagnostic_names_the_phase() {
        let (runtime, _) = runtime_with_buffer();
        let context = runtime.run("print missing;", Phase::Interpreting);
        let error = context.first_error().expect("interpretation should fail");
        assert_eq!(error.phase, Phase::Interpreting);
        assert!(error
            .to_string()
            .starts_with("Undefined variable 'missing' while interpreting at line 1"));
    }

    #[test]
    fn test_run_phase_reinterprets_after_resolve() {
        let (runtime, buffer) = runtime_with_buffer();
        let mut context = runtime.run("print \"again\";", Phase::Interpreting);
        assert!(context.errors().is_empty());
        runtime.run_phase(&mut context, Phase::Resolving);
        runtime.run_phase(&mut context, Phase::Interpreting);
        assert!(context.errors().is_empty());
        assert_eq!(output_of(&buffer), "again\nagain\n");
    }

    struct SourceUppercaser;

    impl CodeCustomizer for SourceUppercaser {
        fn phase(&self) -> Phase {
            Phase::Tokenizing
        }

        fn customize(&self, context: &mut ScriptContext) {
            context.source = context.source.replace("lower", "upper");
        }
    }

    #[test]
    fn test_customizer_rewrites_source_before_tokenizing() {
        let buffer = Rc::new(RefCell::new(Vec::<u8>::new()));
        let output: Rc<RefCell<dyn std::io::Write>> = buffer.clone();
        let runtime = ScriptRuntime::new(output).with_customizer(Rc::new(SourceUppercaser));
        let context = runtime.run("print \"lower\";", Phase::Interpreting);
        assert!(context.errors().is_empty());
        assert_eq!(output_of(&buffer), "upper\n");
    }
}
