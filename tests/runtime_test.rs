use std::{cell::RefCell, rc::Rc};

use hsl::{
    ast::Literal,
    interpreter::{module::NativeModule, ExecutionOptions, RuntimeError, Value},
    runtime::{CodeCustomizer, Phase, ScriptContext, ScriptRuntime},
    tokenizer::TokenType,
};

fn buffer() -> Rc<RefCell<Vec<u8>>> {
    Rc::new(RefCell::new(Vec::<u8>::new()))
}

fn runtime(buffer: &Rc<RefCell<Vec<u8>>>) -> ScriptRuntime {
    let output: Rc<RefCell<dyn std::io::Write>> = buffer.clone();
    ScriptRuntime::new(output)
}

fn output_of(buffer: &Rc<RefCell<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&buffer.borrow()).to_string()
}

fn math_module() -> NativeModule {
    NativeModule::new("math").with_function("square", 1, |arguments| match &arguments[0] {
        Value::Number(n) => Ok(Value::Number(n * n)),
        value => Err(RuntimeError::plain(format!(
            "square expects a number, got {}.",
            value
        ))),
    })
}

#[test]
fn test_using_imports_a_native_module() {
    let buffer = buffer();
    let runtime = runtime(&buffer).with_module(math_module());
    let context = runtime.run("using math; print square(4);", Phase::Interpreting);
    assert!(context.errors().is_empty());
    assert_eq!(output_of(&buffer), "16\n");
}

#[test]
fn test_native_fun_binds_a_single_function() {
    let buffer = buffer();
    let runtime = runtime(&buffer).with_module(math_module());
    let context = runtime.run(
        "native fun math.square(value); print square(3);",
        Phase::Interpreting,
    );
    assert!(context.errors().is_empty());
    assert_eq!(output_of(&buffer), "9\n");
}

#[test]
fn test_native_access_can_be_disabled() {
    let buffer = buffer();
    let runtime = runtime(&buffer)
        .with_module(math_module())
        .with_options(ExecutionOptions {
            allow_native_access: false,
            ..ExecutionOptions::default()
        });
    let context = runtime.run("using math; print square(4);", Phase::Interpreting);
    let error = context.first_error().expect("using should be rejected");
    assert_eq!(error.phase, Phase::Interpreting);
    assert_eq!(
        error.message,
        "Native module access is not allowed in this runtime."
    );
    assert_eq!(output_of(&buffer), "");
}

#[test]
fn test_unknown_native_module_is_an_error() {
    let buffer = buffer();
    let runtime = runtime(&buffer);
    let context = runtime.run("using trigonometry;", Phase::Interpreting);
    let error = context.first_error().expect("unknown module should fail");
    assert_eq!(error.message, "Unknown native module 'trigonometry'.");
}

#[test]
fn test_native_errors_point_at_the_call_site() {
    let buffer = buffer();
    let runtime = runtime(&buffer).with_module(math_module());
    let context = runtime.run("using math;\nprint square(\"four\");", Phase::Interpreting);
    let error = context.first_error().expect("native call should fail");
    assert_eq!(error.line, Some(2));
    assert!(error.message.starts_with("square expects a number"));
}

#[test]
fn test_comprehension_depth_is_limited() {
    let buffer = buffer();
    let runtime = runtime(&buffer).with_options(ExecutionOptions {
        max_comprehension_depth: 1,
        ..ExecutionOptions::default()
    });
    let context = runtime.run(
        "print [[y for y in 1..2] for x in 1..2];",
        Phase::Interpreting,
    );
    let error = context.first_error().expect("nesting should be rejected");
    assert_eq!(
        error.message,
        "Array comprehensions may not nest deeper than 1 levels."
    );
}

#[test]
fn test_comprehension_within_the_limit_succeeds() {
    let buffer = buffer();
    let runtime = runtime(&buffer).with_options(ExecutionOptions {
        max_comprehension_depth: 2,
        ..ExecutionOptions::default()
    });
    let context = runtime.run(
        "print [[y for y in 1..2] for x in 1..2];",
        Phase::Interpreting,
    );
    assert!(context.errors().is_empty());
    assert_eq!(output_of(&buffer), "[[1, 2], [1, 2]]\n");
}

#[test]
fn test_run_until_resolving_does_not_execute() {
    let buffer = buffer();
    let runtime = runtime(&buffer);
    let context = runtime.run("print 1;", Phase::Resolving);
    assert!(context.errors().is_empty());
    assert!(context.statements.is_some());
    assert_eq!(output_of(&buffer), "");
}

#[test]
fn test_run_stops_at_first_failing_phase() {
    let buffer = buffer();
    let runtime = runtime(&buffer);
    let context = runtime.run("var = 1;", Phase::Interpreting);
    assert_eq!(context.errors().len(), 1);
    let error = context.first_error().expect("parse should fail");
    assert_eq!(error.phase, Phase::Parsing);
    // Tokens from the completed phase are retained.
    assert!(context.tokens.is_some());
    assert!(context.statements.is_none());
}

#[test]
fn test_tokenize_error_is_positioned() {
    let buffer = buffer();
    let runtime = runtime(&buffer);
    let context = runtime.run("var a = 1;\nvar b = @;", Phase::Interpreting);
    let error = context.first_error().expect("tokenize should fail");
    assert_eq!(error.phase, Phase::Tokenizing);
    let rendered = error.to_string();
    assert!(
        rendered.contains("while tokenizing at line 2, column 8."),
        "{rendered}"
    );
    assert!(rendered.contains("var b = @;"), "{rendered}");
}

#[test]
fn test_resolution_error_is_surfaced() {
    let buffer = buffer();
    let runtime = runtime(&buffer);
    let context = runtime.run("break;", Phase::Interpreting);
    let error = context.first_error().expect("resolve should fail");
    assert_eq!(error.phase, Phase::Resolving);
    assert!(error.to_string().starts_with(
        "Cannot use 'break' outside of a loop or switch while resolving at line 1, column 0."
    ));
}

#[test]
fn test_run_phase_reexecutes_a_single_phase() {
    let buffer = buffer();
    let runtime = runtime(&buffer);
    let mut context = runtime.run("print \"once\";", Phase::Interpreting);
    assert_eq!(output_of(&buffer), "once\n");

    // Resolving restores the interpreter, so interpreting runs again.
    runtime.run_phase(&mut context, Phase::Resolving);
    runtime.run_phase(&mut context, Phase::Interpreting);
    assert!(context.errors().is_empty());
    assert_eq!(output_of(&buffer), "once\nonce\n");
}

#[test]
fn test_reinterpreting_without_restore_is_rejected() {
    let buffer = buffer();
    let runtime = runtime(&buffer);
    let mut context = runtime.run("print 1;", Phase::Interpreting);
    runtime.run_phase(&mut context, Phase::Interpreting);
    let error = context.first_error().expect("reuse should be rejected");
    assert_eq!(error.phase, Phase::Interpreting);
    assert!(error.message.contains("already run"));
}

struct EveryNumberIsTheAnswer;

impl CodeCustomizer for EveryNumberIsTheAnswer {
    fn phase(&self) -> Phase {
        Phase::Parsing
    }

    fn customize(&self, context: &mut ScriptContext) {
        if let Some(tokens) = &mut context.tokens {
            for token in tokens {
                if token.token_type == TokenType::Number {
                    token.literal = Some(Literal::Number(42.0));
                }
            }
        }
    }
}

#[test]
fn test_customizer_rewrites_tokens_before_parsing() {
    let buffer = buffer();
    let output: Rc<RefCell<dyn std::io::Write>> = buffer.clone();
    let runtime =
        ScriptRuntime::new(output).with_customizer(Rc::new(EveryNumberIsTheAnswer));
    let context = runtime.run("print 1;", Phase::Interpreting);
    assert!(context.errors().is_empty());
    assert_eq!(output_of(&buffer), "42\n");
}
