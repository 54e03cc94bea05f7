use std::{cell::RefCell, io::Write, rc::Rc};

use clap::{Args, Parser, Subcommand};
use hsl::{
    runtime::{Phase, ScriptRuntime},
    tokenizer::Tokenizer,
};

#[derive(Debug, Parser)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Repl)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a script file.
    Run(FileArgs),
    /// Evaluate statements interactively.
    Repl,
    /// Dump the token stream of a script file.
    Tokens(FileArgs),
}

#[derive(Debug, Args)]
struct FileArgs {
    file: String,
}

fn main() {
    env_logger::init();
    let args = Cli::parse();

    match args.command() {
        Command::Repl => {
            repl_command();
        }
        Command::Run(args) => {
            run_command(args);
        }
        Command::Tokens(args) => {
            tokens_command(args);
        }
    }
}

fn stdout_runtime() -> ScriptRuntime {
    let output: Rc<RefCell<dyn Write>> = Rc::new(RefCell::new(std::io::stdout()));
    ScriptRuntime::new(output)
}

fn repl_command() {
    println!("Welcome to the HSL REPL!");
    println!("EOF to exit. (Ctrl+D on *nix, Ctrl+Z on Windows)");

    let runtime = stdout_runtime();
    loop {
        let mut input = String::new();

        print!("> ");
        std::io::stdout()
            .flush()
            .expect("should be able to flush stdout");

        let read = std::io::stdin()
            .read_line(&mut input)
            .expect("should be able to read line from stdin");

        if read == 0 {
            break;
        }

        let source = input.trim();
        let context = runtime.run(source, Phase::Interpreting);
        for error in context.errors() {
            println!("Error: {}", error);
        }

        input.clear()
    }
}

fn run_command(args: &FileArgs) {
    let source = std::fs::read_to_string(&args.file).expect("should be able to read source file");
    let runtime = stdout_runtime();
    let context = runtime.run(&source, Phase::Interpreting);
    for error in context.errors() {
        println!("{error}");
    }
    if !context.errors().is_empty() {
        std::process::exit(1);
    }
}

fn tokens_command(args: &FileArgs) {
    let source = std::fs::read_to_string(&args.file).expect("should be able to read source file");
    match Tokenizer::new(&source).scan_tokens() {
        Ok(tokens) => {
            let mut line = 0;
            for token in tokens {
                if token.line != line {
                    print!("{:4} ", token.line);
                    line = token.line;
                } else {
                    print!("   | ");
                }
                println!("{:<20} {}", format!("{:?}", token.token_type), token.lexeme);
            }
        }
        Err(e) => {
            println!("{e} at line {}, column {}", e.line(), e.column());
            std::process::exit(1);
        }
    }
}
