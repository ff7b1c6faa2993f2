use std::{mem, path::PathBuf};

use anyhow::{anyhow, Context};
use clap::Parser;
use codesnake::{Block, CodeWidth, Label, LineIndex};
use monkey::{
    parse, parser::ast::Statement, Compiler, CompilerState, Globals, Object, ParseError, Vm,
    VmConfig,
};
use rustyline::error::ReadlineError;
use tracing::{debug, info};
use yansi::Paint;

/// Run Monkey programs on the bytecode virtual machine
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Script to run; starts an interactive session when omitted
    file: Option<PathBuf>,
    /// Print the compiled bytecode before running it
    #[arg(long)]
    disassemble: bool,
    /// Maximum operand stack depth
    #[arg(long, default_value_t = VmConfig::default().stack_size)]
    stack_size: usize,
    /// Maximum call depth
    #[arg(long, default_value_t = VmConfig::default().max_frames)]
    max_frames: usize,
    /// Log compiler and VM activity
    #[arg(short, long)]
    verbose: bool,
}

/// Everything that persists between inputs
struct Session {
    state: CompilerState,
    globals: Globals,
    config: VmConfig,
    disassemble: bool,
}

impl Session {
    fn new(args: &Args) -> Self {
        Self {
            state: CompilerState::new(),
            globals: Globals::new(),
            config: VmConfig {
                stack_size: args.stack_size,
                max_frames: args.max_frames,
            },
            disassemble: args.disassemble,
        }
    }

    /// Runs `source`, returning the value to echo, if any.
    fn eval(&mut self, name: &str, source: &str) -> anyhow::Result<Option<Object>> {
        let parsed = parse(source);
        if !parsed.errors().is_empty() {
            report_parse_errors(name, source, parsed.errors());
            return Err(anyhow!("{} parse error(s) in {name}", parsed.errors().len()));
        }
        let program = parsed.program();

        let mut compiler = Compiler::new_with_state(mem::take(&mut self.state));
        let compiled = compiler.compile(program);
        let bytecode = compiler.bytecode();
        self.state = compiler.into_state();
        compiled?;
        debug!(
            bytes = bytecode.instructions.len(),
            constants = bytecode.constants.len(),
            "compiled {name}"
        );

        if self.disassemble {
            print!("{bytecode}");
        }

        let mut vm = Vm::with_config(&bytecode, &mut self.globals, self.config);
        vm.run()?;

        let echoes = matches!(
            program.statements.last(),
            Some(Statement::Expression(_) | Statement::Return(_))
        );
        Ok(vm.last_popped().filter(|_| echoes).cloned())
    }
}

fn report_parse_errors(name: &str, source: &str, errors: &[ParseError]) {
    let idx = LineIndex::new(source);
    for error in errors {
        let mut span = error.span();
        // point at the last character for errors at the end of input
        if span.is_empty() {
            span.start = span.start.saturating_sub(1);
        }

        let label = Label::new(span)
            .with_text(error.to_string().red().to_string())
            .with_style(|s| s.red().to_string());
        match Block::new(&idx, [label]) {
            Some(block) => {
                let block = block.map_code(|c| CodeWidth::new(c, c.len()));
                eprintln!("{}[{name}]", block.prologue());
                eprint!("{block}");
                eprintln!("{}", block.epilogue());
            }
            None => eprintln!("{} {error}", "error:".red()),
        }
    }
}

fn repl(session: &mut Session) -> anyhow::Result<()> {
    let mut readline = rustyline::DefaultEditor::new()?;
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { ">> " } else { ".. " };
        let line = match readline.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };

        if pending.is_empty() && line.trim() == "clear" {
            print!("\x1b[2J\x1b[H");
            continue;
        }
        // a trailing backslash continues the input on the next line
        if let Some(continued) = line.strip_suffix('\\') {
            pending.push_str(continued);
            pending.push('\n');
            continue;
        }

        pending.push_str(&line);
        let source = mem::take(&mut pending);
        if source.trim().is_empty() {
            continue;
        }
        readline.add_history_entry(source.as_str())?;

        match session.eval("repl", &source) {
            Ok(Some(value)) => println!("{value}"),
            Ok(None) => {}
            Err(err) => eprintln!("{} {err}", "error:".red()),
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let mut session = Session::new(&args);
    info!(
        stack_size = session.config.stack_size,
        max_frames = session.config.max_frames,
        "starting"
    );

    match &args.file {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("could not read {}", path.display()))?;
            let name = path.display().to_string();
            session.eval(&name, &source)?;
            Ok(())
        }
        None => repl(&mut session),
    }
}
