//! Monkey: a small dynamically typed language, compiled to bytecode and run
//! on a stack machine.
//!
//! ```text
//! source -> lexer -> parser -> compiler -> bytecode -> vm
//! ```
pub mod compiler;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod runtime;

pub use compiler::{compile, Bytecode, CompileError, Compiler, CompilerState};
pub use object::Object;
pub use parser::{parse, ParseError};
pub use runtime::{Globals, RuntimeError, Vm, VmConfig};
