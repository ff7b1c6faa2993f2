//! Compile Monkey programs into bytecode.
//!
//! For example:
//!
//! ```text
//! let add = fn(a, b) { a + b };
//! add(1, 2);
//! ```
//!
//! compiles to
//!
//! ```text
//! == constant 0: fn(2 params, 2 locals) ==
//! 0000 get_local 0
//! 0002 get_local 1
//! 0004 add
//! 0005 return_value
//! == constant 1: INTEGER 1 ==
//! == constant 2: INTEGER 2 ==
//! == main ==
//! 0000 closure 0 0
//! 0004 set_global 0
//! 0007 get_global 0
//! 0010 constant 1
//! 0013 constant 2
//! 0016 call 2
//! 0018 pop
//! ```
//!
//! Each function body gets its own compilation scope and its own enclosed
//! [`SymbolTable`]; finishing a body turns it into a constant and emits a
//! `closure` instruction that captures the body's free variables.
use core::fmt;
use std::{mem, rc::Rc};

use lasso::Rodeo;
use tracing::debug;

use crate::object::{CompiledFunction, Object, BUILTINS};
use crate::parser::ast::{
    BlockStatement, Expression, FunctionLiteral, InfixOperator, PrefixOperator, Program,
    Statement,
};

use bytecode::{make, operand_fits, Instructions, Opcode};
use symbol_table::{Symbol, SymbolScope, SymbolTable};

pub mod bytecode;
pub mod symbol_table;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("undefined variable {0}")]
    UndefinedVariable(Box<str>),
    #[error("operand {value} of `{opcode}` does not fit in {width} byte(s)")]
    OperandOutOfRange {
        opcode: Opcode,
        value: usize,
        width: usize,
    },
}

/// Output of the compiler: the main instruction stream and its constant pool
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

/// Lists every constant (function bodies disassembled) followed by the main
/// instructions.
impl fmt::Display for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, constant) in self.constants.iter().enumerate() {
            match constant {
                Object::CompiledFunction(function) => {
                    writeln!(
                        f,
                        "== constant {index}: fn({} params, {} locals) ==",
                        function.num_parameters, function.num_locals
                    )?;
                    write!(f, "{}", function.instructions)?;
                }
                other => writeln!(f, "== constant {index}: {} {other} ==", other.type_name())?,
            }
        }
        writeln!(f, "== main ==")?;
        write!(f, "{}", self.instructions)
    }
}

/// Everything a compiler accumulates that a later compiler can continue from
#[derive(Debug)]
pub struct CompilerState {
    pub symbol_table: SymbolTable,
    pub constants: Vec<Object>,
    pub interner: Rodeo,
}

impl CompilerState {
    /// A fresh state with every builtin registered in the global table
    pub fn new() -> Self {
        let mut interner = Rodeo::new();
        let mut symbol_table = SymbolTable::new();
        for (index, builtin) in BUILTINS.iter().enumerate() {
            symbol_table.define_builtin(index, interner.get_or_intern_static(builtin.name));
        }
        Self {
            symbol_table,
            constants: vec![],
            interner,
        }
    }
}

impl Default for CompilerState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
}

pub struct Compiler {
    state: CompilerState,
    scope: CompilationScope,
    enclosing: Vec<CompilationScope>,
}

/// Compiles `program` with a fresh state.
pub fn compile(program: &Program) -> Result<Bytecode, CompileError> {
    let mut compiler = Compiler::new();
    compiler.compile(program)?;
    Ok(compiler.bytecode())
}

impl Compiler {
    pub fn new() -> Self {
        Self::new_with_state(CompilerState::new())
    }

    pub fn new_with_state(state: CompilerState) -> Self {
        Self {
            state,
            scope: CompilationScope::default(),
            enclosing: vec![],
        }
    }

    pub fn into_state(self) -> CompilerState {
        self.state
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.scope.instructions.clone(),
            constants: self.state.constants.clone(),
        }
    }

    pub fn compile(&mut self, program: &Program) -> Result<(), CompileError> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &BlockStatement) -> Result<(), CompileError> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                self.emit(Opcode::Pop, &[])?;
            }
            Statement::Let { name, value } => {
                self.compile_expression(value)?;
                let name = self.state.interner.get_or_intern(name);
                let symbol = self.state.symbol_table.define(name);
                match symbol.scope {
                    SymbolScope::Global => self.emit(Opcode::SetGlobal, &[symbol.index])?,
                    _ => self.emit(Opcode::SetLocal, &[symbol.index])?,
                };
            }
            Statement::Return(value) => {
                self.compile_expression(value)?;
                self.emit(Opcode::ReturnValue, &[])?;
            }
        }
        Ok(())
    }

    fn compile_expression(&mut self, expression: &Expression) -> Result<(), CompileError> {
        match expression {
            Expression::Integer(value) => {
                let index = self.add_constant(Object::Integer(*value));
                self.emit(Opcode::Constant, &[index])?;
            }
            Expression::String(value) => {
                let index = self.add_constant(Object::string(&**value));
                self.emit(Opcode::Constant, &[index])?;
            }
            Expression::Boolean(true) => {
                self.emit(Opcode::True, &[])?;
            }
            Expression::Boolean(false) => {
                self.emit(Opcode::False, &[])?;
            }
            Expression::Prefix { operator, right } => {
                self.compile_expression(right)?;
                match operator {
                    PrefixOperator::Not => self.emit(Opcode::Bang, &[])?,
                    PrefixOperator::Negate => self.emit(Opcode::Minus, &[])?,
                };
            }
            Expression::Infix {
                left,
                operator: InfixOperator::GreaterThan,
                right,
            } => {
                // `a > b` is `b < a`
                self.compile_expression(right)?;
                self.compile_expression(left)?;
                self.emit(Opcode::LessThan, &[])?;
            }
            Expression::Infix {
                left,
                operator,
                right,
            } => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                let opcode = match operator {
                    InfixOperator::Add => Opcode::Add,
                    InfixOperator::Subtract => Opcode::Sub,
                    InfixOperator::Multiply => Opcode::Mul,
                    InfixOperator::Divide => Opcode::Div,
                    InfixOperator::LessThan | InfixOperator::GreaterThan => Opcode::LessThan,
                    InfixOperator::Equal => Opcode::Equal,
                    InfixOperator::NotEqual => Opcode::NotEqual,
                };
                self.emit(opcode, &[])?;
            }
            Expression::If {
                condition,
                consequence,
                alternative,
            } => {
                self.compile_expression(condition)?;
                // operands are patched once the targets are known
                let jump_not_truthy = self.emit(Opcode::JumpNotTruthy, &[0])?;

                self.compile_block(consequence)?;
                self.finish_branch()?;

                let jump = self.emit(Opcode::Jump, &[0])?;
                self.patch_jump(Opcode::JumpNotTruthy, jump_not_truthy)?;

                match alternative {
                    Some(alternative) => {
                        self.compile_block(alternative)?;
                        self.finish_branch()?;
                    }
                    None => {
                        self.emit(Opcode::Null, &[])?;
                    }
                }
                self.patch_jump(Opcode::Jump, jump)?;
            }
            Expression::Identifier(name) => {
                let symbol = self
                    .state
                    .interner
                    .get(name)
                    .and_then(|name| self.state.symbol_table.resolve(name))
                    .ok_or_else(|| CompileError::UndefinedVariable(name.clone()))?;
                self.load_symbol(symbol)?;
            }
            Expression::Array(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()])?;
            }
            Expression::Hash(pairs) => {
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len() * 2])?;
            }
            Expression::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[])?;
            }
            Expression::Function(function) => self.compile_function(function)?,
            Expression::Call {
                function,
                arguments,
            } => {
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::Call, &[arguments.len()])?;
            }
        }
        Ok(())
    }

    /// Makes an `if` branch leave exactly one value on the stack.
    fn finish_branch(&mut self) -> Result<(), CompileError> {
        if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_pop();
        } else {
            self.emit(Opcode::Null, &[])?;
        }
        Ok(())
    }

    fn compile_function(&mut self, function: &FunctionLiteral) -> Result<(), CompileError> {
        self.enter_scope();
        let body = self.compile_function_body(function);
        let (instructions, symbol_table) = self.leave_scope();
        body?;

        let free_symbols = symbol_table.free_symbols();
        for symbol in free_symbols {
            self.load_symbol(*symbol)?;
        }

        let compiled = CompiledFunction {
            instructions,
            num_locals: symbol_table.num_definitions(),
            num_parameters: function.parameters.len(),
        };
        let index = self.add_constant(Object::CompiledFunction(Rc::new(compiled)));
        debug!(
            constant = index,
            free = free_symbols.len(),
            name = function.name.as_deref(),
            "emitting closure"
        );
        self.emit(Opcode::Closure, &[index, free_symbols.len()])?;
        Ok(())
    }

    fn compile_function_body(&mut self, function: &FunctionLiteral) -> Result<(), CompileError> {
        if let Some(name) = &function.name {
            let name = self.state.interner.get_or_intern(name);
            self.state.symbol_table.define_function_name(name);
        }
        for parameter in &function.parameters {
            let parameter = self.state.interner.get_or_intern(parameter);
            self.state.symbol_table.define(parameter);
        }

        self.compile_block(&function.body)?;

        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[])?;
        }
        Ok(())
    }

    fn load_symbol(&mut self, symbol: Symbol) -> Result<(), CompileError> {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index])?,
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index])?,
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index])?,
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index])?,
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, &[])?,
        };
        Ok(())
    }

    fn add_constant(&mut self, constant: Object) -> usize {
        self.state.constants.push(constant);
        self.state.constants.len() - 1
    }

    /// Appends an instruction, returning its position.
    fn emit(&mut self, opcode: Opcode, operands: &[usize]) -> Result<usize, CompileError> {
        check_operands(opcode, operands)?;

        let position = self.scope.instructions.len();
        self.scope.instructions.push(&make(opcode, operands));
        self.scope.previous = self.scope.last;
        self.scope.last = Some(EmittedInstruction { opcode, position });
        Ok(position)
    }

    /// Points the jump at `position` to the end of the current instructions.
    fn patch_jump(&mut self, opcode: Opcode, position: usize) -> Result<(), CompileError> {
        let target = self.scope.instructions.len();
        check_operands(opcode, &[target])?;
        self.scope
            .instructions
            .replace(position, &make(opcode, &[target]));
        Ok(())
    }

    fn last_instruction_is(&self, opcode: Opcode) -> bool {
        self.scope
            .last
            .is_some_and(|last| last.opcode == opcode)
    }

    fn remove_last_pop(&mut self) {
        if let Some(last) = self.scope.last {
            self.scope.instructions.truncate(last.position);
            self.scope.last = self.scope.previous.take();
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        if let Some(last) = &mut self.scope.last {
            self.scope
                .instructions
                .replace(last.position, &make(Opcode::ReturnValue, &[]));
            last.opcode = Opcode::ReturnValue;
        }
    }

    fn enter_scope(&mut self) {
        let outer = mem::take(&mut self.scope);
        self.enclosing.push(outer);
        let table = mem::take(&mut self.state.symbol_table);
        self.state.symbol_table = SymbolTable::new_enclosed(table);
        debug!(depth = self.enclosing.len(), "entered compilation scope");
    }

    /// Restores the enclosing scope, handing back what the inner one built.
    fn leave_scope(&mut self) -> (Instructions, SymbolTable) {
        let outer = self.enclosing.pop().unwrap_or_default();
        let inner = mem::replace(&mut self.scope, outer);

        let outer_table = self.state.symbol_table.take_outer().unwrap_or_default();
        let inner_table = mem::replace(&mut self.state.symbol_table, outer_table);
        debug!(depth = self.enclosing.len(), "left compilation scope");
        (inner.instructions, inner_table)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

fn check_operands(opcode: Opcode, operands: &[usize]) -> Result<(), CompileError> {
    let widths = opcode.definition().operand_widths;
    for (&value, &width) in operands.iter().zip(widths) {
        if !operand_fits(width, value) {
            return Err(CompileError::OperandOutOfRange {
                opcode,
                value,
                width,
            });
        }
    }
    Ok(())
}
