//! The stack machine.
//!
//! All frames share one operand stack. A call leaves the callee on the stack,
//! with the arguments above it; the callee's frame starts right after the
//! callee slot, so its parameters are already its first locals. Returning
//! truncates the stack back to (and including) the callee slot and pushes
//! the result in its place.
use std::{collections::BTreeMap, mem, rc::Rc};

use tracing::{debug, trace};

use super::{frame::Frame, Arity, Globals, VmConfig};
use crate::compiler::{
    bytecode::{Opcode, UndefinedOpcode},
    Bytecode,
};
use crate::object::{Closure, CompiledFunction, Object, BUILTINS};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error(transparent)]
    UndefinedOpcode(#[from] UndefinedOpcode),
    #[error("stack overflow")]
    StackOverflow,
    #[error("frame overflow: call depth exceeds {0}")]
    FrameOverflow(usize),
    #[error("stack underflow")]
    StackUnderflow,
    #[error("unsupported types for binary operation: {left} {right}")]
    UnsupportedBinaryTypes {
        left: &'static str,
        right: &'static str,
    },
    #[error("unknown string operator: {0}")]
    UnknownStringOperator(Opcode),
    #[error("unknown operator: {opcode} ({left} {right})")]
    UnknownComparison {
        opcode: Opcode,
        left: &'static str,
        right: &'static str,
    },
    #[error("unsupported type for negation: {0}")]
    UnsupportedNegation(&'static str),
    #[error("division by zero")]
    DivisionByZero,
    #[error("unusable as hash key: {0}")]
    UnusableHashKey(&'static str),
    #[error("index operator not supported: {0}")]
    IndexNotSupported(&'static str),
    #[error("calling non-function and non-built-in: {0}")]
    NotCallable(&'static str),
    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongArgumentCount { want: usize, got: usize },
    #[error("not a function: {0}")]
    NotAFunction(&'static str),
    #[error("constant {0} does not exist")]
    MissingConstant(usize),
}

pub struct Vm<'a> {
    constants: &'a [Object],
    globals: &'a mut Globals,
    stack: Vec<Object>,
    frame: Frame,
    /// Suspended callers, innermost last
    frames: Vec<Frame>,
    last_popped: Option<Object>,
    config: VmConfig,
}

impl<'a> Vm<'a> {
    pub fn new(bytecode: &'a Bytecode, globals: &'a mut Globals) -> Self {
        Self::with_config(bytecode, globals, VmConfig::default())
    }

    pub fn with_config(bytecode: &'a Bytecode, globals: &'a mut Globals, config: VmConfig) -> Self {
        let main = Closure {
            function: Rc::new(CompiledFunction {
                instructions: bytecode.instructions.clone(),
                num_locals: 0,
                num_parameters: 0,
            }),
            free: vec![],
        };

        Self {
            constants: &bytecode.constants,
            globals,
            stack: Vec::with_capacity(config.stack_size),
            frame: Frame::new(Rc::new(main), 0),
            frames: vec![],
            last_popped: None,
            config,
        }
    }

    /// The value most recently removed by a `pop` (or a top-level `return`)
    pub fn last_popped(&self) -> Option<&Object> {
        self.last_popped.as_ref()
    }

    pub fn stack_height(&self) -> usize {
        self.stack.len()
    }

    pub fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.frame.is_done() {
                if self.frames.is_empty() {
                    return Ok(());
                }
                // a body that runs off its end returns nothing
                self.return_from_frame(Object::Null)?;
                continue;
            }

            let ip = self.frame.ip;
            let op = Opcode::try_from(self.frame.next_byte())?;
            trace!(ip, %op, depth = self.frames.len(), "executing");

            match op {
                Opcode::Constant => {
                    let index = self.frame.read_u16();
                    let constant = self
                        .constants
                        .get(index)
                        .cloned()
                        .ok_or(RuntimeError::MissingConstant(index))?;
                    self.push(constant)?;
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    self.execute_binary_operation(op)?;
                }
                Opcode::Equal | Opcode::NotEqual | Opcode::LessThan => {
                    self.execute_comparison(op)?;
                }
                Opcode::Pop => {
                    let value = self.pop()?;
                    self.last_popped = Some(value);
                }
                Opcode::True => self.push(Object::Boolean(true))?,
                Opcode::False => self.push(Object::Boolean(false))?,
                Opcode::Null => self.push(Object::Null)?,
                Opcode::Bang => {
                    let operand = self.pop()?;
                    self.push(Object::Boolean(!operand.is_truthy()))?;
                }
                Opcode::Minus => match self.pop()? {
                    Object::Integer(value) => self.push(Object::Integer(value.wrapping_neg()))?,
                    other => return Err(RuntimeError::UnsupportedNegation(other.type_name())),
                },
                Opcode::Jump => {
                    let target = self.frame.read_u16();
                    self.frame.ip = target;
                }
                Opcode::JumpNotTruthy => {
                    let target = self.frame.read_u16();
                    if !self.pop()?.is_truthy() {
                        self.frame.ip = target;
                    }
                }
                Opcode::SetGlobal => {
                    let index = self.frame.read_u16();
                    let value = self.pop()?;
                    self.globals.set(index, value);
                }
                Opcode::GetGlobal => {
                    let index = self.frame.read_u16();
                    let value = self.globals.get(index);
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let index = self.frame.read_u8();
                    let value = self.pop()?;
                    *self.local_mut(index)? = value;
                }
                Opcode::GetLocal => {
                    let index = self.frame.read_u8();
                    let value = self.local_mut(index)?.clone();
                    self.push(value)?;
                }
                Opcode::GetBuiltin => {
                    let index = self.frame.read_u8();
                    let builtin = BUILTINS.get(index).map_or(Object::Null, Object::Builtin);
                    self.push(builtin)?;
                }
                Opcode::GetFree => {
                    let index = self.frame.read_u8();
                    let value = self
                        .frame
                        .closure
                        .free
                        .get(index)
                        .cloned()
                        .unwrap_or(Object::Null);
                    self.push(value)?;
                }
                Opcode::CurrentClosure => {
                    let closure = Rc::clone(&self.frame.closure);
                    self.push(Object::Closure(closure))?;
                }
                Opcode::Array => {
                    let count = self.frame.read_u16();
                    let elements = self.pop_many(count)?;
                    self.push(Object::array(elements))?;
                }
                Opcode::Hash => {
                    let count = self.frame.read_u16();
                    let items = self.pop_many(count)?;
                    let hash = build_hash(items)?;
                    self.push(hash)?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.push(execute_index(&left, &index)?)?;
                }
                Opcode::Call => {
                    let argc = self.frame.read_u8();
                    self.call(argc)?;
                }
                Opcode::ReturnValue => {
                    let value = self.pop()?;
                    if self.frames.is_empty() {
                        // returning from the main program halts it
                        self.last_popped = Some(value);
                        return Ok(());
                    }
                    self.return_from_frame(value)?;
                }
                Opcode::Return => {
                    if self.frames.is_empty() {
                        self.last_popped = Some(Object::Null);
                        return Ok(());
                    }
                    self.return_from_frame(Object::Null)?;
                }
                Opcode::Closure => {
                    let index = self.frame.read_u16();
                    let free_count = self.frame.read_u8();
                    self.push_closure(index, free_count)?;
                }
            }
        }
    }

    fn push(&mut self, value: Object) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.config.stack_size {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Object, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    /// Removes the top `count` values, oldest first.
    fn pop_many(&mut self, count: usize) -> Result<Vec<Object>, RuntimeError> {
        let start = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or(RuntimeError::StackUnderflow)?;
        Ok(self.stack.split_off(start))
    }

    fn local_mut(&mut self, index: usize) -> Result<&mut Object, RuntimeError> {
        self.stack
            .get_mut(self.frame.base_pointer + index)
            .ok_or(RuntimeError::StackUnderflow)
    }

    fn execute_binary_operation(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (&left, &right) {
            (Object::Integer(l), Object::Integer(r)) => Object::Integer(match op {
                Opcode::Add => l.wrapping_add(*r),
                Opcode::Sub => l.wrapping_sub(*r),
                Opcode::Mul => l.wrapping_mul(*r),
                _ if *r == 0 => return Err(RuntimeError::DivisionByZero),
                _ => l.wrapping_div(*r),
            }),
            (Object::String(l), Object::String(r)) if op == Opcode::Add => {
                Object::string(format!("{l}{r}"))
            }
            (Object::String(_), Object::String(_)) => {
                return Err(RuntimeError::UnknownStringOperator(op))
            }
            _ => {
                return Err(RuntimeError::UnsupportedBinaryTypes {
                    left: left.type_name(),
                    right: right.type_name(),
                })
            }
        };
        self.push(result)
    }

    fn execute_comparison(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (op, &left, &right) {
            (Opcode::LessThan, Object::Integer(l), Object::Integer(r)) => l < r,
            (Opcode::Equal, _, _) => left.identical(&right),
            (Opcode::NotEqual, _, _) => !left.identical(&right),
            _ => {
                return Err(RuntimeError::UnknownComparison {
                    opcode: op,
                    left: left.type_name(),
                    right: right.type_name(),
                })
            }
        };
        self.push(Object::Boolean(result))
    }

    fn call(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let callee_slot = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or(RuntimeError::StackUnderflow)?;

        match self.stack[callee_slot].clone() {
            Object::Closure(closure) => {
                let want = closure.function.num_parameters;
                if !Arity::Exact(want).is_satisfied(argc) {
                    return Err(RuntimeError::WrongArgumentCount { want, got: argc });
                }
                // the main frame counts towards the limit
                if self.frames.len() + 2 > self.config.max_frames {
                    return Err(RuntimeError::FrameOverflow(self.config.max_frames));
                }

                let base_pointer = callee_slot + 1;
                let top = base_pointer + closure.function.num_locals;
                if top > self.config.stack_size {
                    return Err(RuntimeError::StackOverflow);
                }
                self.stack.resize(top.max(self.stack.len()), Object::Null);

                let frame = Frame::new(closure, base_pointer);
                self.frames.push(mem::replace(&mut self.frame, frame));
                debug!(depth = self.frames.len(), base_pointer, "pushed call frame");
                Ok(())
            }
            Object::Builtin(builtin) => {
                let args = self.stack.split_off(callee_slot + 1);
                let result = builtin.call(&args);
                self.stack.truncate(callee_slot);
                self.push(result.unwrap_or(Object::Null))
            }
            other => Err(RuntimeError::NotCallable(other.type_name())),
        }
    }

    fn return_from_frame(&mut self, value: Object) -> Result<(), RuntimeError> {
        let caller = self.frames.pop().ok_or(RuntimeError::StackUnderflow)?;
        let finished = mem::replace(&mut self.frame, caller);
        // drop the callee slot along with the locals
        self.stack.truncate(finished.base_pointer.saturating_sub(1));
        debug!(depth = self.frames.len(), "popped call frame");
        self.push(value)
    }

    fn push_closure(&mut self, index: usize, free_count: usize) -> Result<(), RuntimeError> {
        let function = match self.constants.get(index) {
            Some(Object::CompiledFunction(function)) => Rc::clone(function),
            Some(other) => return Err(RuntimeError::NotAFunction(other.type_name())),
            None => return Err(RuntimeError::MissingConstant(index)),
        };
        let free = self.pop_many(free_count)?;
        self.push(Object::Closure(Rc::new(Closure { function, free })))
    }
}

fn build_hash(items: Vec<Object>) -> Result<Object, RuntimeError> {
    let mut pairs = BTreeMap::new();
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        let key = key
            .hash_key()
            .ok_or(RuntimeError::UnusableHashKey(key.type_name()))?;
        pairs.insert(key, value);
    }
    Ok(Object::Hash(Rc::new(pairs)))
}

fn execute_index(left: &Object, index: &Object) -> Result<Object, RuntimeError> {
    match (left, index) {
        (Object::Array(elements), Object::Integer(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| elements.get(i))
            .cloned()
            .unwrap_or(Object::Null)),
        (Object::Hash(pairs), key) => {
            let key = key
                .hash_key()
                .ok_or(RuntimeError::UnusableHashKey(key.type_name()))?;
            Ok(pairs.get(&key).cloned().unwrap_or(Object::Null))
        }
        _ => Err(RuntimeError::IndexNotSupported(left.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, rc::Rc};

    use super::{RuntimeError, Vm};
    use crate::compiler::{
        bytecode::{Instructions, Opcode, UndefinedOpcode},
        compile, Bytecode, Compiler,
    };
    use crate::object::{HashKey, Object};
    use crate::parser::parse;
    use crate::runtime::{Globals, VmConfig};
    use assert2::{check, let_assert};

    fn bytecode(source: &str) -> Bytecode {
        let_assert!(Ok(program) = parse(source).into_result());
        let_assert!(Ok(bytecode) = compile(&program));
        bytecode
    }

    fn run_with(source: &str, config: VmConfig) -> Result<Object, RuntimeError> {
        let bytecode = bytecode(source);
        let mut globals = Globals::new();
        let mut vm = Vm::with_config(&bytecode, &mut globals, config);
        vm.run()?;
        check!(vm.stack_height() == 0, "`{source}` left values on the stack");
        Ok(vm.last_popped().cloned().unwrap_or(Object::Null))
    }

    fn run(source: &str) -> Result<Object, RuntimeError> {
        run_with(source, VmConfig::default())
    }

    #[track_caller]
    fn check_runs<T: Into<Object>>(cases: impl IntoIterator<Item = (&'static str, T)>) {
        for (source, expected) in cases {
            let expected = expected.into();
            let_assert!(Ok(result) = run(source), "`{source}` failed");
            check!(result == expected, "`{source}`");
        }
    }

    fn array(values: &[i64]) -> Object {
        Object::array(values.iter().map(|&v| Object::Integer(v)).collect())
    }

    #[test]
    fn test_integer_arithmetic() {
        check_runs([
            ("1", 1),
            ("1 + 2", 3),
            ("1 - 2", -1),
            ("4 / 2", 2),
            ("50 / 2 * 2 + 10 - 5", 55),
            ("5 * (2 + 10)", 60),
            ("-5", -5),
            ("-50 + 100 + -50", 0),
            ("(5 + 10 * 2 + 15 / 3) * 2 + -10", 50),
            ("9223372036854775807 + 1", i64::MIN),
        ]);
    }

    #[test]
    fn test_boolean_expressions() {
        check_runs([
            ("true", true),
            ("1 < 2", true),
            ("1 > 2", false),
            ("1 > 1", false),
            ("1 == 1", true),
            ("1 != 1", false),
            ("1 == true", false),
            ("true == false", false),
            ("(1 < 2) == true", true),
            ("!5", false),
            ("!!5", true),
            ("!0", false),
            ("!(if (false) { 5; })", true),
            (r#""a" == "a""#, true),
            (r#""a" != "b""#, true),
            ("[1] == [1]", false),
            ("let a = [1]; a == a", true),
        ]);
    }

    #[test]
    fn test_conditionals() {
        check_runs([
            ("if (true) { 10 }", Object::from(10)),
            ("if (true) { 10 } else { 20 }", 10.into()),
            ("if (false) { 10 } else { 20 } ", 20.into()),
            ("if (1 < 2) { 10 }", 10.into()),
            ("if (1 > 2) { 10 }", Object::Null),
            ("if (false) { 10 }", Object::Null),
            ("if (0) { 10 }", 10.into()),
            ("if ((if (false) { 10 })) { 10 } else { 20 }", 20.into()),
            ("if (true) { }", Object::Null),
            ("if (true) { let x = 3; }", Object::Null),
        ]);
    }

    #[test]
    fn test_global_let_statements() {
        check_runs::<i64>([
            ("let one = 1; one", 1),
            ("let one = 1; let two = 2; one + two", 3),
            ("let one = 1; let two = one + one; one + two", 3),
        ]);
    }

    #[test]
    fn test_shadowing_reads_previous_binding() {
        check_runs::<i64>([
            ("let x = 1; let x = x + 1; x", 2),
            ("fn() { let x = 1; let x = x * 10; x }()", 10),
            ("let x = 5; fn() { let x = x + 1; x }() + x", 11),
            ("let f = fn(n) { if (n == 0) { 0 } else { n + f(n - 1) } }; f(3)", 6),
        ]);
    }

    #[test]
    fn test_strings_and_collections() {
        check_runs([
            (r#""monkey""#, Object::from("monkey")),
            (r#""mon" + "key" + "banana""#, "monkeybanana".into()),
            ("[]", array(&[])),
            ("[1 + 2, 3 * 4, 5 + 6]", array(&[3, 12, 11])),
            ("{}", Object::Hash(Rc::default())),
            (
                "{1: 2, 1 + 1: 2 * 2, true: 3}",
                Object::Hash(Rc::new(BTreeMap::from([
                    (HashKey::Integer(1), Object::from(2)),
                    (HashKey::Integer(2), Object::from(4)),
                    (HashKey::Boolean(true), Object::from(3)),
                ]))),
            ),
        ]);
    }

    #[test]
    fn test_index_expressions() {
        check_runs([
            ("[1, 2, 3][1]", Object::from(2)),
            ("[1, 2, 3][0 + 2]", 3.into()),
            ("[[1, 1, 1]][0][0]", 1.into()),
            ("[][0]", Object::Null),
            ("[1, 2, 3][99]", Object::Null),
            ("[1][-1]", Object::Null),
            ("[1, 2, 3][5]", Object::Null),
            ("{1: 1, 2: 2}[1]", 1.into()),
            ("{1: 1, 2: 2}[2]", 2.into()),
            ("{1: 1}[0]", Object::Null),
            ("{}[0]", Object::Null),
            (r#"{"a": 1}["b"]"#, Object::Null),
            (r#"{"a": 1}["a"]"#, 1.into()),
        ]);
    }

    #[test]
    fn test_function_calls() {
        check_runs([
            ("let fivePlusTen = fn() { 5 + 10; }; fivePlusTen();", Object::from(15)),
            ("let one = fn() { 1; }; let two = fn() { 2; }; one() + two()", 3.into()),
            ("let a = fn() { 1 }; let b = fn() { a() + 1 }; let c = fn() { b() + 1 }; c();", 3.into()),
            ("let earlyExit = fn() { return 99; 100; }; earlyExit();", 99.into()),
            ("let earlyExit = fn() { return 99; return 100; }; earlyExit();", 99.into()),
            ("let noReturn = fn() { }; noReturn();", Object::Null),
            ("let noReturn = fn() { }; let noReturnTwo = fn() { noReturn(); }; noReturnTwo();", Object::Null),
            (
                "let returnsOneReturner = fn() { let returnsOne = fn() { 1; }; returnsOne; }; returnsOneReturner()();",
                1.into(),
            ),
            ("fn(x) { return x; }(true)", true.into()),
            (
                "let add = fn(a, b) { a + b }; let addFive = fn(x) { add(x, 5) }; addFive(3);",
                8.into(),
            ),
        ]);
    }

    #[test]
    fn test_locals_and_arguments() {
        check_runs::<i64>([
            ("let one = fn() { let one = 1; one }; one();", 1),
            ("let oneAndTwo = fn() { let one = 1; let two = 2; one + two; }; oneAndTwo();", 3),
            (
                "let globalSeed = 50; let minusOne = fn() { let num = 1; globalSeed - num; }; let minusTwo = fn() { let num = 2; globalSeed - num; }; minusOne() + minusTwo();",
                97,
            ),
            ("let identity = fn(a) { a; }; identity(4);", 4),
            ("let sum = fn(a, b) { a + b; }; sum(1, 2);", 3),
            ("let sum = fn(a, b) { let c = a + b; c; }; sum(1, 2) + sum(3, 4);", 10),
            (
                "let globalNum = 10; let sum = fn(a, b) { let c = a + b; c + globalNum; }; let outer = fn() { sum(1, 2) + sum(3, 4) + globalNum; }; outer() + globalNum;",
                50,
            ),
        ]);
    }

    #[test]
    fn test_wrong_argument_count() {
        let cases = [
            ("fn() { 1; }(1);", 0, 1),
            ("fn(a) { a; }();", 1, 0),
            ("fn(a, b) { a + b; }(1);", 2, 1),
        ];
        for (source, want, got) in cases {
            check!(run(source) == Err(RuntimeError::WrongArgumentCount { want, got }));
        }
    }

    #[test]
    fn test_builtins() {
        check_runs([
            (r#"len("")"#, Object::from(0)),
            (r#"len("four")"#, 4.into()),
            (r#"len("hello world")"#, 11.into()),
            ("len(1)", Object::error("argument to `len` not supported, got INTEGER")),
            (r#"len("one", "two")"#, Object::error("wrong number of arguments. got=2, want=1")),
            ("len([1, 2, 3])", 3.into()),
            ("len([])", 0.into()),
            (r#"puts("hello", "world!")"#, Object::Null),
            ("first([1, 2, 3])", 1.into()),
            ("first([])", Object::Null),
            ("first(1)", Object::error("argument to `first` must be ARRAY, got INTEGER")),
            ("last([1, 2, 3])", 3.into()),
            ("last([])", Object::Null),
            ("rest([1, 2, 3])", array(&[2, 3])),
            ("rest([])", Object::Null),
            ("push([], 1)", array(&[1])),
            ("push(1, 1)", Object::error("argument to `push` must be ARRAY, got INTEGER")),
            ("let a = [1]; let b = push(a, 2); a", array(&[1])),
            ("let a = [1, 2]; let b = rest(a); len(a) + len(b)", 3.into()),
        ]);
    }

    #[test]
    fn test_closures() {
        check_runs::<i64>([
            ("let newClosure = fn(a) { fn() { a; }; }; let closure = newClosure(99); closure();", 99),
            ("let newAdder = fn(a, b) { fn(c) { a + b + c }; }; let adder = newAdder(1, 2); adder(8);", 11),
            (
                "let newAdderOuter = fn(a, b) { let c = a + b; fn(d) { let e = d + c; fn(f) { e + f; }; }; }; let newAdderInner = newAdderOuter(1, 2); let adder = newAdderInner(3); adder(8);",
                14,
            ),
            (
                "let a = 1; let newAdderOuter = fn(b) { fn(c) { fn(d) { a + b + c + d }; }; }; let newAdderInner = newAdderOuter(2); let adder = newAdderInner(3); adder(8);",
                14,
            ),
            (
                "let newClosure = fn(a, b) { let one = fn() { a; }; let two = fn() { b; }; fn() { one() + two(); }; }; let closure = newClosure(9, 90); closure();",
                99,
            ),
            ("let make = fn(x) { fn() { x } }; let a = make(1); let b = make(2); a() + b()", 3),
        ]);
    }

    #[test]
    fn test_captures_are_snapshots() {
        // the second `x` gets a new slot, so `g` keeps what it captured
        check_runs::<i64>([("let f = fn() { let x = 1; let g = fn() { x }; let x = 2; g() + x }; f()", 3)]);
    }

    #[test]
    fn test_recursive_functions() {
        check_runs::<i64>([
            (
                "let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; countDown(1);",
                0,
            ),
            (
                "let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; let wrapper = fn() { countDown(1); }; wrapper();",
                0,
            ),
            (
                "let wrapper = fn() { let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; countDown(1); }; wrapper();",
                0,
            ),
            (
                "let fibonacci = fn(x) { if (x == 0) { return 0; } else { if (x == 1) { return 1; } else { fibonacci(x - 1) + fibonacci(x - 2); } } }; fibonacci(15);",
                610,
            ),
        ]);
    }

    #[test]
    fn test_top_level_return_halts() {
        check_runs::<i64>([("return 5; 10;", 5), ("1; return 2; 3", 2)]);
        check_runs([("if (true) { return true; }; false", true)]);
    }

    #[test]
    fn test_runtime_errors() {
        let cases = [
            ("1 + true", RuntimeError::UnsupportedBinaryTypes { left: "INTEGER", right: "BOOLEAN" }),
            (r#""a" - "b""#, RuntimeError::UnknownStringOperator(Opcode::Sub)),
            ("1 / 0", RuntimeError::DivisionByZero),
            ("-true", RuntimeError::UnsupportedNegation("BOOLEAN")),
            (
                "true < false",
                RuntimeError::UnknownComparison { opcode: Opcode::LessThan, left: "BOOLEAN", right: "BOOLEAN" },
            ),
            ("{[1]: 2}", RuntimeError::UnusableHashKey("ARRAY")),
            ("{}[[]]", RuntimeError::UnusableHashKey("ARRAY")),
            ("1[0]", RuntimeError::IndexNotSupported("INTEGER")),
            ("1()", RuntimeError::NotCallable("INTEGER")),
        ];
        for (source, expected) in cases {
            check!(run(source) == Err(expected), "`{source}`");
        }
    }

    #[test]
    fn test_limits() {
        let source = "let f = fn() { f() }; f();";
        check!(run(source) == Err(RuntimeError::FrameOverflow(1024)));

        let config = VmConfig {
            stack_size: 16,
            max_frames: 1024,
        };
        check!(run_with(source, config) == Err(RuntimeError::StackOverflow));

        let config = VmConfig {
            stack_size: 2048,
            max_frames: 3,
        };
        check!(run_with("let f = fn(x) { if (x == 0) { 0 } else { f(x - 1) } }; f(1)", config) == Ok(Object::from(0)));
        check!(run_with("let f = fn(x) { if (x == 0) { 0 } else { f(x - 1) } }; f(2)", config) == Err(RuntimeError::FrameOverflow(3)));
    }

    #[test]
    fn test_undefined_opcode() {
        let bytecode = Bytecode {
            instructions: Instructions::from(vec![Opcode::True as u8, 255]),
            constants: vec![],
        };
        let mut globals = Globals::new();
        let mut vm = Vm::new(&bytecode, &mut globals);
        check!(vm.run() == Err(RuntimeError::UndefinedOpcode(UndefinedOpcode(255))));
    }

    #[test]
    fn test_stack_is_balanced_after_statements() {
        let bytecode = bytecode("1; let a = [1, 2]; a[0]; fn(x) { x }(2); if (false) { 1 };");
        let mut globals = Globals::new();
        let mut vm = Vm::new(&bytecode, &mut globals);
        let_assert!(Ok(()) = vm.run());
        check!(vm.stack_height() == 0);
        check!(vm.last_popped() == Some(&Object::Null));
    }

    #[test]
    fn test_globals_outlive_runs() {
        let mut globals = Globals::new();
        let mut compiler = Compiler::new();

        let_assert!(Ok(program) = parse("let a = 5;").into_result());
        let_assert!(Ok(()) = compiler.compile(&program));
        let first = compiler.bytecode();
        let_assert!(Ok(()) = Vm::new(&first, &mut globals).run());

        let mut compiler = Compiler::new_with_state(compiler.into_state());
        let_assert!(Ok(program) = parse("a * 2").into_result());
        let_assert!(Ok(()) = compiler.compile(&program));
        let second = compiler.bytecode();
        let mut vm = Vm::new(&second, &mut globals);
        let_assert!(Ok(()) = vm.run());
        check!(vm.last_popped() == Some(&Object::from(10)));
    }
}
