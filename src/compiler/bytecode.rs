//! The instruction set: opcodes, their operand layouts, encoding and decoding
//! of single instructions, and a disassembler over whole instruction streams.
//!
//! Every instruction is one opcode byte followed by its operands, big-endian,
//! each either 1 or 2 bytes wide.
use core::fmt;
use std::ops::Deref;

use arbitrary::Arbitrary;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("opcode {0} undefined")]
pub struct UndefinedOpcode(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Arbitrary)]
#[repr(u8)]
pub enum Opcode {
    Constant,
    Add,
    Sub,
    Mul,
    Div,
    Pop,
    True,
    False,
    Equal,
    NotEqual,
    LessThan,
    Minus,
    Bang,
    JumpNotTruthy,
    Jump,
    Null,
    GetGlobal,
    SetGlobal,
    Array,
    Hash,
    Index,
    Call,
    ReturnValue,
    Return,
    GetLocal,
    SetLocal,
    GetBuiltin,
    Closure,
    GetFree,
    CurrentClosure,
}

impl Opcode {
    /// All opcodes, indexed by their byte value
    pub const ALL: [Opcode; 30] = [
        Opcode::Constant,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Pop,
        Opcode::True,
        Opcode::False,
        Opcode::Equal,
        Opcode::NotEqual,
        Opcode::LessThan,
        Opcode::Minus,
        Opcode::Bang,
        Opcode::JumpNotTruthy,
        Opcode::Jump,
        Opcode::Null,
        Opcode::GetGlobal,
        Opcode::SetGlobal,
        Opcode::Array,
        Opcode::Hash,
        Opcode::Index,
        Opcode::Call,
        Opcode::ReturnValue,
        Opcode::Return,
        Opcode::GetLocal,
        Opcode::SetLocal,
        Opcode::GetBuiltin,
        Opcode::Closure,
        Opcode::GetFree,
        Opcode::CurrentClosure,
    ];

    pub fn definition(self) -> Definition {
        let (name, operand_widths): (&'static str, &'static [usize]) = match self {
            Opcode::Constant => ("constant", &[2]),
            Opcode::Add => ("add", &[]),
            Opcode::Sub => ("sub", &[]),
            Opcode::Mul => ("mul", &[]),
            Opcode::Div => ("div", &[]),
            Opcode::Pop => ("pop", &[]),
            Opcode::True => ("true", &[]),
            Opcode::False => ("false", &[]),
            Opcode::Equal => ("equal", &[]),
            Opcode::NotEqual => ("not_equal", &[]),
            Opcode::LessThan => ("less_than", &[]),
            Opcode::Minus => ("minus", &[]),
            Opcode::Bang => ("bang", &[]),
            Opcode::JumpNotTruthy => ("jump_not_truthy", &[2]),
            Opcode::Jump => ("jump", &[2]),
            Opcode::Null => ("null", &[]),
            Opcode::GetGlobal => ("get_global", &[2]),
            Opcode::SetGlobal => ("set_global", &[2]),
            Opcode::Array => ("array", &[2]),
            Opcode::Hash => ("hash", &[2]),
            Opcode::Index => ("index", &[]),
            Opcode::Call => ("call", &[1]),
            Opcode::ReturnValue => ("return_value", &[]),
            Opcode::Return => ("return", &[]),
            Opcode::GetLocal => ("get_local", &[1]),
            Opcode::SetLocal => ("set_local", &[1]),
            Opcode::GetBuiltin => ("get_builtin", &[1]),
            Opcode::Closure => ("closure", &[2, 1]),
            Opcode::GetFree => ("get_free", &[1]),
            Opcode::CurrentClosure => ("current_closure", &[]),
        };
        Definition {
            name,
            operand_widths,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = UndefinedOpcode;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .get(usize::from(byte))
            .copied()
            .ok_or(UndefinedOpcode(byte))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.definition().name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub name: &'static str,
    /// Width in bytes of each operand, in order
    pub operand_widths: &'static [usize],
}

impl Definition {
    /// Total encoded length of an instruction with this definition
    pub fn instruction_len(&self) -> usize {
        1 + self.operand_widths.iter().sum::<usize>()
    }
}

pub fn lookup(byte: u8) -> Result<Definition, UndefinedOpcode> {
    Opcode::try_from(byte).map(Opcode::definition)
}

/// Whether `value` can be encoded in an operand `width` bytes wide.
pub fn operand_fits(width: usize, value: usize) -> bool {
    match width {
        1 => value <= usize::from(u8::MAX),
        2 => value <= usize::from(u16::MAX),
        _ => false,
    }
}

/// Encodes a single instruction.
///
/// # Panics
/// If the number of operands differs from the opcode's definition, or an
/// operand does not fit its width. Both are bugs in the caller.
pub fn make(op: Opcode, operands: &[usize]) -> Vec<u8> {
    let def = op.definition();
    assert_eq!(
        operands.len(),
        def.operand_widths.len(),
        "wrong operand count for {}",
        def.name
    );

    let mut instruction = Vec::with_capacity(def.instruction_len());
    instruction.push(op as u8);
    for (&operand, &width) in operands.iter().zip(def.operand_widths) {
        assert!(
            operand_fits(width, operand),
            "operand {operand} of {} does not fit in {width} bytes",
            def.name
        );
        match width {
            2 => instruction.extend_from_slice(&(operand as u16).to_be_bytes()),
            _ => instruction.push(operand as u8),
        }
    }
    instruction
}

pub fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

pub fn read_u8(bytes: &[u8]) -> u8 {
    bytes[0]
}

/// Decodes the operands that follow an opcode byte, returning them along
/// with the number of bytes they took up.
pub fn read_operands(def: &Definition, bytes: &[u8]) -> (Vec<usize>, usize) {
    let mut operands = Vec::with_capacity(def.operand_widths.len());
    let mut offset = 0;
    for &width in def.operand_widths {
        match width {
            2 => operands.push(usize::from(read_u16(&bytes[offset..]))),
            _ => operands.push(usize::from(read_u8(&bytes[offset..]))),
        }
        offset += width;
    }
    (operands, offset)
}

/// Renders one decoded instruction (without its offset).
pub fn format_instruction(def: &Definition, operands: &[usize]) -> String {
    let expected = def.operand_widths.len();
    if operands.len() != expected {
        return format!(
            "ERROR: operand len {} does not match defined {expected}",
            operands.len()
        );
    }

    let mut line = String::from(def.name);
    for operand in operands {
        line.push(' ');
        line.push_str(&operand.to_string());
    }
    line
}

/// A flat stream of encoded instructions.
///
/// Displays as a disassembly listing, one instruction per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn push(&mut self, instruction: &[u8]) {
        self.0.extend_from_slice(instruction);
    }

    /// Overwrites the bytes at `position` in place
    pub fn replace(&mut self, position: usize, instruction: &[u8]) {
        self.0[position..position + instruction.len()].copy_from_slice(instruction);
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

impl Deref for Instructions {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<u8>> for Instructions {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl FromIterator<Vec<u8>> for Instructions {
    fn from_iter<T: IntoIterator<Item = Vec<u8>>>(iter: T) -> Self {
        Self(iter.into_iter().flatten().collect())
    }
}

impl fmt::Display for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut offset = 0;
        while offset < self.0.len() {
            let def = match lookup(self.0[offset]) {
                Ok(def) => def,
                Err(err) => {
                    writeln!(f, "ERROR: {err}")?;
                    offset += 1;
                    continue;
                }
            };

            if offset + def.instruction_len() > self.0.len() {
                writeln!(f, "{offset:04} ERROR: truncated {}", def.name)?;
                break;
            }

            let (operands, read) = read_operands(&def, &self.0[offset + 1..]);
            writeln!(f, "{offset:04} {}", format_instruction(&def, &operands))?;
            offset += 1 + read;
        }
        Ok(())
    }
}
