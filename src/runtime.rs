//! The runtime executes compiled bytecode.
//!
//! State that must outlive a single run (the global store) is owned by the
//! caller and lent to each [`Vm`].
use core::fmt;

use crate::object::Object;

mod frame;
pub mod vm;

pub use vm::{RuntimeError, Vm};

/// Number of slots in the global store
pub const GLOBALS_SIZE: usize = 65536;

/// Procedure arity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Min(usize),
}

impl Arity {
    pub fn is_satisfied(&self, len: usize) -> bool {
        match self {
            Self::Exact(e) => *e == len,
            Self::Min(m) => *m <= len,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(e) => write!(f, "{e}"),
            Self::Min(m) => write!(f, "at least {m}"),
        }
    }
}

/// Global variable slots, addressed by the indices the compiler hands out.
///
/// Unset slots read as `null`.
#[derive(Debug, Clone)]
pub struct Globals(Vec<Object>);

impl Globals {
    pub fn new() -> Self {
        Self(vec![Object::Null; GLOBALS_SIZE])
    }

    pub fn get(&self, index: usize) -> Object {
        self.0.get(index).cloned().unwrap_or(Object::Null)
    }

    pub fn set(&mut self, index: usize, value: Object) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }
}

impl Default for Globals {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource limits of a single VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum operand stack depth
    pub stack_size: usize,
    /// Maximum call depth, the main frame included
    pub max_frames: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: 2048,
            max_frames: 1024,
        }
    }
}
