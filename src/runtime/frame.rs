use std::rc::Rc;

use crate::compiler::bytecode::{read_u16, Instructions};
use crate::object::Closure;

/// One activation of a closure
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub closure: Rc<Closure>,
    /// Offset of the next byte to read
    pub ip: usize,
    /// Stack index of the frame's first local
    pub base_pointer: usize,
}

impl Frame {
    pub fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Self {
            closure,
            ip: 0,
            base_pointer,
        }
    }

    pub fn instructions(&self) -> &Instructions {
        &self.closure.function.instructions
    }

    pub fn is_done(&self) -> bool {
        self.ip >= self.instructions().len()
    }

    pub fn next_byte(&mut self) -> u8 {
        let byte = self.instructions()[self.ip];
        self.ip += 1;
        byte
    }

    pub fn read_u16(&mut self) -> usize {
        let value = read_u16(&self.instructions()[self.ip..]);
        self.ip += 2;
        usize::from(value)
    }

    pub fn read_u8(&mut self) -> usize {
        usize::from(self.next_byte())
    }
}
