//! Functions available to every program without being defined.
//!
//! They are addressed by their position in [`BUILTINS`], which the compiler
//! bakes into `get_builtin` instructions, so the order here is fixed.
use core::fmt;

use super::Object;
use crate::runtime::Arity;

pub struct Builtin {
    pub name: &'static str,
    pub arity: Arity,
    /// `None` means the call produced no value
    pub func: fn(&[Object]) -> Option<Object>,
}

impl Builtin {
    /// Invokes the builtin, turning an unsatisfied arity into an error value.
    pub fn call(&self, args: &[Object]) -> Option<Object> {
        if self.arity.is_satisfied(args.len()) {
            (self.func)(args)
        } else {
            Some(Object::error(format!(
                "wrong number of arguments. got={}, want={}",
                args.len(),
                self.arity
            )))
        }
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<builtin {} {}>", self.name, self.arity)
    }
}

pub static BUILTINS: [Builtin; 6] = [
    Builtin {
        name: "len",
        arity: Arity::Exact(1),
        func: len,
    },
    Builtin {
        name: "puts",
        arity: Arity::Min(0),
        func: puts,
    },
    Builtin {
        name: "first",
        arity: Arity::Exact(1),
        func: first,
    },
    Builtin {
        name: "last",
        arity: Arity::Exact(1),
        func: last,
    },
    Builtin {
        name: "rest",
        arity: Arity::Exact(1),
        func: rest,
    },
    Builtin {
        name: "push",
        arity: Arity::Exact(2),
        func: push,
    },
];

fn wrong_type(name: &str, expected: &str, got: &Object) -> Option<Object> {
    Some(Object::error(format!(
        "argument to `{name}` must be {expected}, got {}",
        got.type_name()
    )))
}

fn len(args: &[Object]) -> Option<Object> {
    match &args[0] {
        Object::String(s) => Some(Object::Integer(s.len() as i64)),
        Object::Array(elements) => Some(Object::Integer(elements.len() as i64)),
        other => Some(Object::error(format!(
            "argument to `len` not supported, got {}",
            other.type_name()
        ))),
    }
}

fn puts(args: &[Object]) -> Option<Object> {
    for arg in args {
        println!("{arg}");
    }
    None
}

fn first(args: &[Object]) -> Option<Object> {
    match &args[0] {
        Object::Array(elements) => Some(elements.first().cloned().unwrap_or(Object::Null)),
        other => wrong_type("first", "ARRAY", other),
    }
}

fn last(args: &[Object]) -> Option<Object> {
    match &args[0] {
        Object::Array(elements) => Some(elements.last().cloned().unwrap_or(Object::Null)),
        other => wrong_type("last", "ARRAY", other),
    }
}

fn rest(args: &[Object]) -> Option<Object> {
    match &args[0] {
        Object::Array(elements) if elements.is_empty() => Some(Object::Null),
        Object::Array(elements) => Some(Object::array(elements[1..].to_vec())),
        other => wrong_type("rest", "ARRAY", other),
    }
}

fn push(args: &[Object]) -> Option<Object> {
    match &args[0] {
        Object::Array(elements) => {
            let mut pushed = elements.to_vec();
            pushed.push(args[1].clone());
            Some(Object::array(pushed))
        }
        other => wrong_type("push", "ARRAY", other),
    }
}
