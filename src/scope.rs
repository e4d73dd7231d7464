// Lexical scope chain for one function. A plain `Vec` of frames, not a
// parent-pointer chain, because scopes within a function are pushed and
// popped in strict LIFO order by the lowerer and never escape it.
//
// A `Scope` also carries the loop-target labels used by `break`/`continue`;
// a scope with no loop of its own inherits its parent's labels, so `break`
// inside an `if` nested in a `loop` still finds the enclosing loop.

use std::collections::HashMap;

use crate::function::LabelId;
use crate::types::TypeDef;

#[derive(Clone, Debug)]
pub enum ScopeEntry {
    // A named local: its type and virtual stack slot index.
    Var(TypeDef, i64),
    // A function visible in this scope: its index into the unit's
    // shared function table ("for functions the key is the
    // mangled name and the index is into the unit's function table").
    Func(usize),
}

struct Frame {
    names: HashMap<String, ScopeEntry>,
    n_local: usize,
    saved_stack_top: i64,
    loop_start_label: Option<LabelId>,
    loop_end_label: Option<LabelId>,
}

impl Frame {
    fn new(saved_stack_top: i64) -> Frame {
        Frame {
            names: HashMap::new(),
            n_local: 0,
            saved_stack_top,
            loop_start_label: None,
            loop_end_label: None,
        }
    }
}

pub struct Scope {
    frames: Vec<Frame>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope { frames: Vec::new() }
    }

    // Push a new scope, recording `stack_top` as its `saved_stack_top`.
    pub fn push(&mut self, stack_top: i64) {
        self.frames.push(Frame::new(stack_top));
    }

    // Pop the current scope. Returns `(saved_stack_top, n_local)` so the
    // caller can restore `stack_top` and `var_count`.
    pub fn pop(&mut self) -> (i64, usize) {
        let frame = self.frames.pop().expect("pop on empty scope stack");
        (frame.saved_stack_top, frame.n_local)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    // Declare a named local or function in the innermost scope. Fails if
    // the name is already bound in this scope.
    pub fn define(&mut self, name: &str, entry: ScopeEntry) -> Result<(), ()> {
        let is_var = matches!(entry, ScopeEntry::Var(..));
        let frame = self.frames.last_mut().expect("define with no open scope");
        if frame.names.contains_key(name) {
            return Err(());
        }
        frame.names.insert(name.to_string(), entry);
        if is_var {
            frame.n_local += 1;
        }
        Ok(())
    }

    // Search the scope chain, innermost first, for `name`.
    pub fn lookup(&self, name: &str) -> Option<&ScopeEntry> {
        for frame in self.frames.iter().rev() {
            if let Some(entry) = frame.names.get(name) {
                return Some(entry);
            }
        }
        None
    }

    // Attach loop labels to the innermost scope.
    pub fn set_loop_labels(&mut self, start: LabelId, end: LabelId) {
        let frame = self.frames.last_mut().expect("set_loop_labels with no open scope");
        frame.loop_start_label = Some(start);
        frame.loop_end_label = Some(end);
    }

    // Innermost-first search for the nearest enclosing loop's labels,
    // inherited down through scopes that don't have their own loop.
    pub fn loop_labels(&self) -> Option<(LabelId, LabelId)> {
        for frame in self.frames.iter().rev() {
            if let (Some(s), Some(e)) = (frame.loop_start_label, frame.loop_end_label) {
                return Some((s, e));
            }
        }
        None
    }
}

impl Default for Scope {
    fn default() -> Scope {
        Scope::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowing_across_scopes_is_allowed() {
        let mut s = Scope::new();
        s.push(0);
        s.define("x", ScopeEntry::Var(TypeDef::INT, 0)).unwrap();
        s.push(1);
        s.define("x", ScopeEntry::Var(TypeDef::BYTE, 1)).unwrap();
        match s.lookup("x").unwrap() {
            ScopeEntry::Var(t, slot) => {
                assert_eq!(*t, TypeDef::BYTE);
                assert_eq!(*slot, 1);
            }
            _ => panic!("expected var"),
        }
        let (saved, n_local) = s.pop();
        assert_eq!(saved, 1);
        assert_eq!(n_local, 1);
        match s.lookup("x").unwrap() {
            ScopeEntry::Var(t, slot) => {
                assert_eq!(*t, TypeDef::INT);
                assert_eq!(*slot, 0);
            }
            _ => panic!("expected var"),
        }
    }

    #[test]
    fn duplicate_name_in_same_scope_errors() {
        let mut s = Scope::new();
        s.push(0);
        s.define("x", ScopeEntry::Var(TypeDef::INT, 0)).unwrap();
        assert!(s.define("x", ScopeEntry::Var(TypeDef::INT, 1)).is_err());
    }

    #[test]
    fn loop_labels_inherit_through_childless_scopes() {
        let mut s = Scope::new();
        s.push(0);
        s.set_loop_labels(LabelId(0), LabelId(1));
        s.push(0);
        assert_eq!(s.loop_labels(), Some((LabelId(0), LabelId(1))));
    }
}
