// `Function` and the arena-indexed function table.
//
// The function table is shared across every nested function of a
// compilation unit, and nested functions reference their lexical parent.
// Modeling this as owning `Rc`/parent pointers would create a cycle (the
// table owns the functions, a function's parent link points back into the
// table); instead each `Function` records its parent as a plain index into
// a single `Vec<Function>` owned by the `Lowerer` (src/lower/mod.rs).

use crate::scope::Scope;
use crate::instr::{Instruction, Slot};
use crate::types::TypeDef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LabelId(pub usize);

pub struct Function {
    pub name: String,
    pub signature: String,
    pub return_type: TypeDef,
    // 1 for `main`, incremented for each nested function definition.
    pub level: usize,
    // Mangled overloading key: name + each argument type's key, in order.
    pub key: String,
    // Index, in the unit's function table, of the lexically enclosing
    // function. `None` for the outermost `main`.
    pub parent: Option<usize>,
    pub scope: Scope,
    pub stack_top: i64,
    pub var_count: i64,
    pub argc: usize,
    pub instructions: Vec<Instruction>,
    // Label id -> resolved instruction index, or `None` while unresolved.
    pub labels: Vec<Option<usize>>,
}

impl Function {
    pub fn new(name: &str, signature: String, return_type: TypeDef, level: usize, key: String, parent: Option<usize>) -> Function {
        Function {
            name: name.to_string(),
            signature,
            return_type,
            level,
            key,
            parent,
            scope: Scope::new(),
            stack_top: 0,
            var_count: 0,
            argc: 0,
            instructions: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.labels.len());
        self.labels.push(None);
        id
    }

    pub fn place_label(&mut self, label: LabelId) {
        let index = self.instructions.len();
        self.instructions.push(Instruction::Label { label });
        self.labels[label.0] = Some(index);
    }

    pub fn emit(&mut self, instr: Instruction) {
        self.instructions.push(instr);
    }

    // Allocate a fresh temporary slot at the current stack top, bumping it.
    pub fn alloc_temp(&mut self) -> Slot {
        let slot = self.stack_top;
        self.stack_top += 1;
        slot
    }

    // Reserve a named local slot: it becomes both a new temp (at stack_top)
    // and a counted local (bumping `var_count`, which must always track
    // `var_count <= stack_top`).
    pub fn alloc_local(&mut self) -> Slot {
        let slot = self.stack_top;
        self.stack_top += 1;
        self.var_count += 1;
        slot
    }

    pub fn reset_stack_top(&mut self, to: i64) {
        debug_assert!(to <= self.stack_top);
        self.stack_top = to;
    }
}

// Owns every `Function` of one compilation unit, indexed by position.
// Shared by every nested function via the indices recorded in
// `Function::parent`.
#[derive(Default)]
pub struct FunctionTable {
    pub functions: Vec<Function>,
}

impl FunctionTable {
    pub fn new() -> FunctionTable {
        FunctionTable { functions: Vec::new() }
    }

    pub fn push(&mut self, f: Function) -> usize {
        self.functions.push(f);
        self.functions.len() - 1
    }

    pub fn get(&self, index: usize) -> &Function {
        &self.functions[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Function {
        &mut self.functions[index]
    }

    // Looks up a function by its mangled key anywhere in the table. Used
    // for call-site resolution once a candidate set of visible indices
    // (found by walking scope chains) narrows to a single key.
    pub fn find_by_key(&self, key: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.key == key)
    }
}
