//! Semantic analyzer / IR lowerer.
//!
//! Walks the tree the reader produced, resolves scopes, checks types,
//! allocates a virtual stack slot for every value, and emits a linear
//! stream of typed virtual [`crate::instr::Instruction`]s per function.
//! This is the richest subsystem of the compiler: nested functions with
//! lexical capture, overloading by argument types, pointer arithmetic
//! scaling, scope-local temporaries under stack-top discipline, and
//! control-flow labels all live here.
//!
//! # Slot discipline
//!
//! Lowering an expression returns `(TypeDef, Slot)` where `slot == -1` iff
//! the type is `void`. [`Lowerer::lower_expr`] is the "permits temporary
//! residue" variant used inside sub-expressions; [`Lowerer::lower_discard`]
//! is the outer variant, which always restores `stack_top` to a caller-
//! chosen baseline, moving a non-void result down to that baseline slot
//! first. A separate `allow_var` flag threads through both, true only in
//! statement position: the top of a function body, inside `do`/`then`/
//! `else` blocks, and as the immediate condition child of `if`/`loop`.
//!
//! # Function visibility groups
//!
//! Within one scope body, `def`s that appear in a contiguous run with no
//! intervening `var` statement are pre-scanned as a group — every
//! signature in the group is registered in the enclosing scope before any
//! of their bodies are lowered — so siblings can call each other without
//! forward declarations. A `var` statement closes the group; declarations
//! after it start a new one.

mod forms;

use crate::ast::{Node, Value};
use crate::error::{CompileError, CompileResult};
use crate::function::{Function, FunctionTable, LabelId};
use crate::instr::{Instruction, Slot};
use crate::scope::ScopeEntry;
use crate::types::TypeDef;

pub struct Lowerer {
    pub table: FunctionTable,
}

pub fn lower_program(tree: &Value) -> CompileResult<FunctionTable> {
    let span = tracing::info_span!("lower");
    let _enter = span.enter();
    let mut lowerer = Lowerer {
        table: FunctionTable::new(),
    };
    (|| {
        let main_items = expect_def(tree)?;
        let main_idx = lowerer.prescan_def(&main_items, None, 1)?;
        lowerer.lower_def_body(main_idx, &main_items)
    })()
    .map_err(log_err)?;
    tracing::debug!(functions = lowerer.table.functions.len(), "lowering complete");
    Ok(lowerer.table)
}

// Logs a type/semantic error once, at the point it leaves the lowerer
// (all errors are fatal to the compilation unit; this is the
// single choke point every lowering failure passes through on its way
// out, so nested helper calls never re-log the same error).
fn log_err(e: CompileError) -> CompileError {
    tracing::error!(error = %e, "lowering error");
    e
}

// A `def` is a 4-child list: `(def (name rettype) (args...) body)`
// ("pre-scans definitions (def with 4 children)").
struct DefShape<'a> {
    name: &'a str,
    return_type: TypeDef,
    args: Vec<(&'a str, TypeDef)>,
    body: &'a Node<Value>,
}

fn expect_def(node: &Value) -> CompileResult<Node<Value>> {
    Ok(std::rc::Rc::new(node.clone()))
}

impl Lowerer {
    pub fn func(&self, idx: usize) -> &Function {
        self.table.get(idx)
    }

    pub fn func_mut(&mut self, idx: usize) -> &mut Function {
        self.table.get_mut(idx)
    }

    fn parse_def<'a>(&self, node: &'a Value) -> CompileResult<DefShape<'a>> {
        let items = node.as_list().filter(|i| i.len() == 4).ok_or_else(|| {
            CompileError::MalformedForm {
                form: "def".to_string(),
                detail: "expected (def (name rettype) (args...) body)".to_string(),
            }
        })?;
        if items[0].as_identifier() != Some("def") {
            return Err(CompileError::UnknownForm(node.shape()));
        }
        let head = items[1].as_list().ok_or_else(|| CompileError::MalformedForm {
            form: "def".to_string(),
            detail: "expected (name rettype)".to_string(),
        })?;
        if head.len() != 2 {
            return Err(CompileError::MalformedForm {
                form: "def".to_string(),
                detail: "expected (name rettype)".to_string(),
            });
        }
        let name = head[0]
            .as_identifier()
            .ok_or_else(|| CompileError::MalformedForm {
                form: "def".to_string(),
                detail: "function name must be an identifier".to_string(),
            })?;
        let return_type = crate::types::parse_type(&head[1])?;
        let arg_list = items[2].as_list().ok_or_else(|| CompileError::MalformedForm {
            form: "def".to_string(),
            detail: "expected an argument list".to_string(),
        })?;
        let mut args = Vec::new();
        for arg in arg_list {
            let pair = arg.as_list().filter(|p| p.len() == 2).ok_or_else(|| {
                CompileError::MalformedForm {
                    form: "def".to_string(),
                    detail: "expected (name type) argument".to_string(),
                }
            })?;
            let arg_name = pair[0].as_identifier().ok_or_else(|| CompileError::MalformedForm {
                form: "def".to_string(),
                detail: "argument name must be an identifier".to_string(),
            })?;
            let arg_type = crate::types::parse_type(&pair[1])?;
            args.push((arg_name, arg_type));
        }
        Ok(DefShape {
            name,
            return_type,
            args,
            body: &items[3],
        })
    }

    fn mangle(name: &str, args: &[(&str, TypeDef)]) -> String {
        let mut key = name.to_string();
        for (_, ty) in args {
            key.push_str(&ty.key());
        }
        key
    }

    // Registers a `def`'s signature: allocates its `Function` table entry,
    // reserves argument slots 0..argc as its initial locals, and defines
    // its mangled key in `parent_scope_idx`'s current scope (or, for
    // `main`, nowhere — it has no enclosing scope to be visible in).
    fn prescan_def(
        &mut self,
        node: &Value,
        parent: Option<usize>,
        level: usize,
    ) -> CompileResult<usize> {
        let shape = self.parse_def(node)?;
        let key = Self::mangle(shape.name, &shape.args);
        let signature = format!(
            "{}({}) -> {}",
            shape.name,
            shape
                .args
                .iter()
                .map(|(_, t)| t.key())
                .collect::<Vec<_>>()
                .join(", "),
            shape.return_type.key()
        );
        if let Some(parent_idx) = parent {
            if self.func(parent_idx).scope.lookup(&key).is_some() {
                return Err(CompileError::DuplicateFunction(key));
            }
        }
        let mut function = Function::new(shape.name, signature, shape.return_type, level, key.clone(), parent);
        function.scope.push(0);
        for (arg_name, arg_type) in &shape.args {
            let slot = function.alloc_local();
            function
                .scope
                .define(arg_name, ScopeEntry::Var(arg_type.clone(), slot))
                .map_err(|_| CompileError::DuplicateName((*arg_name).to_string()))?;
        }
        function.argc = function.var_count as usize;
        let idx = self.table.push(function);
        if let Some(parent_idx) = parent {
            self.func_mut(parent_idx)
                .scope
                .define(&key, ScopeEntry::Func(idx))
                .map_err(|_| CompileError::DuplicateFunction(key))?;
        }
        tracing::debug!(key = %key, level, idx, "registered function signature");
        Ok(idx)
    }

    fn lower_def_body(&mut self, idx: usize, node: &Value) -> CompileResult<()> {
        let shape = self.parse_def(node)?;
        let (ty, slot) = self.lower_expr(idx, shape.body, true)?;
        // A body that falls off the end with a non-void value must match
        // the declared return type, enforced even though no explicit
        // `return` ran. A body
        // that falls off the end as `void` is always accepted here: either
        // the declared type is itself `void`, or the last statement was an
        // explicit `return`/`break`/`continue`, whose own type (and, for
        // `return`, its own return-type check) already accounted for it.
        if !ty.is_void() && ty != shape.return_type {
            return Err(CompileError::ReturnTypeMismatch {
                func: shape.name.to_string(),
                expected: shape.return_type.describe(),
                found: ty.describe(),
            });
        }
        // `slot == -1` already whenever `ty` is void, so this also covers
        // a body that fell off the end via an explicit `return`.
        let ret_slot = if shape.return_type.is_void() { -1 } else { slot };
        self.func_mut(idx).emit(Instruction::Ret { slot: ret_slot });
        tracing::debug!(
            name = %shape.name,
            idx,
            instructions = self.func(idx).instructions.len(),
            "function lowered"
        );
        Ok(())
    }

    // --- scope / group machinery -------------------------------------------------

    fn is_var_statement(node: &Value) -> bool {
        node.as_list()
            .map(|items| {
                !items.is_empty() && items[0].as_identifier() == Some("var")
            })
            .unwrap_or(false)
    }

    fn is_def_statement(node: &Value) -> bool {
        node.as_list()
            .map(|items| {
                items.len() == 4 && items[0].as_identifier() == Some("def")
            })
            .unwrap_or(false)
    }

    // Lowers a scope body (the shared implementation behind `do`, `then`,
    // `else`, and a function's top-level body): pushes a new scope, splits
    // statements into visibility groups on `var` boundaries, lowers each
    // group (pre-scanning its `def`s first), and on exit moves the final
    // statement's value down to the caller's stack level so it survives
    // the scope pop.
    pub(crate) fn lower_scope(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        let saved_top = self.func(func_idx).stack_top;
        self.func_mut(func_idx).scope.push(saved_top);

        let mut last: (TypeDef, Slot) = (TypeDef::VOID, -1);
        let mut group: Vec<&Node<Value>> = Vec::new();
        for item in items {
            if Self::is_var_statement(item) {
                last = self.lower_group(func_idx, &group, last)?;
                group.clear();
                // The `var` statement itself is not part of either
                // neighboring visibility group, but it still executes in
                // sequence: lower it directly, same as any other
                // statement, through the generic `var`-form handler.
                last = self.lower_discard(func_idx, item, true)?;
            } else {
                group.push(item);
            }
        }
        last = self.lower_group(func_idx, &group, last)?;

        let (ty, slot) = last;
        let (saved_stack_top, n_local) = self.func_mut(func_idx).scope.pop();
        self.func_mut(func_idx).var_count -= n_local as i64;
        if ty.is_void() {
            self.func_mut(func_idx).stack_top = saved_stack_top;
            Ok((TypeDef::VOID, -1))
        } else {
            if slot != saved_stack_top {
                self.func_mut(func_idx).emit(Instruction::Mov { src: slot, dst: saved_stack_top });
            }
            self.func_mut(func_idx).stack_top = saved_stack_top + 1;
            Ok((ty, saved_stack_top))
        }
    }

    fn lower_group(
        &mut self,
        func_idx: usize,
        group: &[&Node<Value>],
        fallback: (TypeDef, Slot),
    ) -> CompileResult<(TypeDef, Slot)> {
        if group.is_empty() {
            return Ok(fallback);
        }
        let current_level = self.func(func_idx).level;
        let mut def_indices = Vec::new();
        for item in group {
            if Self::is_def_statement(item) {
                let idx = self.prescan_def(item, Some(func_idx), current_level + 1)?;
                def_indices.push(idx);
            }
        }
        let mut def_cursor = 0;
        let mut last = fallback;
        for item in group {
            if Self::is_def_statement(item) {
                let idx = def_indices[def_cursor];
                def_cursor += 1;
                self.lower_def_body(idx, item)?;
            } else {
                last = self.lower_discard(func_idx, item, true)?;
            }
        }
        Ok(last)
    }

    // --- shared slot helpers ------------------------------------------------------

    // The "outer" lowering variant : lowers `node`, then
    // discards any temporary residue, leaving at most one fresh slot at
    // `baseline` (the function's `stack_top` as observed before `node`
    // was lowered).
    pub(crate) fn lower_discard(&mut self, func_idx: usize, node: &Value, allow_var: bool) -> CompileResult<(TypeDef, Slot)> {
        let baseline = self.func(func_idx).stack_top;
        let (ty, slot) = self.lower_expr(func_idx, node, allow_var)?;
        if ty.is_void() {
            self.func_mut(func_idx).stack_top = baseline;
            Ok((TypeDef::VOID, -1))
        } else {
            if slot != baseline {
                self.func_mut(func_idx).emit(Instruction::Mov { src: slot, dst: baseline });
            }
            self.func_mut(func_idx).stack_top = baseline + 1;
            Ok((ty, baseline))
        }
    }

    pub(crate) fn new_temp(&mut self, func_idx: usize) -> Slot {
        self.func_mut(func_idx).alloc_temp()
    }

    pub(crate) fn new_label(&mut self, func_idx: usize) -> LabelId {
        self.func_mut(func_idx).new_label()
    }

    // --- identifier resolution ------------------------------------------------------

    // Resolves `name` by walking the current function's scope chain, then
    // the enclosing function chain . Returns the level at
    // which it was found (the current function's own level if local) and
    // the matching scope entry.
    fn resolve(&self, func_idx: usize, name: &str) -> CompileResult<(usize, ScopeEntry)> {
        if let Some(entry) = self.func(func_idx).scope.lookup(name) {
            return Ok((self.func(func_idx).level, entry.clone()));
        }
        let mut cursor = self.func(func_idx).parent;
        while let Some(idx) = cursor {
            if let Some(entry) = self.func(idx).scope.lookup(name) {
                return Ok((self.func(idx).level, entry.clone()));
            }
            cursor = self.func(idx).parent;
        }
        Err(CompileError::UndefinedIdentifier(name.to_string()))
    }

    // Resolves a mangled function key the same way, across the function
    // chain, without requiring the callee to also be a lexical ancestor
    // of the call site's *variables* (it's looked up as a `ScopeEntry::Func`
    // wherever in the chain it was registered).
    fn resolve_function(&self, func_idx: usize, key: &str) -> Option<usize> {
        if let Some(ScopeEntry::Func(idx)) = self.func(func_idx).scope.lookup(key) {
            return Some(*idx);
        }
        let mut cursor = self.func(func_idx).parent;
        while let Some(idx) = cursor {
            if let Some(ScopeEntry::Func(target)) = self.func(idx).scope.lookup(key) {
                return Some(*target);
            }
            cursor = self.func(idx).parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parse_program;

    fn lower_source(src: &str) -> CompileResult<FunctionTable> {
        let tree = parse_program(src)?;
        lower_program(&tree)
    }

    #[test]
    fn literal_return() {
        let table = lower_source("(return 5)").unwrap();
        let main = &table.functions[0];
        assert_eq!(main.level, 1);
        assert!(matches!(main.instructions.last(), Some(Instruction::Ret { .. })));
    }

    #[test]
    fn var_then_return() {
        let table = lower_source("(var x 10) (var y 4) (return (- x y))").unwrap();
        assert_eq!(table.functions[0].var_count, 2);
    }

    #[test]
    fn scope_discipline_restores_stack_top() {
        let table = lower_source("(var x 1) (do (var y 2) (return y))").unwrap();
        // `x` is the only surviving local once the inner `do` scope pops.
        assert_eq!(table.functions[0].var_count, 1);
    }

    #[test]
    fn duplicate_name_in_scope_is_an_error() {
        let err = lower_source("(var x 1) (var x 2) (return x)").unwrap_err();
        assert!(matches!(err, CompileError::DuplicateName(_)));
    }

    #[test]
    fn var_with_void_initializer_is_an_error() {
        let err = lower_source("(var x (do)) (return 0)").unwrap_err();
        assert!(matches!(err, CompileError::VoidValue(_)));
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let err = lower_source("(break) (return 0)").unwrap_err();
        assert!(matches!(err, CompileError::BreakOutsideLoop));
    }
}
