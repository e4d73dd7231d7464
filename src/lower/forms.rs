//! Form-by-form lowering: one method per source form.
//!
//! [`super::Lowerer::lower_expr`] is the single dispatcher every other
//! part of the lowerer (scope bodies, call arguments, binary operands)
//! goes through. It never discards residue itself — that's
//! [`super::Lowerer::lower_discard`]'s job — so every arm here returns
//! whatever slot it naturally produced.

use crate::ast::{Node, Value};
use crate::error::{CompileError, CompileResult};
use crate::instr::{BinOp, ConstOperand, Instruction, Slot, UnOp};
use crate::scope::ScopeEntry;
use crate::types::{parse_type, TypeDef};

use super::Lowerer;

impl Lowerer {
    pub(crate) fn lower_expr(&mut self, func_idx: usize, node: &Value, allow_var: bool) -> CompileResult<(TypeDef, Slot)> {
        match node {
            Value::Int(n) => {
                let dst = self.new_temp(func_idx);
                self.func_mut(func_idx).emit(Instruction::Const {
                    value: ConstOperand::Int(*n),
                    dst,
                });
                Ok((TypeDef::INT, dst))
            }
            Value::Byte(b) => {
                let dst = self.new_temp(func_idx);
                self.func_mut(func_idx).emit(Instruction::Const {
                    value: ConstOperand::Int(*b as i64),
                    dst,
                });
                Ok((TypeDef::BYTE, dst))
            }
            Value::String(s) => {
                let dst = self.new_temp(func_idx);
                self.func_mut(func_idx).emit(Instruction::Const {
                    value: ConstOperand::Str(s.clone()),
                    dst,
                });
                Ok((TypeDef::BYTE.add_pointer(), dst))
            }
            Value::Identifier(name) => self.lower_identifier(func_idx, name),
            Value::List(items) => self.lower_list(func_idx, items, allow_var),
        }
    }

    fn lower_identifier(&mut self, func_idx: usize, name: &str) -> CompileResult<(TypeDef, Slot)> {
        let (level, entry) = self.resolve(func_idx, name)?;
        match entry {
            ScopeEntry::Var(ty, slot) => {
                if level == self.func(func_idx).level {
                    Ok((ty, slot))
                } else {
                    let dst = self.new_temp(func_idx);
                    self.func_mut(func_idx).emit(Instruction::GetEnv { level, var: slot, dst });
                    Ok((ty, dst))
                }
            }
            ScopeEntry::Func(_) => Err(CompileError::UndefinedIdentifier(name.to_string())),
        }
    }

    fn lower_list(&mut self, func_idx: usize, items: &[Node<Value>], allow_var: bool) -> CompileResult<(TypeDef, Slot)> {
        let head = items
            .first()
            .and_then(|n| n.as_identifier())
            .ok_or_else(|| CompileError::UnknownForm(Value::List(items.to_vec()).shape()))?;
        match head {
            "do" | "then" | "else" => self.lower_scope(func_idx, &items[1..]),
            "var" => self.lower_var_form(func_idx, items, allow_var),
            "set" => self.lower_set(func_idx, items),
            "if" | "?" => self.lower_if(func_idx, items),
            "loop" => self.lower_loop(func_idx, items),
            "break" => {
                let (_, end) = self
                    .func(func_idx)
                    .scope
                    .loop_labels()
                    .ok_or(CompileError::BreakOutsideLoop)?;
                self.func_mut(func_idx).emit(Instruction::Jmp { label: end });
                Ok((TypeDef::VOID, -1))
            }
            "continue" => {
                let (start, _) = self
                    .func(func_idx)
                    .scope
                    .loop_labels()
                    .ok_or(CompileError::ContinueOutsideLoop)?;
                self.func_mut(func_idx).emit(Instruction::Jmp { label: start });
                Ok((TypeDef::VOID, -1))
            }
            "call" => self.lower_call(func_idx, items),
            "syscall" => self.lower_syscall(func_idx, items),
            "return" => self.lower_return(func_idx, items),
            "ptr" => self.lower_ptr_literal(func_idx, items),
            "cast" => self.lower_cast(func_idx, items),
            "peek" | "peek8" => self.lower_peek(func_idx, items),
            "poke" | "poke8" => self.lower_poke(func_idx, items),
            "ref" => self.lower_ref(func_idx, items),
            "debug" => {
                self.func_mut(func_idx).emit(Instruction::Debug);
                Ok((TypeDef::VOID, -1))
            }
            "-" => match items.len() - 1 {
                1 => self.lower_unop(func_idx, UnOp::Neg, &items[1]),
                2 => self.lower_binop(func_idx, "-", &items[1], &items[2]),
                _ => Err(malformed("-", "expected 1 or 2 operands")),
            },
            "not" => {
                if items.len() != 2 {
                    return Err(malformed("not", "expected exactly 1 operand"));
                }
                self.lower_unop(func_idx, UnOp::Not, &items[1])
            }
            "+" | "*" | "/" | "%" | "eq" | "ne" | "ge" | "gt" | "le" | "lt" | "and" | "or" => {
                if items.len() != 3 {
                    return Err(malformed(head, "expected exactly 2 operands"));
                }
                self.lower_binop(func_idx, head, &items[1], &items[2])
            }
            other => Err(CompileError::UnknownForm(other.to_string())),
        }
    }

    // --- binary / unary operators --------------------------------------------------

    fn lower_binop(&mut self, func_idx: usize, op: &str, lhs: &Value, rhs: &Value) -> CompileResult<(TypeDef, Slot)> {
        let baseline = self.func(func_idx).stack_top;
        let (mut lt, mut ls) = self.lower_expr(func_idx, lhs, false)?;
        let (mut rt, mut rs) = self.lower_expr(func_idx, rhs, false)?;
        if lt.is_void() || rt.is_void() {
            return Err(CompileError::VoidValue(format!("operand of `{}`", op)));
        }
        // `+` with (int, ptr) canonicalizes to (ptr, int).
        if op == "+" && lt == TypeDef::INT && rt.is_pointer() {
            std::mem::swap(&mut lt, &mut rt);
            std::mem::swap(&mut ls, &mut rs);
        }

        if (op == "+" || op == "-") && lt.is_pointer() && rt == TypeDef::INT {
            let mut scale = lt.pointer_scale();
            if op == "-" {
                scale = -scale;
            }
            self.func_mut(func_idx).stack_top = baseline;
            let dst = self.new_temp(func_idx);
            self.func_mut(func_idx).emit(Instruction::Lea {
                base: ls,
                index: rs,
                scale,
                dst,
            });
            return Ok((lt, dst));
        }

        if lt.is_pointer() && rt.is_pointer() {
            if op != "-" {
                return Err(CompileError::BadPointerArith(format!(
                    "`{}` between two pointers is not defined",
                    op
                )));
            }
            if lt != rt {
                return Err(CompileError::BadPointerArith(
                    "pointer subtraction requires identical pointer types".to_string(),
                ));
            }
            if lt.pointee() != TypeDef::BYTE {
                return Err(CompileError::NotImplemented(format!(
                    "pointer subtraction for `{}` (only `ptr byte` is implemented)",
                    lt.describe()
                )));
            }
            self.func_mut(func_idx).stack_top = baseline;
            let dst = self.new_temp(func_idx);
            self.func_mut(func_idx).emit(Instruction::Binop {
                op: BinOp::Sub,
                a: ls,
                b: rs,
                dst,
                byte: false,
            });
            return Ok((TypeDef::INT, dst));
        }

        if lt.is_pointer() || rt.is_pointer() {
            return Err(CompileError::BadPointerArith(format!(
                "`{}` requires matching scalar operands, found {} and {}",
                op,
                lt.describe(),
                rt.describe()
            )));
        }

        let binop = binop_from_name(op).ok_or_else(|| CompileError::UnknownForm(op.to_string()))?;
        if op == "and" || op == "or" {
            if lt != TypeDef::INT || rt != TypeDef::INT {
                return Err(CompileError::TypeMismatch {
                    expected: TypeDef::INT.describe(),
                    found: if lt != TypeDef::INT { lt.describe() } else { rt.describe() },
                });
            }
        } else if lt != rt {
            return Err(CompileError::TypeMismatch {
                expected: lt.describe(),
                found: rt.describe(),
            });
        }

        let byte = lt == TypeDef::BYTE;
        let result_ty = if binop.is_comparison() { TypeDef::INT } else { lt.clone() };
        self.func_mut(func_idx).stack_top = baseline;
        let dst = self.new_temp(func_idx);
        self.func_mut(func_idx).emit(Instruction::Binop {
            op: binop,
            a: ls,
            b: rs,
            dst,
            byte,
        });
        Ok((result_ty, dst))
    }

    fn lower_unop(&mut self, func_idx: usize, op: UnOp, arg: &Value) -> CompileResult<(TypeDef, Slot)> {
        let baseline = self.func(func_idx).stack_top;
        let (ty, slot) = self.lower_expr(func_idx, arg, false)?;
        let (byte, result_ty) = match op {
            UnOp::Neg => {
                if ty != TypeDef::INT && ty != TypeDef::BYTE {
                    return Err(CompileError::TypeMismatch {
                        expected: "int or byte".to_string(),
                        found: ty.describe(),
                    });
                }
                (ty == TypeDef::BYTE, ty.clone())
            }
            UnOp::Not => {
                if ty.is_void() {
                    return Err(CompileError::VoidValue("operand of `not`".to_string()));
                }
                (false, TypeDef::INT)
            }
        };
        self.func_mut(func_idx).stack_top = baseline;
        let dst = self.new_temp(func_idx);
        self.func_mut(func_idx).emit(Instruction::Unop { op, a: slot, dst, byte });
        Ok((result_ty, dst))
    }

    // --- var / set --------------------------------------------------------------

    fn lower_var_form(&mut self, func_idx: usize, items: &[Node<Value>], allow_var: bool) -> CompileResult<(TypeDef, Slot)> {
        if !allow_var {
            return Err(CompileError::VarNotAllowedHere(
                Value::List(items.to_vec()).shape(),
            ));
        }
        if items.len() != 3 {
            return Err(malformed("var", "expected (var name expr)"));
        }
        let name = items[1].as_identifier().ok_or_else(|| malformed("var", "variable name must be an identifier"))?;
        let baseline = self.func(func_idx).stack_top;
        let (ty, slot) = self.lower_expr(func_idx, &items[2], false)?;
        if ty.is_void() {
            return Err(CompileError::VoidValue(format!("(var {} ...)", name)));
        }
        self.func_mut(func_idx).stack_top = baseline;
        let local_slot = self.func_mut(func_idx).alloc_local();
        if slot != local_slot {
            self.func_mut(func_idx).emit(Instruction::Mov { src: slot, dst: local_slot });
        }
        self.func_mut(func_idx)
            .scope
            .define(name, ScopeEntry::Var(ty, local_slot))
            .map_err(|_| CompileError::DuplicateName(name.to_string()))?;
        Ok((TypeDef::VOID, -1))
    }

    fn lower_set(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        if items.len() != 3 {
            return Err(malformed("set", "expected (set name expr)"));
        }
        let name = items[1].as_identifier().ok_or_else(|| malformed("set", "target must be an identifier"))?;
        let (level, entry) = self.resolve(func_idx, name)?;
        let (var_ty, var_slot) = match entry {
            ScopeEntry::Var(ty, slot) => (ty, slot),
            ScopeEntry::Func(_) => return Err(CompileError::UndefinedIdentifier(name.to_string())),
        };
        let baseline = self.func(func_idx).stack_top;
        let (ty, slot) = self.lower_expr(func_idx, &items[2], false)?;
        if ty != var_ty {
            return Err(CompileError::TypeMismatch {
                expected: var_ty.describe(),
                found: ty.describe(),
            });
        }
        if level == self.func(func_idx).level {
            if slot != var_slot {
                self.func_mut(func_idx).emit(Instruction::Mov { src: slot, dst: var_slot });
            }
        } else {
            self.func_mut(func_idx).emit(Instruction::SetEnv { level, var: var_slot, src: slot });
        }
        self.func_mut(func_idx).stack_top = baseline;
        Ok((TypeDef::VOID, -1))
    }

    // --- control flow -------------------------------------------------------------

    fn lower_if(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        if items.len() != 3 && items.len() != 4 {
            return Err(malformed("if", "expected (if cond then [else])"));
        }
        let false_label = self.new_label(func_idx);
        let baseline = self.func(func_idx).stack_top;
        let (cond_ty, cond_slot) = self.lower_discard(func_idx, &items[1], true)?;
        if cond_ty.is_void() {
            return Err(CompileError::VoidValue("if condition".to_string()));
        }
        self.func_mut(func_idx).emit(Instruction::Jmpf { cond: cond_slot, label: false_label });
        self.func_mut(func_idx).stack_top = baseline;

        let (then_ty, _) = self.lower_discard(func_idx, &items[2], false)?;

        if items.len() == 4 {
            let true_label = self.new_label(func_idx);
            self.func_mut(func_idx).emit(Instruction::Jmp { label: true_label });
            self.func_mut(func_idx).place_label(false_label);
            self.func_mut(func_idx).stack_top = baseline;
            let (else_ty, _) = self.lower_discard(func_idx, &items[3], false)?;
            self.func_mut(func_idx).place_label(true_label);
            if then_ty == else_ty && !then_ty.is_void() {
                self.func_mut(func_idx).stack_top = baseline + 1;
                Ok((then_ty, baseline))
            } else {
                self.func_mut(func_idx).stack_top = baseline;
                Ok((TypeDef::VOID, -1))
            }
        } else {
            self.func_mut(func_idx).place_label(false_label);
            // No else branch: even a valued then-branch makes the whole
            // conditional void.
            self.func_mut(func_idx).stack_top = baseline;
            Ok((TypeDef::VOID, -1))
        }
    }

    fn lower_loop(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        if items.len() != 3 {
            return Err(malformed("loop", "expected (loop cond body)"));
        }
        let start = self.new_label(func_idx);
        let end = self.new_label(func_idx);

        // A dedicated scope for the loop, scoping `start`/`end` to its body:
        // once this scope pops, `break`/`continue` immediately after the
        // loop (in the same enclosing scope) fail to find these labels and
        // correctly report "outside any loop" instead of jumping into a
        // finished loop.
        let baseline = self.func(func_idx).stack_top;
        self.func_mut(func_idx).scope.push(baseline);
        self.func_mut(func_idx).scope.set_loop_labels(start, end);
        self.func_mut(func_idx).place_label(start);

        let (cond_ty, cond_slot) = self.lower_discard(func_idx, &items[1], true)?;
        if cond_ty.is_void() {
            return Err(CompileError::VoidValue("loop condition".to_string()));
        }
        self.func_mut(func_idx).emit(Instruction::Jmpf { cond: cond_slot, label: end });
        self.func_mut(func_idx).stack_top = baseline;

        self.lower_discard(func_idx, &items[2], true)?;
        self.func_mut(func_idx).stack_top = baseline;

        self.func_mut(func_idx).emit(Instruction::Jmp { label: start });
        self.func_mut(func_idx).place_label(end);

        let (saved_stack_top, n_local) = self.func_mut(func_idx).scope.pop();
        self.func_mut(func_idx).var_count -= n_local as i64;
        self.func_mut(func_idx).stack_top = saved_stack_top;
        Ok((TypeDef::VOID, -1))
    }

    // --- calls ----------------------------------------------------------------------

    fn lower_call(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        if items.len() < 2 {
            return Err(malformed("call", "expected (call name arg...)"));
        }
        let name = items[1].as_identifier().ok_or_else(|| malformed("call", "callee must be an identifier"))?;
        let mut key = name.to_string();
        for arg in &items[2..] {
            let (ty, _) = self.lower_discard(func_idx, arg, false)?;
            key.push_str(&ty.key());
        }
        let callee_idx = self
            .resolve_function(func_idx, &key)
            .ok_or_else(|| CompileError::UndefinedIdentifier(key.clone()))?;
        let cur_level = self.func(func_idx).level;
        let new_level = self.func(callee_idx).level;
        let return_type = self.func(callee_idx).return_type.clone();

        let argc = items.len() - 2;
        let top_after_args = self.func(func_idx).stack_top;
        let frame_base = top_after_args - argc as i64;
        self.func_mut(func_idx).stack_top = frame_base;
        self.func_mut(func_idx).emit(Instruction::Call {
            func: callee_idx,
            arg_base: frame_base,
            cur_level,
            new_level,
        });
        if return_type.is_void() {
            Ok((TypeDef::VOID, -1))
        } else {
            self.func_mut(func_idx).stack_top = frame_base + 1;
            Ok((return_type, frame_base))
        }
    }

    fn lower_syscall(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        if items.len() < 2 {
            return Err(malformed("syscall", "expected (syscall number arg...)"));
        }
        let number = match &*items[1] {
            Value::Int(n) => ConstOperand::Int(*n),
            Value::Byte(b) => ConstOperand::Int(*b as i64),
            _ => return Err(malformed("syscall", "syscall number must be a literal")),
        };
        let args = &items[2..];
        if args.len() > 6 {
            return Err(malformed("syscall", "at most 6 arguments are supported"));
        }
        let base = self.func(func_idx).stack_top;
        let mut arg_slots = Vec::with_capacity(args.len());
        for arg in args {
            let (ty, slot) = self.lower_discard(func_idx, arg, false)?;
            if ty.is_void() {
                return Err(CompileError::VoidValue("syscall argument".to_string()));
            }
            arg_slots.push(slot);
        }
        self.func_mut(func_idx).stack_top = base;
        let dst = self.new_temp(func_idx);
        self.func_mut(func_idx).emit(Instruction::Syscall {
            base: dst,
            number,
            args: arg_slots,
        });
        Ok((TypeDef::INT, dst))
    }

    fn lower_return(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        let expected = self.func(func_idx).return_type.clone();
        if items.len() == 1 {
            if !expected.is_void() {
                return Err(CompileError::ReturnTypeMismatch {
                    func: self.func(func_idx).name.clone(),
                    expected: expected.describe(),
                    found: TypeDef::VOID.describe(),
                });
            }
            self.func_mut(func_idx).emit(Instruction::Ret { slot: -1 });
            return Ok((TypeDef::VOID, -1));
        }
        if items.len() != 2 {
            return Err(malformed("return", "expected (return) or (return expr)"));
        }
        let (ty, slot) = self.lower_discard(func_idx, &items[1], false)?;
        if ty != expected {
            return Err(CompileError::ReturnTypeMismatch {
                func: self.func(func_idx).name.clone(),
                expected: expected.describe(),
                found: ty.describe(),
            });
        }
        self.func_mut(func_idx).emit(Instruction::Ret { slot });
        Ok((TypeDef::VOID, -1))
    }

    // --- pointers / casts -----------------------------------------------------------

    fn lower_ptr_literal(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        if items.len() != 2 {
            return Err(malformed("ptr", "expected (ptr type)"));
        }
        let pointee = parse_type(&items[1])?;
        if pointee.is_void() {
            return Err(CompileError::InvalidType("ptr void".to_string()));
        }
        let dst = self.new_temp(func_idx);
        self.func_mut(func_idx).emit(Instruction::Const {
            value: ConstOperand::Int(0),
            dst,
        });
        Ok((pointee.add_pointer(), dst))
    }

    fn lower_cast(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        if items.len() != 3 {
            return Err(malformed("cast", "expected (cast type expr)"));
        }
        let dst_ty = parse_type(&items[1])?;
        let (src_ty, slot) = self.lower_expr(func_idx, &items[2], false)?;
        match src_ty.can_cast_to(&dst_ty) {
            None => Err(CompileError::InvalidCast {
                src: src_ty.describe(),
                dst: dst_ty.describe(),
            }),
            Some(narrowing) => {
                if narrowing {
                    self.func_mut(func_idx).emit(Instruction::Cast8 { var: slot });
                }
                Ok((dst_ty, slot))
            }
        }
    }

    fn lower_peek(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        if items.len() != 2 {
            return Err(malformed("peek", "expected (peek pointer)"));
        }
        let (ty, slot) = self.lower_expr(func_idx, &items[1], false)?;
        if !ty.is_pointer() {
            return Err(CompileError::BadPointerArith(format!(
                "peek requires a pointer, found {}",
                ty.describe()
            )));
        }
        let pointee = ty.pointee();
        let byte = pointee == TypeDef::BYTE;
        self.func_mut(func_idx).emit(Instruction::Peek { ptr: slot, dst: slot, byte });
        Ok((pointee, slot))
    }

    fn lower_poke(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        if items.len() != 3 {
            return Err(malformed("poke", "expected (poke pointer value)"));
        }
        // Value first, then pointer.
        let (val_ty, val_slot) = self.lower_discard(func_idx, &items[2], false)?;
        let (ptr_ty, ptr_slot) = self.lower_discard(func_idx, &items[1], false)?;
        if !ptr_ty.is_pointer() {
            return Err(CompileError::BadPointerArith(format!(
                "poke requires a pointer, found {}",
                ptr_ty.describe()
            )));
        }
        let pointee = ptr_ty.pointee();
        if pointee != val_ty {
            return Err(CompileError::TypeMismatch {
                expected: pointee.describe(),
                found: val_ty.describe(),
            });
        }
        let byte = pointee == TypeDef::BYTE;
        self.func_mut(func_idx).emit(Instruction::Poke { ptr: ptr_slot, value: val_slot, byte });
        self.func_mut(func_idx).stack_top = val_slot + 1;
        Ok((val_ty, val_slot))
    }

    fn lower_ref(&mut self, func_idx: usize, items: &[Node<Value>]) -> CompileResult<(TypeDef, Slot)> {
        if items.len() != 2 {
            return Err(malformed("ref", "expected (ref name)"));
        }
        let name = items[1].as_identifier().ok_or_else(|| malformed("ref", "target must be an identifier"))?;
        let (level, entry) = self.resolve(func_idx, name)?;
        let (ty, slot) = match entry {
            ScopeEntry::Var(ty, slot) => (ty, slot),
            ScopeEntry::Func(_) => return Err(CompileError::UndefinedIdentifier(name.to_string())),
        };
        let dst = self.new_temp(func_idx);
        if level == self.func(func_idx).level {
            self.func_mut(func_idx).emit(Instruction::RefVar { var: slot, dst });
        } else {
            self.func_mut(func_idx).emit(Instruction::RefEnv { level, var: slot, dst });
        }
        Ok((ty.add_pointer(), dst))
    }
}

fn binop_from_name(op: &str) -> Option<BinOp> {
    Some(match op {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Mod,
        "eq" => BinOp::Eq,
        "ne" => BinOp::Ne,
        "ge" => BinOp::Ge,
        "gt" => BinOp::Gt,
        "le" => BinOp::Le,
        "lt" => BinOp::Lt,
        "and" => BinOp::And,
        "or" => BinOp::Or,
        _ => return None,
    })
}

fn malformed(form: &str, detail: &str) -> CompileError {
    CompileError::MalformedForm {
        form: form.to_string(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower_program;
    use crate::reader::parse_program;

    fn lower_src(src: &str) -> CompileResult<crate::function::FunctionTable> {
        lower_program(&parse_program(src)?)
    }

    #[test]
    fn arithmetic_and_comparison() {
        lower_src("(return (+ 2 3))").unwrap();
        lower_src("(return (le 1 2))").unwrap();
    }

    #[test]
    fn pointer_plus_int_uses_lea() {
        let table = lower_src("(var p (ptr int)) (var q (+ p 1)) (return 0)").unwrap();
        let main = &table.functions[0];
        assert!(main.instructions.iter().any(|i| matches!(i, Instruction::Lea { .. })));
    }

    #[test]
    fn type_mismatch_in_binop_is_an_error() {
        let err = lower_src("(return (+ 1 \"a\"))").unwrap_err();
        assert!(matches!(
            err,
            CompileError::TypeMismatch { .. } | CompileError::BadPointerArith(_)
        ));
    }

    #[test]
    fn if_with_mismatched_branch_types_is_void() {
        // Branches disagree in type (`int` vs `byte`), so the conditional
        // itself is void and cannot initialize a `var`.
        let err = lower_src("(var x (if 1 1 0u8)) (return 0)").unwrap_err();
        assert!(matches!(err, CompileError::VoidValue(_)));
    }

    #[test]
    fn if_without_else_is_void_even_when_then_yields() {
        // `x` can only be declared if the conditional's overall type is
        // void and thus rejected as an initializer.
        let err = lower_src("(var x (if 1 1)) (return 0)").unwrap_err();
        assert!(matches!(err, CompileError::VoidValue(_)));
    }

    #[test]
    fn loop_with_break_terminates_lowering() {
        lower_src("(loop 1 (if 1 (break))) (return 0)").unwrap();
    }

    #[test]
    fn break_after_loop_in_same_scope_is_an_error() {
        // The first `break` belongs to the loop; the second one is a
        // sibling statement after the loop has already closed its scope
        // and must not resolve to the finished loop's labels.
        let err = lower_src("(loop 1 (break)) (break) (return 0)").unwrap_err();
        assert!(matches!(err, CompileError::BreakOutsideLoop));
    }

    #[test]
    fn continue_after_loop_in_same_scope_is_an_error() {
        let err = lower_src("(loop 1 (break)) (continue) (return 0)").unwrap_err();
        assert!(matches!(err, CompileError::ContinueOutsideLoop));
    }

    #[test]
    fn mutual_recursion_in_one_group() {
        lower_src(
            "(def (is_even int) ((n int)) (if (eq n 0) 1 (call is_odd (- n 1)))) \
             (def (is_odd int) ((n int)) (if (eq n 0) 0 (call is_even (- n 1)))) \
             (return (call is_even 4))",
        )
        .unwrap();
    }

    #[test]
    fn var_breaks_mutual_visibility() {
        let err = lower_src(
            "(def (is_even int) ((n int)) (if (eq n 0) 1 (call is_odd (- n 1)))) \
             (var guard 0) \
             (def (is_odd int) ((n int)) (if (eq n 0) 0 (call is_even (- n 1)))) \
             (return 0)",
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UndefinedIdentifier(_)));
    }

    #[test]
    fn function_overloading_by_argument_type() {
        lower_src(
            "(def (f int) ((x int)) (return x)) \
             (def (f int) ((x byte)) (return (cast int x))) \
             (return (+ (call f 1) (call f 1u8)))",
        )
        .unwrap();
    }

    #[test]
    fn cast_int_to_byte_is_narrowing() {
        let table = lower_src("(var x (cast byte 300)) (return 0)").unwrap();
        let main = &table.functions[0];
        assert!(main.instructions.iter().any(|i| matches!(i, Instruction::Cast8 { .. })));
    }

    #[test]
    fn poke_then_peek_round_trip() {
        lower_src(
            "(var buf (syscall 9 0 4096 3 0x22 -1 0)) \
             (poke8 (cast (ptr byte) buf) 'A'u8) \
             (return (cast int (peek8 (cast (ptr byte) buf))))",
        )
        .unwrap();
    }

    #[test]
    fn syscall_number_must_be_a_literal() {
        let err = lower_src("(var n 9) (var buf (syscall n 0)) (return 0)").unwrap_err();
        assert!(matches!(err, CompileError::MalformedForm { .. }));
    }

    #[test]
    fn ref_of_local_yields_pointer() {
        lower_src("(var x 5) (var p (ref x)) (return (peek p))").unwrap();
    }
}
