//! Operator lowering.
//!
//! 32-bit integer operations map straight onto opcodes. Long long and
//! floating point delegate to the runtime helpers: `__float_*` take and
//! return raw float bits in registers, while `__llong_*` and
//! `__double_*` work through pointers to 8-byte storage. Comparisons
//! produce -1/0/1 via `cmps`/`cmpu` (or a helper) and are then biased
//! and masked down to exactly 0 or 1.

use crate::backend::block::{BlockLabel, Opcode, Operand, Reg};
use crate::backend::codegen::{by_address, sized, Generator, LAST_EXPR_REG};
use crate::common::error::{Category, CResult, Diagnostic};
use crate::frontend::ast::{Node, NodeKind};
use crate::frontend::lexer::TokenRef;
use crate::frontend::types::{Base, TypeRef};

fn err_at(token: &TokenRef, message: impl Into<String>) -> Box<Diagnostic> {
    Box::new(Diagnostic::new(Category::Internal, message).with_location(token.location()))
}

/// The operand class an operator works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandClass {
    Int,
    Float,
    Double,
    LongLong,
}

fn class_of(ty: &TypeRef) -> OperandClass {
    if ty.matches_base(Base::Float) {
        OperandClass::Float
    } else if ty.matches_base(Base::Double) || ty.matches_base(Base::LongDouble) {
        OperandClass::Double
    } else if ty.is_long_long() {
        OperandClass::LongLong
    } else {
        OperandClass::Int
    }
}

impl<'a> Generator<'a> {
    // === Helper call plumbing ===

    /// Calls a helper whose arguments and result are register values
    /// (float arithmetic, comparisons on wide types).
    pub(crate) fn call_helper_value2(
        &mut self,
        name: &str,
        a: Reg,
        b: Reg,
        reg: Reg,
        token: &TokenRef,
    ) {
        self.push_live(reg, token);
        if b == Reg::R1 {
            // a is already r0.
            debug_assert_eq!(a, Reg::R0);
        } else {
            if a != Reg::R0 {
                self.add(Opcode::Mov, token, vec![Reg::R0.into(), a.into()]);
            }
            if b != Reg::R1 {
                self.add(Opcode::Mov, token, vec![Reg::R1.into(), b.into()]);
            }
        }
        self.add(
            Opcode::Call,
            token,
            vec![Operand::Sym { sigil: '^', name: name.to_string() }],
        );
        self.add(Opcode::Mov, token, vec![Reg::R9.into(), Reg::R0.into()]);
        self.pop_live(reg, token);
        self.add(Opcode::Mov, token, vec![reg.into(), Reg::R9.into()]);
    }

    /// One value argument, value result.
    pub(crate) fn call_helper_value1(&mut self, name: &str, a: Reg, reg: Reg, token: &TokenRef) {
        self.push_live(reg, token);
        if a != Reg::R0 {
            self.add(Opcode::Mov, token, vec![Reg::R0.into(), a.into()]);
        }
        self.add(
            Opcode::Call,
            token,
            vec![Operand::Sym { sigil: '^', name: name.to_string() }],
        );
        self.add(Opcode::Mov, token, vec![Reg::R9.into(), Reg::R0.into()]);
        self.pop_live(reg, token);
        self.add(Opcode::Mov, token, vec![reg.into(), Reg::R9.into()]);
    }

    /// Calls a helper writing an 8-byte result through a pointer in r0,
    /// with two further arguments in r1 and r2. Returns with `reg`
    /// holding the address of the result temporary.
    pub(crate) fn call_helper_out2(
        &mut self,
        name: &str,
        a: Reg,
        b: Reg,
        reg: Reg,
        token: &TokenRef,
    ) {
        let out = self.alloc_slot(8);
        self.push_live(reg, token);
        if b == Reg::R1 {
            // a is r0: move the r1 operand out of the way first.
            self.add(Opcode::Mov, token, vec![Reg::R2.into(), b.into()]);
            self.add(Opcode::Mov, token, vec![Reg::R1.into(), a.into()]);
        } else {
            if a != Reg::R1 {
                self.add(Opcode::Mov, token, vec![Reg::R1.into(), a.into()]);
            }
            if b != Reg::R2 {
                self.add(Opcode::Mov, token, vec![Reg::R2.into(), b.into()]);
            }
        }
        self.lea_frame(Reg::R0, out, token);
        self.add(
            Opcode::Call,
            token,
            vec![Operand::Sym { sigil: '^', name: name.to_string() }],
        );
        self.pop_live(reg, token);
        self.lea_frame(reg, out, token);
    }

    /// One argument in r1, 8-byte result through r0.
    pub(crate) fn call_helper_out1(&mut self, name: &str, a: Reg, reg: Reg, token: &TokenRef) {
        let out = self.alloc_slot(8);
        self.push_live(reg, token);
        if a != Reg::R1 {
            self.add(Opcode::Mov, token, vec![Reg::R1.into(), a.into()]);
        }
        self.lea_frame(Reg::R0, out, token);
        self.add(
            Opcode::Call,
            token,
            vec![Operand::Sym { sigil: '^', name: name.to_string() }],
        );
        self.pop_live(reg, token);
        self.lea_frame(reg, out, token);
    }

    // === Binary arithmetic ===

    pub(crate) fn gen_binary(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let left = &node.children[0];
        let right = &node.children[1];

        // Pointer arithmetic scales the integer side by the pointee size.
        if matches!(node.kind, NodeKind::Add | NodeKind::Sub) && node.ty.is_indirection() {
            return self.gen_pointer_add_sub(node, reg);
        }
        if node.kind == NodeKind::Sub
            && left.ty.is_indirection()
            && right.ty.is_indirection()
        {
            return self.gen_pointer_difference(node, reg);
        }

        let class = class_of(&left.ty);
        match class {
            OperandClass::Int => {
                let signed = left.ty.is_signed();
                let op = match node.kind {
                    NodeKind::Add => Opcode::Add,
                    NodeKind::Sub => Opcode::Sub,
                    NodeKind::Mul => Opcode::Mul,
                    NodeKind::Div => {
                        if signed {
                            Opcode::Divs
                        } else {
                            Opcode::Divu
                        }
                    }
                    NodeKind::Mod => {
                        if signed {
                            Opcode::Mods
                        } else {
                            Opcode::Modu
                        }
                    }
                    NodeKind::Shl => Opcode::Shl,
                    NodeKind::Shr => {
                        if signed {
                            Opcode::Shrs
                        } else {
                            Opcode::Shru
                        }
                    }
                    NodeKind::BitAnd => Opcode::And,
                    NodeKind::BitOr => Opcode::Or,
                    NodeKind::BitXor => Opcode::Xor,
                    _ => return Err(err_at(&token, "not an arithmetic operator")),
                };
                let (l, r) = self.gen_pair(reg, left, right, false, false)?;
                self.add(op, &token, vec![l.into(), l.into(), r.into()]);
                if l != reg {
                    self.add(Opcode::Mov, &token, vec![reg.into(), l.into()]);
                }
                Ok(())
            }

            OperandClass::Float => {
                let name = match node.kind {
                    NodeKind::Add => "__float_add",
                    NodeKind::Sub => "__float_sub",
                    NodeKind::Mul => "__float_mul",
                    NodeKind::Div => "__float_div",
                    _ => return Err(err_at(&token, "invalid float operator")),
                };
                let (l, r) = self.gen_pair(reg, left, right, false, false)?;
                self.call_helper_value2(name, l, r, reg, &token);
                Ok(())
            }

            OperandClass::Double => {
                let name = match node.kind {
                    NodeKind::Add => "__double_add",
                    NodeKind::Sub => "__double_sub",
                    NodeKind::Mul => "__double_mul",
                    NodeKind::Div => "__double_div",
                    _ => return Err(err_at(&token, "invalid double operator")),
                };
                let (l, r) = self.gen_pair(reg, left, right, false, false)?;
                self.call_helper_out2(name, l, r, reg, &token);
                Ok(())
            }

            OperandClass::LongLong => {
                let signed = left.ty.is_signed();
                let name = match node.kind {
                    NodeKind::Add => "__llong_add",
                    NodeKind::Sub => "__llong_sub",
                    NodeKind::Mul => "__llong_mul",
                    NodeKind::Div => {
                        if signed {
                            "__llong_divs"
                        } else {
                            "__llong_divu"
                        }
                    }
                    NodeKind::Mod => {
                        if signed {
                            "__llong_mods"
                        } else {
                            "__llong_modu"
                        }
                    }
                    NodeKind::Shl => "__llong_shl",
                    NodeKind::Shr => {
                        if signed {
                            "__llong_shrs"
                        } else {
                            "__llong_shru"
                        }
                    }
                    NodeKind::BitAnd => "__llong_and",
                    NodeKind::BitOr => "__llong_or",
                    NodeKind::BitXor => "__llong_xor",
                    _ => return Err(err_at(&token, "invalid long long operator")),
                };
                // Shift counts are plain ints and are passed by value;
                // everything else is a pointer to 8-byte storage.
                let (l, r) = self.gen_pair(reg, left, right, false, false)?;
                self.call_helper_out2(name, l, r, reg, &token);
                Ok(())
            }
        }
    }

    fn gen_pointer_add_sub(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let left = &node.children[0];
        let right = &node.children[1];
        let (l, r) = self.gen_pair(reg, left, right, false, false)?;

        // Find the pointer side; the other is the scaled offset.
        let left_is_pointer = left.ty.is_indirection();
        let pointee = if left_is_pointer { &left.ty } else { &right.ty }
            .pointed_to()
            .cloned()
            .ok_or_else(|| err_at(&token, "pointer arithmetic on a non-pointer"))?;
        let size = sized(&pointee, &token)?;
        let int_reg = if left_is_pointer { r } else { l };
        self.scale_register(int_reg, size, &token, &[l, r]);

        let op = if node.kind == NodeKind::Add {
            Opcode::Add
        } else {
            Opcode::Sub
        };
        self.add(op, &token, vec![l.into(), l.into(), r.into()]);
        if l != reg {
            self.add(Opcode::Mov, &token, vec![reg.into(), l.into()]);
        }
        Ok(())
    }

    fn gen_pointer_difference(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let left = &node.children[0];
        let right = &node.children[1];
        let (l, r) = self.gen_pair(reg, left, right, false, false)?;

        self.add(Opcode::Sub, &token, vec![l.into(), l.into(), r.into()]);
        let pointee = left
            .ty
            .pointed_to()
            .cloned()
            .ok_or_else(|| err_at(&token, "pointer difference on a non-pointer"))?;
        let size = sized(&pointee, &token)?;
        self.unscale_register(l, size, &token, &[l, r]);
        if l != reg {
            self.add(Opcode::Mov, &token, vec![reg.into(), l.into()]);
        }
        Ok(())
    }

    // === Comparisons ===

    /// Computes -1/0/1 into `reg`, then reduces to 0/1 with a bias and a
    /// mask chosen per operator.
    pub(crate) fn gen_comparison(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let left = &node.children[0];
        let right = &node.children[1];

        match class_of(&left.ty) {
            OperandClass::Int => {
                let signed = left.ty.is_signed();
                let (l, r) = self.gen_pair(reg, left, right, false, false)?;
                let op = if signed { Opcode::Cmps } else { Opcode::Cmpu };
                self.add(op, &token, vec![l.into(), l.into(), r.into()]);
                if l != reg {
                    self.add(Opcode::Mov, &token, vec![reg.into(), l.into()]);
                }
            }
            OperandClass::Float => {
                let (l, r) = self.gen_pair(reg, left, right, false, false)?;
                self.call_helper_value2("__float_cmp", l, r, reg, &token);
            }
            OperandClass::Double => {
                let (l, r) = self.gen_pair(reg, left, right, false, false)?;
                self.call_helper_value2("__double_cmp", l, r, reg, &token);
            }
            OperandClass::LongLong => {
                let name = if left.ty.is_signed() {
                    "__llong_cmps"
                } else {
                    "__llong_cmpu"
                };
                let (l, r) = self.gen_pair(reg, left, right, false, false)?;
                self.call_helper_value2(name, l, r, reg, &token);
            }
        }

        // Bias and mask: the comparison result is -1, 0 or 1.
        let (bias, add_one) = match node.kind {
            NodeKind::Equal => (0, true),
            NodeKind::NotEqual => (0, false),
            NodeKind::Less => (-1, true),
            NodeKind::Greater => (1, true),
            NodeKind::LessEqual => (1, false),
            NodeKind::GreaterEqual => (-1, false),
            _ => return Err(err_at(&token, "not a comparison operator")),
        };
        self.add(
            Opcode::Cmpu,
            &token,
            vec![reg.into(), reg.into(), Operand::Imm(bias)],
        );
        if add_one {
            self.add(
                Opcode::Add,
                &token,
                vec![reg.into(), reg.into(), Operand::Imm(1)],
            );
        }
        self.add(
            Opcode::And,
            &token,
            vec![reg.into(), reg.into(), Operand::Imm(1)],
        );
        Ok(())
    }

    /// Short-circuit `&&` and `||`. Both operands are 0/1 predicates.
    pub(crate) fn gen_logical(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let end = self.alloc_label();
        self.gen_value(&node.children[0], reg)?;
        let jump = if node.kind == NodeKind::LogicalAnd {
            Opcode::Jz
        } else {
            Opcode::Jnz
        };
        self.add(jump, &token, vec![reg.into(), Operand::JumpLabel(end)]);
        self.gen_value(&node.children[1], reg)?;
        self.new_block(Some(BlockLabel::Jump(end)));
        Ok(())
    }

    // === Unary operators ===

    pub(crate) fn gen_negate(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let child = node.first();
        self.gen_value(child, reg)?;

        match class_of(&node.ty) {
            OperandClass::Int => {
                self.add(
                    Opcode::Sub,
                    &token,
                    vec![reg.into(), Operand::Imm(0), reg.into()],
                );
            }
            OperandClass::Float => {
                // Flip the sign bit.
                self.add(
                    Opcode::Imw,
                    &token,
                    vec![Reg::R9.into(), Operand::Imm(i32::MIN)],
                );
                self.add(
                    Opcode::Xor,
                    &token,
                    vec![reg.into(), reg.into(), Reg::R9.into()],
                );
            }
            OperandClass::Double => {
                // Copy to a fresh temporary with the sign bit of the high
                // word flipped.
                let slot = self.alloc_slot(8);
                self.lea_frame(Reg::RA, slot, &token);
                self.add(
                    Opcode::Ldw,
                    &token,
                    vec![Reg::R9.into(), reg.into(), Operand::Imm(0)],
                );
                self.add(
                    Opcode::Stw,
                    &token,
                    vec![Reg::R9.into(), Reg::RA.into(), Operand::Imm(0)],
                );
                self.add(
                    Opcode::Ldw,
                    &token,
                    vec![Reg::R9.into(), reg.into(), Operand::Imm(4)],
                );
                self.add(
                    Opcode::Imw,
                    &token,
                    vec![Reg::RB.into(), Operand::Imm(i32::MIN)],
                );
                self.add(
                    Opcode::Xor,
                    &token,
                    vec![Reg::R9.into(), Reg::R9.into(), Reg::RB.into()],
                );
                self.add(
                    Opcode::Stw,
                    &token,
                    vec![Reg::R9.into(), Reg::RA.into(), Operand::Imm(4)],
                );
                self.add(Opcode::Mov, &token, vec![reg.into(), Reg::RA.into()]);
            }
            OperandClass::LongLong => {
                // 0 - x through the subtraction helper.
                let zero = self.alloc_slot(8);
                self.lea_frame(Reg::RA, zero, &token);
                self.add(Opcode::Zero, &token, vec![Reg::R9.into()]);
                self.add(
                    Opcode::Stw,
                    &token,
                    vec![Reg::R9.into(), Reg::RA.into(), Operand::Imm(0)],
                );
                self.add(
                    Opcode::Stw,
                    &token,
                    vec![Reg::R9.into(), Reg::RA.into(), Operand::Imm(4)],
                );
                self.call_helper_out2("__llong_sub", Reg::RA, reg, reg, &token);
            }
        }
        Ok(())
    }

    pub(crate) fn gen_bit_not(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        self.gen_value(node.first(), reg)?;
        if node.ty.is_long_long() {
            let slot = self.alloc_slot(8);
            self.lea_frame(Reg::RA, slot, &token);
            for offset in [0, 4] {
                self.add(
                    Opcode::Ldw,
                    &token,
                    vec![Reg::R9.into(), reg.into(), Operand::Imm(offset)],
                );
                self.add(Opcode::Not, &token, vec![Reg::R9.into(), Reg::R9.into()]);
                self.add(
                    Opcode::Stw,
                    &token,
                    vec![Reg::R9.into(), Reg::RA.into(), Operand::Imm(offset)],
                );
            }
            self.add(Opcode::Mov, &token, vec![reg.into(), Reg::RA.into()]);
        } else {
            self.add(Opcode::Not, &token, vec![reg.into(), reg.into()]);
        }
        Ok(())
    }

    // === Assignment ===

    pub(crate) fn gen_assign(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let lhs = &node.children[0];
        let rhs = &node.children[1];

        let (value, location) = self.gen_pair(reg, rhs, lhs, false, true)?;
        self.store_value(&node.ty, location, value, &token)?;
        if value != reg {
            self.add(Opcode::Mov, &token, vec![reg.into(), value.into()]);
        }
        Ok(())
    }

    /// Stores the value (or the value behind the address) in `value` to
    /// the address in `location`, by the size of `ty`.
    pub(crate) fn store_value(
        &mut self,
        ty: &TypeRef,
        location: Reg,
        value: Reg,
        token: &TokenRef,
    ) -> CResult<()> {
        let size = sized(ty, token)?;
        if by_address(ty) {
            if size == 8 {
                for offset in [0, 4] {
                    self.add(
                        Opcode::Ldw,
                        token,
                        vec![Reg::R9.into(), value.into(), Operand::Imm(offset)],
                    );
                    self.add(
                        Opcode::Stw,
                        token,
                        vec![Reg::R9.into(), location.into(), Operand::Imm(offset)],
                    );
                }
            } else {
                self.copy_bytes(location, value, size, token);
            }
            return Ok(());
        }
        let op = Self::store_op(size);
        self.add(
            op,
            token,
            vec![value.into(), location.into(), Operand::Imm(0)],
        );
        Ok(())
    }

    fn base_op_of_assign(kind: NodeKind) -> NodeKind {
        match kind {
            NodeKind::AddAssign => NodeKind::Add,
            NodeKind::SubAssign => NodeKind::Sub,
            NodeKind::MulAssign => NodeKind::Mul,
            NodeKind::DivAssign => NodeKind::Div,
            NodeKind::ModAssign => NodeKind::Mod,
            NodeKind::AndAssign => NodeKind::BitAnd,
            NodeKind::OrAssign => NodeKind::BitOr,
            NodeKind::XorAssign => NodeKind::BitXor,
            NodeKind::ShlAssign => NodeKind::Shl,
            NodeKind::ShrAssign => NodeKind::Shr,
            _ => unreachable!(),
        }
    }

    pub(crate) fn gen_compound_assign(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let lhs = &node.children[0];
        let rhs = &node.children[1];
        let kind = Self::base_op_of_assign(node.kind);
        let ty = node.ty.clone();

        if by_address(&ty) {
            return self.gen_compound_assign_wide(node, kind, reg);
        }

        // Scalar path: the location is saved on the stack while the
        // right-hand side is evaluated.
        self.gen_location(lhs, reg)?;
        self.add(Opcode::Push, &token, vec![reg.into()]);
        let size = sized(&ty, &token)?;
        let load = Self::load_op(size);
        self.add(load, &token, vec![reg.into(), reg.into(), Operand::Imm(0)]);

        let rhs_reg = if reg < LAST_EXPR_REG {
            self.gen_value(rhs, reg.next())?;
            reg.next()
        } else {
            self.add(Opcode::Push, &token, vec![reg.into()]);
            self.gen_value(rhs, LAST_EXPR_REG)?;
            self.add(Opcode::Mov, &token, vec![Reg::RA.into(), LAST_EXPR_REG.into()]);
            self.add(Opcode::Pop, &token, vec![LAST_EXPR_REG.into()]);
            Reg::RA
        };

        // Pointer compound assignment scales the integer side.
        if ty.is_pointer() && matches!(kind, NodeKind::Add | NodeKind::Sub) {
            let pointee = ty.pointed_to().cloned().unwrap_or_else(|| unreachable!());
            let size = sized(&pointee, &token)?;
            self.scale_register(rhs_reg, size, &token, &[reg]);
        }

        self.apply_scalar_op(kind, &ty, reg, rhs_reg, &token)?;

        self.add(Opcode::Pop, &token, vec![Reg::R9.into()]);
        let store = Self::store_op(size);
        self.add(
            store,
            &token,
            vec![reg.into(), Reg::R9.into(), Operand::Imm(0)],
        );
        Ok(())
    }

    /// Applies a scalar binary operation in place: `left = left op right`.
    /// Float operations go through the value helpers.
    fn apply_scalar_op(
        &mut self,
        kind: NodeKind,
        ty: &TypeRef,
        left: Reg,
        right: Reg,
        token: &TokenRef,
    ) -> CResult<()> {
        if ty.matches_base(Base::Float) {
            let name = match kind {
                NodeKind::Add => "__float_add",
                NodeKind::Sub => "__float_sub",
                NodeKind::Mul => "__float_mul",
                NodeKind::Div => "__float_div",
                _ => return Err(err_at(token, "invalid float operation")),
            };
            self.call_helper_value2(name, left, right, left, token);
            return Ok(());
        }
        let signed = ty.is_signed();
        let op = match kind {
            NodeKind::Add => Opcode::Add,
            NodeKind::Sub => Opcode::Sub,
            NodeKind::Mul => Opcode::Mul,
            NodeKind::Div => {
                if signed {
                    Opcode::Divs
                } else {
                    Opcode::Divu
                }
            }
            NodeKind::Mod => {
                if signed {
                    Opcode::Mods
                } else {
                    Opcode::Modu
                }
            }
            NodeKind::Shl => Opcode::Shl,
            NodeKind::Shr => {
                if signed {
                    Opcode::Shrs
                } else {
                    Opcode::Shru
                }
            }
            NodeKind::BitAnd => Opcode::And,
            NodeKind::BitOr => Opcode::Or,
            NodeKind::BitXor => Opcode::Xor,
            _ => return Err(err_at(token, "invalid scalar operation")),
        };
        self.add(op, token, vec![left.into(), left.into(), right.into()]);
        Ok(())
    }

    /// Compound assignment on long long / double: compute through the
    /// helper into a temporary, then copy back to the location.
    fn gen_compound_assign_wide(&mut self, node: &Node, kind: NodeKind, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let lhs = &node.children[0];
        let rhs = &node.children[1];
        let is_double =
            node.ty.matches_base(Base::Double) || node.ty.matches_base(Base::LongDouble);
        let signed = node.ty.is_signed();

        let name = if is_double {
            match kind {
                NodeKind::Add => "__double_add",
                NodeKind::Sub => "__double_sub",
                NodeKind::Mul => "__double_mul",
                NodeKind::Div => "__double_div",
                _ => return Err(err_at(&token, "invalid double operation")),
            }
        } else {
            match kind {
                NodeKind::Add => "__llong_add",
                NodeKind::Sub => "__llong_sub",
                NodeKind::Mul => "__llong_mul",
                NodeKind::Div => {
                    if signed {
                        "__llong_divs"
                    } else {
                        "__llong_divu"
                    }
                }
                NodeKind::Mod => {
                    if signed {
                        "__llong_mods"
                    } else {
                        "__llong_modu"
                    }
                }
                NodeKind::Shl => "__llong_shl",
                NodeKind::Shr => {
                    if signed {
                        "__llong_shrs"
                    } else {
                        "__llong_shru"
                    }
                }
                NodeKind::BitAnd => "__llong_and",
                NodeKind::BitOr => "__llong_or",
                NodeKind::BitXor => "__llong_xor",
                _ => return Err(err_at(&token, "invalid long long operation")),
            }
        };

        // The location doubles as the left operand's address.
        let (location, rhs_reg) = self.gen_pair(reg, lhs, rhs, true, false)?;
        self.add(Opcode::Push, &token, vec![location.into()]);
        self.call_helper_out2(name, location, rhs_reg, reg, &token);
        self.add(Opcode::Pop, &token, vec![Reg::R9.into()]);
        for offset in [0, 4] {
            self.add(
                Opcode::Ldw,
                &token,
                vec![Reg::RA.into(), reg.into(), Operand::Imm(offset)],
            );
            self.add(
                Opcode::Stw,
                &token,
                vec![Reg::RA.into(), Reg::R9.into(), Operand::Imm(offset)],
            );
        }
        Ok(())
    }

    // === Casts ===

    pub(crate) fn gen_cast(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let child = node.first();
        self.gen_value(child, reg)?;
        self.convert(&child.ty, &node.ty, reg, &token)
    }

    /// Emits the conversion from `from` to `to` for the value in `reg`.
    /// Word-sized integer conversions are register operations; narrowing
    /// masks or sign-extends explicitly, and the 8-byte and float
    /// conversions go through the runtime helpers.
    fn convert(&mut self, from: &TypeRef, to: &TypeRef, reg: Reg, token: &TokenRef) -> CResult<()> {
        if to.is_void() {
            return Ok(());
        }
        // Record and array values are addresses; only identity casts and
        // decay reach here, and both are free.
        if from.is_record() || to.is_record() || from.is_array() || from.is_function() {
            return Ok(());
        }

        let from_class = class_of(from);
        let to_class = class_of(to);

        if to.matches_base(Base::Bool) {
            return self.convert_to_bool(from_class, reg, token);
        }

        match (from_class, to_class) {
            (OperandClass::Int, OperandClass::Int) => {
                self.convert_int_to_int(from, to, reg, token);
                Ok(())
            }
            (OperandClass::Int, OperandClass::LongLong) => {
                self.normalize_int(from, reg, token);
                self.extend_to_llong(from.is_signed(), reg, token);
                Ok(())
            }
            (OperandClass::LongLong, OperandClass::Int) => {
                self.add(
                    Opcode::Ldw,
                    token,
                    vec![reg.into(), reg.into(), Operand::Imm(0)],
                );
                self.narrow_int(to, reg, token);
                Ok(())
            }
            (OperandClass::LongLong, OperandClass::LongLong) => Ok(()),

            (OperandClass::Int, OperandClass::Float) => {
                self.normalize_int(from, reg, token);
                let name = if from.is_signed() {
                    "__int_to_float"
                } else {
                    "__uint_to_float"
                };
                self.call_helper_value1(name, reg, reg, token);
                Ok(())
            }
            (OperandClass::Float, OperandClass::Int) => {
                let name = if to.is_signed() {
                    "__float_to_int"
                } else {
                    "__float_to_uint"
                };
                self.call_helper_value1(name, reg, reg, token);
                self.narrow_int(to, reg, token);
                Ok(())
            }
            (OperandClass::Int, OperandClass::Double) => {
                self.normalize_int(from, reg, token);
                let name = if from.is_signed() {
                    "__int_to_double"
                } else {
                    "__uint_to_double"
                };
                self.call_helper_out1(name, reg, reg, token);
                Ok(())
            }
            (OperandClass::Double, OperandClass::Int) => {
                let name = if to.is_signed() {
                    "__double_to_int"
                } else {
                    "__double_to_uint"
                };
                self.call_helper_value1(name, reg, reg, token);
                self.narrow_int(to, reg, token);
                Ok(())
            }
            (OperandClass::Float, OperandClass::Double) => {
                self.call_helper_out1("__float_to_double", reg, reg, token);
                Ok(())
            }
            (OperandClass::Double, OperandClass::Float) => {
                self.call_helper_value1("__double_to_float", reg, reg, token);
                Ok(())
            }
            (OperandClass::Float, OperandClass::Float) => Ok(()),
            (OperandClass::Double, OperandClass::Double) => Ok(()),

            (OperandClass::LongLong, OperandClass::Double) => {
                let name = if from.is_signed() {
                    "__llong_to_double"
                } else {
                    "__ullong_to_double"
                };
                self.call_helper_out1(name, reg, reg, token);
                Ok(())
            }
            (OperandClass::Double, OperandClass::LongLong) => {
                let name = if to.is_signed() {
                    "__double_to_llong"
                } else {
                    "__double_to_ullong"
                };
                self.call_helper_out1(name, reg, reg, token);
                Ok(())
            }
            (OperandClass::LongLong, OperandClass::Float) => {
                let name = if from.is_signed() {
                    "__llong_to_double"
                } else {
                    "__ullong_to_double"
                };
                self.call_helper_out1(name, reg, reg, token);
                self.call_helper_value1("__double_to_float", reg, reg, token);
                Ok(())
            }
            (OperandClass::Float, OperandClass::LongLong) => {
                self.call_helper_out1("__float_to_double", reg, reg, token);
                let name = if to.is_signed() {
                    "__double_to_llong"
                } else {
                    "__double_to_ullong"
                };
                self.call_helper_out1(name, reg, reg, token);
                Ok(())
            }
        }
    }

    /// Cleans up a sub-word source so the full register is meaningful:
    /// loads do not sign-extend, so signed chars and shorts are extended
    /// here, on use.
    fn normalize_int(&mut self, from: &TypeRef, reg: Reg, token: &TokenRef) {
        if !from.is_signed() {
            return;
        }
        match from.size() {
            Some(1) => self.add(Opcode::Sxb, token, vec![reg.into(), reg.into()]),
            Some(2) => self.add(Opcode::Sxs, token, vec![reg.into(), reg.into()]),
            _ => {}
        }
    }

    /// Truncates a register value to a narrow target type.
    fn narrow_int(&mut self, to: &TypeRef, reg: Reg, token: &TokenRef) {
        match (to.size(), to.is_signed()) {
            (Some(1), true) => self.add(Opcode::Sxb, token, vec![reg.into(), reg.into()]),
            (Some(1), false) => {
                self.add(
                    Opcode::Shl,
                    token,
                    vec![reg.into(), reg.into(), Operand::Imm(24)],
                );
                self.add(
                    Opcode::Shru,
                    token,
                    vec![reg.into(), reg.into(), Operand::Imm(24)],
                );
            }
            (Some(2), true) => self.add(Opcode::Sxs, token, vec![reg.into(), reg.into()]),
            (Some(2), false) => {
                self.add(
                    Opcode::Shl,
                    token,
                    vec![reg.into(), reg.into(), Operand::Imm(16)],
                );
                self.add(
                    Opcode::Shru,
                    token,
                    vec![reg.into(), reg.into(), Operand::Imm(16)],
                );
            }
            _ => {}
        }
    }

    fn convert_int_to_int(&mut self, from: &TypeRef, to: &TypeRef, reg: Reg, token: &TokenRef) {
        let to_size = to.size().unwrap_or(4);
        if to_size < 4 {
            self.narrow_int(to, reg, token);
            return;
        }
        // Widening to a word: extend signed sub-word sources.
        self.normalize_int(from, reg, token);
    }

    /// Sign- or zero-extends the word in `reg` into an 8-byte temporary
    /// and leaves its address in `reg`.
    fn extend_to_llong(&mut self, signed: bool, reg: Reg, token: &TokenRef) {
        let slot = self.alloc_slot(8);
        self.lea_frame(Reg::RA, slot, token);
        self.add(
            Opcode::Stw,
            token,
            vec![reg.into(), Reg::RA.into(), Operand::Imm(0)],
        );
        if signed {
            self.add(
                Opcode::Shrs,
                token,
                vec![Reg::R9.into(), reg.into(), Operand::Imm(31)],
            );
        } else {
            self.add(Opcode::Zero, token, vec![Reg::R9.into()]);
        }
        self.add(
            Opcode::Stw,
            token,
            vec![Reg::R9.into(), Reg::RA.into(), Operand::Imm(4)],
        );
        self.add(Opcode::Mov, token, vec![reg.into(), Reg::RA.into()]);
    }

    /// A cast to bool yields exactly 0 or 1; floating zeroes of either
    /// sign compare equal to zero through the helpers.
    fn convert_to_bool(&mut self, from: OperandClass, reg: Reg, token: &TokenRef) -> CResult<()> {
        match from {
            OperandClass::Int => {
                self.add(Opcode::Bool, token, vec![reg.into(), reg.into()]);
            }
            OperandClass::LongLong => {
                self.add(
                    Opcode::Ldw,
                    token,
                    vec![Reg::R9.into(), reg.into(), Operand::Imm(0)],
                );
                self.add(
                    Opcode::Ldw,
                    token,
                    vec![Reg::RA.into(), reg.into(), Operand::Imm(4)],
                );
                self.add(
                    Opcode::Or,
                    token,
                    vec![Reg::R9.into(), Reg::R9.into(), Reg::RA.into()],
                );
                self.add(Opcode::Bool, token, vec![reg.into(), Reg::R9.into()]);
            }
            OperandClass::Float => {
                self.push_live(reg, token);
                if reg != Reg::R0 {
                    self.add(Opcode::Mov, token, vec![Reg::R0.into(), reg.into()]);
                }
                self.add(Opcode::Zero, token, vec![Reg::R1.into()]);
                self.add(
                    Opcode::Call,
                    token,
                    vec![Operand::Sym { sigil: '^', name: "__float_cmp".to_string() }],
                );
                self.add(Opcode::Mov, token, vec![Reg::R9.into(), Reg::R0.into()]);
                self.pop_live(reg, token);
                self.add(Opcode::Bool, token, vec![reg.into(), Reg::R9.into()]);
            }
            OperandClass::Double => {
                // Compare against a zero temporary.
                let zero = self.alloc_slot(8);
                self.lea_frame(Reg::RA, zero, token);
                self.add(Opcode::Zero, token, vec![Reg::R9.into()]);
                self.add(
                    Opcode::Stw,
                    token,
                    vec![Reg::R9.into(), Reg::RA.into(), Operand::Imm(0)],
                );
                self.add(
                    Opcode::Stw,
                    token,
                    vec![Reg::R9.into(), Reg::RA.into(), Operand::Imm(4)],
                );
                self.call_helper_value2("__double_cmp", reg, Reg::RA, reg, token);
                self.add(Opcode::Bool, token, vec![reg.into(), reg.into()]);
            }
        }
        Ok(())
    }

    // === Increment and decrement ===

    pub(crate) fn gen_incdec(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let child = node.first();
        let ty = node.ty.clone();
        let is_increment = matches!(node.kind, NodeKind::PreInc | NodeKind::PostInc);
        let is_prefix = matches!(node.kind, NodeKind::PreInc | NodeKind::PreDec);

        if by_address(&ty) {
            return self.gen_incdec_wide(node, reg);
        }

        // The step: 1, or the pointee size for pointers.
        let step: i32 = if ty.is_pointer() {
            let pointee = ty.pointed_to().cloned().unwrap_or_else(|| unreachable!());
            sized(&pointee, &token)? as i32
        } else {
            1
        };
        let size = sized(&ty, &token)?;

        // Location and the old value.
        let (location, old) = if reg < LAST_EXPR_REG {
            self.gen_location(child, reg.next())?;
            let load = Self::load_op(size);
            self.add(
                load,
                &token,
                vec![reg.into(), reg.next().into(), Operand::Imm(0)],
            );
            (reg.next(), reg)
        } else {
            self.gen_location(child, LAST_EXPR_REG)?;
            let load = Self::load_op(size);
            self.add(
                Opcode::Mov,
                &token,
                vec![Reg::RA.into(), LAST_EXPR_REG.into()],
            );
            self.add(
                load,
                &token,
                vec![reg.into(), Reg::RA.into(), Operand::Imm(0)],
            );
            (Reg::RA, reg)
        };

        let op = if is_increment { Opcode::Add } else { Opcode::Sub };
        let step_operand = self.imm_operand(step, &token, &[location, old, Reg::R9]);
        self.add(
            op,
            &token,
            vec![Reg::R9.into(), old.into(), step_operand],
        );
        let store = Self::store_op(size);
        self.add(
            store,
            &token,
            vec![Reg::R9.into(), location.into(), Operand::Imm(0)],
        );

        if is_prefix {
            self.add(Opcode::Mov, &token, vec![reg.into(), Reg::R9.into()]);
        }
        // Postfix leaves the old value, already in `reg`.
        Ok(())
    }

    /// ++/-- on long long and double values, through the helpers with a
    /// constant-one operand.
    fn gen_incdec_wide(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = node.token.clone();
        let child = node.first();
        let is_increment = matches!(node.kind, NodeKind::PreInc | NodeKind::PostInc);
        let is_prefix = matches!(node.kind, NodeKind::PreInc | NodeKind::PreDec);
        let is_double =
            node.ty.matches_base(Base::Double) || node.ty.matches_base(Base::LongDouble);

        let name = match (is_double, is_increment) {
            (true, true) => "__double_add",
            (true, false) => "__double_sub",
            (false, true) => "__llong_add",
            (false, false) => "__llong_sub",
        };

        // Location; also the left operand address.
        self.gen_location(child, reg)?;
        self.add(Opcode::Push, &token, vec![reg.into()]);

        // A constant one in storage. Built after the location so nothing
        // can clobber the scratch holding its address.
        let one_slot = self.alloc_slot(8);
        self.lea_frame(Reg::RA, one_slot, &token);
        let one_bits: u64 = if is_double { 1.0f64.to_bits() } else { 1 };
        self.add(
            Opcode::Imw,
            &token,
            vec![Reg::R9.into(), Operand::Imm(one_bits as u32 as i32)],
        );
        self.add(
            Opcode::Stw,
            &token,
            vec![Reg::R9.into(), Reg::RA.into(), Operand::Imm(0)],
        );
        self.add(
            Opcode::Imw,
            &token,
            vec![Reg::R9.into(), Operand::Imm((one_bits >> 32) as u32 as i32)],
        );
        self.add(
            Opcode::Stw,
            &token,
            vec![Reg::R9.into(), Reg::RA.into(), Operand::Imm(4)],
        );

        if is_prefix {
            self.call_helper_out2(name, reg, Reg::RA, reg, &token);
            // Copy the result back; the expression value is the new value.
            self.add(Opcode::Pop, &token, vec![Reg::R9.into()]);
            for offset in [0, 4] {
                self.add(
                    Opcode::Ldw,
                    &token,
                    vec![Reg::RA.into(), reg.into(), Operand::Imm(offset)],
                );
                self.add(
                    Opcode::Stw,
                    &token,
                    vec![Reg::RA.into(), Reg::R9.into(), Operand::Imm(offset)],
                );
            }
        } else {
            // Save the old value first; it is the expression's result.
            let old_slot = self.alloc_slot(8);
            let old = if reg < LAST_EXPR_REG { reg.next() } else { Reg::RB };
            self.lea_frame(old, old_slot, &token);
            for offset in [0, 4] {
                self.add(
                    Opcode::Ldw,
                    &token,
                    vec![Reg::R9.into(), reg.into(), Operand::Imm(offset)],
                );
                self.add(
                    Opcode::Stw,
                    &token,
                    vec![Reg::R9.into(), old.into(), Operand::Imm(offset)],
                );
            }
            self.call_helper_out2(name, reg, Reg::RA, reg, &token);
            // reg now holds the new value's temporary; copy it back.
            self.add(Opcode::Pop, &token, vec![Reg::R9.into()]);
            for offset in [0, 4] {
                self.add(
                    Opcode::Ldw,
                    &token,
                    vec![Reg::RA.into(), reg.into(), Operand::Imm(offset)],
                );
                self.add(
                    Opcode::Stw,
                    &token,
                    vec![Reg::RA.into(), Reg::R9.into(), Operand::Imm(offset)],
                );
            }
            // The result is the old value.
            self.lea_frame(reg, old_slot, &token);
        }
        Ok(())
    }
}
