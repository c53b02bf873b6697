//! The code generator.
//!
//! Walks the typed tree of one function and lowers it into blocks of
//! virtual machine instructions. Expressions evaluate into a
//! caller-chosen register; registers r0..r8 hold expression values, r9,
//! ra and rb are scratch. When an expression would need a register past
//! r8, intermediate values spill to the stack.
//!
//! Values wider than a register (long long, double, structs, unions and
//! arrays) are represented by the address of their storage; the helpers
//! in `codegen_ops` call the runtime's `__llong_*`/`__float_*`/
//! `__double_*` routines for arithmetic on them.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::block::{Block, BlockLabel, FunctionCode, Opcode, Operand, Reg};
use crate::backend::emit::{Emitter, GlobalData, STRING_LABEL_PREFIX};
use crate::common::error::{Category, CResult, Diagnostic};
use crate::common::intern::Name;
use crate::frontend::ast::{Node, NodeKind};
use crate::frontend::lexer::TokenRef;
use crate::frontend::parser::const_eval::{self, Value};
use crate::frontend::symbol::{Builtin, Linkage, SymbolKind, SymbolRef};
use crate::frontend::types::{Type, TypeRef};

/// The last register available to expression evaluation.
pub(crate) const LAST_EXPR_REG: Reg = Reg::R8;

pub struct Generator<'a> {
    pub(crate) emitter: &'a mut Emitter,
    blocks: Vec<Block>,
    frame_size: u32,
    break_labels: Vec<u32>,
    continue_labels: Vec<u32>,
    /// Goto labels seen in this function: true once defined.
    user_labels: FxHashMap<Name, bool>,
    /// Jump labels assigned to case/default nodes by the switch pre-walk.
    case_labels: FxHashMap<*const Node, u32>,
    return_ty: TypeRef,
    wide_return: bool,
    /// Frame slot holding the spilled hidden result pointer.
    hidden_offset: Option<i32>,
    /// rfp offset of the first variadic argument, for va_start.
    variadic_start: Option<i32>,
}

/// Values of these types are addressed indirectly: the register holds a
/// pointer to storage rather than the value itself.
pub(crate) fn by_address(ty: &TypeRef) -> bool {
    ty.is_record() || ty.is_array() || ty.size() == Some(8)
}

fn err_at(token: &TokenRef, category: Category, message: impl Into<String>) -> Box<Diagnostic> {
    Box::new(Diagnostic::new(category, message).with_location(token.location()))
}

pub(crate) fn sized(ty: &TypeRef, token: &TokenRef) -> CResult<u32> {
    ty.size()
        .ok_or_else(|| err_at(token, Category::Semantic, "value has incomplete type"))
}

/// Generates the code for one function definition.
pub fn generate_function(
    root: &Node,
    symbol: &SymbolRef,
    emitter: &mut Emitter,
) -> CResult<FunctionCode> {
    let (asm_name, public, ty) = {
        let sym = symbol.borrow();
        (
            sym.asm_name.clone(),
            sym.linkage == Linkage::External,
            sym.ty.clone(),
        )
    };
    let sig = ty
        .function()
        .ok_or_else(|| err_at(&root.token, Category::Internal, "not a function type"))?
        .clone();

    log::debug!("generating function `{}`", asm_name);

    let wide_return = !sig.ret.is_void() && by_address(&sig.ret);
    let mut generator = Generator {
        emitter,
        blocks: vec![Block::new(None)],
        frame_size: 0,
        break_labels: Vec::new(),
        continue_labels: Vec::new(),
        user_labels: FxHashMap::default(),
        case_labels: FxHashMap::default(),
        return_ty: sig.ret.clone(),
        wide_return,
        hidden_offset: None,
        variadic_start: None,
    };

    generator.emit_prologue_spills(root, sig.variadic)?;

    // The last child is the body; the ones before it are parameters.
    let body = root
        .children
        .last()
        .ok_or_else(|| err_at(&root.token, Category::Internal, "function node has no body"))?;
    generator.gen_statement(body)?;

    // Fall-through return: a zero result so main() without an explicit
    // return exits with status 0.
    let token = root.token.clone();
    generator.add(Opcode::Zero, &token, vec![Reg::R0.into()]);
    generator.add(Opcode::Leave, &token, vec![]);
    generator.add(Opcode::Ret, &token, vec![]);

    for (name, defined) in &generator.user_labels {
        if !defined {
            return Err(err_at(
                &root.token,
                Category::Semantic,
                format!("label `{}` used but not defined", name),
            ));
        }
    }

    Ok(FunctionCode {
        asm_name,
        public,
        frame_size: (generator.frame_size + 3) & !3,
        blocks: generator.blocks,
        token: root.token.clone(),
    })
}

impl<'a> Generator<'a> {
    // === Frame and register plumbing ===

    fn block(&mut self) -> &mut Block {
        self.blocks.last_mut().unwrap_or_else(|| unreachable!())
    }

    pub(crate) fn add(&mut self, op: Opcode, token: &TokenRef, operands: Vec<Operand>) {
        let token = Some(token.clone());
        self.block().add(op, token, operands);
    }

    pub(crate) fn new_block(&mut self, label: Option<BlockLabel>) {
        self.blocks.push(Block::new(label));
    }

    pub(crate) fn alloc_label(&mut self) -> u32 {
        self.emitter.alloc_jump_label()
    }

    /// Reserves `size` bytes in the frame and returns the rfp-relative
    /// offset.
    pub(crate) fn alloc_slot(&mut self, size: u32) -> i32 {
        let size = (size + 3) & !3;
        self.frame_size += size;
        -(self.frame_size as i32)
    }

    /// A scratch register not colliding with the given operands.
    pub(crate) fn scratch_for(&self, used: &[Reg]) -> Reg {
        for candidate in [Reg::R9, Reg::RA, Reg::RB] {
            if !used.contains(&candidate) {
                return candidate;
            }
        }
        unreachable!("no scratch register available")
    }

    /// An operand for `value`: a mix-type immediate when it fits, else an
    /// `imw` into a scratch register.
    pub(crate) fn imm_operand(&mut self, value: i32, token: &TokenRef, avoid: &[Reg]) -> Operand {
        if (-112..=127).contains(&value) {
            return Operand::Imm(value);
        }
        let scratch = self.scratch_for(avoid);
        self.add(Opcode::Imw, token, vec![scratch.into(), Operand::Imm(value)]);
        scratch.into()
    }

    /// Computes `rfp + offset` into `reg`.
    pub(crate) fn lea_frame(&mut self, reg: Reg, offset: i32, token: &TokenRef) {
        let operand = self.imm_operand(offset, token, &[reg]);
        self.add(Opcode::Add, token, vec![reg.into(), Reg::RFP.into(), operand]);
    }

    /// Adds a constant to a register in place.
    pub(crate) fn add_offset(&mut self, reg: Reg, offset: i32, token: &TokenRef) {
        if offset == 0 {
            return;
        }
        let operand = self.imm_operand(offset, token, &[reg]);
        self.add(Opcode::Add, token, vec![reg.into(), reg.into(), operand]);
    }

    pub(crate) fn load_op(size: u32) -> Opcode {
        match size {
            1 => Opcode::Ldb,
            2 => Opcode::Lds,
            _ => Opcode::Ldw,
        }
    }

    pub(crate) fn store_op(size: u32) -> Opcode {
        match size {
            1 => Opcode::Stb,
            2 => Opcode::Sts,
            _ => Opcode::Stw,
        }
    }

    /// Stores `reg` to the frame at `offset`.
    fn store_frame(&mut self, reg: Reg, offset: i32, token: &TokenRef) {
        if (-112..=127).contains(&offset) {
            self.add(
                Opcode::Stw,
                token,
                vec![reg.into(), Reg::RFP.into(), Operand::Imm(offset)],
            );
        } else {
            let scratch = self.scratch_for(&[reg]);
            self.add(Opcode::Imw, token, vec![scratch.into(), Operand::Imm(offset)]);
            self.add(
                Opcode::Add,
                token,
                vec![scratch.into(), Reg::RFP.into(), scratch.into()],
            );
            self.add(
                Opcode::Stw,
                token,
                vec![reg.into(), scratch.into(), Operand::Imm(0)],
            );
        }
    }

    /// Saves the live registers below `reg` around a call.
    pub(crate) fn push_live(&mut self, reg: Reg, token: &TokenRef) {
        for i in 0..reg.number() {
            self.add(Opcode::Push, token, vec![Reg::numbered(i).into()]);
        }
    }

    pub(crate) fn pop_live(&mut self, reg: Reg, token: &TokenRef) {
        for i in (0..reg.number()).rev() {
            self.add(Opcode::Pop, token, vec![Reg::numbered(i).into()]);
        }
    }

    /// Evaluates two sub-expressions into a register pair. At the end of
    /// the register file the left value spills to the stack while the
    /// right one is computed.
    pub(crate) fn gen_pair(
        &mut self,
        reg: Reg,
        left: &Node,
        right: &Node,
        left_location: bool,
        right_location: bool,
    ) -> CResult<(Reg, Reg)> {
        let gen_one = |generator: &mut Self, node: &Node, target: Reg, location: bool| {
            if location {
                generator.gen_location(node, target)
            } else {
                generator.gen_value(node, target)
            }
        };

        if reg < LAST_EXPR_REG {
            gen_one(self, left, reg, left_location)?;
            gen_one(self, right, reg.next(), right_location)?;
            Ok((reg, reg.next()))
        } else {
            let token = &left.token;
            gen_one(self, left, LAST_EXPR_REG, left_location)?;
            self.add(Opcode::Push, token, vec![LAST_EXPR_REG.into()]);
            gen_one(self, right, LAST_EXPR_REG, right_location)?;
            self.add(
                Opcode::Mov,
                token,
                vec![Reg::RA.into(), LAST_EXPR_REG.into()],
            );
            self.add(Opcode::Pop, token, vec![LAST_EXPR_REG.into()]);
            Ok((LAST_EXPR_REG, Reg::RA))
        }
    }

    /// Copies `size` bytes from `[src]` to `[dst]`. Straight-line word
    /// and byte moves for small sizes, a loop for larger ones. The
    /// address registers are preserved; scratch registers are clobbered.
    pub(crate) fn copy_bytes(&mut self, dst: Reg, src: Reg, size: u32, token: &TokenRef) {
        let words = size / 4;
        let mut scratches: Vec<Reg> = [Reg::R9, Reg::RA, Reg::RB]
            .into_iter()
            .filter(|r| *r != dst && *r != src)
            .collect();

        if words <= 8 || scratches.len() < 3 {
            // Straight-line copy.
            let data = scratches[0];
            let mut offset: i32 = 0;
            for _ in 0..words {
                let off = self.frame_safe_offset(src, offset, data, token);
                self.add(Opcode::Ldw, token, vec![data.into(), src.into(), off.clone()]);
                let off = self.frame_safe_offset(dst, offset, data, token);
                self.add(Opcode::Stw, token, vec![data.into(), dst.into(), off]);
                offset += 4;
            }
            for _ in 0..(size % 4) {
                let off = self.frame_safe_offset(src, offset, data, token);
                self.add(Opcode::Ldb, token, vec![data.into(), src.into(), off.clone()]);
                let off = self.frame_safe_offset(dst, offset, data, token);
                self.add(Opcode::Stb, token, vec![data.into(), dst.into(), off]);
                offset += 1;
            }
            return;
        }

        // Loop: offset walks, counter counts down.
        let data = scratches.pop().unwrap_or_else(|| unreachable!());
        let counter = scratches.pop().unwrap_or_else(|| unreachable!());
        let offset = scratches.pop().unwrap_or_else(|| unreachable!());
        let label = self.alloc_label();

        self.add(Opcode::Zero, token, vec![offset.into()]);
        self.add(Opcode::Imw, token, vec![counter.into(), Operand::Imm(words as i32)]);
        self.new_block(Some(BlockLabel::Jump(label)));
        self.add(Opcode::Ldw, token, vec![data.into(), src.into(), offset.into()]);
        self.add(Opcode::Stw, token, vec![data.into(), dst.into(), offset.into()]);
        self.add(Opcode::Add, token, vec![offset.into(), offset.into(), Operand::Imm(4)]);
        self.add(Opcode::Sub, token, vec![counter.into(), counter.into(), Operand::Imm(1)]);
        self.add(Opcode::Jnz, token, vec![counter.into(), Operand::JumpLabel(label)]);
        self.new_block(None);

        // The remainder bytes continue from the final offset register.
        for _ in 0..(size % 4) {
            self.add(Opcode::Ldb, token, vec![data.into(), src.into(), offset.into()]);
            self.add(Opcode::Stb, token, vec![data.into(), dst.into(), offset.into()]);
            self.add(Opcode::Add, token, vec![offset.into(), offset.into(), Operand::Imm(1)]);
        }
    }

    /// An offset operand, using an extra register when it does not fit in
    /// a mix-type byte. (Large offsets only appear in straight-line
    /// copies of large structs.)
    fn frame_safe_offset(&mut self, _base: Reg, offset: i32, avoid: Reg, token: &TokenRef) -> Operand {
        if (-112..=127).contains(&offset) {
            return Operand::Imm(offset);
        }
        let scratch = self.scratch_for(&[avoid, _base]);
        self.add(Opcode::Imw, token, vec![scratch.into(), Operand::Imm(offset)]);
        scratch.into()
    }

    /// Zero-fills `size` bytes at `[dst]`.
    pub(crate) fn zero_bytes(&mut self, dst: Reg, size: u32, token: &TokenRef) {
        let words = size / 4;
        let data = self.scratch_for(&[dst]);
        self.add(Opcode::Zero, token, vec![data.into()]);

        if words <= 8 {
            let mut offset: i32 = 0;
            for _ in 0..words {
                let off = self.frame_safe_offset(dst, offset, data, token);
                self.add(Opcode::Stw, token, vec![data.into(), dst.into(), off]);
                offset += 4;
            }
            for _ in 0..(size % 4) {
                let off = self.frame_safe_offset(dst, offset, data, token);
                self.add(Opcode::Stb, token, vec![data.into(), dst.into(), off]);
                offset += 1;
            }
            return;
        }

        let counter = self.scratch_for(&[dst, data]);
        let offset_reg = self.scratch_for(&[dst, data, counter]);
        let label = self.alloc_label();
        self.add(Opcode::Zero, token, vec![offset_reg.into()]);
        self.add(Opcode::Imw, token, vec![counter.into(), Operand::Imm(words as i32)]);
        self.new_block(Some(BlockLabel::Jump(label)));
        self.add(Opcode::Stw, token, vec![data.into(), dst.into(), offset_reg.into()]);
        self.add(Opcode::Add, token, vec![offset_reg.into(), offset_reg.into(), Operand::Imm(4)]);
        self.add(Opcode::Sub, token, vec![counter.into(), counter.into(), Operand::Imm(1)]);
        self.add(Opcode::Jnz, token, vec![counter.into(), Operand::JumpLabel(label)]);
        self.new_block(None);
        for _ in 0..(size % 4) {
            self.add(Opcode::Stb, token, vec![data.into(), dst.into(), offset_reg.into()]);
            self.add(Opcode::Add, token, vec![offset_reg.into(), offset_reg.into(), Operand::Imm(1)]);
        }
    }

    // === Prologue ===

    /// The register an incoming argument arrives in. Functions with a
    /// wide result receive the hidden pointer in r1, so the explicit
    /// arguments use r0, r2 and r3.
    fn arg_register(&self, index: usize) -> Option<Reg> {
        if self.wide_return {
            [Reg::R0, Reg::R2, Reg::R3].get(index).copied()
        } else {
            [Reg::R0, Reg::R1, Reg::R2, Reg::R3].get(index).copied()
        }
    }

    fn register_arg_count(&self) -> usize {
        if self.wide_return {
            3
        } else {
            4
        }
    }

    fn emit_prologue_spills(&mut self, root: &Node, variadic: bool) -> CResult<()> {
        let token = root.token.clone();

        if self.wide_return {
            let slot = self.alloc_slot(4);
            self.hidden_offset = Some(slot);
            self.store_frame(Reg::R1, slot, &token);
        }

        let param_count = root.children.len().saturating_sub(1);
        let nreg = self.register_arg_count();
        for (index, param) in root.children[..param_count].iter().enumerate() {
            debug_assert_eq!(param.kind, NodeKind::Parameter);
            if index < nreg {
                let reg = self
                    .arg_register(index)
                    .unwrap_or_else(|| unreachable!());
                if let Some(symbol) = &param.symbol {
                    let slot = self.alloc_slot(4);
                    self.store_frame(reg, slot, &token);
                    symbol.borrow_mut().frame_offset = Some(slot);
                }
            } else if let Some(symbol) = &param.symbol {
                // Stack arguments stay where the caller put them.
                let offset = 8 + 4 * (index - nreg) as i32;
                symbol.borrow_mut().frame_offset = Some(offset);
            }
        }

        if variadic {
            let named_stack = param_count.saturating_sub(nreg) as i32;
            self.variadic_start = Some(8 + 4 * named_stack);
        }
        Ok(())
    }

    // === Statements ===

    fn gen_statement_or_expr(&mut self, node: &Node) -> CResult<()> {
        match node.kind {
            NodeKind::While
            | NodeKind::DoWhile
            | NodeKind::For
            | NodeKind::Switch
            | NodeKind::Case
            | NodeKind::Default
            | NodeKind::Break
            | NodeKind::Continue
            | NodeKind::Goto
            | NodeKind::Return
            | NodeKind::Label
            | NodeKind::Variable => self.gen_statement(node),
            NodeKind::If if node.ty.is_void() => self.gen_statement(node),
            NodeKind::Sequence if node.ty.is_void() => self.gen_statement(node),
            _ => {
                if node.ty.is_void() {
                    self.gen_statement(node)
                } else {
                    self.gen_value(node, Reg::R0)
                }
            }
        }
    }

    fn gen_statement(&mut self, node: &Node) -> CResult<()> {
        match node.kind {
            NodeKind::Sequence => {
                for child in &node.children {
                    self.gen_statement_or_expr(child)?;
                }
                Ok(())
            }
            NodeKind::Variable => self.gen_local_variable(node),
            NodeKind::If => self.gen_if_statement(node),
            NodeKind::While => self.gen_while(node),
            NodeKind::DoWhile => self.gen_do_while(node),
            NodeKind::For => self.gen_for(node),
            NodeKind::Switch => self.gen_switch(node),
            NodeKind::Case | NodeKind::Default => {
                let label = self
                    .case_labels
                    .get(&(node as *const Node))
                    .copied()
                    .ok_or_else(|| {
                        err_at(
                            &node.token,
                            Category::Semantic,
                            "`case`/`default` outside of a switch",
                        )
                    })?;
                self.new_block(Some(BlockLabel::Jump(label)));
                self.gen_statement_or_expr(node.first())
            }
            NodeKind::Break => {
                let label = *self.break_labels.last().ok_or_else(|| {
                    err_at(&node.token, Category::Semantic, "`break` outside of a loop or switch")
                })?;
                self.add(Opcode::Jmp, &node.token, vec![Operand::JumpLabel(label)]);
                Ok(())
            }
            NodeKind::Continue => {
                let label = *self.continue_labels.last().ok_or_else(|| {
                    err_at(&node.token, Category::Semantic, "`continue` outside of a loop")
                })?;
                self.add(Opcode::Jmp, &node.token, vec![Operand::JumpLabel(label)]);
                Ok(())
            }
            NodeKind::Goto => {
                let name = node.label.clone().unwrap_or_else(|| unreachable!());
                self.user_labels.entry(name.clone()).or_insert(false);
                self.add(
                    Opcode::Jmp,
                    &node.token,
                    vec![Operand::UserLabel(name.as_str().to_string())],
                );
                Ok(())
            }
            NodeKind::Label => {
                let name = node.label.clone().unwrap_or_else(|| unreachable!());
                let defined = self.user_labels.entry(name.clone()).or_insert(false);
                if *defined {
                    return Err(err_at(
                        &node.token,
                        Category::Semantic,
                        format!("label `{}` defined twice", name),
                    ));
                }
                *defined = true;
                self.new_block(Some(BlockLabel::User(name.as_str().to_string())));
                self.gen_statement_or_expr(node.first())
            }
            NodeKind::Return => self.gen_return(node),
            _ => {
                // An expression in statement position.
                self.gen_value(node, Reg::R0)
            }
        }
    }

    fn gen_return(&mut self, node: &Node) -> CResult<()> {
        let token = &node.token;
        if let Some(value) = node.children.first() {
            self.gen_value(value, Reg::R0)?;
            if self.wide_return {
                // Copy through the hidden result pointer and return its
                // address.
                let hidden = self
                    .hidden_offset
                    .ok_or_else(|| err_at(token, Category::Internal, "missing result pointer"))?;
                let size = sized(&self.return_ty, token)?;
                if (-112..=127).contains(&hidden) {
                    self.add(
                        Opcode::Ldw,
                        token,
                        vec![Reg::R1.into(), Reg::RFP.into(), Operand::Imm(hidden)],
                    );
                } else {
                    self.lea_frame(Reg::R1, hidden, token);
                    self.add(
                        Opcode::Ldw,
                        token,
                        vec![Reg::R1.into(), Reg::R1.into(), Operand::Imm(0)],
                    );
                }
                self.copy_bytes(Reg::R1, Reg::R0, size, token);
                self.add(Opcode::Mov, token, vec![Reg::R0.into(), Reg::R1.into()]);
            }
        }
        self.add(Opcode::Leave, token, vec![]);
        self.add(Opcode::Ret, token, vec![]);
        Ok(())
    }

    fn gen_if_statement(&mut self, node: &Node) -> CResult<()> {
        let token = &node.token;
        let end = self.alloc_label();
        let else_label = if node.children.len() > 2 {
            self.alloc_label()
        } else {
            end
        };

        self.gen_value(&node.children[0], Reg::R0)?;
        self.add(
            Opcode::Jz,
            token,
            vec![Reg::R0.into(), Operand::JumpLabel(else_label)],
        );
        self.gen_statement_or_expr(&node.children[1])?;
        if node.children.len() > 2 {
            self.add(Opcode::Jmp, token, vec![Operand::JumpLabel(end)]);
            self.new_block(Some(BlockLabel::Jump(else_label)));
            self.gen_statement_or_expr(&node.children[2])?;
        }
        self.new_block(Some(BlockLabel::Jump(end)));
        Ok(())
    }

    fn gen_while(&mut self, node: &Node) -> CResult<()> {
        let token = &node.token;
        let start = self.alloc_label();
        let end = self.alloc_label();

        self.new_block(Some(BlockLabel::Jump(start)));
        self.gen_value(&node.children[0], Reg::R0)?;
        self.add(Opcode::Jz, token, vec![Reg::R0.into(), Operand::JumpLabel(end)]);

        self.break_labels.push(end);
        self.continue_labels.push(start);
        self.gen_statement_or_expr(&node.children[1])?;
        self.break_labels.pop();
        self.continue_labels.pop();

        self.add(Opcode::Jmp, token, vec![Operand::JumpLabel(start)]);
        self.new_block(Some(BlockLabel::Jump(end)));
        Ok(())
    }

    fn gen_do_while(&mut self, node: &Node) -> CResult<()> {
        let token = &node.token;
        let start = self.alloc_label();
        let condition = self.alloc_label();
        let end = self.alloc_label();

        self.new_block(Some(BlockLabel::Jump(start)));
        self.break_labels.push(end);
        self.continue_labels.push(condition);
        self.gen_statement_or_expr(&node.children[0])?;
        self.break_labels.pop();
        self.continue_labels.pop();

        self.new_block(Some(BlockLabel::Jump(condition)));
        self.gen_value(&node.children[1], Reg::R0)?;
        self.add(
            Opcode::Jnz,
            token,
            vec![Reg::R0.into(), Operand::JumpLabel(start)],
        );
        self.new_block(Some(BlockLabel::Jump(end)));
        Ok(())
    }

    fn gen_for(&mut self, node: &Node) -> CResult<()> {
        let token = &node.token;
        let condition_label = self.alloc_label();
        let continue_label = self.alloc_label();
        let end = self.alloc_label();

        self.gen_statement(&node.children[0])?;
        self.new_block(Some(BlockLabel::Jump(condition_label)));

        // An empty condition loops forever.
        let condition = &node.children[1];
        let unconditional =
            condition.kind == NodeKind::Sequence && condition.children.is_empty();
        if !unconditional {
            self.gen_value(condition, Reg::R0)?;
            self.add(Opcode::Jz, token, vec![Reg::R0.into(), Operand::JumpLabel(end)]);
        }

        self.break_labels.push(end);
        self.continue_labels.push(continue_label);
        self.gen_statement_or_expr(&node.children[3])?;
        self.break_labels.pop();
        self.continue_labels.pop();

        self.new_block(Some(BlockLabel::Jump(continue_label)));
        self.gen_statement(&node.children[2])?;
        self.add(Opcode::Jmp, token, vec![Operand::JumpLabel(condition_label)]);
        self.new_block(Some(BlockLabel::Jump(end)));
        Ok(())
    }

    /// Collects the case values and default of a switch body, assigning
    /// each a jump label. Nested switches own their own cases and are
    /// not descended into.
    fn collect_cases(
        &mut self,
        node: &Node,
        cases: &mut Vec<(i64, u32)>,
        seen: &mut FxHashSet<i64>,
        default: &mut Option<u32>,
    ) -> CResult<()> {
        match node.kind {
            NodeKind::Switch => return Ok(()),
            NodeKind::Case => {
                if !seen.insert(node.value) {
                    return Err(err_at(
                        &node.token,
                        Category::Semantic,
                        "duplicate case value in switch",
                    ));
                }
                let label = self.alloc_label();
                self.case_labels.insert(node as *const Node, label);
                cases.push((node.value, label));
            }
            NodeKind::Default => {
                if default.is_some() {
                    return Err(err_at(
                        &node.token,
                        Category::Semantic,
                        "multiple `default` labels in one switch",
                    ));
                }
                let label = self.alloc_label();
                self.case_labels.insert(node as *const Node, label);
                *default = Some(label);
            }
            _ => {}
        }
        for child in &node.children {
            self.collect_cases(child, cases, seen, default)?;
        }
        Ok(())
    }

    /// A switch lowers to a chain of compare-and-branch instructions
    /// followed by a jump to the default (or past the body).
    fn gen_switch(&mut self, node: &Node) -> CResult<()> {
        let token = &node.token;
        let condition = &node.children[0];
        let body = &node.children[1];
        let end = self.alloc_label();

        self.gen_value(condition, Reg::R0)?;

        let mut cases = Vec::new();
        let mut seen = FxHashSet::default();
        let mut default = None;
        self.collect_cases(body, &mut cases, &mut seen, &mut default)?;

        let signed = condition.ty.is_signed();
        let compare = if signed { Opcode::Cmps } else { Opcode::Cmpu };
        for (value, label) in &cases {
            let operand = self.imm_operand(*value as i32, token, &[Reg::R0]);
            self.add(
                compare,
                token,
                vec![Reg::RA.into(), Reg::R0.into(), operand],
            );
            self.add(
                Opcode::Jz,
                token,
                vec![Reg::RA.into(), Operand::JumpLabel(*label)],
            );
        }
        let fallback = default.unwrap_or(end);
        self.add(Opcode::Jmp, token, vec![Operand::JumpLabel(fallback)]);

        self.break_labels.push(end);
        self.gen_statement_or_expr(body)?;
        self.break_labels.pop();
        self.new_block(Some(BlockLabel::Jump(end)));
        Ok(())
    }

    // === Local variables ===

    fn gen_local_variable(&mut self, node: &Node) -> CResult<()> {
        let symbol = node.symbol.clone().unwrap_or_else(|| unreachable!());
        // Static locals were emitted with the globals at parse time.
        if symbol.borrow().linkage != Linkage::None {
            return Ok(());
        }

        let token = &node.token;
        let ty = symbol.borrow().ty.clone();
        let size = sized(&ty, token)?;
        let slot = self.alloc_slot(size);
        symbol.borrow_mut().frame_offset = Some(slot);

        let init = match node.children.first() {
            Some(init) => init,
            None => return Ok(()),
        };

        match init.kind {
            NodeKind::InitializerList => {
                self.lea_frame(Reg::R0, slot, token);
                self.zero_bytes(Reg::R0, size, token);
                self.gen_initializer_list(init, &ty, Reg::R0, 0)?;
            }
            NodeKind::String if ty.is_array() => {
                self.lea_frame(Reg::R0, slot, token);
                self.zero_bytes(Reg::R0, size, token);
                let label = init.string_label.unwrap_or_else(|| unreachable!());
                self.add(
                    Opcode::Imw,
                    token,
                    vec![
                        Reg::R1.into(),
                        Operand::Sym {
                            sigil: '^',
                            name: format!("{}{:x}", STRING_LABEL_PREFIX, label),
                        },
                    ],
                );
                self.add(
                    Opcode::Add,
                    token,
                    vec![Reg::R1.into(), Reg::RPP.into(), Reg::R1.into()],
                );
                let copy = sized(&init.ty, token)?.min(size);
                self.copy_bytes(Reg::R0, Reg::R1, copy, token);
            }
            _ => {
                self.gen_value(init, Reg::R0)?;
                if by_address(&ty) {
                    self.lea_frame(Reg::R1, slot, token);
                    self.copy_bytes(Reg::R1, Reg::R0, size, token);
                } else {
                    let op = Self::store_op(size);
                    if (-112..=127).contains(&slot) {
                        self.add(
                            op,
                            token,
                            vec![Reg::R0.into(), Reg::RFP.into(), Operand::Imm(slot)],
                        );
                    } else {
                        self.lea_frame(Reg::R1, slot, token);
                        self.add(
                            op,
                            token,
                            vec![Reg::R0.into(), Reg::R1.into(), Operand::Imm(0)],
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Stores each element of a brace initializer at its offset from the
    /// base address register. The region was zero-filled beforehand.
    fn gen_initializer_list(
        &mut self,
        list: &Node,
        ty: &TypeRef,
        base: Reg,
        base_offset: i32,
    ) -> CResult<()> {
        let token = &list.token;
        match &**ty {
            Type::Array { element, .. } => {
                let stride = sized(element, token)? as i32;
                for (index, child) in list.children.iter().enumerate() {
                    let offset = base_offset + stride * index as i32;
                    self.gen_initializer_element(child, element, base, offset)?;
                }
                Ok(())
            }
            Type::Record { record, .. } => {
                let members: Vec<(TypeRef, u32)> = record
                    .borrow()
                    .members
                    .iter()
                    .map(|m| (m.ty.clone(), m.offset))
                    .collect();
                for (child, (member_ty, member_offset)) in
                    list.children.iter().zip(members.iter())
                {
                    let offset = base_offset + *member_offset as i32;
                    self.gen_initializer_element(child, member_ty, base, offset)?;
                }
                Ok(())
            }
            _ => {
                // Braced scalar.
                let child = list.first();
                self.gen_initializer_element(child, ty, base, base_offset)
            }
        }
    }

    fn gen_initializer_element(
        &mut self,
        child: &Node,
        ty: &TypeRef,
        base: Reg,
        offset: i32,
    ) -> CResult<()> {
        let token = &child.token;
        if child.kind == NodeKind::InitializerList {
            return self.gen_initializer_list(child, ty, base, offset);
        }
        if child.kind == NodeKind::String && ty.is_array() {
            let value = base.next();
            let label = child.string_label.unwrap_or_else(|| unreachable!());
            self.add(
                Opcode::Imw,
                token,
                vec![
                    value.into(),
                    Operand::Sym {
                        sigil: '^',
                        name: format!("{}{:x}", STRING_LABEL_PREFIX, label),
                    },
                ],
            );
            self.add(
                Opcode::Add,
                token,
                vec![value.into(), Reg::RPP.into(), value.into()],
            );
            let dst = value.next();
            self.add(Opcode::Mov, token, vec![dst.into(), base.into()]);
            self.add_offset(dst, offset, token);
            let copy = sized(&child.ty, token)?.min(sized(ty, token)?);
            self.copy_bytes(dst, value, copy, token);
            return Ok(());
        }

        let value = base.next();
        self.gen_value(child, value)?;
        let size = sized(ty, token)?;
        if by_address(ty) {
            let dst = value.next();
            self.add(Opcode::Mov, token, vec![dst.into(), base.into()]);
            self.add_offset(dst, offset, token);
            self.copy_bytes(dst, value, size, token);
        } else {
            let op = Self::store_op(size);
            if (-112..=127).contains(&offset) {
                self.add(op, token, vec![value.into(), base.into(), Operand::Imm(offset)]);
            } else {
                let dst = value.next();
                self.add(Opcode::Mov, token, vec![dst.into(), base.into()]);
                self.add_offset(dst, offset, token);
                self.add(op, token, vec![value.into(), dst.into(), Operand::Imm(0)]);
            }
        }
        Ok(())
    }

    // === Expressions: values and locations ===

    pub(crate) fn gen_value(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = &node.token;
        match node.kind {
            NodeKind::Number | NodeKind::Character => self.gen_literal(node, reg),
            NodeKind::String => {
                self.gen_string_address(node, reg);
                Ok(())
            }
            NodeKind::Sizeof => {
                self.add(
                    Opcode::Imw,
                    token,
                    vec![reg.into(), Operand::Imm(node.value as i32)],
                );
                Ok(())
            }
            NodeKind::Access => self.gen_access_value(node, reg),
            NodeKind::Dereference => {
                self.gen_value(node.first(), reg)?;
                self.load_value(&node.ty, reg, token)
            }
            NodeKind::AddressOf => {
                let child = node.first();
                if child.ty.is_function() {
                    return self.gen_access_value(child, reg);
                }
                self.gen_location(child, reg)
            }
            NodeKind::MemberVal | NodeKind::MemberPtr => {
                self.gen_value(node.first(), reg)?;
                self.add_offset(reg, node.member_offset as i32, token);
                self.load_value(&node.ty, reg, token)
            }
            NodeKind::ArraySubscript => {
                self.gen_subscript_address(node, reg)?;
                self.load_value(&node.ty, reg, token)
            }
            NodeKind::Cast => self.gen_cast(node, reg),
            NodeKind::Call => self.gen_call(node, reg),
            NodeKind::If => self.gen_conditional_value(node, reg),
            NodeKind::Sequence => {
                let count = node.children.len();
                for (index, child) in node.children.iter().enumerate() {
                    if index + 1 == count && !node.ty.is_void() {
                        self.gen_value(child, reg)?;
                    } else {
                        self.gen_statement_or_expr(child)?;
                    }
                }
                Ok(())
            }
            NodeKind::BuiltinCall => self.gen_builtin(node, reg),

            NodeKind::Assign => self.gen_assign(node, reg),
            NodeKind::AddAssign
            | NodeKind::SubAssign
            | NodeKind::MulAssign
            | NodeKind::DivAssign
            | NodeKind::ModAssign
            | NodeKind::AndAssign
            | NodeKind::OrAssign
            | NodeKind::XorAssign
            | NodeKind::ShlAssign
            | NodeKind::ShrAssign => self.gen_compound_assign(node, reg),

            NodeKind::PreInc | NodeKind::PreDec | NodeKind::PostInc | NodeKind::PostDec => {
                self.gen_incdec(node, reg)
            }

            NodeKind::UnaryPlus => self.gen_value(node.first(), reg),
            NodeKind::UnaryMinus => self.gen_negate(node, reg),
            NodeKind::BitNot => self.gen_bit_not(node, reg),
            NodeKind::LogicalNot => {
                self.gen_value(node.first(), reg)?;
                self.add(Opcode::Isz, token, vec![reg.into(), reg.into()]);
                Ok(())
            }
            NodeKind::LogicalAnd | NodeKind::LogicalOr => self.gen_logical(node, reg),

            NodeKind::Add
            | NodeKind::Sub
            | NodeKind::Mul
            | NodeKind::Div
            | NodeKind::Mod
            | NodeKind::Shl
            | NodeKind::Shr
            | NodeKind::BitAnd
            | NodeKind::BitOr
            | NodeKind::BitXor => self.gen_binary(node, reg),

            NodeKind::Equal
            | NodeKind::NotEqual
            | NodeKind::Less
            | NodeKind::Greater
            | NodeKind::LessEqual
            | NodeKind::GreaterEqual => self.gen_comparison(node, reg),

            _ => Err(err_at(
                token,
                Category::Internal,
                format!("cannot generate a value for {:?}", node.kind),
            )),
        }
    }

    pub(crate) fn gen_location(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = &node.token;
        match node.kind {
            NodeKind::Access => {
                let symbol = node.symbol.clone().ok_or_else(|| {
                    err_at(token, Category::Internal, "access node without a symbol")
                })?;
                let sym = symbol.borrow();
                if let Some(offset) = sym.frame_offset {
                    if sym.indirect {
                        // The slot holds the address of the caller's copy.
                        if (-112..=127).contains(&offset) {
                            self.add(
                                Opcode::Ldw,
                                token,
                                vec![reg.into(), Reg::RFP.into(), Operand::Imm(offset)],
                            );
                        } else {
                            self.lea_frame(reg, offset, token);
                            self.add(
                                Opcode::Ldw,
                                token,
                                vec![reg.into(), reg.into(), Operand::Imm(0)],
                            );
                        }
                    } else {
                        self.lea_frame(reg, offset, token);
                    }
                } else {
                    // A global or static: address is program-relative.
                    self.add(
                        Opcode::Imw,
                        token,
                        vec![
                            reg.into(),
                            Operand::Sym {
                                sigil: '^',
                                name: sym.asm_name.clone(),
                            },
                        ],
                    );
                    self.add(
                        Opcode::Add,
                        token,
                        vec![reg.into(), Reg::RPP.into(), reg.into()],
                    );
                }
                Ok(())
            }
            NodeKind::Dereference => self.gen_value(node.first(), reg),
            NodeKind::MemberVal => {
                self.gen_location(node.first(), reg)?;
                self.add_offset(reg, node.member_offset as i32, token);
                Ok(())
            }
            NodeKind::MemberPtr => {
                self.gen_value(node.first(), reg)?;
                self.add_offset(reg, node.member_offset as i32, token);
                Ok(())
            }
            NodeKind::ArraySubscript => self.gen_subscript_address(node, reg),
            NodeKind::String => {
                self.gen_string_address(node, reg);
                Ok(())
            }
            // A decayed array or a wide value already evaluates to its
            // address.
            NodeKind::Cast if by_address(&node.first().ty) => self.gen_value(node.first(), reg),
            _ => Err(err_at(
                token,
                Category::Internal,
                format!("{:?} is not a storage location", node.kind),
            )),
        }
    }

    /// Loads the value at the address in `reg`, unless the type is
    /// addressed indirectly, in which case the address is the value.
    /// Loads do not sign-extend; casts insert `sxb`/`sxs` when needed.
    fn load_value(&mut self, ty: &TypeRef, reg: Reg, token: &TokenRef) -> CResult<()> {
        if by_address(ty) || ty.is_function() {
            return Ok(());
        }
        if ty.is_void() {
            return Ok(());
        }
        let size = sized(ty, token)?;
        let op = Self::load_op(size);
        self.add(op, token, vec![reg.into(), reg.into(), Operand::Imm(0)]);
        Ok(())
    }

    fn gen_literal(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = &node.token;
        let ty = &node.ty;

        if ty.size() == Some(8) {
            // An 8-byte literal materializes in a frame temporary.
            let slot = self.alloc_slot(8);
            self.lea_frame(reg, slot, token);
            let bits = node.value as u64;
            let low = bits as u32 as i32;
            let high = (bits >> 32) as u32 as i32;
            self.add(Opcode::Imw, token, vec![Reg::R9.into(), Operand::Imm(low)]);
            self.add(
                Opcode::Stw,
                token,
                vec![Reg::R9.into(), reg.into(), Operand::Imm(0)],
            );
            self.add(Opcode::Imw, token, vec![Reg::R9.into(), Operand::Imm(high)]);
            self.add(
                Opcode::Stw,
                token,
                vec![Reg::R9.into(), reg.into(), Operand::Imm(4)],
            );
            return Ok(());
        }

        let value = node.value as i32;
        if value == 0 {
            self.add(Opcode::Zero, token, vec![reg.into()]);
        } else {
            self.add(Opcode::Imw, token, vec![reg.into(), Operand::Imm(value)]);
        }
        Ok(())
    }

    fn gen_string_address(&mut self, node: &Node, reg: Reg) {
        let token = &node.token;
        let label = node.string_label.unwrap_or_else(|| unreachable!());
        self.add(
            Opcode::Imw,
            token,
            vec![
                reg.into(),
                Operand::Sym {
                    sigil: '^',
                    name: format!("{}{:x}", STRING_LABEL_PREFIX, label),
                },
            ],
        );
        self.add(
            Opcode::Add,
            token,
            vec![reg.into(), Reg::RPP.into(), reg.into()],
        );
    }

    fn gen_access_value(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = &node.token;
        let symbol = node
            .symbol
            .clone()
            .ok_or_else(|| err_at(token, Category::Internal, "access node without a symbol"))?;
        let (kind, enum_value) = {
            let sym = symbol.borrow();
            (sym.kind, sym.enum_value)
        };
        match kind {
            SymbolKind::Constant => {
                if enum_value == 0 {
                    self.add(Opcode::Zero, token, vec![reg.into()]);
                } else {
                    self.add(
                        Opcode::Imw,
                        token,
                        vec![reg.into(), Operand::Imm(enum_value)],
                    );
                }
                Ok(())
            }
            SymbolKind::Function => {
                let name = symbol.borrow().asm_name.clone();
                self.add(
                    Opcode::Imw,
                    token,
                    vec![reg.into(), Operand::Sym { sigil: '^', name }],
                );
                self.add(
                    Opcode::Add,
                    token,
                    vec![reg.into(), Reg::RPP.into(), reg.into()],
                );
                Ok(())
            }
            SymbolKind::Variable => {
                self.gen_location(node, reg)?;
                self.load_value(&node.ty, reg, token)
            }
            SymbolKind::Builtin(_) => {
                Err(err_at(token, Category::Internal, "builtin used as a value"))
            }
        }
    }

    /// `a[i]`: identical to `*(a + i)` after decay; the index is scaled
    /// by the element size.
    fn gen_subscript_address(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = &node.token;
        let (ptr, index) = self.gen_pair(reg, &node.children[0], &node.children[1], false, false)?;
        let element_size = sized(&node.ty, token).unwrap_or(1);
        self.scale_register(index, element_size, token, &[ptr]);
        self.add(Opcode::Add, token, vec![ptr.into(), ptr.into(), index.into()]);
        if ptr != reg {
            self.add(Opcode::Mov, token, vec![reg.into(), ptr.into()]);
        }
        Ok(())
    }

    /// Multiplies a register by a type size: a shift for powers of two, a
    /// multiply otherwise.
    pub(crate) fn scale_register(&mut self, reg: Reg, size: u32, token: &TokenRef, avoid: &[Reg]) {
        if size <= 1 {
            return;
        }
        if size.is_power_of_two() {
            let shift = size.trailing_zeros() as i32;
            self.add(
                Opcode::Shl,
                token,
                vec![reg.into(), reg.into(), Operand::Imm(shift)],
            );
        } else if size < 0x80 {
            self.add(
                Opcode::Mul,
                token,
                vec![reg.into(), reg.into(), Operand::Imm(size as i32)],
            );
        } else {
            let mut used = avoid.to_vec();
            used.push(reg);
            let scratch = self.scratch_for(&used);
            self.add(
                Opcode::Imw,
                token,
                vec![scratch.into(), Operand::Imm(size as i32)],
            );
            self.add(Opcode::Mul, token, vec![reg.into(), reg.into(), scratch.into()]);
        }
    }

    /// Divides a register by a type size (pointer difference).
    pub(crate) fn unscale_register(&mut self, reg: Reg, size: u32, token: &TokenRef, avoid: &[Reg]) {
        if size <= 1 {
            return;
        }
        if size.is_power_of_two() {
            let shift = size.trailing_zeros() as i32;
            self.add(
                Opcode::Shrs,
                token,
                vec![reg.into(), reg.into(), Operand::Imm(shift)],
            );
        } else if size < 0x80 {
            self.add(
                Opcode::Divs,
                token,
                vec![reg.into(), reg.into(), Operand::Imm(size as i32)],
            );
        } else {
            let mut used = avoid.to_vec();
            used.push(reg);
            let scratch = self.scratch_for(&used);
            self.add(
                Opcode::Imw,
                token,
                vec![scratch.into(), Operand::Imm(size as i32)],
            );
            self.add(Opcode::Divs, token, vec![reg.into(), reg.into(), scratch.into()]);
        }
    }

    fn gen_conditional_value(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = &node.token;
        let else_label = self.alloc_label();
        let end = self.alloc_label();

        self.gen_value(&node.children[0], reg)?;
        self.add(Opcode::Jz, token, vec![reg.into(), Operand::JumpLabel(else_label)]);
        self.gen_value(&node.children[1], reg)?;
        self.add(Opcode::Jmp, token, vec![Operand::JumpLabel(end)]);
        self.new_block(Some(BlockLabel::Jump(else_label)));
        self.gen_value(&node.children[2], reg)?;
        self.new_block(Some(BlockLabel::Jump(end)));
        Ok(())
    }

    // === Calls ===

    fn gen_call(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = &node.token;
        let callee = &node.children[0];
        let args = &node.children[1..];

        let fn_ty = if callee.ty.is_function() {
            callee.ty.clone()
        } else {
            callee
                .ty
                .pointed_to()
                .cloned()
                .ok_or_else(|| err_at(token, Category::Internal, "call of a non-function"))?
        };
        let sig = fn_ty
            .function()
            .ok_or_else(|| err_at(token, Category::Internal, "call of a non-function"))?
            .clone();
        let ret = sig.ret.clone();
        let wide_ret = !ret.is_void() && by_address(&ret);
        let nreg = if wide_ret { 3 } else { 4 };
        let named = sig.params.len();

        // A direct call targets the function symbol's label; anything
        // else evaluates a function pointer.
        let direct = match callee.kind {
            NodeKind::Access => callee.symbol.as_ref().and_then(|s| {
                let sym = s.borrow();
                if sym.kind == SymbolKind::Function {
                    Some(sym.asm_name.clone())
                } else {
                    None
                }
            }),
            _ => None,
        };

        self.push_live(reg, token);

        // Argument slots: register args fill r0..r3 (skipping r1 for wide
        // results); named stack args and all variadic args go into a
        // block reserved below rsp.
        let reg_args = named.min(nreg);
        let stack_args = args.len() - reg_args;
        if stack_args > 0 {
            let bytes = (4 * stack_args) as i32;
            let operand = self.imm_operand(bytes, token, &[]);
            self.add(
                Opcode::Sub,
                token,
                vec![Reg::RSP.into(), Reg::RSP.into(), operand],
            );
        }

        for (index, arg) in args.iter().enumerate() {
            let is_register_arg = index < reg_args;
            let slot = if is_register_arg {
                if wide_ret {
                    [Reg::R0, Reg::R2, Reg::R3][index]
                } else {
                    Reg::numbered(index as u8)
                }
            } else {
                // Evaluate into the first register past the register
                // args, then store to the reserved block.
                Reg::numbered(reg_args as u8).max(Reg::R4)
            };

            self.gen_value(arg, slot)?;

            // Wide and record arguments pass the address of a fresh copy,
            // preserving by-value semantics.
            if by_address(&arg.ty) && !arg.ty.is_array() {
                let size = sized(&arg.ty, token)?;
                let temp = self.alloc_slot(size);
                let copy_reg = slot.next();
                self.lea_frame(copy_reg, temp, token);
                self.copy_bytes(copy_reg, slot, size, token);
                self.add(Opcode::Mov, token, vec![slot.into(), copy_reg.into()]);
            }

            if !is_register_arg {
                let offset = (4 * (index - reg_args)) as i32;
                if offset <= 127 {
                    self.add(
                        Opcode::Stw,
                        token,
                        vec![slot.into(), Reg::RSP.into(), Operand::Imm(offset)],
                    );
                } else {
                    let scratch = self.scratch_for(&[slot]);
                    self.add(Opcode::Imw, token, vec![scratch.into(), Operand::Imm(offset)]);
                    self.add(
                        Opcode::Add,
                        token,
                        vec![scratch.into(), Reg::RSP.into(), scratch.into()],
                    );
                    self.add(
                        Opcode::Stw,
                        token,
                        vec![slot.into(), scratch.into(), Operand::Imm(0)],
                    );
                }
            }
        }

        // The hidden result pointer goes in r1 last, after the arguments
        // are in place.
        if wide_ret {
            let size = sized(&ret, token)?;
            let temp = self.alloc_slot(size);
            self.lea_frame(Reg::R1, temp, token);
        }

        match direct {
            Some(name) => {
                self.add(
                    Opcode::Call,
                    token,
                    vec![Operand::Sym { sigil: '^', name }],
                );
            }
            None => {
                // The callee pointer is evaluated after the arguments,
                // into the first free register.
                let target = Reg::numbered(nreg.max(4) as u8);
                self.gen_value(callee, target)?;
                self.add(Opcode::Call, token, vec![target.into()]);
            }
        }

        // Capture the result before restoring saved registers.
        if !ret.is_void() {
            self.add(Opcode::Mov, token, vec![Reg::R9.into(), Reg::R0.into()]);
        }
        if stack_args > 0 {
            let bytes = (4 * stack_args) as i32;
            let operand = self.imm_operand(bytes, token, &[Reg::R9]);
            self.add(
                Opcode::Add,
                token,
                vec![Reg::RSP.into(), Reg::RSP.into(), operand],
            );
        }
        self.pop_live(reg, token);
        if !ret.is_void() {
            self.add(Opcode::Mov, token, vec![reg.into(), Reg::R9.into()]);
        }
        Ok(())
    }

    // === Builtins ===

    fn gen_builtin(&mut self, node: &Node, reg: Reg) -> CResult<()> {
        let token = &node.token;
        match node.builtin {
            Some(Builtin::VaArg) => {
                let ap = node.first();
                self.gen_location(ap, reg)?;
                // r9 = current argument pointer.
                self.add(
                    Opcode::Ldw,
                    token,
                    vec![Reg::R9.into(), reg.into(), Operand::Imm(0)],
                );
                // Every variadic slot is one word: the value itself for
                // register-sized scalars, the address of the caller's
                // copy for wide and record types.
                self.add(
                    Opcode::Ldw,
                    token,
                    vec![Reg::RA.into(), Reg::R9.into(), Operand::Imm(0)],
                );
                self.add(
                    Opcode::Add,
                    token,
                    vec![Reg::R9.into(), Reg::R9.into(), Operand::Imm(4)],
                );
                self.add(
                    Opcode::Stw,
                    token,
                    vec![Reg::R9.into(), reg.into(), Operand::Imm(0)],
                );
                self.add(Opcode::Mov, token, vec![reg.into(), Reg::RA.into()]);
                Ok(())
            }
            Some(Builtin::VaStart) => {
                let start = self.variadic_start.ok_or_else(|| {
                    err_at(token, Category::Internal, "va_start in a non-variadic function")
                })?;
                let ap = node.first();
                self.gen_location(ap, reg)?;
                let operand = self.imm_operand(start, token, &[reg, Reg::R9]);
                self.add(
                    Opcode::Add,
                    token,
                    vec![Reg::R9.into(), Reg::RFP.into(), operand],
                );
                self.add(
                    Opcode::Stw,
                    token,
                    vec![Reg::R9.into(), reg.into(), Operand::Imm(0)],
                );
                Ok(())
            }
            Some(Builtin::VaEnd) => Ok(()),
            Some(Builtin::VaCopy) => {
                let (dst, src) =
                    self.gen_pair(reg, &node.children[0], &node.children[1], true, true)?;
                self.add(
                    Opcode::Ldw,
                    token,
                    vec![Reg::R9.into(), src.into(), Operand::Imm(0)],
                );
                self.add(
                    Opcode::Stw,
                    token,
                    vec![Reg::R9.into(), dst.into(), Operand::Imm(0)],
                );
                Ok(())
            }
            Some(Builtin::Func) | None => Err(err_at(
                token,
                Category::Internal,
                "unexpected builtin in code generation",
            )),
        }
    }
}

// === Global data ===

/// Builds the byte image of an initialised global or static local from
/// its (constant) initializer.
pub fn global_data(ty: &TypeRef, init: Option<&Node>) -> CResult<GlobalData> {
    let size = ty.size().unwrap_or(0);
    let mut data = GlobalData {
        bytes: vec![0; size as usize],
        relocs: Vec::new(),
    };
    if let Some(init) = init {
        serialize_initializer(init, ty, 0, &mut data)?;
        data.relocs.sort_by_key(|(offset, _)| *offset);
    }
    Ok(data)
}

fn serialize_initializer(
    node: &Node,
    ty: &TypeRef,
    offset: u32,
    data: &mut GlobalData,
) -> CResult<()> {
    match node.kind {
        NodeKind::InitializerList => match &**ty {
            Type::Array { element, .. } => {
                let stride = element.size().unwrap_or(0);
                for (index, child) in node.children.iter().enumerate() {
                    serialize_initializer(child, element, offset + stride * index as u32, data)?;
                }
                Ok(())
            }
            Type::Record { record, .. } => {
                let members: Vec<(TypeRef, u32)> = record
                    .borrow()
                    .members
                    .iter()
                    .map(|m| (m.ty.clone(), m.offset))
                    .collect();
                for (child, (member_ty, member_offset)) in
                    node.children.iter().zip(members.iter())
                {
                    serialize_initializer(child, member_ty, offset + member_offset, data)?;
                }
                Ok(())
            }
            _ => serialize_initializer(node.first(), ty, offset, data),
        },

        NodeKind::String if ty.is_array() => {
            let bytes = node.bytes.as_deref().unwrap_or(&[]);
            let capacity = ty.size().unwrap_or(0).saturating_sub(offset) as usize;
            for (index, byte) in bytes.iter().take(capacity).enumerate() {
                data.bytes[offset as usize + index] = *byte;
            }
            // The region is already zeroed, so the terminator is free.
            Ok(())
        }

        _ => serialize_scalar(node, ty, offset, data),
    }
}

/// Peels implicit and explicit pointer-level casts off an address
/// constant.
fn strip_address_casts(node: &Node) -> &Node {
    let mut node = node;
    while node.kind == NodeKind::Cast
        && (node.ty.is_pointer() || node.ty.is_integer())
        && !node.children.is_empty()
        && (node.first().ty.is_indirection()
            || node.first().ty.is_function()
            || node.first().kind == NodeKind::String
            || node.first().kind == NodeKind::AddressOf)
    {
        node = node.first();
    }
    node
}

fn serialize_scalar(node: &Node, ty: &TypeRef, offset: u32, data: &mut GlobalData) -> CResult<()> {
    let size = ty.size().unwrap_or(4);
    let offset = offset as usize;

    if ty.is_pointer() {
        let stripped = strip_address_casts(node);
        match stripped.kind {
            NodeKind::String => {
                let label = stripped.string_label.unwrap_or(0);
                data.relocs
                    .push((offset as u32, format!("{}{:x}", STRING_LABEL_PREFIX, label)));
                return Ok(());
            }
            NodeKind::AddressOf | NodeKind::Access => {
                let target = if stripped.kind == NodeKind::AddressOf {
                    stripped.first()
                } else {
                    stripped
                };
                if let Some(symbol) = &target.symbol {
                    let sym = symbol.borrow();
                    if sym.frame_offset.is_none()
                        && matches!(sym.kind, SymbolKind::Variable | SymbolKind::Function)
                    {
                        data.relocs.push((offset as u32, sym.asm_name.clone()));
                        return Ok(());
                    }
                }
            }
            _ => {}
        }
        // Fall through: a null pointer or integer constant.
        let value = const_eval::eval_int(node)?;
        write_le(&mut data.bytes, offset, value as u64, 4);
        return Ok(());
    }

    match const_eval::eval_scalar(node)? {
        Value::Int(value) => {
            write_le(&mut data.bytes, offset, value as u64, size as usize);
        }
        Value::Float(value) => {
            if ty.matches_base(crate::frontend::types::Base::Float) {
                write_le(&mut data.bytes, offset, (value as f32).to_bits() as u64, 4);
            } else {
                write_le(&mut data.bytes, offset, value.to_bits(), 8);
            }
        }
    }
    Ok(())
}

fn write_le(bytes: &mut [u8], offset: usize, value: u64, size: usize) {
    for i in 0..size.min(8) {
        if offset + i < bytes.len() {
            bytes[offset + i] = (value >> (8 * i)) as u8;
        }
    }
}
