//! Instructions and blocks.
//!
//! The generator lowers each function into an ordered list of blocks held
//! in memory; the emitter serialises the prologue and the blocks once the
//! frame size is known. An instruction is an opcode, an optional source
//! token for debug info, and up to four operands.

use crate::frontend::lexer::TokenRef;

/// Machine registers. r0..r9, ra and rb are general purpose; the last
/// four are the stack, frame, program-base and instruction pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reg {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    RA,
    RB,
    RSP,
    RFP,
    RPP,
    RIP,
}

impl Reg {
    pub fn name(self) -> &'static str {
        match self {
            Reg::R0 => "r0",
            Reg::R1 => "r1",
            Reg::R2 => "r2",
            Reg::R3 => "r3",
            Reg::R4 => "r4",
            Reg::R5 => "r5",
            Reg::R6 => "r6",
            Reg::R7 => "r7",
            Reg::R8 => "r8",
            Reg::R9 => "r9",
            Reg::RA => "ra",
            Reg::RB => "rb",
            Reg::RSP => "rsp",
            Reg::RFP => "rfp",
            Reg::RPP => "rpp",
            Reg::RIP => "rip",
        }
    }

    /// The numbered register `r<n>`.
    pub fn numbered(n: u8) -> Reg {
        match n {
            0 => Reg::R0,
            1 => Reg::R1,
            2 => Reg::R2,
            3 => Reg::R3,
            4 => Reg::R4,
            5 => Reg::R5,
            6 => Reg::R6,
            7 => Reg::R7,
            8 => Reg::R8,
            9 => Reg::R9,
            _ => unreachable!("not a numbered register"),
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Reg::R0 => 0,
            Reg::R1 => 1,
            Reg::R2 => 2,
            Reg::R3 => 3,
            Reg::R4 => 4,
            Reg::R5 => 5,
            Reg::R6 => 6,
            Reg::R7 => 7,
            Reg::R8 => 8,
            Reg::R9 => 9,
            _ => unreachable!("not a numbered register"),
        }
    }

    /// The next numbered register.
    pub fn next(self) -> Reg {
        Reg::numbered(self.number() + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Divs,
    Divu,
    Mods,
    Modu,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shrs,
    Shru,
    Cmps,
    Cmpu,
    Isz,
    Mov,
    Ldw,
    Lds,
    Ldb,
    Stw,
    Sts,
    Stb,
    Push,
    Pop,
    Jmp,
    Jz,
    Jnz,
    Call,
    Ret,
    Enter,
    Leave,
    Imw,
    Sxb,
    Sxs,
    Zero,
    Bool,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Divs => "divs",
            Opcode::Divu => "divu",
            Opcode::Mods => "mods",
            Opcode::Modu => "modu",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Not => "not",
            Opcode::Shl => "shl",
            Opcode::Shrs => "shrs",
            Opcode::Shru => "shru",
            Opcode::Cmps => "cmps",
            Opcode::Cmpu => "cmpu",
            Opcode::Isz => "isz",
            Opcode::Mov => "mov",
            Opcode::Ldw => "ldw",
            Opcode::Lds => "lds",
            Opcode::Ldb => "ldb",
            Opcode::Stw => "stw",
            Opcode::Sts => "sts",
            Opcode::Stb => "stb",
            Opcode::Push => "push",
            Opcode::Pop => "pop",
            Opcode::Jmp => "jmp",
            Opcode::Jz => "jz",
            Opcode::Jnz => "jnz",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Enter => "enter",
            Opcode::Leave => "leave",
            Opcode::Imw => "imw",
            Opcode::Sxb => "sxb",
            Opcode::Sxs => "sxs",
            Opcode::Zero => "zero",
            Opcode::Bool => "bool",
        }
    }
}

/// An instruction operand.
#[derive(Debug, Clone)]
pub enum Operand {
    Reg(Reg),
    /// A small immediate or a 32-bit immediate; the emitter chooses the
    /// textual form.
    Imm(i32),
    /// A symbol reference with its sigil, e.g. `^printf`.
    Sym { sigil: char, name: String },
    /// A reference to a numbered jump label: `&__J_<hex>`.
    JumpLabel(u32),
    /// A reference to a named user label: `&__U_<name>`.
    UserLabel(String),
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Operand {
        Operand::Reg(reg)
    }
}

impl From<i32> for Operand {
    fn from(imm: i32) -> Operand {
        Operand::Imm(imm)
    }
}

#[derive(Debug)]
pub struct Instruction {
    pub op: Opcode,
    pub token: Option<TokenRef>,
    pub operands: Vec<Operand>,
}

/// The label introducing a block.
#[derive(Debug, Clone)]
pub enum BlockLabel {
    /// `:__J_<hex>`, a generated jump target.
    Jump(u32),
    /// `:__U_<name>`, a C goto label.
    User(String),
}

#[derive(Debug, Default)]
pub struct Block {
    pub label: Option<BlockLabel>,
    pub instructions: Vec<Instruction>,
}

impl Block {
    pub fn new(label: Option<BlockLabel>) -> Block {
        Block {
            label,
            instructions: Vec::new(),
        }
    }

    pub fn add(&mut self, op: Opcode, token: Option<TokenRef>, operands: Vec<Operand>) {
        debug_assert!(operands.len() <= 4);
        self.instructions.push(Instruction { op, token, operands });
    }
}

/// A fully generated function, ready for serialisation.
#[derive(Debug)]
pub struct FunctionCode {
    /// The assembly symbol this function is defined under.
    pub asm_name: String,
    /// Public (`=`) or internal (`@`) definition sigil.
    pub public: bool,
    pub frame_size: u32,
    pub blocks: Vec<Block>,
    pub token: TokenRef,
}
