//! The textual assembly emitter.
//!
//! Output is a stream of whitespace-separated terms and newlines. Label
//! sigils: `@` internal symbol definition, `=` public symbol definition,
//! `^` symbol address reference, `&` intra-function label reference, `:`
//! intra-function label definition. Small integers are emitted in decimal,
//! large ones as `0x%08x`. Bytes outside the printable range appear as
//! `'HH`; printable runs go in double quotes.
//!
//! Output accumulates in three ordered sections: global variables as they
//! are parsed, then function bodies (with their inline string literals),
//! then string literals encountered at file scope. Under `-g`, `#line`
//! directives and lone `#` line increments are interleaved for the
//! assembler's debug section.
//!
//! The emitter also owns the translation unit's label counters: string
//! literal labels, synthesised jump labels, and unique names for static
//! locals.

use std::io::{self, Write};

use crate::backend::block::{BlockLabel, FunctionCode, Instruction, Operand, Reg};
use crate::frontend::lexer::TokenRef;

pub const STRING_LABEL_PREFIX: &str = "__S_";
pub const JUMP_LABEL_PREFIX: &str = "__J_";
pub const STATIC_LABEL_PREFIX: &str = "__L_";
pub const USER_LABEL_PREFIX: &str = "__U_";

/// Initialised global data: a byte image plus word-sized relocations
/// (offset, symbol) resolved by the assembler/linker.
#[derive(Debug, Default)]
pub struct GlobalData {
    pub bytes: Vec<u8>,
    pub relocs: Vec<(u32, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Globals,
    Functions,
    Deferred,
}

#[derive(Default)]
struct SectionBuf {
    text: String,
    first_term: bool,
    cur_file: Option<String>,
    cur_line: u32,
    have_location: bool,
}

pub struct Emitter {
    globals: SectionBuf,
    functions: SectionBuf,
    deferred: SectionBuf,
    section: Section,
    debug: bool,
    next_string: u32,
    next_jump: u32,
    next_static: u32,
}

impl Emitter {
    pub fn new(debug: bool) -> Self {
        let fresh = || SectionBuf {
            first_term: true,
            ..SectionBuf::default()
        };
        Self {
            globals: fresh(),
            functions: fresh(),
            deferred: fresh(),
            section: Section::Globals,
            debug,
            next_string: 0,
            next_jump: 0,
            next_static: 0,
        }
    }

    pub fn set_section(&mut self, section: Section) {
        self.section = section;
    }

    pub fn section(&self) -> Section {
        self.section
    }

    // === Label counters ===

    pub fn alloc_string_label(&mut self) -> u32 {
        let label = self.next_string;
        self.next_string += 1;
        label
    }

    pub fn alloc_jump_label(&mut self) -> u32 {
        let label = self.next_jump;
        self.next_jump += 1;
        label
    }

    /// A unique asm name for a static local: `__L_<hex>_<name>`.
    pub fn alloc_static_name(&mut self, name: &str) -> String {
        let label = self.next_static;
        self.next_static += 1;
        format!("{}{:x}_{}", STATIC_LABEL_PREFIX, label, name)
    }

    // === Low-level writing ===

    fn buf(&mut self) -> &mut SectionBuf {
        match self.section {
            Section::Globals => &mut self.globals,
            Section::Functions => &mut self.functions,
            Section::Deferred => &mut self.deferred,
        }
    }

    pub fn newline(&mut self) {
        let buf = self.buf();
        buf.text.push('\n');
        buf.first_term = true;
    }

    /// A whitespace-separated term; indents the line when first.
    pub fn term(&mut self, term: &str) {
        let buf = self.buf();
        if buf.first_term {
            buf.text.push_str("  ");
            buf.first_term = false;
        }
        buf.text.push_str(term);
        buf.text.push(' ');
    }

    pub fn register(&mut self, reg: Reg) {
        self.term(reg.name());
    }

    /// `<sigil><name>`; definitions appear at column zero because they
    /// start their line.
    pub fn label(&mut self, sigil: char, name: &str) {
        let buf = self.buf();
        buf.first_term = false;
        buf.text.push(sigil);
        buf.text.push_str(name);
        buf.text.push(' ');
    }

    pub fn computed_label(&mut self, sigil: char, prefix: &str, label: u32) {
        self.label(sigil, &format!("{}{:x}", prefix, label));
    }

    /// Decimal for small values, `0x%08x` otherwise.
    pub fn int(&mut self, value: i32) {
        let text = if value > -100000000 && value < 1000000 {
            format!("{}", value)
        } else {
            format!("0x{:08x}", value as u32)
        };
        self.term(&text);
    }

    /// A single non-printable byte: `'HH`. No trailing space; data bytes
    /// run together in groups.
    pub fn quoted_byte(&mut self, byte: u8) {
        let buf = self.buf();
        if buf.first_term {
            buf.text.push_str("  ");
            buf.first_term = false;
        }
        buf.text.push('\'');
        buf.text.push_str(&format!("{:02X}", byte));
    }

    fn is_plain_string_byte(byte: u8) -> bool {
        byte != b'\\' && byte != b'"' && (0x20..0x7f).contains(&byte)
    }

    /// Bytes as alternating quoted printable runs and `'HH` escapes.
    pub fn string_literal(&mut self, bytes: &[u8]) {
        {
            let buf = self.buf();
            if buf.first_term {
                buf.text.push_str("  ");
                buf.first_term = false;
            }
        }
        let mut open = false;
        for &byte in bytes {
            let valid = Self::is_plain_string_byte(byte);
            if valid != open {
                self.buf().text.push('"');
                open = !open;
            }
            if valid {
                self.buf().text.push(byte as char);
            } else {
                let buf = self.buf();
                buf.text.push('\'');
                buf.text.push_str(&format!("{:02X}", byte));
            }
        }
        if open {
            self.buf().text.push('"');
        }
    }

    /// Three blank lines between globals.
    pub fn global_divider(&mut self) {
        self.newline();
        self.newline();
        self.newline();
    }

    // === Debug line directives ===

    /// Records the source position of what is about to be emitted. Writes
    /// a full `#line` on file changes or jumps, a lone `#` for a
    /// single-line step.
    pub fn source_location(&mut self, token: &TokenRef) {
        if !self.debug {
            return;
        }
        let file = token.filename.as_str();
        let line = token.line;
        let buf = self.buf();
        let same_file = buf.cur_file.as_deref() == Some(file);
        if buf.have_location && same_file && line == buf.cur_line {
            return;
        }
        if !buf.first_term {
            buf.text.push('\n');
            buf.first_term = true;
        }
        if buf.have_location && same_file && line == buf.cur_line + 1 {
            buf.text.push_str("#\n");
        } else {
            buf.text.push_str(&format!("#line {} \"{}\"\n", line, file));
            buf.cur_file = Some(file.to_string());
        }
        buf.cur_line = line;
        buf.have_location = true;
    }

    // === Data ===

    /// An initialised or zero-filled global under its label.
    pub fn emit_global(
        &mut self,
        name: &str,
        public: bool,
        data: &GlobalData,
        token: Option<&TokenRef>,
    ) {
        if let Some(token) = token {
            self.source_location(token);
        }
        self.label(if public { '=' } else { '@' }, name);
        self.newline();

        let mut reloc_iter = data.relocs.iter().peekable();
        let mut i: usize = 0;
        let mut on_line: usize = 0;
        while i < data.bytes.len() {
            if let Some((offset, sym)) = reloc_iter.peek() {
                if *offset as usize == i {
                    self.label('^', sym);
                    reloc_iter.next();
                    i += 4;
                    on_line += 4;
                    if on_line >= 16 {
                        self.newline();
                        on_line = 0;
                    }
                    continue;
                }
            }
            self.quoted_byte(data.bytes[i]);
            i += 1;
            on_line += 1;
            if on_line >= 16 {
                self.newline();
                on_line = 0;
            } else if on_line % 4 == 0 {
                self.buf().text.push(' ');
            }
        }
        self.newline();
        self.global_divider();
    }

    /// A string literal's bytes under a `__S_` label. Adjacent literal
    /// parts land back to back, sharing one terminating null.
    pub fn emit_string_data(&mut self, label: u32, parts: &[Vec<u8>], token: Option<&TokenRef>) {
        if let Some(token) = token {
            self.source_location(token);
        }
        self.computed_label('@', STRING_LABEL_PREFIX, label);
        self.newline();
        for part in parts {
            self.string_literal(part);
            self.newline();
        }
        self.quoted_byte(0);
        self.newline();
        self.newline();
    }

    // === Functions ===

    pub fn emit_function(&mut self, code: &FunctionCode) {
        let prev = self.section;
        self.section = Section::Functions;

        self.source_location(&code.token);
        self.label(if code.public { '=' } else { '@' }, &code.asm_name);
        self.newline();
        self.term("enter");
        self.newline();

        // Allocate the frame, using a temporary when the size does not
        // fit in a mix-type byte.
        if code.frame_size > 0 {
            if code.frame_size < 0x80 {
                self.term("sub");
                self.register(Reg::RSP);
                self.register(Reg::RSP);
                self.int(code.frame_size as i32);
                self.newline();
            } else {
                self.term("imw");
                self.register(Reg::R9);
                self.int(code.frame_size as i32);
                self.newline();
                self.term("sub");
                self.register(Reg::RSP);
                self.register(Reg::RSP);
                self.register(Reg::R9);
                self.newline();
            }
        }

        for block in &code.blocks {
            match &block.label {
                Some(BlockLabel::Jump(label)) => {
                    self.computed_label(':', JUMP_LABEL_PREFIX, *label);
                    self.newline();
                }
                Some(BlockLabel::User(name)) => {
                    self.label(':', &format!("{}{}", USER_LABEL_PREFIX, name));
                    self.newline();
                }
                None => {}
            }
            for instruction in &block.instructions {
                self.emit_instruction(instruction);
            }
        }

        self.global_divider();
        self.section = prev;
    }

    fn emit_instruction(&mut self, instruction: &Instruction) {
        if let Some(token) = &instruction.token {
            self.source_location(token);
        }
        self.term(instruction.op.mnemonic());
        for operand in &instruction.operands {
            match operand {
                Operand::Reg(reg) => self.register(*reg),
                Operand::Imm(value) => self.int(*value),
                Operand::Sym { sigil, name } => self.label(*sigil, name),
                Operand::JumpLabel(label) => {
                    self.computed_label('&', JUMP_LABEL_PREFIX, *label)
                }
                Operand::UserLabel(name) => {
                    self.label('&', &format!("{}{}", USER_LABEL_PREFIX, name))
                }
            }
        }
        self.newline();
    }

    /// Writes the finished translation unit.
    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.debug {
            out.write_all(b"#line manual\n")?;
        }
        out.write_all(self.globals.text.as_bytes())?;
        out.write_all(self.functions.text.as_bytes())?;
        out.write_all(self.deferred.text.as_bytes())?;
        out.write_all(b"\n")?;
        Ok(())
    }

    /// The output assembled so far, for tests.
    pub fn text(&self) -> String {
        let mut out = Vec::new();
        self.write_to(&mut out).unwrap_or_default();
        String::from_utf8_lossy(&out).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::block::Block;
    use crate::common::intern::StringPool;
    use crate::frontend::lexer::{Token, TokenKind};

    fn test_token(pool: &mut StringPool, line: u32) -> TokenRef {
        let value = pool.intern("tok");
        let file = pool.intern("test.c");
        Token::new(TokenKind::Alphanumeric, value, file, line)
    }

    #[test]
    fn small_ints_are_decimal_large_are_hex() {
        let mut emitter = Emitter::new(false);
        emitter.int(42);
        emitter.int(-1);
        emitter.int(0x12345678);
        let text = emitter.text();
        assert!(text.contains("42"));
        assert!(text.contains("-1"));
        assert!(text.contains("0x12345678"));
    }

    #[test]
    fn string_bytes_split_into_runs_and_escapes() {
        let mut emitter = Emitter::new(false);
        emitter.string_literal(b"hi\n\"x\"");
        let text = emitter.text();
        assert!(text.contains("\"hi\"'0A'22\"x\"'22"));
    }

    #[test]
    fn zero_filled_global_layout() {
        let mut emitter = Emitter::new(false);
        let data = GlobalData {
            bytes: vec![0; 8],
            relocs: Vec::new(),
        };
        emitter.emit_global("x", true, &data, None);
        let text = emitter.text();
        assert!(text.starts_with("=x \n"));
        assert!(text.contains("'00'00'00'00 '00'00'00'00"));
    }

    #[test]
    fn reloc_interrupts_byte_stream() {
        let mut emitter = Emitter::new(false);
        let data = GlobalData {
            bytes: vec![1, 0, 0, 0, 0, 0, 0, 0],
            relocs: vec![(4, "target".to_string())],
        };
        emitter.emit_global("p", false, &data, None);
        let text = emitter.text();
        assert!(text.starts_with("@p \n"));
        assert!(text.contains("^target"));
    }

    #[test]
    fn function_prologue_small_and_large_frames() {
        let mut pool = StringPool::new();
        let token = test_token(&mut pool, 1);

        let mut emitter = Emitter::new(false);
        let code = FunctionCode {
            asm_name: "main".to_string(),
            public: true,
            frame_size: 16,
            blocks: vec![Block::new(None)],
            token: token.clone(),
        };
        emitter.emit_function(&code);
        let text = emitter.text();
        assert!(text.contains("=main"));
        assert!(text.contains("enter"));
        assert!(text.contains("sub rsp rsp 16"));

        let mut emitter = Emitter::new(false);
        let code = FunctionCode {
            asm_name: "big".to_string(),
            public: true,
            frame_size: 0x200,
            blocks: vec![Block::new(None)],
            token,
        };
        emitter.emit_function(&code);
        let text = emitter.text();
        assert!(text.contains("imw r9 512"));
        assert!(text.contains("sub rsp rsp r9"));
    }

    #[test]
    fn line_directives_track_changes() {
        let mut pool = StringPool::new();
        let mut emitter = Emitter::new(true);
        emitter.set_section(Section::Functions);

        let t1 = test_token(&mut pool, 5);
        emitter.source_location(&t1);
        emitter.term("mov");
        emitter.newline();

        // Same line: nothing new.
        emitter.source_location(&t1);
        emitter.term("mov");
        emitter.newline();

        // Next line: a lone #.
        let t2 = test_token(&mut pool, 6);
        emitter.source_location(&t2);
        emitter.term("mov");
        emitter.newline();

        // A jump: full directive.
        let t3 = test_token(&mut pool, 20);
        emitter.source_location(&t3);
        emitter.term("mov");
        emitter.newline();

        let text = emitter.text();
        assert!(text.starts_with("#line manual\n"));
        assert_eq!(text.matches("#line 5 \"test.c\"").count(), 1);
        assert!(text.contains("\n#\n"));
        assert!(text.contains("#line 20 \"test.c\""));
    }

    #[test]
    fn sections_are_ordered() {
        let mut emitter = Emitter::new(false);
        emitter.set_section(Section::Deferred);
        emitter.term("last");
        emitter.newline();
        emitter.set_section(Section::Globals);
        emitter.term("first");
        emitter.newline();
        emitter.set_section(Section::Functions);
        emitter.term("middle");
        emitter.newline();
        let text = emitter.text();
        let first = text.find("first").unwrap();
        let middle = text.find("middle").unwrap();
        let last = text.find("last").unwrap();
        assert!(first < middle && middle < last);
    }
}
