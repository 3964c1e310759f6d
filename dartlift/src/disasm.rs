//! Decoded ARM64 instruction model.
//!
//! The actual disassembler is an external collaborator; what the lifter
//! consumes is a stream of already-decoded records (address, size, mnemonic,
//! operands). This module defines those records plus the parser for the
//! textual listing format the export files carry them in.

use crate::log::*;

/// Which view of a register an operand names.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum RegWidth {
    /// 32-bit general view (`w0`).
    W,
    /// 64-bit general view (`x0`).
    X,
    /// 64-bit FP/SIMD view (`d0`).
    D,
}

/// A machine register. General registers are numbered 0..=30, with `sp` and
/// the zero register modeled as their own numbers so that a register is fully
/// identified by `(num, width)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct Register {
    num: u8,
    width: RegWidth,
}

pub const SP_NUM: u8 = 31;
pub const ZR_NUM: u8 = 32;

impl Register {
    pub const fn x(num: u8) -> Self {
        Self {
            num,
            width: RegWidth::X,
        }
    }

    pub const fn w(num: u8) -> Self {
        Self {
            num,
            width: RegWidth::W,
        }
    }

    pub const fn d(num: u8) -> Self {
        Self {
            num,
            width: RegWidth::D,
        }
    }

    pub const SP: Register = Register::x(SP_NUM);
    pub const FP: Register = Register::x(29);
    pub const LR: Register = Register::x(30);
    pub const ZR: Register = Register::x(ZR_NUM);

    pub fn num(&self) -> u8 {
        self.num
    }

    pub fn width(&self) -> RegWidth {
        self.width
    }

    pub fn is_sp(&self) -> bool {
        self.num == SP_NUM
    }

    pub fn is_zr(&self) -> bool {
        self.num == ZR_NUM
    }

    pub fn is_fp_reg(&self) -> bool {
        self.width == RegWidth::D
    }

    /// `true` when the two operands name the same storage, regardless of the
    /// view width (`w1` aliases `x1`, but not `d1`).
    pub fn aliases(&self, other: Register) -> bool {
        self.num == other.num && (self.width == RegWidth::D) == (other.width == RegWidth::D)
    }

    /// Slot index in a flat register file. General registers first, then the
    /// FP bank.
    pub fn file_index(&self) -> usize {
        match self.width {
            RegWidth::W | RegWidth::X => self.num as usize,
            RegWidth::D => 40 + self.num as usize,
        }
    }

    pub fn name(&self) -> String {
        match (self.num, self.width) {
            (SP_NUM, _) => "sp".into(),
            (ZR_NUM, RegWidth::W) => "wzr".into(),
            (ZR_NUM, _) => "xzr".into(),
            (29, RegWidth::X) => "fp".into(),
            (30, RegWidth::X) => "lr".into(),
            (n, RegWidth::X) => format!("x{}", n),
            (n, RegWidth::W) => format!("w{}", n),
            (n, RegWidth::D) => format!("d{}", n),
        }
    }

    /// Parse a register token (`x3`, `w0`, `d1`, `sp`, `fp`, `lr`, `xzr`).
    pub fn parse(tok: &str) -> Option<Register> {
        match tok {
            "sp" => return Some(Register::SP),
            "fp" => return Some(Register::FP),
            "lr" => return Some(Register::LR),
            "xzr" => return Some(Register::ZR),
            "wzr" => return Some(Register::w(ZR_NUM)),
            _ => {}
        }
        let (head, rest) = tok.split_at(1);
        let num: u8 = rest.parse().ok()?;
        if num > 31 {
            return None;
        }
        match head {
            "x" => Some(Register::x(num)),
            "w" => Some(Register::w(num)),
            "d" => Some(Register::d(num)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Register assignments fixed by the AOT calling convention.
pub mod abi {
    use super::Register;

    /// Object pool pointer.
    pub const PP: Register = Register::x(27);
    /// Thread structure pointer.
    pub const THR: Register = Register::x(26);
    /// Upper half of compressed heap pointers.
    pub const HEAP_BASE: Register = Register::x(28);
    /// Dispatch table base for GDT calls.
    pub const DISPATCH_TABLE: Register = Register::x(21);
    /// Cached null object.
    pub const NULL: Register = Register::x(22);
    /// Scratch registers reserved for the compiler.
    pub const TMP: Register = Register::x(16);
    pub const TMP2: Register = Register::x(17);
    /// Arguments descriptor for calls with optional/named parameters.
    pub const ARGS_DESC: Register = Register::x(4);
    /// Receiver class id on entry to a GDT call sequence.
    pub const GDT_CID: Register = Register::x(0);
}

/// Shift or extend applied to a register operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Shift {
    Lsl,
    Lsr,
    Asr,
    Uxtw,
    Sxtw,
}

impl Shift {
    fn parse(tok: &str) -> Option<Shift> {
        match tok {
            "lsl" => Some(Shift::Lsl),
            "lsr" => Some(Shift::Lsr),
            "asr" => Some(Shift::Asr),
            "uxtw" => Some(Shift::Uxtw),
            "sxtw" => Some(Shift::Sxtw),
            _ => None,
        }
    }
}

/// Address-mode writeback of a memory operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Writeback {
    None,
    /// `[base, #off]!`
    Pre,
    /// `[base], #off`
    Post,
}

/// A memory operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MemOperand {
    pub base: Register,
    pub offset: i64,
    /// Register index with optional shift/extend, e.g. `[x1, x2, lsl #3]`.
    pub index: Option<(Register, Shift, u8)>,
    pub writeback: Writeback,
}

/// One decoded operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operand {
    Reg(Register),
    /// `#imm`.
    Imm(i64),
    /// A code address (branch or call target).
    Address(u64),
    Mem(MemOperand),
    /// A shifted/extended register, e.g. `x2, lsl #32`.
    Shifted(Register, Shift, u8),
}

/// One decoded machine instruction.
#[derive(Clone, Debug)]
pub struct AsmInstruction {
    pub address: u64,
    pub size: u32,
    pub mnemonic: String,
    /// Condition suffix for `b.<cond>` style mnemonics.
    pub cond: Option<String>,
    pub operands: Vec<Operand>,
}

impl AsmInstruction {
    pub fn end_address(&self) -> u64 {
        self.address + self.size as u64
    }

    pub fn is(&self, mnemonic: &str) -> bool {
        self.mnemonic == mnemonic
    }

    pub fn reg(&self, idx: usize) -> Option<Register> {
        match self.operands.get(idx) {
            Some(Operand::Reg(r)) => Some(*r),
            _ => None,
        }
    }

    pub fn imm(&self, idx: usize) -> Option<i64> {
        match self.operands.get(idx) {
            Some(Operand::Imm(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn address_op(&self, idx: usize) -> Option<u64> {
        match self.operands.get(idx) {
            Some(Operand::Address(a)) => Some(*a),
            _ => None,
        }
    }

    pub fn mem(&self, idx: usize) -> Option<MemOperand> {
        match self.operands.get(idx) {
            Some(Operand::Mem(m)) => Some(*m),
            _ => None,
        }
    }

    pub fn shifted(&self, idx: usize) -> Option<(Register, Shift, u8)> {
        match self.operands.get(idx) {
            Some(Operand::Shifted(r, s, a)) => Some((*r, *s, *a)),
            _ => None,
        }
    }
}

/// A single function's worth of decoded instructions, in address order.
#[derive(Debug, Clone)]
pub struct AsmFunction {
    pub name: String,
    pub entry: u64,
    pub insns: Vec<AsmInstruction>,
}

fn parse_int(tok: &str) -> Option<i64> {
    let (neg, tok) = match tok.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, tok),
    };
    let v = match tok.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => tok.parse().ok()?,
    };
    Some(if neg { -v } else { v })
}

/// Split an operand string on top-level commas, keeping bracketed memory
/// operands intact.
fn split_operands(s: &str) -> Vec<String> {
    let mut parts = vec![];
    let mut depth = 0usize;
    let mut cur = String::new();
    for c in s.chars() {
        match c {
            '[' => {
                depth += 1;
                cur.push(c);
            }
            ']' => {
                depth -= 1;
                cur.push(c);
            }
            ',' if depth == 0 => {
                parts.push(cur.trim().to_string());
                cur = String::new();
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        parts.push(cur.trim().to_string());
    }
    parts
}

fn parse_mem(tok: &str) -> Option<MemOperand> {
    let (inner, writeback) = match tok.strip_suffix('!') {
        Some(rest) => (rest, Writeback::Pre),
        None => (tok, Writeback::None),
    };
    let inner = inner.strip_prefix('[')?.strip_suffix(']')?;
    let parts: Vec<&str> = inner.split(',').map(|p| p.trim()).collect();
    let base = Register::parse(parts.first()?)?;
    let mut mem = MemOperand {
        base,
        offset: 0,
        index: None,
        writeback,
    };
    match parts.len() {
        1 => {}
        2 => {
            if let Some(imm) = parts[1].strip_prefix('#') {
                mem.offset = parse_int(imm)?;
            } else {
                let idx = Register::parse(parts[1])?;
                mem.index = Some((idx, Shift::Lsl, 0));
            }
        }
        3 => {
            let idx = Register::parse(parts[1])?;
            let (shift_name, amount) = parts[2].split_once(' ')?;
            let shift = Shift::parse(shift_name)?;
            let amount = parse_int(amount.trim().strip_prefix('#')?)? as u8;
            mem.index = Some((idx, shift, amount));
        }
        _ => return None,
    }
    Some(mem)
}

fn parse_operand(tok: &str) -> Option<Operand> {
    if tok.starts_with('[') {
        return parse_mem(tok).map(Operand::Mem);
    }
    if let Some(imm) = tok.strip_prefix('#') {
        return parse_int(imm).map(Operand::Imm);
    }
    if let Some(r) = Register::parse(tok) {
        return Some(Operand::Reg(r));
    }
    if tok.starts_with("0x") {
        return parse_int(tok).map(|v| Operand::Address(v as u64));
    }
    None
}

/// Parse one listing line: `<hex-addr> <mnemonic> <operands...>`.
///
/// Panics on a malformed line; the export is machine-generated, so a parse
/// failure means the file is broken, not the input merely unusual.
pub fn parse_instruction(line: &str) -> AsmInstruction {
    let line = line.trim();
    let (addr_tok, rest) = line
        .split_once(char::is_whitespace)
        .unwrap_or_else(|| panic!("Listing line without a mnemonic: {:?}", line));
    let address = u64::from_str_radix(addr_tok.trim_start_matches("0x"), 16)
        .unwrap_or_else(|_| panic!("Bad address in listing line: {:?}", line));

    let rest = rest.trim();
    let (mnemonic_tok, ops_str) = match rest.split_once(char::is_whitespace) {
        Some((m, o)) => (m, o.trim()),
        None => (rest, ""),
    };
    let (mnemonic, cond) = match mnemonic_tok.split_once('.') {
        Some((m, c)) if m == "b" => (m.to_string(), Some(c.to_string())),
        _ => (mnemonic_tok.to_string(), None),
    };

    let mut operands: Vec<Operand> = vec![];
    for part in split_operands(ops_str) {
        // Shift specifiers ("lsl #3") and post-index offsets attach to the
        // operand before them.
        if let Some((shift_name, amount)) = part.split_once(' ') {
            if let Some(shift) = Shift::parse(shift_name) {
                let amount = parse_int(amount.trim().trim_start_matches('#'))
                    .unwrap_or_else(|| panic!("Bad shift amount: {:?}", line))
                    as u8;
                match operands.pop() {
                    Some(Operand::Reg(r)) => {
                        operands.push(Operand::Shifted(r, shift, amount));
                        continue;
                    }
                    Some(Operand::Mem(mut m)) if m.index.is_some() => {
                        let (idx, _, _) = m.index.unwrap();
                        m.index = Some((idx, shift, amount));
                        operands.push(Operand::Mem(m));
                        continue;
                    }
                    other => {
                        panic!("Shift {:?} without a register operand: {:?}", other, line)
                    }
                }
            }
        }
        if let Some(imm) = part.strip_prefix('#') {
            if let Some(Operand::Mem(m)) = operands.last() {
                if m.writeback == Writeback::None && m.offset == 0 && m.index.is_none() {
                    // `[sp], #16` post-index form.
                    let mut m = *m;
                    m.offset = parse_int(imm)
                        .unwrap_or_else(|| panic!("Bad post-index offset: {:?}", line));
                    m.writeback = Writeback::Post;
                    operands.pop();
                    operands.push(Operand::Mem(m));
                    continue;
                }
            }
        }
        match parse_operand(&part) {
            Some(op) => operands.push(op),
            None => {
                trace!("Unparsed operand, keeping instruction opaque";
                       "operand" => %part, "line" => %line);
                operands.clear();
                break;
            }
        }
    }

    AsmInstruction {
        address,
        size: 4,
        mnemonic,
        cond,
        operands,
    }
}
