//! The pattern-recognition lifter.
//!
//! For each machine instruction at the head of the stream, the recognizers
//! are attempted in a fixed priority order; each is a predicate over a window
//! of one or more consecutive instructions. The first match consumes its
//! window, emits exactly one IL node (possibly composite), and updates the
//! register file. If nothing matches, an `Unknown` node is emitted for
//! exactly one instruction. Recognizer failure is silent backtracking; it is
//! never an error.
//!
//! Priority order (higher first):
//!
//! 1.  frame enter/leave, stack allocation, stack-overflow check
//! 2.  prologue parameter marshaling
//! 3.  tagged-class-id composite, then its standalone components
//! 4.  int boxing/unboxing, pointer decompression
//! 5.  type test, late-static-field init, closure call
//! 6.  object-pool loads and stores
//! 7.  static-field access, leaf runtime calls, thread-slot loads
//! 8.  dispatch-table (GDT) calls, direct calls
//! 9.  array element access, then plain field access
//! 10. register save/restore, argument loads
//! 11. register moves, immediate loads, return
//!
//! The register file is a lifter-private side table; it never appears in the
//! emitted IL.

use crate::analysis_config::CONFIG;
use crate::dart_meta::layout;
use crate::dart_meta::{cid, custom_type};
use crate::dart_meta::{ClassDb, DartType, FunctionDb, StubKind};
use crate::disasm::{abi, AsmFunction, AsmInstruction, MemOperand, Register, RegWidth, Shift, Writeback};
use crate::il::{AddrRange, ArrayOp, ArrayType, FnParam, FnParams, ILInstr, ILKind, ILOp};
use crate::log::*;
use crate::pool::ObjectPool;
use crate::thread_info::ThreadLayout;
use crate::values::{VarItem, VarStorage, VarValue};
use std::rc::Rc;

/// Read-only view of the runtime layout the lifter matches against. Populated
/// by the snapshot loader before any function is lifted; never mutated after.
#[derive(Debug)]
pub struct LiftEnv {
    pub pool: ObjectPool,
    pub thread: ThreadLayout,
    pub classes: ClassDb,
    pub functions: FunctionDb,
}

impl LiftEnv {
    pub fn new() -> Self {
        Self {
            pool: ObjectPool::new(),
            thread: ThreadLayout::with_default_offsets(),
            classes: ClassDb::new(),
            functions: FunctionDb::new(),
        }
    }
}

impl Default for LiftEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Lift one function's instruction stream into IL.
pub fn lift_function(env: &LiftEnv, fun: &AsmFunction) -> Vec<ILInstr> {
    FunctionLifter::new(env, &fun.insns).run()
}

/// Lift a bare instruction slice (no function context).
pub fn lift_insns(env: &LiftEnv, insns: &[AsmInstruction]) -> Vec<ILInstr> {
    FunctionLifter::new(env, insns).run()
}

const REG_FILE_SLOTS: usize = 72;

/// Per-function side table mapping each machine register to the most recent
/// item written to it. Reset at every function boundary.
struct RegisterFile {
    slots: Vec<Option<VarItem>>,
}

impl RegisterFile {
    fn new() -> Self {
        Self {
            slots: (0..REG_FILE_SLOTS).map(|_| None).collect(),
        }
    }

    fn get(&self, r: Register) -> Option<&VarItem> {
        self.slots[r.file_index()].as_ref()
    }

    fn value(&self, r: Register) -> Option<&VarValue> {
        self.get(r).and_then(|it| it.value())
    }

    fn set(&mut self, r: Register, item: VarItem) {
        self.slots[r.file_index()] = Some(item);
    }

    fn clear(&mut self, r: Register) {
        self.slots[r.file_index()] = None;
    }

    /// Drop everything a call may clobber: x0..x17 and the whole FP bank.
    fn clear_caller_saved(&mut self) {
        for slot in &mut self.slots[0..=17] {
            *slot = None;
        }
        for slot in &mut self.slots[40..REG_FILE_SLOTS] {
            *slot = None;
        }
    }
}

struct FunctionLifter<'a> {
    env: &'a LiftEnv,
    insns: &'a [AsmInstruction],
    pos: usize,
    out: Vec<ILInstr>,
    regs: RegisterFile,
    /// Still inside the frame-setup idioms at the top of the function.
    at_prologue: bool,
}

fn access_size(insn: &AsmInstruction, reg: Register) -> u8 {
    match insn.mnemonic.as_str() {
        "ldrb" | "strb" | "ldurb" | "sturb" | "ldrsb" | "ldursb" => 1,
        "ldrh" | "strh" | "ldurh" | "sturh" | "ldrsh" | "ldursh" => 2,
        "ldrsw" | "ldursw" => 4,
        _ => match reg.width() {
            RegWidth::W => 4,
            RegWidth::X | RegWidth::D => 8,
        },
    }
}

/// Decompose a single-register memory access into `(reg, mem, is_load)`.
fn mem_access(insn: &AsmInstruction) -> Option<(Register, MemOperand, bool)> {
    let m = insn.mnemonic.as_str();
    if matches!(m, "ldp" | "stp") {
        return None;
    }
    let is_load = m.starts_with("ld");
    if !is_load && !m.starts_with("st") {
        return None;
    }
    let r = insn.reg(0)?;
    let mem = insn.mem(1)?;
    Some((r, mem, is_load))
}

impl<'a> FunctionLifter<'a> {
    fn new(env: &'a LiftEnv, insns: &'a [AsmInstruction]) -> Self {
        Self {
            env,
            insns,
            pos: 0,
            out: vec![],
            regs: RegisterFile::new(),
            at_prologue: false,
        }
    }

    fn run(mut self) -> Vec<ILInstr> {
        while self.pos < self.insns.len() {
            self.step();
        }
        self.out
    }

    fn cur(&self) -> &AsmInstruction {
        &self.insns[self.pos]
    }

    fn insn(&self, ahead: usize) -> Option<&AsmInstruction> {
        self.insns.get(self.pos + ahead)
    }

    /// Address range covering the next `n` instructions.
    fn window_range(&self, n: usize) -> AddrRange {
        AddrRange::new(
            self.insns[self.pos].address,
            self.insns[self.pos + n - 1].end_address(),
        )
    }

    /// Consume `n` instructions and append the node.
    fn emit(&mut self, n: usize, op: ILOp) {
        let range = self.window_range(n);
        self.pos += n;
        self.push(ILInstr::new(range, op));
    }

    fn push(&mut self, il: ILInstr) {
        if let Some(prev) = self.out.last() {
            assert!(
                prev.start() <= il.start(),
                "IL start addresses must be non-decreasing: {:#x} after {:#x}",
                il.start(),
                prev.start()
            );
        }
        match il.kind() {
            ILKind::EnterFrame => self.at_prologue = true,
            ILKind::AllocateStack | ILKind::CheckStackOverflow | ILKind::SetupParameters => {}
            _ => self.at_prologue = false,
        }
        if CONFIG.trace_register_file {
            trace!("lifted"; "il" => %il, "start" => il.start());
        }
        self.out.push(il);
    }

    fn step(&mut self) {
        let done = self.try_enter_frame()
            || self.try_leave_frame()
            || self.try_allocate_stack()
            || self.try_check_stack_overflow()
            || self.try_setup_parameters()
            || self.try_tagged_cid_composite()
            || self.try_load_class_id()
            || self.try_branch_if_smi()
            || self.try_box_int64()
            || self.try_load_int32()
            || self.try_decompress_pointer()
            || self.try_test_type()
            || self.try_init_late_static_field()
            || self.try_closure_call()
            || self.try_pool_access()
            || self.try_static_field()
            || self.try_leaf_runtime_call()
            || self.try_thread_load()
            || self.try_gdt_call()
            || self.try_direct_call()
            || self.try_array_element()
            || self.try_field_access()
            || self.try_save_restore()
            || self.try_argument_load()
            || self.try_move_reg()
            || self.try_load_imm()
            || self.try_return();
        if !done {
            self.emit_unknown();
        }
    }

    // --- frame shape -----------------------------------------------------

    /// `stp fp, lr, [sp, #-N]!` ; `mov fp, sp`
    fn try_enter_frame(&mut self) -> bool {
        let i0 = self.cur();
        if !i0.is("stp") {
            return false;
        }
        let (ra, rb, mem) = match (i0.reg(0), i0.reg(1), i0.mem(2)) {
            (Some(a), Some(b), Some(m)) => (a, b, m),
            _ => return false,
        };
        if !(mem.base.is_sp() && mem.writeback == Writeback::Pre && mem.offset < 0) {
            return false;
        }
        let pair = [ra.num(), rb.num()];
        if !(pair.contains(&29) && pair.contains(&30)) {
            return false;
        }
        let i1 = match self.insn(1) {
            Some(i) => i,
            None => return false,
        };
        let moves_fp = i1.is("mov")
            && i1.reg(0).map_or(false, |r| r.num() == 29)
            && i1.reg(1).map_or(false, |r| r.is_sp());
        if !moves_fp {
            return false;
        }
        self.emit(2, ILOp::EnterFrame);
        true
    }

    /// `mov sp, fp` ; `ldp fp, lr, [sp], #N`
    fn try_leave_frame(&mut self) -> bool {
        let i0 = self.cur();
        let restores_sp = i0.is("mov")
            && i0.reg(0).map_or(false, |r| r.is_sp())
            && i0.reg(1).map_or(false, |r| r.num() == 29);
        if !restores_sp {
            return false;
        }
        let i1 = match self.insn(1) {
            Some(i) => i,
            None => return false,
        };
        if !i1.is("ldp") {
            return false;
        }
        let (ra, rb, mem) = match (i1.reg(0), i1.reg(1), i1.mem(2)) {
            (Some(a), Some(b), Some(m)) => (a, b, m),
            _ => return false,
        };
        let pair = [ra.num(), rb.num()];
        if !(pair.contains(&29)
            && pair.contains(&30)
            && mem.base.is_sp()
            && mem.writeback == Writeback::Post)
        {
            return false;
        }
        self.emit(2, ILOp::LeaveFrame);
        true
    }

    /// `sub sp, sp, #N`
    fn try_allocate_stack(&mut self) -> bool {
        let i0 = self.cur();
        let shrinks_sp = i0.is("sub")
            && i0.reg(0).map_or(false, |r| r.is_sp())
            && i0.reg(1).map_or(false, |r| r.is_sp());
        let size = match i0.imm(2) {
            Some(v) if shrinks_sp && v > 0 => v as u32,
            _ => return false,
        };
        self.emit(1, ILOp::AllocateStack { size });
        true
    }

    /// `ldr tmp, [THR, #stack_limit]` ; `cmp sp, tmp` ; `b.ls overflow`
    fn try_check_stack_overflow(&mut self) -> bool {
        let i0 = self.cur();
        if !i0.is("ldr") {
            return false;
        }
        let (tmp, mem) = match (i0.reg(0), i0.mem(1)) {
            (Some(r), Some(m)) => (r, m),
            _ => return false,
        };
        if !(mem.base == abi::THR
            && self.env.thread.offset_name(mem.offset) == Some("stack_limit"))
        {
            return false;
        }
        let compares = self.insn(1).map_or(false, |i1| {
            i1.is("cmp")
                && i1.reg(0).map_or(false, |r| r.is_sp())
                && i1.reg(1).map_or(false, |r| r.aliases(tmp))
        });
        if !compares {
            return false;
        }
        let overflow_branch = match self.insn(2) {
            Some(i2) if i2.is("b") && i2.cond.as_deref() == Some("ls") => match i2.address_op(0) {
                Some(a) => a,
                None => return false,
            },
            _ => return false,
        };
        self.regs.clear(tmp);
        self.emit(3, ILOp::CheckStackOverflow { overflow_branch });
        true
    }

    // --- parameters ------------------------------------------------------

    /// A run of argument loads (and spills of the loaded registers) right
    /// after the prologue, collapsed into one `SetupParameters` node.
    fn try_setup_parameters(&mut self) -> bool {
        if !self.at_prologue || !CONFIG.recognize_parameter_setup {
            return false;
        }
        let mut params: Vec<FnParam> = vec![];
        let mut loaded: Vec<(Register, i32)> = vec![];
        let mut n = 0usize;
        while let Some(insn) = self.insn(n) {
            let (r, mem, is_load) = match mem_access(insn) {
                Some(t) => t,
                None => break,
            };
            if mem.base.num() != 29 || mem.index.is_some() || mem.writeback != Writeback::None {
                break;
            }
            if is_load && mem.offset >= 2 * layout::WORD_SIZE {
                let idx = ((mem.offset - 2 * layout::WORD_SIZE) / layout::WORD_SIZE) as i32;
                params.push(FnParam {
                    idx,
                    storage: VarStorage::Register(r),
                });
                loaded.push((r, idx));
                n += 1;
            } else if !is_load && mem.offset < 0 {
                // Spill of a freshly loaded parameter into a local slot.
                let idx = match loaded.iter().rev().find(|(lr, _)| lr.aliases(r)) {
                    Some((_, idx)) => *idx,
                    None => break,
                };
                params.push(FnParam {
                    idx,
                    storage: VarStorage::Local(mem.offset),
                });
                n += 1;
            } else {
                break;
            }
        }
        if n < 2 {
            return false;
        }
        for (r, idx) in &loaded {
            self.regs.set(
                *r,
                VarItem::new(VarStorage::Argument(*idx), VarValue::Param { idx: *idx }),
            );
        }
        self.emit(
            n,
            ILOp::SetupParameters {
                params: FnParams { params },
            },
        );
        true
    }

    // --- class ids and smis ----------------------------------------------

    /// The three-part `cid = smi?(obj) ? tagged(smi_cid) : load_class_id(obj)`
    /// idiom. Emitted only when all three components match contiguously.
    fn try_tagged_cid_composite(&mut self) -> bool {
        if !CONFIG.collapse_tagged_class_id_composites {
            return false;
        }
        let i0 = self.cur();
        if !(i0.is("movz") || i0.is("mov")) {
            return false;
        }
        let (cid_reg, imm) = match (i0.reg(0), i0.imm(1)) {
            (Some(r), Some(v)) => (r, v),
            _ => return false,
        };
        let (obj, branch_addr) = match self.insn(1) {
            Some(i1) if i1.is("tbz") && i1.imm(1) == Some(0) => {
                match (i1.reg(0), i1.address_op(2)) {
                    (Some(o), Some(a)) => (o, a),
                    _ => return false,
                }
            }
            _ => return false,
        };
        let load = match self.insn(2) {
            Some(i2) if i2.is("ldur") => match (i2.reg(0), i2.mem(1)) {
                (Some(c), Some(m))
                    if c.aliases(cid_reg)
                        && m.base.aliases(obj)
                        && m.offset == layout::CLASS_ID_DISP =>
                {
                    (c, m.base)
                }
                _ => return false,
            },
            _ => return false,
        };
        let (cid_out, obj_full) = load;

        let load_imm = ILInstr::new(
            AddrRange::new(i0.address, i0.end_address()),
            ILOp::LoadValue {
                dst: cid_reg,
                item: VarItem::new(
                    VarStorage::Immediate,
                    VarValue::Cid {
                        cid: imm as i32,
                        is_smi: true,
                    },
                ),
            },
        );
        let i1 = self.insn(1).unwrap();
        let branch_if_smi = ILInstr::new(
            AddrRange::new(i1.address, i1.end_address()),
            ILOp::BranchIfSmi { obj, branch_addr },
        );
        let i2 = self.insn(2).unwrap();
        let load_class_id = ILInstr::new(
            AddrRange::new(i2.address, i2.end_address()),
            ILOp::LoadClassId {
                obj: obj_full,
                cid_reg: cid_out,
            },
        );

        self.regs.set(
            cid_out,
            VarItem::in_register(cid_out, VarValue::Cid { cid: 0, is_smi: true }),
        );
        self.emit(
            3,
            ILOp::LoadTaggedClassIdMayBeSmi {
                tagged_cid_reg: cid_out,
                obj: obj_full,
                load_imm: Box::new(load_imm),
                branch_if_smi: Box::new(branch_if_smi),
                load_class_id: Box::new(load_class_id),
            },
        );
        true
    }

    /// `ldur cid, [obj, #-1]` standing alone.
    fn try_load_class_id(&mut self) -> bool {
        let i0 = self.cur();
        if !i0.is("ldur") {
            return false;
        }
        let (cid_reg, mem) = match (i0.reg(0), i0.mem(1)) {
            (Some(r), Some(m)) => (r, m),
            _ => return false,
        };
        if mem.offset != layout::CLASS_ID_DISP || mem.index.is_some() {
            return false;
        }
        self.regs.set(
            cid_reg,
            VarItem::in_register(cid_reg, VarValue::Cid { cid: 0, is_smi: false }),
        );
        self.emit(
            1,
            ILOp::LoadClassId {
                obj: mem.base,
                cid_reg,
            },
        );
        true
    }

    /// `tbz obj, #0, target` standing alone.
    fn try_branch_if_smi(&mut self) -> bool {
        let i0 = self.cur();
        if !(i0.is("tbz") && i0.imm(1) == Some(0)) {
            return false;
        }
        let (obj, branch_addr) = match (i0.reg(0), i0.address_op(2)) {
            (Some(o), Some(a)) => (o, a),
            _ => return false,
        };
        self.emit(1, ILOp::BranchIfSmi { obj, branch_addr });
        true
    }

    /// `adds obj, src, src` ; `b.vc skip` ; optional `bl BoxInt64Stub`
    fn try_box_int64(&mut self) -> bool {
        let i0 = self.cur();
        if !i0.is("adds") {
            return false;
        }
        let (obj, s1, s2) = match (i0.reg(0), i0.reg(1), i0.reg(2)) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => return false,
        };
        if !s1.aliases(s2) {
            return false;
        }
        let branches = self
            .insn(1)
            .map_or(false, |i1| i1.is("b") && i1.cond.as_deref() == Some("vc"));
        if !branches {
            return false;
        }
        let mut n = 2;
        if let Some(i2) = self.insn(2) {
            if i2.is("bl") {
                let is_box_stub = i2
                    .address_op(0)
                    .and_then(|a| self.env.functions.get(a))
                    .map_or(false, |f| f.stub_kind() == Some(&StubKind::BoxInt64));
                if is_box_stub {
                    n = 3;
                }
            }
        }
        let mut value = match self.regs.value(s1) {
            Some(v @ VarValue::Integer { .. }) => v.clone(),
            _ => VarValue::Integer {
                val: 0,
                int_type_id: cid::INT,
                known: false,
            },
        };
        value.set_smi_if_int();
        self.regs.set(obj, VarItem::in_register(obj, value));
        self.emit(n, ILOp::BoxInt64 { obj, src: s1 });
        true
    }

    /// `sbfx dst, obj, #1, #31`, optionally followed by the mint slow path
    /// (`tbz obj, #0, skip` ; `ldur dst, [obj, #mint_value]`).
    fn try_load_int32(&mut self) -> bool {
        let i0 = self.cur();
        if !i0.is("sbfx") {
            return false;
        }
        let (dst, src_obj) = match (i0.reg(0), i0.reg(1)) {
            (Some(d), Some(s)) => (d, s),
            _ => return false,
        };
        if i0.imm(2) != Some(layout::SMI_TAG_SIZE as i64) || i0.imm(3) != Some(31) {
            return false;
        }
        let mut n = 1;
        let has_mint_path = self.insn(1).map_or(false, |i1| {
            i1.is("tbz") && i1.imm(1) == Some(0) && i1.reg(0).map_or(false, |r| r.aliases(src_obj))
        }) && self.insn(2).map_or(false, |i2| {
            i2.is("ldur")
                && i2.reg(0).map_or(false, |r| r.aliases(dst))
                && i2.mem(1).map_or(false, |m| {
                    m.base.aliases(src_obj) && m.offset == layout::MINT_VALUE_DISP
                })
        });
        if has_mint_path {
            n = 3;
        }
        self.regs.set(
            dst,
            VarItem::in_register(
                dst,
                VarValue::Integer {
                    val: 0,
                    int_type_id: custom_type::NATIVE_INT,
                    known: false,
                },
            ),
        );
        self.emit(n, ILOp::LoadInt32 { dst, src_obj });
        true
    }

    /// `add r, r, HEAP_BASE, lsl #32` when compressed pointers are enabled.
    fn try_decompress_pointer(&mut self) -> bool {
        if !CONFIG.compressed_pointers {
            return false;
        }
        let i0 = self.cur();
        if !i0.is("add") {
            return false;
        }
        let (dst, src) = match (i0.reg(0), i0.reg(1)) {
            (Some(d), Some(s)) => (d, s),
            _ => return false,
        };
        let heap_shift = match i0.shifted(2) {
            Some((r, Shift::Lsl, 32)) if r == abi::HEAP_BASE => true,
            _ => false,
        };
        if !(heap_shift && dst.aliases(src)) {
            return false;
        }
        self.emit(
            1,
            ILOp::DecompressPointer {
                dst: VarStorage::Register(dst),
            },
        );
        true
    }

    // --- type tests, late statics, closures ------------------------------

    /// `ldr x8, [PP, #type]` ; optional `ldr x3, [PP, #stc]` ; `bl TypeCheck`
    fn try_test_type(&mut self) -> bool {
        let i0 = self.cur();
        let (dst, mem) = match self.pool_load(i0) {
            Some(t) => t,
            None => return false,
        };
        if dst.num() != 8 {
            return false;
        }
        let type_name = match self.env.pool.at(mem.offset).map(|e| e.to_value()) {
            Some(VarValue::Type(ty)) => ty.to_string(),
            Some(VarValue::FunctionType(ty)) => ty.to_string(),
            Some(VarValue::RecordType(ty)) => ty.to_string(),
            Some(VarValue::TypeParameter(ty)) => ty.to_string(),
            _ => return false,
        };
        let mut n = 1;
        if let Some(i1) = self.insn(1) {
            if let Some((r, m)) = self.pool_load(i1) {
                let is_stc = r.num() == 3
                    && matches!(
                        self.env.pool.at(m.offset).map(|e| e.to_value()),
                        Some(VarValue::SubtypeTestCache)
                    );
                if is_stc {
                    n = 2;
                }
            }
        }
        let is_check = self.insn(n).map_or(false, |i| {
            i.is("bl")
                && i.address_op(0)
                    .and_then(|a| self.env.functions.get(a))
                    .map_or(false, |f| f.stub_kind() == Some(&StubKind::TypeCheck))
        });
        if !is_check {
            return false;
        }
        self.regs.clear(Register::x(8));
        self.regs.clear(Register::x(3));
        self.emit(
            n + 1,
            ILOp::TestType {
                src: Register::x(0),
                type_name,
            },
        );
        true
    }

    /// The slow-path check a late static field load carries: compare against
    /// the sentinel and call the initializer stub with the field from the
    /// pool.
    fn try_init_late_static_field(&mut self) -> bool {
        let i0 = self.cur();
        let (tmp, mem) = match self.pool_load(i0) {
            Some(t) => t,
            None => return false,
        };
        if tmp.num() != abi::TMP.num() && tmp.num() != abi::TMP2.num() {
            return false;
        }
        if !matches!(
            self.env.pool.at(mem.offset).map(|e| e.to_value()),
            Some(VarValue::Sentinel)
        ) {
            return false;
        }
        let dst = match self.insn(1) {
            Some(i1) if i1.is("cmp") => match (i1.reg(0), i1.reg(1)) {
                (Some(a), Some(b)) if b.aliases(tmp) => a,
                _ => return false,
            },
            _ => return false,
        };
        let skips = self
            .insn(2)
            .map_or(false, |i2| i2.is("b") && i2.cond.as_deref() == Some("ne"));
        if !skips {
            return false;
        }
        let field = match self.insn(3).and_then(|i3| self.pool_load(i3)) {
            Some((_, m)) => match self.env.pool.at(m.offset).map(|e| e.to_value()) {
                Some(VarValue::Field(f)) => f,
                _ => return false,
            },
            None => return false,
        };
        let is_init = self.insn(4).map_or(false, |i4| {
            i4.is("bl")
                && i4
                    .address_op(0)
                    .and_then(|a| self.env.functions.get(a))
                    .map_or(false, |f| {
                        f.stub_kind() == Some(&StubKind::InitLateStaticField)
                    })
        });
        if !is_init {
            return false;
        }
        self.regs.set(
            dst,
            VarItem::in_register(
                dst,
                VarValue::Expression {
                    text: field.full_name(),
                    cid: cid::ILLEGAL,
                },
            ),
        );
        self.emit(
            5,
            ILOp::InitLateStaticField {
                dst: VarStorage::Register(dst),
                field,
            },
        );
        true
    }

    /// `ldr x4, [PP, #args_desc]` ; `ldur x2, [closure, #entry]` ; `blr x2`
    fn try_closure_call(&mut self) -> bool {
        let i0 = self.cur();
        let (args_reg, mem) = match self.pool_load(i0) {
            Some(t) => t,
            None => return false,
        };
        if args_reg.num() != abi::ARGS_DESC.num() {
            return false;
        }
        let (num_args, num_type_args) = match self.env.pool.at(mem.offset) {
            Some(entry) => match &entry.value {
                crate::pool::PoolValue::ArgsDesc {
                    num_args,
                    num_type_args,
                } => (*num_args, *num_type_args),
                _ => return false,
            },
            None => return false,
        };
        let entry_reg = match self.insn(1) {
            Some(i1) if i1.is("ldur") => match (i1.reg(0), i1.mem(1)) {
                (Some(r), Some(m)) if m.offset == layout::CLOSURE_ENTRY_POINT_DISP => r,
                _ => return false,
            },
            _ => return false,
        };
        let branches = self.insn(2).map_or(false, |i2| {
            i2.is("blr") && i2.reg(0).map_or(false, |r| r.aliases(entry_reg))
        });
        if !branches {
            return false;
        }
        self.regs.clear_caller_saved();
        self.regs.set(
            Register::x(0),
            VarItem::new(VarStorage::Call, VarValue::expression("ClosureCall()")),
        );
        self.emit(
            3,
            ILOp::ClosureCall {
                num_args,
                num_type_args,
            },
        );
        true
    }

    // --- object pool -----------------------------------------------------

    /// Match `ldr r, [PP, #off]` and yield `(r, mem)`.
    fn pool_load(&self, insn: &AsmInstruction) -> Option<(Register, MemOperand)> {
        if !(insn.is("ldr") || insn.is("ldur")) {
            return None;
        }
        let r = insn.reg(0)?;
        let mem = insn.mem(1)?;
        (mem.base == abi::PP && mem.index.is_none() && mem.writeback == Writeback::None)
            .then(|| (r, mem))
    }

    fn pool_value_at(&self, offset: i64) -> VarValue {
        match self.env.pool.at(offset) {
            Some(entry) => entry.to_value(),
            None => {
                debug!("Pool slot missing from the walk"; "offset" => offset);
                VarValue::expression(format!("PP_{:#x}", offset))
            }
        }
    }

    /// Pool-relative loads and stores, including the two-instruction form
    /// used for offsets beyond the immediate range.
    fn try_pool_access(&mut self) -> bool {
        let i0 = self.cur();
        // Store into the pool.
        if i0.is("str") || i0.is("stur") {
            if let (Some(src), Some(mem)) = (i0.reg(0), i0.mem(1)) {
                if mem.base == abi::PP && mem.index.is_none() {
                    self.emit(
                        1,
                        ILOp::StoreObjectPool {
                            src,
                            offset: mem.offset,
                        },
                    );
                    return true;
                }
            }
        }
        // Plain load.
        if let Some((dst, mem)) = self.pool_load(i0) {
            let value = self.pool_value_at(mem.offset);
            self.regs
                .set(dst, VarItem::new(VarStorage::Pool(mem.offset), value.clone()));
            self.emit(
                1,
                ILOp::LoadValue {
                    dst,
                    item: VarItem::new(VarStorage::Pool(mem.offset), value),
                },
            );
            return true;
        }
        // Far load: `add t, PP, #high` ; `ldr dst, [t, #low]`.
        if i0.is("add") {
            if let (Some(t), Some(base), Some(high)) = (i0.reg(0), i0.reg(1), i0.imm(2)) {
                if base == abi::PP {
                    if let Some(i1) = self.insn(1) {
                        if i1.is("ldr") || i1.is("ldur") {
                            if let (Some(dst), Some(mem)) = (i1.reg(0), i1.mem(1)) {
                                if mem.base.aliases(t) && mem.index.is_none() {
                                    let offset = high + mem.offset;
                                    let value = self.pool_value_at(offset);
                                    self.regs.clear(t);
                                    self.regs.set(
                                        dst,
                                        VarItem::new(VarStorage::Pool(offset), value.clone()),
                                    );
                                    self.emit(
                                        2,
                                        ILOp::LoadValue {
                                            dst,
                                            item: VarItem::new(VarStorage::Pool(offset), value),
                                        },
                                    );
                                    return true;
                                }
                            }
                        }
                    }
                }
            }
        }
        false
    }

    // --- thread structure ------------------------------------------------

    /// `ldr t, [THR, #field_table_values]` followed by a load or store
    /// through `t` reaches the static field table.
    fn try_static_field(&mut self) -> bool {
        let i0 = self.cur();
        if !i0.is("ldr") {
            return false;
        }
        let (tbl, mem) = match (i0.reg(0), i0.mem(1)) {
            (Some(r), Some(m)) => (r, m),
            _ => return false,
        };
        if !(mem.base == abi::THR
            && self.env.thread.offset_name(mem.offset) == Some("field_table_values"))
        {
            return false;
        }
        let i1 = match self.insn(1) {
            Some(i) => i,
            None => return false,
        };
        let (r, m, is_load) = match mem_access(i1) {
            Some(t) => t,
            None => return false,
        };
        if !(m.base.aliases(tbl) && m.index.is_none() && m.writeback == Writeback::None) {
            return false;
        }
        self.regs.clear(tbl);
        if is_load {
            self.regs.set(
                r,
                VarItem::new(
                    VarStorage::Static(m.offset),
                    VarValue::expression(format!("static_{:#x}", m.offset)),
                ),
            );
            self.emit(
                2,
                ILOp::LoadStaticField {
                    dst: r,
                    field_offset: m.offset,
                },
            );
        } else {
            self.emit(
                2,
                ILOp::StoreStaticField {
                    val: r,
                    field_offset: m.offset,
                },
            );
        }
        true
    }

    /// `ldr tmp, [THR, #leaf_entry]` ; `blr tmp`, with the preceding
    /// parameter-setup moves folded in.
    fn try_leaf_runtime_call(&mut self) -> bool {
        let i0 = self.cur();
        if !i0.is("ldr") {
            return false;
        }
        let (tmp, mem) = match (i0.reg(0), i0.mem(1)) {
            (Some(r), Some(m)) => (r, m),
            _ => return false,
        };
        if mem.base != abi::THR {
            return false;
        }
        let branches = self.insn(1).map_or(false, |i1| {
            i1.is("blr") && i1.reg(0).map_or(false, |r| r.aliases(tmp))
        });
        if !branches {
            return false;
        }
        let thr_offset = mem.offset;
        let name = self.env.thread.offset_name(thr_offset).map(String::from);
        let info = self.env.thread.leaf_function(thr_offset).cloned();

        // Fold the contiguous chain of MoveReg nodes directly before us.
        let mut moves: Vec<ILInstr> = vec![];
        let mut start = i0.address;
        if CONFIG.fold_leaf_call_parameter_moves {
            while let Some(last) = self.out.last() {
                if last.kind() == ILKind::MoveReg && last.end() == start {
                    start = last.start();
                    moves.push(self.out.pop().unwrap());
                } else {
                    break;
                }
            }
            moves.reverse();
        }

        let end = self.insn(1).unwrap().end_address();
        self.pos += 2;
        self.regs.clear_caller_saved();
        let result = match &name {
            Some(n) => format!("{}()", n),
            None => format!("thr_{:#x}()", thr_offset),
        };
        self.regs.set(
            Register::x(0),
            VarItem::new(VarStorage::Call, VarValue::expression(result)),
        );
        self.push(ILInstr::new(
            AddrRange::new(start, end),
            ILOp::CallLeafRuntime {
                thr_offset,
                name,
                info,
                moves,
            },
        ));
        true
    }

    /// Any other named thread-slot load becomes a `LoadValue` of a symbolic
    /// thread field.
    fn try_thread_load(&mut self) -> bool {
        let i0 = self.cur();
        if !i0.is("ldr") {
            return false;
        }
        let (dst, mem) = match (i0.reg(0), i0.mem(1)) {
            (Some(r), Some(m)) => (r, m),
            _ => return false,
        };
        if mem.base != abi::THR || mem.index.is_some() {
            return false;
        }
        let text = match self.env.thread.offset_name(mem.offset) {
            Some(name) => format!("thr_{}", name),
            None => format!("thr_{:#x}", mem.offset),
        };
        self.regs.set(
            dst,
            VarItem::new(
                VarStorage::Thread(mem.offset),
                VarValue::expression(text.clone()),
            ),
        );
        self.emit(
            1,
            ILOp::LoadValue {
                dst,
                item: VarItem::new(VarStorage::Thread(mem.offset), VarValue::expression(text)),
            },
        );
        true
    }

    // --- calls -----------------------------------------------------------

    /// Dispatch-table call: selector offset into `x16`, table load indexed by
    /// the receiver cid, indirect branch.
    fn try_gdt_call(&mut self) -> bool {
        let i0 = self.cur();
        let (offset, add_at) = if i0.is("movz")
            && i0.reg(0).map_or(false, |r| r.num() == abi::TMP2.num())
        {
            let sel = match i0.imm(1) {
                Some(v) => v,
                None => return false,
            };
            let adds = self.insn(1).map_or(false, |i1| {
                i1.is("add")
                    && i1.reg(0).map_or(false, |r| r.num() == abi::TMP.num())
                    && i1.reg(1).map_or(false, |r| r.num() == abi::GDT_CID.num())
                    && i1.reg(2).map_or(false, |r| r.num() == abi::TMP2.num())
            });
            if !adds {
                return false;
            }
            (sel, 2)
        } else if i0.is("add")
            && i0.reg(0).map_or(false, |r| r.num() == abi::TMP.num())
            && i0.reg(1).map_or(false, |r| r.num() == abi::GDT_CID.num())
        {
            match i0.imm(2) {
                Some(sel) => (sel, 1),
                None => return false,
            }
        } else {
            return false;
        };
        let table_load = self.insn(add_at).map_or(false, |i| {
            i.is("ldr")
                && i.reg(0).map_or(false, |r| r.num() == abi::TMP.num())
                && i.mem(1).map_or(false, |m| {
                    m.base == abi::DISPATCH_TABLE
                        && matches!(m.index, Some((idx, Shift::Lsl, 3)) if idx.num() == abi::TMP.num())
                })
        });
        if !table_load {
            return false;
        }
        let branches = self.insn(add_at + 1).map_or(false, |i| {
            i.is("blr") && i.reg(0).map_or(false, |r| r.num() == abi::TMP.num())
        });
        if !branches {
            return false;
        }
        self.regs.clear_caller_saved();
        self.regs.set(
            Register::x(0),
            VarItem::new(
                VarStorage::Call,
                VarValue::expression(format!("GDT[cid_x0 + {:#x}]()", offset)),
            ),
        );
        self.emit(add_at + 2, ILOp::GdtCall { offset });
        true
    }

    /// `bl target`: stub calls turn into their idiom nodes, everything else
    /// is a direct call, resolved against the function database when
    /// possible.
    fn try_direct_call(&mut self) -> bool {
        let i0 = self.cur();
        if !i0.is("bl") {
            return false;
        }
        let addr = match i0.address_op(0) {
            Some(a) => a,
            None => return false,
        };
        let target = self.env.functions.get(addr);

        if let Some(fun) = &target {
            match fun.stub_kind() {
                Some(StubKind::AllocateObject(class_id)) => {
                    if let Some(cls) = self.env.classes.get(*class_id) {
                        let dst = Register::x(0);
                        self.regs
                            .set(dst, VarItem::in_register(dst, VarValue::Instance(Rc::clone(&cls))));
                        self.emit(1, ILOp::AllocateObject { dst, cls });
                        return true;
                    }
                }
                Some(StubKind::WriteBarrier) | Some(StubKind::ArrayWriteBarrier) => {
                    let from_stub = fun.stub_kind() == Some(&StubKind::ArrayWriteBarrier);
                    let (obj, val, is_array) = match self.out.last().map(|il| il.op()) {
                        Some(ILOp::StoreField { val, obj, .. }) => (*obj, *val, from_stub),
                        Some(ILOp::StoreArrayElement { val, arr, .. }) => (*arr, *val, true),
                        _ => (Register::x(1), Register::x(0), from_stub),
                    };
                    self.emit(1, ILOp::WriteBarrier { obj, val, is_array });
                    return true;
                }
                Some(StubKind::TypeCheck) => {
                    // Reached when the type was loaded further back; fall back
                    // to whatever x8 currently holds.
                    let type_name = match self.regs.value(Register::x(8)) {
                        Some(v @ VarValue::Type(_))
                        | Some(v @ VarValue::FunctionType(_))
                        | Some(v @ VarValue::RecordType(_))
                        | Some(v @ VarValue::TypeParameter(_)) => v.to_string(),
                        _ => "?".into(),
                    };
                    self.emit(
                        1,
                        ILOp::TestType {
                            src: Register::x(0),
                            type_name,
                        },
                    );
                    return true;
                }
                Some(StubKind::InitAsync) => {
                    let ret_type = match self.regs.value(Register::x(0)) {
                        Some(VarValue::Type(ty)) => Rc::clone(ty),
                        _ => Rc::new(DartType {
                            name: "dynamic".into(),
                        }),
                    };
                    self.regs.clear_caller_saved();
                    self.regs.set(
                        Register::x(0),
                        VarItem::new(VarStorage::Call, VarValue::expression("InitAsync()")),
                    );
                    self.emit(1, ILOp::InitAsync { ret_type });
                    return true;
                }
                _ => {}
            }
        }

        self.regs.clear_caller_saved();
        let result = match &target {
            Some(fun) => format!("{}()", fun.name),
            None => format!("call_{:#x}()", addr),
        };
        self.regs.set(
            Register::x(0),
            VarItem::new(VarStorage::Call, VarValue::expression(result)),
        );
        self.emit(1, ILOp::Call { target, addr });
        true
    }

    // --- heap accesses ---------------------------------------------------

    fn array_type_for(&self, arr: Register) -> ArrayType {
        match self.regs.value(arr) {
            Some(VarValue::Array { .. }) | Some(VarValue::GrowableArray { .. }) => ArrayType::List,
            Some(VarValue::Instance(cls)) => {
                let n = cls.name.as_str();
                if n.starts_with("Int") && n.ends_with("List") {
                    ArrayType::TypedSigned
                } else if n.starts_with("Uint") && n.ends_with("List") {
                    ArrayType::TypedUnsigned
                } else if n.ends_with("List") {
                    ArrayType::TypedUnknown
                } else {
                    ArrayType::Unknown
                }
            }
            _ => ArrayType::Unknown,
        }
    }

    fn regs_holds_array(&self, arr: Register) -> bool {
        matches!(
            self.regs.value(arr),
            Some(VarValue::Array { .. }) | Some(VarValue::GrowableArray { .. })
        ) || self.array_type_for(arr) != ArrayType::Unknown
    }

    /// Indexed element access: an address computation followed by the data
    /// access, or a direct constant-index access into a known array.
    fn try_array_element(&mut self) -> bool {
        let i0 = self.cur();
        // `add t, arr, idx[, lsl #k]` ; access `[t, #data]`
        if i0.is("add") {
            let (t, arr) = match (i0.reg(0), i0.reg(1)) {
                (Some(t), Some(a)) => (t, a),
                _ => return false,
            };
            let idx = match (i0.reg(2), i0.shifted(2)) {
                (Some(r), _) => r,
                (None, Some((r, Shift::Lsl | Shift::Uxtw, _))) => r,
                _ => return false,
            };
            let i1 = match self.insn(1) {
                Some(i) => i,
                None => return false,
            };
            let (r, mem, is_load) = match mem_access(i1) {
                Some(t) => t,
                None => return false,
            };
            if !(mem.base.aliases(t)
                && mem.index.is_none()
                && (mem.offset == layout::ARRAY_DATA_DISP || mem.offset == 0x17))
            {
                return false;
            }
            let size = access_size(i1, r);
            let op = ArrayOp::new(size, is_load, self.array_type_for(arr));
            self.regs.clear(t);
            if is_load {
                self.regs.set(
                    r,
                    VarItem::in_register(
                        r,
                        VarValue::expression(format!("{}[{}]", arr, idx)),
                    ),
                );
                self.emit(
                    2,
                    ILOp::LoadArrayElement {
                        dst: r,
                        arr,
                        idx: VarStorage::Register(idx),
                        op,
                    },
                );
            } else {
                self.emit(
                    2,
                    ILOp::StoreArrayElement {
                        val: r,
                        arr,
                        idx: VarStorage::Register(idx),
                        op,
                    },
                );
            }
            return true;
        }
        // Constant index folded into the displacement.
        let (r, mem, is_load) = match mem_access(i0) {
            Some(t) => t,
            None => return false,
        };
        if !(mem.index.is_none()
            && mem.writeback == Writeback::None
            && mem.offset >= layout::ARRAY_DATA_DISP
            && self.regs_holds_array(mem.base))
        {
            return false;
        }
        let size = access_size(i0, r);
        let idx = (mem.offset - layout::ARRAY_DATA_DISP) / size as i64;
        let op = ArrayOp::new(size, is_load, self.array_type_for(mem.base));
        if is_load {
            self.regs.set(
                r,
                VarItem::in_register(r, VarValue::expression(format!("{}[{}]", mem.base, idx))),
            );
            self.emit(
                1,
                ILOp::LoadArrayElement {
                    dst: r,
                    arr: mem.base,
                    idx: VarStorage::SmallImm(idx),
                    op,
                },
            );
        } else {
            self.emit(
                1,
                ILOp::StoreArrayElement {
                    val: r,
                    arr: mem.base,
                    idx: VarStorage::SmallImm(idx),
                    op,
                },
            );
        }
        true
    }

    /// Object-relative load/store outside the header.
    fn try_field_access(&mut self) -> bool {
        let i0 = self.cur();
        let (r, mem, is_load) = match mem_access(i0) {
            Some(t) => t,
            None => return false,
        };
        let base = mem.base;
        if base.is_sp()
            || base.num() == 29
            || base == abi::PP
            || base == abi::THR
            || base == abi::DISPATCH_TABLE
            || base == abi::HEAP_BASE
        {
            return false;
        }
        if mem.index.is_some()
            || mem.writeback != Writeback::None
            || mem.offset < layout::FIRST_FIELD_DISP
        {
            return false;
        }
        if is_load {
            self.regs.set(
                r,
                VarItem::new(
                    VarStorage::Field,
                    VarValue::expression(format!("{}->field_{:x}", base, mem.offset)),
                ),
            );
            self.emit(
                1,
                ILOp::LoadField {
                    dst: r,
                    obj: base,
                    offset: mem.offset,
                },
            );
        } else {
            self.emit(
                1,
                ILOp::StoreField {
                    val: r,
                    obj: base,
                    offset: mem.offset,
                },
            );
        }
        true
    }

    // --- frame-relative accesses -----------------------------------------

    /// Spill/reload through negative frame offsets (the register save area).
    fn try_save_restore(&mut self) -> bool {
        let i0 = self.cur();
        let (r, mem, is_load) = match mem_access(i0) {
            Some(t) => t,
            None => return false,
        };
        if mem.base.num() != 29
            || mem.offset >= 0
            || mem.index.is_some()
            || mem.writeback != Writeback::None
        {
            return false;
        }
        if is_load {
            self.regs.clear(r);
            self.emit(1, ILOp::RestoreRegister { dst: r });
        } else {
            self.emit(1, ILOp::SaveRegister { src: r });
        }
        true
    }

    /// `ldr r, [fp, #pos]`: a caller argument. The first two slots above the
    /// frame pointer are the saved frame.
    fn try_argument_load(&mut self) -> bool {
        let i0 = self.cur();
        let (r, mem, is_load) = match mem_access(i0) {
            Some(t) => t,
            None => return false,
        };
        if !(is_load
            && mem.base.num() == 29
            && mem.offset >= 2 * layout::WORD_SIZE
            && mem.index.is_none())
        {
            return false;
        }
        let idx = ((mem.offset - 2 * layout::WORD_SIZE) / layout::WORD_SIZE) as i32;
        let item = VarItem::new(VarStorage::Argument(idx), VarValue::Param { idx });
        self.regs.set(r, item.clone());
        self.emit(1, ILOp::LoadValue { dst: r, item });
        true
    }

    // --- moves and the rest ----------------------------------------------

    /// `mov d, s` or `orr d, xzr, s`.
    fn try_move_reg(&mut self) -> bool {
        let i0 = self.cur();
        let (dst, src) = if i0.is("mov") {
            match (i0.reg(0), i0.reg(1)) {
                (Some(d), Some(s)) => (d, s),
                _ => return false,
            }
        } else if i0.is("orr") {
            match (i0.reg(0), i0.reg(1), i0.reg(2)) {
                (Some(d), Some(z), Some(s)) if z.is_zr() => (d, s),
                _ => return false,
            }
        } else {
            return false;
        };
        if dst.is_sp() || src.is_sp() || dst.is_zr() || src.is_zr() {
            return false;
        }
        let moved = self
            .regs
            .get(src)
            .map(|item| item.clone().move_to(VarStorage::Register(dst)));
        match moved {
            Some(item) => self.regs.set(dst, item),
            None => self.regs.clear(dst),
        }
        self.emit(1, ILOp::MoveReg { dst, src });
        true
    }

    /// `movz d, #imm` / `mov d, #imm`.
    fn try_load_imm(&mut self) -> bool {
        let i0 = self.cur();
        if !(i0.is("movz") || i0.is("mov")) {
            return false;
        }
        let (dst, val) = match (i0.reg(0), i0.imm(1)) {
            (Some(d), Some(v)) => (d, v),
            _ => return false,
        };
        let item = VarItem::new(
            VarStorage::Immediate,
            VarValue::Integer {
                val,
                int_type_id: cid::INT,
                known: true,
            },
        );
        self.regs.set(dst, item.clone());
        self.emit(1, ILOp::LoadValue { dst, item });
        true
    }

    fn try_return(&mut self) -> bool {
        if !self.cur().is("ret") {
            return false;
        }
        self.emit(1, ILOp::Return);
        true
    }

    fn emit_unknown(&mut self) {
        let i0 = self.cur();
        trace!("No recognizer matched"; "mnemonic" => %i0.mnemonic, "address" => i0.address);
        // Whatever the instruction wrote is no longer known.
        let writes = !matches!(
            i0.mnemonic.as_str(),
            "b" | "bl" | "blr" | "br" | "cmp" | "cmn" | "tst" | "ret" | "tbz" | "tbnz" | "cbz"
                | "cbnz" | "brk"
        ) && !i0.mnemonic.starts_with("st");
        let written = if writes { i0.reg(0) } else { None };
        let asm = i0.mnemonic.clone();
        if let Some(r) = written {
            self.regs.clear(r);
        }
        self.emit(1, ILOp::Unknown { asm });
    }
}
