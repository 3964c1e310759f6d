//! The intermediate language the lifter emits.
//!
//! Each node stands for one recognized runtime idiom and covers the address
//! range of the machine instructions it was lifted from. Nodes are immutable
//! once built and own their payloads exclusively; composite nodes own their
//! sub-nodes, which never escape or get shared.

use crate::dart_meta::{DartClass, DartField, DartFn, DartType};
use crate::disasm::Register;
use crate::thread_info::LeafFunctionInfo;
use crate::values::{VarItem, VarStorage};
use itertools::Itertools;
use std::rc::Rc;

/// Byte-exclusive address range `[start, end)` of the machine instructions a
/// node was lifted from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AddrRange {
    pub start: u64,
    pub end: u64,
}

impl AddrRange {
    pub fn new(start: u64, end: u64) -> Self {
        assert!(
            start < end && (end - start) % 4 == 0,
            "Bad IL address range {:#x}..{:#x}",
            start,
            end
        );
        Self { start, end }
    }

    pub fn contains(&self, other: &AddrRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Element access shape of an array load/store.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ArrayOp {
    /// Element size in bytes; zero means "not an array op".
    pub size: u8,
    pub is_load: bool,
    pub arr_type: ArrayType,
}

/// What kind of array an element access goes through.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArrayType {
    List,
    TypedUnknown,
    TypedSigned,
    TypedUnsigned,
    /// Might be an object, a list, or typed data.
    Unknown,
}

impl ArrayOp {
    pub fn new(size: u8, is_load: bool, arr_type: ArrayType) -> Self {
        Self {
            size,
            is_load,
            arr_type,
        }
    }

    pub fn is_array_op(&self) -> bool {
        self.size != 0
    }

    /// log2 of the element size, or 255 for an unrecognized size.
    pub fn size_log2(&self) -> u8 {
        match self.size {
            8 => 3,
            4 => 2,
            2 => 1,
            1 => 0,
            _ => 255,
        }
    }
}

impl std::fmt::Display for ArrayOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.arr_type {
            ArrayType::List => write!(f, "List_{}", self.size),
            ArrayType::TypedUnknown => write!(f, "TypeUnknown_{}", self.size),
            ArrayType::TypedSigned => write!(f, "TypedSigned_{}", self.size),
            ArrayType::TypedUnsigned => write!(f, "TypedUnsigned_{}", self.size),
            ArrayType::Unknown => write!(f, "Unknown_{}", self.size),
        }
    }
}

/// One marshaled parameter: which argument landed where.
#[derive(Clone, Debug)]
pub struct FnParam {
    pub idx: i32,
    pub storage: VarStorage,
}

impl std::fmt::Display for FnParam {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "arg{} = {}", self.idx, self.storage.name())
    }
}

/// The parameter-marshaling summary carried by a `SetupParameters` node.
#[derive(Clone, Debug, Default)]
pub struct FnParams {
    pub params: Vec<FnParam>,
}

impl std::fmt::Display for FnParams {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.params.iter().map(|p| p.to_string()).join(", "))
    }
}

/// Payload of an IL node. One variant per recognized operation.
#[derive(Debug)]
pub enum ILOp {
    /// No recognizer matched; covers exactly one machine instruction.
    Unknown { asm: String },
    /// Standard two-instruction prolog collapsed.
    EnterFrame,
    /// Standard two-instruction epilog collapsed.
    LeaveFrame,
    AllocateStack { size: u32 },
    /// Safepoint check; `overflow_branch` is the slow-path target.
    CheckStackOverflow { overflow_branch: u64 },
    /// Call of a leaf runtime helper through a thread slot, together with the
    /// parameter-setup moves folded into it. Every element of `moves` is a
    /// [`ILOp::MoveReg`] node.
    CallLeafRuntime {
        thr_offset: i64,
        name: Option<String>,
        info: Option<LeafFunctionInfo>,
        moves: Vec<ILInstr>,
    },
    /// Materialize a known value into a register.
    LoadValue { dst: Register, item: VarItem },
    /// Write a register back into an object-pool slot.
    StoreObjectPool { src: Register, offset: i64 },
    ClosureCall { num_args: i32, num_type_args: i32 },
    MoveReg { dst: Register, src: Register },
    /// Explicit upper-half fixup of a compressed pointer.
    DecompressPointer { dst: VarStorage },
    SaveRegister { src: Register },
    RestoreRegister { dst: Register },
    SetupParameters { params: FnParams },
    InitAsync { ret_type: Rc<DartType> },
    /// Dispatch-table call indexed by the receiver's class id plus a literal
    /// selector offset.
    GdtCall { offset: i64 },
    /// Direct call. `target` is `None` when the address resolves to nothing
    /// in the function database.
    Call {
        target: Option<Rc<DartFn>>,
        addr: u64,
    },
    Return,
    BranchIfSmi { obj: Register, branch_addr: u64 },
    LoadClassId { obj: Register, cid_reg: Register },
    /// `cid = is_smi(obj) ? tagged(smi_cid) : load_class_id(obj)`, collapsed
    /// from its three component patterns, which it owns.
    LoadTaggedClassIdMayBeSmi {
        tagged_cid_reg: Register,
        obj: Register,
        load_imm: Box<ILInstr>,
        branch_if_smi: Box<ILInstr>,
        load_class_id: Box<ILInstr>,
    },
    BoxInt64 { obj: Register, src: Register },
    LoadInt32 { dst: Register, src_obj: Register },
    /// Inline allocation with the slow path elided.
    AllocateObject { dst: Register, cls: Rc<DartClass> },
    LoadArrayElement {
        dst: Register,
        arr: Register,
        idx: VarStorage,
        op: ArrayOp,
    },
    StoreArrayElement {
        val: Register,
        arr: Register,
        idx: VarStorage,
        op: ArrayOp,
    },
    /// Untyped in-object load; `offset` is the raw access displacement.
    LoadField {
        dst: Register,
        obj: Register,
        offset: i64,
    },
    StoreField {
        val: Register,
        obj: Register,
        offset: i64,
    },
    InitLateStaticField {
        dst: VarStorage,
        field: Rc<DartField>,
    },
    LoadStaticField { dst: Register, field_offset: i64 },
    StoreStaticField { val: Register, field_offset: i64 },
    WriteBarrier {
        obj: Register,
        val: Register,
        is_array: bool,
    },
    TestType { src: Register, type_name: String },
}

/// Discriminant of an [`ILOp`], for cheap kind checks.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ILKind {
    Unknown,
    EnterFrame,
    LeaveFrame,
    AllocateStack,
    CheckStackOverflow,
    CallLeafRuntime,
    LoadValue,
    StoreObjectPool,
    ClosureCall,
    MoveReg,
    DecompressPointer,
    SaveRegister,
    RestoreRegister,
    SetupParameters,
    InitAsync,
    GdtCall,
    Call,
    Return,
    BranchIfSmi,
    LoadClassId,
    LoadTaggedClassIdMayBeSmi,
    BoxInt64,
    LoadInt32,
    AllocateObject,
    LoadArrayElement,
    StoreArrayElement,
    LoadField,
    StoreField,
    InitLateStaticField,
    LoadStaticField,
    StoreStaticField,
    WriteBarrier,
    TestType,
}

/// An emitted IL node: operation plus source address range.
#[derive(Debug)]
pub struct ILInstr {
    range: AddrRange,
    op: ILOp,
}

impl ILInstr {
    pub fn new(range: AddrRange, op: ILOp) -> Self {
        let il = Self { range, op };
        il.confirm_valid();
        il
    }

    pub fn op(&self) -> &ILOp {
        &self.op
    }

    pub fn start(&self) -> u64 {
        self.range.start
    }

    pub fn end(&self) -> u64 {
        self.range.end
    }

    pub fn range(&self) -> AddrRange {
        self.range
    }

    pub fn kind(&self) -> ILKind {
        match &self.op {
            ILOp::Unknown { .. } => ILKind::Unknown,
            ILOp::EnterFrame => ILKind::EnterFrame,
            ILOp::LeaveFrame => ILKind::LeaveFrame,
            ILOp::AllocateStack { .. } => ILKind::AllocateStack,
            ILOp::CheckStackOverflow { .. } => ILKind::CheckStackOverflow,
            ILOp::CallLeafRuntime { .. } => ILKind::CallLeafRuntime,
            ILOp::LoadValue { .. } => ILKind::LoadValue,
            ILOp::StoreObjectPool { .. } => ILKind::StoreObjectPool,
            ILOp::ClosureCall { .. } => ILKind::ClosureCall,
            ILOp::MoveReg { .. } => ILKind::MoveReg,
            ILOp::DecompressPointer { .. } => ILKind::DecompressPointer,
            ILOp::SaveRegister { .. } => ILKind::SaveRegister,
            ILOp::RestoreRegister { .. } => ILKind::RestoreRegister,
            ILOp::SetupParameters { .. } => ILKind::SetupParameters,
            ILOp::InitAsync { .. } => ILKind::InitAsync,
            ILOp::GdtCall { .. } => ILKind::GdtCall,
            ILOp::Call { .. } => ILKind::Call,
            ILOp::Return => ILKind::Return,
            ILOp::BranchIfSmi { .. } => ILKind::BranchIfSmi,
            ILOp::LoadClassId { .. } => ILKind::LoadClassId,
            ILOp::LoadTaggedClassIdMayBeSmi { .. } => ILKind::LoadTaggedClassIdMayBeSmi,
            ILOp::BoxInt64 { .. } => ILKind::BoxInt64,
            ILOp::LoadInt32 { .. } => ILKind::LoadInt32,
            ILOp::AllocateObject { .. } => ILKind::AllocateObject,
            ILOp::LoadArrayElement { .. } => ILKind::LoadArrayElement,
            ILOp::StoreArrayElement { .. } => ILKind::StoreArrayElement,
            ILOp::LoadField { .. } => ILKind::LoadField,
            ILOp::StoreField { .. } => ILKind::StoreField,
            ILOp::InitLateStaticField { .. } => ILKind::InitLateStaticField,
            ILOp::LoadStaticField { .. } => ILKind::LoadStaticField,
            ILOp::StoreStaticField { .. } => ILKind::StoreStaticField,
            ILOp::WriteBarrier { .. } => ILKind::WriteBarrier,
            ILOp::TestType { .. } => ILKind::TestType,
        }
    }

    /// Confirms the structural validity of the node. Panics if invalid.
    pub fn confirm_valid(&self) {
        assert!(
            self.range.start < self.range.end && (self.range.end - self.range.start) % 4 == 0,
            "Bad IL address range {:#x}..{:#x} for {:?}",
            self.range.start,
            self.range.end,
            self.kind()
        );
        match &self.op {
            ILOp::CallLeafRuntime { moves, .. } => {
                for m in moves {
                    assert_eq!(
                        m.kind(),
                        ILKind::MoveReg,
                        "CallLeafRuntime may only fold MoveReg nodes, got {:?}",
                        m.kind()
                    );
                    assert!(
                        self.range.contains(&m.range),
                        "Folded move {:#x}..{:#x} escapes its composite {:#x}..{:#x}",
                        m.start(),
                        m.end(),
                        self.start(),
                        self.end()
                    );
                }
            }
            ILOp::LoadTaggedClassIdMayBeSmi {
                load_imm,
                branch_if_smi,
                load_class_id,
                ..
            } => {
                assert_eq!(load_imm.kind(), ILKind::LoadValue);
                assert_eq!(branch_if_smi.kind(), ILKind::BranchIfSmi);
                assert_eq!(load_class_id.kind(), ILKind::LoadClassId);
                for child in [load_imm, branch_if_smi, load_class_id] {
                    assert!(
                        self.range.contains(&child.range),
                        "Composite child {:#x}..{:#x} escapes {:#x}..{:#x}",
                        child.start(),
                        child.end(),
                        self.start(),
                        self.end()
                    );
                }
            }
            _ => {}
        }
    }
}

impl std::fmt::Display for ILInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.op {
            ILOp::Unknown { .. } => write!(f, "unknown"),
            ILOp::EnterFrame => write!(f, "EnterFrame"),
            ILOp::LeaveFrame => write!(f, "LeaveFrame"),
            ILOp::AllocateStack { size } => write!(f, "AllocStack({:#x})", size),
            ILOp::CheckStackOverflow { .. } => write!(f, "CheckStackOverflow"),
            ILOp::CallLeafRuntime {
                thr_offset,
                name,
                info,
                ..
            } => match (name, info) {
                (Some(name), Some(info)) => write!(
                    f,
                    "CallRuntime_{}({}) -> {}",
                    name, info.params, info.return_type
                ),
                // Offset known by name but absent from the leaf table, or not
                // known at all; keep rendering total either way.
                (Some(name), None) => write!(f, "CallRuntime_{}(?) -> ?", name),
                (None, _) => write!(f, "CallRuntime_thr_{:#x}(?) -> ?", thr_offset),
            },
            ILOp::LoadValue { dst, item } => write!(f, "{} = {}", dst, item.name()),
            ILOp::StoreObjectPool { src, offset } => {
                write!(f, "[PP+{:#x}] = {}", offset, src)
            }
            ILOp::ClosureCall { .. } => write!(f, "ClosureCall"),
            ILOp::MoveReg { dst, src } => write!(f, "{} = {}", dst, src),
            ILOp::DecompressPointer { dst } => write!(f, "DecompressPointer {}", dst.name()),
            ILOp::SaveRegister { src } => write!(f, "SaveReg {}", src),
            ILOp::RestoreRegister { dst } => write!(f, "RestoreReg {}", dst),
            ILOp::SetupParameters { params } => write!(f, "SetupParameters({})", params),
            ILOp::InitAsync { ret_type } => write!(f, "InitAsync() -> {}", ret_type),
            ILOp::GdtCall { offset } => write!(f, "r0 = GDT[cid_x0 + {:#x}]()", offset),
            ILOp::Call { target, addr } => match target {
                Some(fun) => write!(f, "r0 = {}()", fun.name),
                None => write!(f, "r0 = call {:#x}", addr),
            },
            ILOp::Return => write!(f, "ret"),
            ILOp::BranchIfSmi { obj, branch_addr } => {
                write!(f, "branchIfSmi({}, {:#x})", obj, branch_addr)
            }
            ILOp::LoadClassId { obj, cid_reg } => {
                write!(f, "{} = LoadClassId({})", cid_reg, obj)
            }
            ILOp::LoadTaggedClassIdMayBeSmi {
                tagged_cid_reg,
                obj,
                ..
            } => write!(f, "{} = LoadTaggedClassIdMayBeSmi({})", tagged_cid_reg, obj),
            ILOp::BoxInt64 { obj, src } => write!(f, "{} = BoxInt64({})", obj, src),
            ILOp::LoadInt32 { dst, src_obj } => write!(f, "{} = LoadInt32({})", dst, src_obj),
            ILOp::AllocateObject { dst, cls } => {
                write!(f, "{} = inline_Allocate{}()", dst, cls.name)
            }
            ILOp::LoadArrayElement { dst, arr, idx, op } => {
                write!(f, "ArrayLoad: {} = {}[{}]  ; {}", dst, arr, idx.name(), op)
            }
            ILOp::StoreArrayElement { val, arr, idx, op } => {
                write!(f, "ArrayStore: {}[{}] = {}  ; {}", arr, idx.name(), val, op)
            }
            ILOp::LoadField { dst, obj, offset } => {
                write!(f, "LoadField: {} = {}->field_{:x}", dst, obj, offset)
            }
            ILOp::StoreField { val, obj, offset } => {
                write!(f, "StoreField: {}->field_{:x} = {}", obj, offset, val)
            }
            ILOp::InitLateStaticField { dst, field } => write!(
                f,
                "{} = InitLateStaticField({:#x}) // {}",
                dst.name(),
                field.offset,
                field.full_name()
            ),
            ILOp::LoadStaticField { dst, field_offset } => {
                write!(f, "{} = LoadStaticField({:#x})", dst, field_offset)
            }
            ILOp::StoreStaticField { val, field_offset } => {
                write!(f, "StoreStaticField({:#x}, {})", field_offset, val)
            }
            ILOp::WriteBarrier { obj, val, is_array } => write!(
                f,
                "{}WriteBarrier(obj = {}, val = {})",
                if *is_array { "Array" } else { "" },
                obj,
                val
            ),
            ILOp::TestType { src, type_name } => write!(f, "{} as {}", src, type_name),
        }
    }
}
