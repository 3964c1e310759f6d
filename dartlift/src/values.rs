//! The symbolic values the lifter tracks, and where they live.
//!
//! A [`VarValue`] says what a register or memory slot is known to hold at a
//! program point: a constant pulled from the object pool, a tagged small
//! integer, a freshly allocated instance of a known class, a free-form
//! expression, and so on. A [`VarStorage`] says where that value currently
//! sits. A [`VarItem`] pairs the two and owns its value.

use crate::dart_meta::custom_type;
use crate::dart_meta::layout::SMI_TAG_SIZE;
use crate::dart_meta::{cid, TypeId};
use crate::dart_meta::{
    DartClass, DartField, DartFn, DartFunctionType, DartRecordType, DartType, DartTypeArguments,
    DartTypeParameter,
};
use crate::disasm::Register;
use std::rc::Rc;

/// Where a value lives.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VarStorage {
    /// Synthesized by the lifter, not anchored to any machine location.
    Expression,
    Register(Register),
    /// Stack slot, as a frame-pointer displacement.
    Local(i64),
    /// Caller argument by index.
    Argument(i32),
    /// Static field-table slot.
    Static(i64),
    /// Object-pool slot.
    Pool(i64),
    /// Thread-structure slot.
    Thread(i64),
    /// Temporary that only exists between the pieces of one machine
    /// instruction split into several IL nodes.
    InInstruction,
    Immediate,
    /// Small literal folded into an addressing mode (array index, offset).
    SmallImm(i64),
    /// Call return value.
    Call,
    /// Field access result.
    Field,
    Uninit,
}

impl VarStorage {
    pub fn is_immediate(&self) -> bool {
        matches!(self, VarStorage::Immediate)
    }

    /// Immediates and pool slots hold values fixed at compile time.
    pub fn is_predefined_value(&self) -> bool {
        matches!(self, VarStorage::Immediate | VarStorage::Pool(_))
    }

    /// Short stable mnemonic, used directly in IL output.
    pub fn name(&self) -> String {
        match self {
            VarStorage::Expression => "expr".into(),
            VarStorage::Register(r) => r.name(),
            VarStorage::Local(off) if *off < 0 => format!("fp-{:#x}", -off),
            VarStorage::Local(off) => format!("fp+{:#x}", off),
            VarStorage::Argument(idx) => format!("arg{}", idx),
            VarStorage::Static(off) => format!("static+{:#x}", off),
            VarStorage::Pool(off) => format!("PP+{:#x}", off),
            VarStorage::Thread(off) => format!("THR+{:#x}", off),
            VarStorage::InInstruction => "tmp".into(),
            VarStorage::Immediate => "imm".into(),
            VarStorage::SmallImm(v) => format!("smallimm({})", v),
            VarStorage::Call => "ret".into(),
            VarStorage::Field => "field".into(),
            VarStorage::Uninit => "uninit".into(),
        }
    }
}

impl PartialEq<Register> for VarStorage {
    /// "Is this storage that machine register?" View width does not matter:
    /// `w1` and `x1` are the same slot.
    fn eq(&self, reg: &Register) -> bool {
        matches!(self, VarStorage::Register(r) if r.aliases(*reg))
    }
}

impl std::fmt::Display for VarStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a storage slot is known to hold.
///
/// Every variant knows its declared type id ([`raw_type_id`](Self::raw_type_id));
/// a few report a more refined one ([`type_id`](Self::type_id)). "Having a
/// value" means the concrete constant is known, not merely the type.
#[derive(Clone, Debug)]
pub enum VarValue {
    Null,
    /// Known value, or `None` when only the type is known.
    Boolean(Option<bool>),
    /// `val` is the raw payload: still smi-tagged when `int_type_id` is
    /// [`cid::SMI`]. [`value`](Self::value) unshifts it.
    Integer {
        val: i64,
        int_type_id: TypeId,
        known: bool,
    },
    Double {
        val: f64,
        double_type_id: TypeId,
        known: bool,
    },
    Str(Option<String>),
    FunctionCode(Rc<DartFn>),
    Field(Rc<DartField>),
    /// Free-form expression text. `cid` starts at [`cid::ILLEGAL`] and may be
    /// refined by later recognizers.
    Expression { text: String, cid: TypeId },
    /// Either a concrete pool object (`ptr`), or an abstract array of
    /// `ele_type` with `length` (-1 when unknown).
    Array {
        ptr: Option<u64>,
        ele_type: Option<Rc<DartType>>,
        length: i64,
    },
    GrowableArray { ele_type: Option<Rc<DartType>> },
    UnlinkedCall(Rc<DartFn>),
    Instance(Rc<DartClass>),
    Type(Rc<DartType>),
    RecordType(Rc<DartRecordType>),
    TypeParameter(Rc<DartTypeParameter>),
    FunctionType(Rc<DartFunctionType>),
    TypeArguments(Rc<DartTypeArguments>),
    /// Marker for an uninitialized (late) object slot.
    Sentinel,
    SubtypeTestCache,
    /// A class id held as data, possibly already in smi form. Zero means the
    /// id is not known yet.
    Cid { cid: i32, is_smi: bool },
    /// Placeholder for function parameter `idx`.
    Param { idx: i32 },
}

impl VarValue {
    pub fn expression(text: impl Into<String>) -> Self {
        VarValue::Expression {
            text: text.into(),
            cid: cid::ILLEGAL,
        }
    }

    pub fn known_smi(value: i64) -> Self {
        VarValue::Integer {
            val: value << SMI_TAG_SIZE,
            int_type_id: cid::SMI,
            known: true,
        }
    }

    /// The declared type id of the variant.
    pub fn raw_type_id(&self) -> TypeId {
        match self {
            VarValue::Null => cid::NULL,
            VarValue::Boolean(_) => cid::BOOL,
            VarValue::Integer { .. } => cid::INT,
            VarValue::Double { .. } => cid::DOUBLE,
            VarValue::Str(_) => cid::STRING,
            VarValue::FunctionCode(_) => cid::FUNCTION,
            VarValue::Field(_) => cid::FIELD,
            VarValue::Expression { .. } => custom_type::EXPRESSION,
            VarValue::Array { .. } => cid::ARRAY,
            VarValue::GrowableArray { .. } => cid::GROWABLE_ARRAY,
            VarValue::UnlinkedCall(_) => cid::UNLINKED_CALL,
            VarValue::Instance(_) => cid::INSTANCE,
            VarValue::Type(_) => cid::TYPE,
            VarValue::RecordType(_) => cid::RECORD_TYPE,
            VarValue::TypeParameter(_) => cid::TYPE_PARAMETER,
            VarValue::FunctionType(_) => cid::FUNCTION_TYPE,
            VarValue::TypeArguments(_) => cid::TYPE_ARGUMENTS,
            VarValue::Sentinel => cid::SENTINEL,
            VarValue::SubtypeTestCache => cid::SUBTYPE_TEST_CACHE,
            VarValue::Cid { .. } => cid::CLASS,
            VarValue::Param { .. } => custom_type::PARAMETER,
        }
    }

    /// The most refined type id known for the value: an instance reports its
    /// class, an expression reports whatever cid has been attached to it.
    pub fn type_id(&self) -> TypeId {
        match self {
            VarValue::Instance(cls) => cls.id,
            VarValue::Expression { cid, .. } => *cid,
            _ => self.raw_type_id(),
        }
    }

    /// Whether the concrete value (not just the type) is known.
    pub fn has_value(&self) -> bool {
        match self {
            VarValue::Null => true,
            VarValue::Boolean(v) => v.is_some(),
            VarValue::Integer { known, .. } => *known,
            VarValue::Double { known, .. } => *known,
            VarValue::Str(s) => s.is_some(),
            VarValue::FunctionCode(_) | VarValue::Field(_) => true,
            VarValue::Expression { .. } => false,
            VarValue::Array { ptr, .. } => ptr.is_some(),
            VarValue::GrowableArray { .. } => false,
            VarValue::UnlinkedCall(_) | VarValue::Instance(_) => true,
            VarValue::Type(_)
            | VarValue::RecordType(_)
            | VarValue::TypeParameter(_)
            | VarValue::FunctionType(_)
            | VarValue::TypeArguments(_) => true,
            VarValue::Sentinel | VarValue::SubtypeTestCache => false,
            VarValue::Cid { cid, .. } => *cid != 0,
            VarValue::Param { .. } => false,
        }
    }

    /// The logical integer value: smis are unshifted, everything else is the
    /// raw payload. `None` when not an integer.
    pub fn integer_value(&self) -> Option<i64> {
        match self {
            VarValue::Integer {
                val, int_type_id, ..
            } => Some(if *int_type_id == cid::SMI {
                val >> SMI_TAG_SIZE
            } else {
                *val
            }),
            _ => None,
        }
    }

    /// View as an integer: `(raw value, refined int type, known)`.
    pub fn as_integer(&self) -> Option<(i64, TypeId, bool)> {
        match self {
            VarValue::Integer {
                val,
                int_type_id,
                known,
            } => Some((*val, *int_type_id, *known)),
            _ => None,
        }
    }

    pub fn as_param(&self) -> Option<i32> {
        match self {
            VarValue::Param { idx } => Some(*idx),
            _ => None,
        }
    }

    /// Narrow an integer's refined type id. Calling this on a non-integer is
    /// a programmer error.
    pub fn set_int_type(&mut self, tid: TypeId) {
        match self {
            VarValue::Integer { int_type_id, .. } => *int_type_id = tid,
            other => panic!("set_int_type on non-integer value {:?}", other),
        }
    }

    /// Narrow to smi iff the current refined id is still the broad integer
    /// id. A no-op on everything else.
    pub fn set_smi_if_int(&mut self) {
        if let VarValue::Integer { int_type_id, .. } = self {
            if *int_type_id == cid::INT {
                *int_type_id = cid::SMI;
            }
        }
    }

    /// Attach a refined cid to an expression. A no-op on everything else.
    pub fn set_expression_type(&mut self, new_cid: TypeId) {
        if let VarValue::Expression { cid, .. } = self {
            *cid = new_cid;
        }
    }
}

impl std::fmt::Display for VarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            VarValue::Null => write!(f, "Null"),
            VarValue::Boolean(v) => write!(f, "{}", v.unwrap_or(false)),
            VarValue::Integer { .. } => write!(f, "{}", self.integer_value().unwrap()),
            VarValue::Double { val, .. } => write!(f, "{}", val),
            VarValue::Str(Some(s)) => write!(f, "{:?}", s),
            VarValue::Str(None) => write!(f, "String"),
            VarValue::FunctionCode(fun) => write!(f, "{}", fun.full_name()),
            VarValue::Field(field) => write!(f, "{}", field.name),
            VarValue::Expression { text, .. } => write!(f, "{}", text),
            VarValue::Array {
                ptr: Some(ptr), ..
            } => write!(f, "Array_{:#x}", ptr),
            VarValue::Array {
                ele_type, length, ..
            } => {
                match ele_type {
                    Some(ty) => write!(f, "Array<{}>", ty)?,
                    None => write!(f, "Array")?,
                }
                if *length >= 0 {
                    write!(f, "[{}]", length)?;
                }
                Ok(())
            }
            VarValue::GrowableArray { .. } => write!(f, "GrowableArray"),
            VarValue::UnlinkedCall(stub) => write!(f, "UnlinkedCall_{:#x}", stub.addr),
            VarValue::Instance(cls) => write!(f, "Instance_{}", cls.name),
            VarValue::Type(ty) => write!(f, "{}", ty),
            VarValue::RecordType(ty) => write!(f, "{}", ty),
            VarValue::TypeParameter(ty) => write!(f, "{}", ty),
            VarValue::FunctionType(ty) => write!(f, "{}", ty),
            VarValue::TypeArguments(args) => write!(f, "{}", args),
            VarValue::Sentinel => write!(f, "Sentinel"),
            VarValue::SubtypeTestCache => write!(f, "SubtypeTestCache"),
            VarValue::Cid { cid, is_smi } => {
                if *is_smi {
                    write!(f, "TaggedCid_{}", cid >> SMI_TAG_SIZE)
                } else {
                    write!(f, "cid_{}", cid)
                }
            }
            VarValue::Param { idx } => write!(f, "arg{}", idx),
        }
    }
}

/// A storage slot together with the value it holds. The value is exclusively
/// owned; moving the item to another storage transfers that ownership.
#[derive(Clone, Debug)]
pub struct VarItem {
    pub storage: VarStorage,
    pub val: Option<Box<VarValue>>,
}

impl VarItem {
    pub fn new(storage: VarStorage, val: VarValue) -> Self {
        Self {
            storage,
            val: Some(Box::new(val)),
        }
    }

    pub fn unassigned(storage: VarStorage) -> Self {
        Self { storage, val: None }
    }

    pub fn in_register(reg: Register, val: VarValue) -> Self {
        Self::new(VarStorage::Register(reg), val)
    }

    pub fn storage(&self) -> VarStorage {
        self.storage
    }

    pub fn storage_name(&self) -> String {
        self.storage.name()
    }

    pub fn value(&self) -> Option<&VarValue> {
        self.val.as_deref()
    }

    pub fn value_mut(&mut self) -> Option<&mut VarValue> {
        self.val.as_deref_mut()
    }

    pub fn take_value(&mut self) -> Option<Box<VarValue>> {
        self.val.take()
    }

    /// Transfer the owned value into a new storage.
    pub fn move_to(mut self, storage: VarStorage) -> VarItem {
        VarItem {
            storage,
            val: self.val.take(),
        }
    }

    pub fn value_type_id(&self) -> Option<TypeId> {
        self.value().map(|v| v.raw_type_id())
    }

    /// The value text, or a diagnostic marker when no value was ever
    /// assigned. A marker in output is a lifter bug, not a crash.
    pub fn value_string(&self) -> String {
        match self.value() {
            Some(v) => v.to_string(),
            None => "BUG_NO_ASSIGN_VALUE".into(),
        }
    }

    /// Best display name for the item: the value when it is known (or purely
    /// symbolic anyway), the storage otherwise.
    pub fn name(&self) -> String {
        match self.value() {
            Some(v)
                if v.has_value()
                    || matches!(v, VarValue::Expression { .. } | VarValue::Param { .. }) =>
            {
                v.to_string()
            }
            Some(_) => self.storage.name(),
            None => "BUG_NO_ASSIGN_VALUE".into(),
        }
    }
}
