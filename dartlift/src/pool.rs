//! The object pool (`PP`): a per-snapshot constant pool addressed by a
//! dedicated register. Compiled code loads literals and metadata references
//! from fixed offsets into it; the walker that decodes the pool is an external
//! collaborator, and this module only models the decoded view.

use crate::containers::unordered::UnorderedMap;
use crate::dart_meta::layout::SMI_TAG_SIZE;
use crate::dart_meta::{cid, TypeId};
use crate::dart_meta::{
    DartClass, DartField, DartFn, DartFunctionType, DartRecordType, DartType, DartTypeArguments,
    DartTypeParameter,
};
use crate::log::*;
use crate::values::VarValue;
use std::rc::Rc;

/// The decoded payload of one pool slot.
#[derive(Debug, Clone)]
pub enum PoolValue {
    Null,
    Bool(bool),
    /// Raw slot payload; still smi-tagged when `int_type_id` is [`cid::SMI`].
    Int { val: i64, int_type_id: TypeId },
    Double(f64),
    Str(String),
    /// A heap array object, by address.
    Array { addr: u64 },
    GrowableArray,
    Class(Rc<DartClass>),
    Type(Rc<DartType>),
    FunctionType(Rc<DartFunctionType>),
    TypeParameter(Rc<DartTypeParameter>),
    TypeArguments(Rc<DartTypeArguments>),
    RecordType(Rc<DartRecordType>),
    Field(Rc<DartField>),
    Function(Rc<DartFn>),
    UnlinkedCall(Rc<DartFn>),
    Sentinel,
    SubtypeTestCache,
    /// Arguments descriptor for a call site.
    ArgsDesc { num_args: i32, num_type_args: i32 },
    /// A kind the walker did not understand; carries its tag for display.
    Unknown(String),
}

impl PoolValue {
    /// Smi-tag an integer literal for storage.
    pub fn smi(value: i64) -> Self {
        PoolValue::Int {
            val: value << SMI_TAG_SIZE,
            int_type_id: cid::SMI,
        }
    }

    pub fn mint(value: i64) -> Self {
        PoolValue::Int {
            val: value,
            int_type_id: cid::MINT,
        }
    }
}

/// One pool slot.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub offset: i64,
    pub value: PoolValue,
}

impl PoolEntry {
    /// Decode the entry into the value-lattice item a load of this slot
    /// produces. Unknown kinds become placeholder expressions whose type may
    /// be refined by later recognizers.
    pub fn to_value(&self) -> VarValue {
        match &self.value {
            PoolValue::Null => VarValue::Null,
            PoolValue::Bool(b) => VarValue::Boolean(Some(*b)),
            PoolValue::Int { val, int_type_id } => VarValue::Integer {
                val: *val,
                int_type_id: *int_type_id,
                known: true,
            },
            PoolValue::Double(val) => VarValue::Double {
                val: *val,
                double_type_id: cid::DOUBLE,
                known: true,
            },
            PoolValue::Str(s) => VarValue::Str(Some(s.clone())),
            PoolValue::Array { addr } => VarValue::Array {
                ptr: Some(*addr),
                ele_type: None,
                length: -1,
            },
            PoolValue::GrowableArray => VarValue::GrowableArray { ele_type: None },
            PoolValue::Class(cls) => VarValue::Cid {
                cid: cls.id,
                is_smi: false,
            },
            PoolValue::Type(ty) => VarValue::Type(Rc::clone(ty)),
            PoolValue::FunctionType(ty) => VarValue::FunctionType(Rc::clone(ty)),
            PoolValue::TypeParameter(ty) => VarValue::TypeParameter(Rc::clone(ty)),
            PoolValue::TypeArguments(args) => VarValue::TypeArguments(Rc::clone(args)),
            PoolValue::RecordType(ty) => VarValue::RecordType(Rc::clone(ty)),
            PoolValue::Field(field) => VarValue::Field(Rc::clone(field)),
            PoolValue::Function(fun) => VarValue::FunctionCode(Rc::clone(fun)),
            PoolValue::UnlinkedCall(stub) => VarValue::UnlinkedCall(Rc::clone(stub)),
            PoolValue::Sentinel => VarValue::Sentinel,
            PoolValue::SubtypeTestCache => VarValue::SubtypeTestCache,
            PoolValue::ArgsDesc { .. } => VarValue::Expression {
                text: "ArgsDesc".into(),
                cid: cid::ILLEGAL,
            },
            PoolValue::Unknown(kind) => {
                debug!("Unknown pool entry kind"; "kind" => %kind, "offset" => self.offset);
                VarValue::Expression {
                    text: format!("Obj_{}", kind),
                    cid: cid::ILLEGAL,
                }
            }
        }
    }
}

/// The decoded object pool: offset to entry.
#[derive(Default, Debug)]
pub struct ObjectPool {
    entries: UnorderedMap<i64, PoolEntry>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, offset: i64, value: PoolValue) {
        self.entries.insert(offset, PoolEntry { offset, value });
    }

    pub fn at(&self, offset: i64) -> Option<&PoolEntry> {
        self.entries.get(&offset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
