//! Metadata describing the runtime side of an AOT snapshot: class ids, object
//! layout constants, and the class/function databases populated by the snapshot
//! loader before lifting starts.
//!
//! Everything in here is immutable once lifting begins. The lifter only ever
//! holds shared references ([`Rc`]) into these tables.

use crate::containers::unordered::UnorderedMap;
use std::rc::Rc;

/// A runtime type identifier. Non-negative values are class ids assigned by the
/// managed runtime; negative values are synthetic kinds private to the lifter
/// (see [`custom_type`]).
pub type TypeId = i32;

/// Class ids for the runtime classes the lifter cares about. The mapping is
/// stable for the lifetime of a lifter run.
pub mod cid {
    use super::TypeId;

    pub const ILLEGAL: TypeId = 0;
    pub const OBJECT: TypeId = 1;
    pub const CLASS: TypeId = 2;
    pub const NULL: TypeId = 3;
    pub const BOOL: TypeId = 4;
    /// The abstract integer class; refined to [`SMI`] or [`MINT`] when known.
    pub const INT: TypeId = 5;
    pub const SMI: TypeId = 6;
    pub const MINT: TypeId = 7;
    pub const DOUBLE: TypeId = 8;
    pub const STRING: TypeId = 9;
    pub const ARRAY: TypeId = 10;
    pub const GROWABLE_ARRAY: TypeId = 11;
    pub const INSTANCE: TypeId = 12;
    pub const TYPE: TypeId = 13;
    pub const FUNCTION_TYPE: TypeId = 14;
    pub const TYPE_PARAMETER: TypeId = 15;
    pub const TYPE_ARGUMENTS: TypeId = 16;
    pub const RECORD_TYPE: TypeId = 17;
    pub const SENTINEL: TypeId = 18;
    pub const FIELD: TypeId = 19;
    pub const FUNCTION: TypeId = 20;
    pub const CLOSURE: TypeId = 21;
    pub const UNLINKED_CALL: TypeId = 22;
    pub const SUBTYPE_TEST_CACHE: TypeId = 23;
}

/// Synthetic type ids used by the lifter for values that have no runtime
/// class. All of them are negative so they can never collide with a class id.
pub mod custom_type {
    use super::TypeId;

    pub const EXPRESSION: TypeId = -1000;
    pub const TAGGED_CID: TypeId = -999;
    pub const NATIVE_INT: TypeId = -998;
    pub const NATIVE_DOUBLE: TypeId = -997;
    pub const PARAMETER: TypeId = -996;
    pub const ARGS_DESC: TypeId = -995;
    /// Number of named parameters passed so far. Only alive during parameter
    /// marshaling, but some functions spill it without a later use.
    pub const CURR_NUM_NAME_PARAM: TypeId = -994;
}

/// Object-layout constants of the 64-bit target with compressed pointers.
pub mod layout {
    /// Small integers are shifted left by this and carry a clear low bit.
    pub const SMI_TAG_SIZE: u32 = 1;
    /// Heap pointers carry this tag in their low bits.
    pub const HEAP_OBJECT_TAG: i64 = 1;
    /// Compressed in-object slot width in bytes.
    pub const COMPRESSED_WORD_SIZE: i64 = 4;
    pub const WORD_SIZE: i64 = 8;
    /// Displacement of the class-id header load relative to a *tagged* object
    /// pointer (the header sits at untagged offset 0).
    pub const CLASS_ID_DISP: i64 = -1;
    /// First in-object field slot, as a tagged-pointer displacement.
    pub const FIRST_FIELD_DISP: i64 = 7;
    /// Payload of a boxed 64-bit integer, as a tagged-pointer displacement.
    pub const MINT_VALUE_DISP: i64 = 7;
    /// Array element storage, as a tagged-pointer displacement.
    pub const ARRAY_DATA_DISP: i64 = 0xf;
    /// Entry point slot of a closure object, as a tagged-pointer displacement.
    pub const CLOSURE_ENTRY_POINT_DISP: i64 = 0x37;
}

/// A runtime class.
#[derive(Debug, PartialEq, Eq)]
pub struct DartClass {
    pub id: TypeId,
    pub name: String,
}

impl DartClass {
    pub fn new(id: TypeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A field descriptor. `offset` is the in-object displacement for instance
/// fields, or the field-table slot for static fields.
#[derive(Debug)]
pub struct DartField {
    pub offset: i64,
    pub name: String,
    pub owner: Option<Rc<DartClass>>,
}

impl DartField {
    pub fn full_name(&self) -> String {
        match &self.owner {
            Some(cls) => format!("{}::{}", cls.name, self.name),
            None => self.name.clone(),
        }
    }
}

/// What a function-database entry actually is. Most entries are compiled
/// functions; the rest are the runtime's shared stub routines, which the
/// lifter must tell apart because calls to them are idioms, not calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FnKind {
    Function,
    Stub(StubKind),
}

/// The stub routines the lifter recognizes by call target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubKind {
    /// Inline allocation stub specialized for one class.
    AllocateObject(TypeId),
    WriteBarrier,
    ArrayWriteBarrier,
    TypeCheck,
    InitAsync,
    InitLateStaticField,
    BoxInt64,
}

/// A compiled function (or stub) known to the snapshot.
#[derive(Debug)]
pub struct DartFn {
    pub addr: u64,
    pub name: String,
    pub kind: FnKind,
}

impl DartFn {
    pub fn full_name(&self) -> String {
        self.name.clone()
    }

    pub fn stub_kind(&self) -> Option<&StubKind> {
        match &self.kind {
            FnKind::Stub(k) => Some(k),
            FnKind::Function => None,
        }
    }
}

/// A resolved type annotation (`int`, `Future<int>`, ...).
#[derive(Debug, PartialEq, Eq)]
pub struct DartType {
    pub name: String,
}

impl std::fmt::Display for DartType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A record type annotation, e.g. `(int, String name)`.
#[derive(Debug)]
pub struct DartRecordType {
    pub text: String,
}

impl std::fmt::Display for DartRecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// A type parameter reference, e.g. `T` of its declaring class.
#[derive(Debug)]
pub struct DartTypeParameter {
    pub text: String,
}

impl std::fmt::Display for DartTypeParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// A function type annotation.
#[derive(Debug)]
pub struct DartFunctionType {
    pub text: String,
}

impl std::fmt::Display for DartFunctionType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// A type-arguments vector, e.g. `<int, String>`.
#[derive(Debug)]
pub struct DartTypeArguments {
    pub text: String,
}

impl std::fmt::Display for DartTypeArguments {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Class database: cid to class entry.
#[derive(Default, Debug)]
pub struct ClassDb {
    classes: UnorderedMap<TypeId, Rc<DartClass>>,
}

impl ClassDb {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register(&mut self, cls: DartClass) -> Rc<DartClass> {
        let cls = Rc::new(cls);
        self.classes.insert(cls.id, Rc::clone(&cls));
        cls
    }

    pub fn get(&self, id: TypeId) -> Option<Rc<DartClass>> {
        self.classes.get(&id).map(Rc::clone)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Function database: entry address to function entry. Stubs live here too.
#[derive(Default, Debug)]
pub struct FunctionDb {
    fns: UnorderedMap<u64, Rc<DartFn>>,
}

impl FunctionDb {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register(&mut self, f: DartFn) -> Rc<DartFn> {
        let f = Rc::new(f);
        self.fns.insert(f.addr, Rc::clone(&f));
        f
    }

    pub fn get(&self, addr: u64) -> Option<Rc<DartFn>> {
        self.fns.get(&addr).map(Rc::clone)
    }

    pub fn len(&self) -> usize {
        self.fns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fns.is_empty()
    }
}
