//! Layout of the per-thread runtime structure (`THR`).
//!
//! Compiled code reaches runtime state through fixed offsets from the thread
//! register: cached VM fields (stack limit, heap bump pointers, the field
//! table, ...) and entry points of leaf runtime helpers. The offsets are a
//! property of the runtime build the snapshot was produced by; the table below
//! covers the stock layout and can be overridden or extended from a `THREAD`
//! section in the export file.

use crate::containers::unordered::UnorderedMap;

/// Signature of a leaf runtime helper reachable through a thread slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafFunctionInfo {
    pub return_type: String,
    pub params: String,
}

/// Cached VM fields at their stock offsets.
const CACHED_FIELD_OFFSETS: &[(i64, &str)] = &[
    (0x38, "stack_limit"),
    (0x40, "saved_stack_limit"),
    (0x48, "saved_shadow_call_stack"),
    (0x50, "write_barrier_mask"),
    (0x58, "heap_base"),
    (0x60, "top"),
    (0x68, "end"),
    (0x70, "stack_overflow_flags"),
    (0x78, "safepoint_state"),
    (0x80, "exit_through_ffi"),
    (0x88, "api_top_scope"),
    (0x90, "isolate"),
    (0x98, "isolate_group"),
    (0xa0, "field_table_values"),
    (0xa8, "dart_stream"),
    (0xb0, "store_buffer_block"),
    (0xb8, "marking_stack_block"),
    (0xc0, "top_exit_frame_info"),
    (0xc8, "vm_tag"),
    (0xd0, "global_object_pool"),
    (0xd8, "dispatch_table_array"),
    (0xe0, "active_exception"),
    (0xe8, "active_stacktrace"),
    (0xf0, "resume_pc"),
    (0xf8, "execution_state"),
];

/// Leaf runtime helpers at their stock offsets: (offset, name, return type,
/// parameter list).
const LEAF_RUNTIME_ENTRIES: &[(i64, &str, &str, &str)] = &[
    (0x660, "allocate_mint", "uword", "Thread* thread"),
    (0x668, "libc_pow", "double", "double x, double y"),
    (0x670, "libc_atan2", "double", "double x, double y"),
    (0x678, "memory_move", "void*", "void* dest, const void* src, size_t n"),
    (0x680, "double_to_int", "int64_t", "double x"),
    (0x688, "libc_sin", "double", "double x"),
    (0x690, "libc_cos", "double", "double x"),
    (0x698, "libc_exp", "double", "double x"),
    (0x6a0, "libc_log", "double", "double x"),
    (0x6a8, "float64_round", "double", "double x"),
];

/// The thread-structure layout used during a lifter run. Populated before
/// lifting; read-only afterwards.
#[derive(Debug, Clone)]
pub struct ThreadLayout {
    names: UnorderedMap<i64, String>,
    leaf_functions: UnorderedMap<i64, LeafFunctionInfo>,
}

impl ThreadLayout {
    /// An empty layout with no known offsets.
    pub fn empty() -> Self {
        Self {
            names: Default::default(),
            leaf_functions: Default::default(),
        }
    }

    /// The stock layout tables.
    pub fn with_default_offsets() -> Self {
        let mut layout = Self::empty();
        for &(off, name) in CACHED_FIELD_OFFSETS {
            layout.register(off, name);
        }
        for &(off, name, ret, params) in LEAF_RUNTIME_ENTRIES {
            layout.register_leaf(off, name, ret, params);
        }
        layout
    }

    /// Name (or rename) the field at `offset`.
    pub fn register(&mut self, offset: i64, name: impl Into<String>) {
        self.names.insert(offset, name.into());
    }

    /// Declare a leaf runtime helper at `offset`.
    pub fn register_leaf(
        &mut self,
        offset: i64,
        name: impl Into<String>,
        return_type: impl Into<String>,
        params: impl Into<String>,
    ) {
        let name = name.into();
        self.names.insert(offset, name);
        self.leaf_functions.insert(
            offset,
            LeafFunctionInfo {
                return_type: return_type.into(),
                params: params.into(),
            },
        );
    }

    pub fn offset_name(&self, offset: i64) -> Option<&str> {
        self.names.get(&offset).map(|s| s.as_str())
    }

    pub fn leaf_function(&self, offset: i64) -> Option<&LeafFunctionInfo> {
        self.leaf_functions.get(&offset)
    }

    /// The largest known offset, or zero for an empty layout.
    pub fn max_offset(&self) -> i64 {
        self.names.keys().copied().max().unwrap_or(0)
    }

    /// Offset of `name`, if the layout knows it. Linear scan; only used while
    /// setting up recognizers, never per instruction.
    pub fn offset_of(&self, name: &str) -> Option<i64> {
        self.names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(off, _)| *off)
    }
}

impl Default for ThreadLayout {
    fn default() -> Self {
        Self::with_default_offsets()
    }
}
