//! A global store of flags that can impact lifting.
//!
//! WARNING: Currently only supports a single consistent configuration amongst
//! threads (i.e., cannot have different configurations for different lifter
//! executions in the same process).

/// The global configuration store. Its fields are expected to be accessed
/// across the program via the global [`CONFIG`](static@CONFIG).
pub struct AnalysisConfig {
    /// Whether the snapshot was built with compressed pointers. Enables the
    /// pointer-decompression recognizer and 32-bit object slots.
    pub compressed_pointers: bool,
    /// Collapse the load-imm / branch-if-smi / load-class-id triple into one
    /// composite node. With this off, the three components stand alone.
    pub collapse_tagged_class_id_composites: bool,
    /// Capture the parameter-setup `MoveReg` chain preceding a leaf runtime
    /// call into the call node itself.
    pub fold_leaf_call_parameter_moves: bool,
    /// Collapse prologue argument marshaling into a `SetupParameters` node.
    pub recognize_parameter_setup: bool,
    /// Log the register file after every recognizer hit (very verbose).
    pub trace_register_file: bool,
}

impl AnalysisConfig {
    /// Internal method: sets up initialization
    #[allow(static_mut_refs)]
    fn from_initialized() -> Self {
        let init = unsafe {
            INTERNAL_CONFIG_INITIALIZER
                .take()
                .expect("Should be initialized only once")
        };
        init.unwrap_or_default()
    }

    /// Initialize with the given command line configuration. Should only be
    /// called once, and should only be called from `main`.
    #[allow(static_mut_refs)]
    pub fn initialize(command_line_config: Vec<CommandLineAnalysisConfig>) {
        let prev = unsafe { INTERNAL_CONFIG_INITIALIZER.replace(Some(command_line_config.into())) };
        assert!(prev.is_some(), "Performed double initialization");
        lazy_static::initialize(&CONFIG);
    }
}

/// Internal initialization detail.
static mut INTERNAL_CONFIG_INITIALIZER: Option<Option<AnalysisConfig>> = Some(None);

lazy_static::lazy_static! {
    /// The global configuration store
    pub static ref CONFIG: AnalysisConfig = AnalysisConfig::from_initialized();
}

/// Lifter configuration parameters
#[derive(clap::ArgEnum, Clone, Debug)]
pub enum CommandLineAnalysisConfig {
    DisableCompressedPointers,
    DisableTaggedClassIdCollapsing,
    DisableLeafCallMoveFolding,
    DisableParameterSetupRecognition,
    EnableRegisterFileTrace,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            compressed_pointers: true,
            collapse_tagged_class_id_composites: true,
            fold_leaf_call_parameter_moves: true,
            recognize_parameter_setup: true,
            trace_register_file: false,
        }
    }
}

impl From<Vec<CommandLineAnalysisConfig>> for AnalysisConfig {
    fn from(v: Vec<CommandLineAnalysisConfig>) -> Self {
        use CommandLineAnalysisConfig::*;
        let mut r = AnalysisConfig::default();
        for v in v {
            match v {
                DisableCompressedPointers => {
                    r.compressed_pointers = false;
                }
                DisableTaggedClassIdCollapsing => {
                    r.collapse_tagged_class_id_composites = false;
                }
                DisableLeafCallMoveFolding => {
                    r.fold_leaf_call_parameter_moves = false;
                }
                DisableParameterSetupRecognition => {
                    r.recognize_parameter_setup = false;
                }
                EnableRegisterFileTrace => {
                    r.trace_register_file = true;
                }
            }
        }
        r
    }
}
