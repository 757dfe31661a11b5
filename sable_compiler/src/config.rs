//! Compiler configuration snapshot.
//!
//! Owned by the driver, read-only here. One snapshot covers one compilation
//! run; per-method decisions (size filter, inlining budget, pass list) all
//! read from it.

/// How aggressively the driver wants methods compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerFilter {
    /// Compile everything, ignoring size heuristics.
    Everything,
    /// Optimize for execution speed.
    Speed,
    /// Optimize for artifact size; large methods are not compiled.
    Space,
    /// Only run the quickening path.
    QuickenOnly,
}

/// Target instruction set. Encoding lives in the backend; the pipeline only
/// selects architecture-specific passes by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionSet {
    Arm64,
    X8664,
    /// No architecture-specific passes, generic latencies.
    Generic,
}

/// Register allocation strategy, forwarded to the backend untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAllocationStrategy {
    LinearScan,
    GraphColor,
}

/// Configuration for one compilation run.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub filter: CompilerFilter,
    pub instruction_set: InstructionSet,

    /// Methods above this many code units are never graph-compiled.
    pub huge_method_threshold: usize,
    /// Methods above this many code units with no branches are skipped.
    pub large_method_threshold: usize,
    /// Below this size the space filter still compiles.
    pub small_method_threshold: usize,
    /// Trivial getter/setter-sized methods.
    pub tiny_method_threshold: usize,
    /// Space filter: code items above this size are not compiled.
    pub space_filter_threshold: usize,

    /// Inlining budget in code units. Zero disables the inliner entirely.
    pub inline_max_code_units: usize,

    /// Whether the quickening path is enabled at all.
    pub quicken_enabled: bool,

    pub register_allocation: RegisterAllocationStrategy,

    /// Explicit pass list replacing the default pipeline. Names are checked
    /// against the factory; semantic ordering is the caller's problem.
    pub passes_to_run: Option<Vec<String>>,

    /// Keep the graph debuggable (blocks deopt-hostile transforms).
    pub debuggable: bool,
    /// Byte-identical artifacts for identical inputs.
    pub deterministic: bool,
    /// Run the graph checker after every pass.
    pub verify_graph: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            filter: CompilerFilter::Speed,
            instruction_set: InstructionSet::Arm64,
            huge_method_threshold: 10000,
            large_method_threshold: 600,
            small_method_threshold: 60,
            tiny_method_threshold: 20,
            space_filter_threshold: 128,
            inline_max_code_units: 32,
            quicken_enabled: true,
            register_allocation: RegisterAllocationStrategy::LinearScan,
            passes_to_run: None,
            debuggable: false,
            deterministic: false,
            verify_graph: cfg!(debug_assertions),
        }
    }
}

impl CompilerConfig {
    pub fn is_huge_method(&self, code_units: usize) -> bool {
        code_units > self.huge_method_threshold
    }

    pub fn is_large_method(&self, code_units: usize) -> bool {
        code_units > self.large_method_threshold
    }

    pub fn is_small_method(&self, code_units: usize) -> bool {
        code_units > self.small_method_threshold
    }

    pub fn is_tiny_method(&self, code_units: usize) -> bool {
        code_units > self.tiny_method_threshold
    }

    pub fn inlining_enabled(&self) -> bool {
        self.inline_max_code_units > 0
    }
}
