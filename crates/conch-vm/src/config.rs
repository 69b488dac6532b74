//! VM configuration

/// Default call-stack buffer size in bytes
pub const DEFAULT_CALL_STACK_CAPACITY: usize = 10_000;

/// Tunable parameters of a [`crate::Vm`]
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Total byte capacity of the call-stack buffer all frames share
    pub call_stack_capacity: usize,
    /// Arguments surfaced to bytecode via `std::memory::program_arguments`
    pub program_args: Vec<String>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            call_stack_capacity: DEFAULT_CALL_STACK_CAPACITY,
            program_args: Vec::new(),
        }
    }
}
