//! Infrastructure shared by the frontend, backend and driver.

pub mod error;
pub mod intern;

/// Compilation options that affect the frontend and backend, filled in
/// from the command line by the driver.
#[derive(Debug, Clone)]
pub struct Options {
    /// Emit `#line` debug directives into the assembly.
    pub debug_info: bool,
    /// Dump the token stream instead of compiling.
    pub dump_tokens: bool,
    /// Print each function's tree before generating code for it.
    pub dump_ast: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            debug_info: false,
            dump_tokens: false,
            dump_ast: false,
        }
    }
}
