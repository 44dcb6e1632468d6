//! # Error Types
//!
//! General error handling for the patching engine.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! None of these errors abort a module-load sequence. The engine logs them,
//! clears the substrate error state and moves on to the next item.

use thiserror::Error;

use crate::types::Address;

/// Main error type for engine operations
///
/// ## Error Categories
///
/// 1. **Substrate errors**: PatternNotFound, SymbolNotFound, ModuleNotLoaded, OutOfImage
/// 2. **Resource decode failures**: Decompression, ResourceTooLarge, Parse
/// 3. **Allocation**: PoolExhausted
/// 4. **Configuration**: InvalidBootArg
#[derive(Error, Debug)]
pub enum AlcError
{
    /// A lookup patch found no occurrence of its search pattern
    ///
    /// This is expected when one fact-table entry covers several OS releases
    /// whose code differs: only one of the alternatives can be present.
    #[error("Pattern not found in module {module} ({len} bytes)")]
    PatternNotFound
    {
        /// Module the patch targeted
        module: String,
        /// Length of the search pattern
        len: usize,
    },

    /// A symbol could not be resolved inside a loaded module
    #[error("Symbol not found: {symbol} in module {module}")]
    SymbolNotFound
    {
        /// Module that was searched
        module: String,
        /// Mangled symbol name
        symbol: String,
    },

    /// The substrate has no image registered for the given load index
    #[error("Module with load index {0} is not loaded")]
    ModuleNotLoaded(usize),

    /// A patch or hook address fell outside the module image
    #[error("Address {0} is outside of the module image")]
    OutOfImage(Address),

    /// A resource blob could not be decompressed
    #[error("Failed to decompress resource: {0}")]
    Decompression(String),

    /// Decompressed output exceeds the consuming driver's buffer
    #[error("Resource of {size} bytes exceeds the {limit} byte buffer")]
    ResourceTooLarge
    {
        /// Decompressed size
        size: usize,
        /// Buffer ceiling
        limit: usize,
    },

    /// A hierarchical resource could not be parsed
    #[error("Failed to parse resource: {0}")]
    Parse(String),

    /// No free substitute device-id remains in the pool
    #[error("Device-id pool exhausted after {0} entries")]
    PoolExhausted(usize),

    /// A boot argument carried a malformed value
    #[error("Invalid boot argument {key}={value}")]
    InvalidBootArg
    {
        /// Boot argument key
        key: String,
        /// Raw value as given on the command line
        value: String,
    },
}

/// Convenience type alias for `Result<T, AlcError>`
///
/// ```rust
/// use alcfix_core::error::AlcResult;
/// fn foo() -> AlcResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type AlcResult<T> = std::result::Result<T, AlcError>;
