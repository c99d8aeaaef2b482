//! # Address Resolution
//!
//! Turns raw instruction addresses from event stacks into display names.
//!
//! ## Resolution Flow
//!
//! ```text
//! 1. Method load / rundown events register JIT-compiled bodies
//!    (start address, size, namespace, name, signature)
//!
//! 2. Stack addresses are looked up in order:
//!    a. per-address cache             -> shared name
//!    b. linear scan of method ranges  -> "Type.Method(params)"
//!    c. native resolver (pluggable)   -> "module!symbol"
//!    d. raw address                   -> "0x7ffd1234"
//!
//! 3. Whatever step answered, the result is cached
//! ```
//!
//! Native symbol lookup against module images is not done here; callers
//! supply a [`NativeResolver`] if they have one.
//!
//! ## Module Structure
//!
//! - **`method_store`**: method records, display-name rules, the cache
//! - **`address_stack`**: raw and resolved stack representations

pub mod address_stack;
pub mod method_store;

pub use address_stack::{AddressStack, SymbolicFrame};
pub use method_store::{MethodRecord, MethodStore, NativeResolver};
