//! Pipeline stages for one extraction.
//!
//! Each submodule implements exactly one step, so every step can be tested
//! without the ones around it.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ request ──▶ transport ──▶ reconcile
//! (file)    (payload)   (HTTP)        (typed result)
//! ```
//!
//! 1. [`input`]: resolve a path, buffer or reader into validated bytes
//! 2. [`request`]: bundle bytes, serialised contract and options; every
//!    check up to here is local
//! 3. [`transport`]: the only stage with network I/O
//! 4. [`reconcile`]: turn status + body into an `ExtractResult` or `ApiError`

pub mod input;
pub mod reconcile;
pub mod request;
pub mod transport;
