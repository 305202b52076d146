//! An embedded scripting host runtime with a stack-based API.
//!
//! This crate models the *host interpreter* side of a cross-interpreter
//! debugger: a dynamic value model (tables with array/hash parts,
//! userdata with byte buffers and user-value slots, closures with
//! upvalue cells, threads), a value stack addressed C-API style, call
//! frames with named locals, protected calls, a pluggable chunk loader,
//! and a reference mechanism for anchoring values in the registry.
//!
//! The main types are:
//! - [`HostState`] - the interpreter state and its stack API
//! - [`Value`] / [`TypeTag`] - the value model
//! - [`Table`] - tables, exposing the internal layout the debugger's
//!   table introspector reads

pub mod state;
pub mod table;
pub mod value;

pub use state::{
    ActivationInfo, CallError, CoStatus, Frame, HostState, ThreadState, MULTRET, NO_REF,
    REF_NIL, REGISTRY_INDEX, RIDX_GLOBALS, RIDX_MAINTHREAD,
};
pub use table::{Table, TableKeyError};
pub use value::{
    ChunkInfo, Closure, ClosureHandle, NativeFn, TableHandle, ThreadHandle, TypeTag, Upvalue,
    UserData, UserDataHandle, Value,
};
