//! Core library for inspecting and instrumenting a live process's memory.
//!
//! The pieces compose around the [`TargetMemory`] trait: [`resolve`] turns
//! pointer-path expressions into addresses, [`access`] does protected typed
//! reads and writes, [`patch`] splices detours into code caves, and
//! [`freeze`] pins values with background rewrite loops. [`Session`] bundles
//! them behind one handle; on Windows, [`ProcessTarget`] is the live backend.

pub mod access;
pub mod address;
pub mod error;
pub mod freeze;
pub mod labels;
pub mod patch;
pub mod resolve;
pub mod session;
pub mod target;
pub mod value;

pub use access::{read_value, write_value};
pub use address::{Address, WRITABLE_FLOOR};
pub use error::{Error, Result};
pub use freeze::{CancelToken, FreezeScheduler};
pub use labels::LabelMap;
pub use patch::{find_free_region, jump_site_bytes, DetourKind, DetourPatch, DetourSpec, Trailing};
pub use resolve::{read_pointer, resolve};
pub use session::{Session, DEFAULT_FREEZE_INTERVAL};
pub use target::{dump_memory, AddressSpace, Bitness, Protection, Region, TargetMemory};
pub use value::{TextEncoding, Value, ValueKind};

#[cfg(target_os = "windows")]
pub use target::{ModuleInfo, ProcessTarget};
