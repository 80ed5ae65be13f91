//! Resolves symbol names to runtime virtual addresses inside *another*
//! process's Mach-O images.
//!
//! The local dynamic linker only answers symbol queries for the current
//! process; this crate answers them for a foreign task, given nothing but a
//! task port and a chain of remote virtual-memory reads. It walks dyld's
//! all-images registry in the target, parses each image's load commands
//! structure-by-structure across the process boundary, and searches the
//! classic symbol table by name.
//!
//! ```no_run
//! # #[cfg(target_os = "macos")] {
//! let task = unsafe { mach2::traps::mach_task_self() };
//! let addr = task_symbols::lookup(task, "malloc");
//! # }
//! ```
//!
//! The caller is expected to already hold a task port with read rights
//! (`mach_task_self`, `task_for_pid`, ...); acquiring one is out of scope
//! here, as is doing anything with the returned address.

pub mod errors;
pub mod macho;

cfg_if::cfg_if! {
    if #[cfg(target_os = "macos")] {
        pub mod images;
        pub mod lookup;
        pub mod scanner;
        pub mod task_reader;

        pub use lookup::lookup;
        pub use task_reader::TaskReader;
    }
}
