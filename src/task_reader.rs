//! The remote-read primitives everything else funnels through: exact-length
//! memory reads, bounded C-string reads, and flavored `task_info` queries
//! against a foreign task.

use crate::errors::LookupError;
use mach2::{
    mach_types::task_t,
    task::task_info,
    vm::mach_vm_read_overwrite,
    vm_types::{mach_vm_size_t, natural_t},
};

/// Wraps a kernel call returning `kern_return_t` into a `Result`, tagging
/// failures with the syscall name for the diagnostics.
macro_rules! mach_call {
    ($call:ident($($args:expr),* $(,)?)) => {{
        // SAFETY: syscall
        let kr = unsafe { $call($($args),*) };
        if kr == mach2::kern_return::KERN_SUCCESS {
            Ok(())
        } else {
            Err(LookupError::Kernel {
                syscall: stringify!($call),
                error: kr.into(),
            })
        }
    }};
}

/// Minimal trait that just pairs a structure that can be filled out by
/// [`mach2::task::task_info`] with the "flavor" that tells it the info we
/// actually want to retrieve
pub trait TaskInfo {
    /// One of the `TASK_*_INFO` integers. I assume it's very bad if you
    /// implement this trait and provide the wrong flavor for the struct
    const FLAVOR: u32;
}

impl TaskInfo for mach2::task_info::task_dyld_info {
    const FLAVOR: u32 = mach2::task_info::TASK_DYLD_INFO;
}

/// Reads a C-string out of the target in one shot rather than
/// byte-by-byte; covers every symbol name this crate is expected to meet,
/// including moderately mangled C++ ones. Anything longer is silently
/// truncated at this boundary.
pub const REMOTE_STRING_WINDOW: usize = 2048;

const PAGE_SIZE: u64 = 0x1000;

/// A read-only view of another task's address space.
///
/// Holds the task port but takes no additional rights on it; all methods
/// are direct kernel round-trips with no caching, so a reader can be
/// shared freely and every call sees the target's current memory.
pub struct TaskReader {
    task: task_t,
}

impl TaskReader {
    /// Constructs a [`TaskReader`] for the specified task
    pub fn new(task: task_t) -> Self {
        Self { task }
    }

    /// Get the task handle
    pub fn task(&self) -> task_t {
        self.task
    }

    /// Reads `count` items of `T` at `address` in the target task.
    ///
    /// Partial reads are a contract violation, not a result: if the kernel
    /// copies fewer bytes than requested this returns
    /// [`LookupError::ShortRead`].
    pub fn read_memory<T: Copy>(&self, address: u64, count: usize) -> Result<Vec<T>, LookupError> {
        let expected = (count * size_of::<T>()) as u64;
        let mut buffer = Vec::<T>::with_capacity(count);
        let mut actual: mach_vm_size_t = 0;

        mach_call!(mach_vm_read_overwrite(
            self.task,
            address,
            expected,
            buffer.as_mut_ptr() as u64,
            &mut actual,
        ))?;

        if actual != expected {
            return Err(LookupError::ShortRead {
                address,
                expected,
                actual,
            });
        }

        // SAFETY: the kernel filled all `count` items, checked above
        unsafe {
            buffer.set_len(count);
        }
        Ok(buffer)
    }

    /// Reads a single `T` at `address` in the target task.
    pub fn read_struct<T: Copy>(&self, address: u64) -> Result<T, LookupError> {
        self.read_memory(address, 1).map(|buf| buf[0])
    }

    /// Reads a NUL-terminated string at `address` in the target task.
    ///
    /// One [`REMOTE_STRING_WINDOW`]-sized read, NUL-terminated at the
    /// window boundary as a safety net. When the full window crosses out
    /// of the target's mapping, the string is collected page by page up
    /// to the last readable byte instead.
    pub fn read_string(&self, address: u64) -> Result<String, LookupError> {
        assert!(address > 0);

        let mut buf = match self.read_memory::<u8>(address, REMOTE_STRING_WINDOW) {
            Ok(buf) => buf,
            Err(err) => {
                let mut collected = Vec::new();
                let mut cursor = address;
                while collected.len() < REMOTE_STRING_WINDOW {
                    let len = ((PAGE_SIZE - (cursor & (PAGE_SIZE - 1))) as usize)
                        .min(REMOTE_STRING_WINDOW - collected.len());
                    let Ok(page) = self.read_memory::<u8>(cursor, len) else {
                        break;
                    };
                    let terminated = page.contains(&0);
                    collected.extend_from_slice(&page);
                    if terminated {
                        break;
                    }
                    cursor += len as u64;
                }
                if collected.is_empty() {
                    return Err(err);
                }
                collected
            }
        };

        if let Some(nul) = buf.iter().position(|&c| c == 0) {
            buf.truncate(nul);
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Queries the kernel for task metadata of the flavor paired with `T`.
    pub fn task_info<T: TaskInfo>(&self) -> Result<T, LookupError> {
        let mut info = std::mem::MaybeUninit::<T>::uninit();
        let mut count = (size_of::<T>() / size_of::<natural_t>()) as u32;

        let task = self.task;
        let info_ptr = info.as_mut_ptr().cast();
        mach_call!(task_info(task, T::FLAVOR, info_ptr, &mut count))?;

        // SAFETY: the kernel filled out the structure, or errored above
        Ok(unsafe { info.assume_init() })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mach2::traps::mach_task_self;

    #[test]
    fn reads_own_memory_exactly() {
        let marker: [u32; 4] = [0xdead_beef, 1, 2, 3];
        // SAFETY: syscall
        let reader = TaskReader::new(unsafe { mach_task_self() });

        let copy = reader
            .read_memory::<u32>(marker.as_ptr() as u64, marker.len())
            .expect("failed to read own memory");
        assert_eq!(copy, marker);
    }

    #[test]
    fn reads_own_strings() {
        let text = c"a string in our own address space";
        // SAFETY: syscall
        let reader = TaskReader::new(unsafe { mach_task_self() });

        let copy = reader
            .read_string(text.as_ptr() as u64)
            .expect("failed to read own string");
        assert_eq!(copy, text.to_str().unwrap());
    }

    #[test]
    fn unmapped_read_is_an_error() {
        // SAFETY: syscall
        let reader = TaskReader::new(unsafe { mach_task_self() });
        assert!(reader.read_memory::<u8>(0x10, 16).is_err());
    }

    #[test]
    fn queries_dyld_info() {
        // SAFETY: syscall
        let reader = TaskReader::new(unsafe { mach_task_self() });

        let dyld_info = reader
            .task_info::<mach2::task_info::task_dyld_info>()
            .expect("failed to query dyld info");
        assert_ne!(dyld_info.all_image_info_addr, 0);
    }
}
