use std::fmt;
use thiserror::Error;

/// A Mach kernel return code from a failed syscall.
///
/// Only the codes the three syscalls used by this crate actually produce
/// get a readable message, see <usr/include/mach/kern_return.h> for the
/// full table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KernelError(pub i32);

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = match self.0 {
            1 => "specified address is not currently valid",
            2 => "specified memory is valid, but does not permit the required forms of access",
            4 => "the function requested was not applicable to this type of argument, or an argument is invalid",
            5 => "the function could not be performed",
            8 => "bogus access restriction",
            9 => "during a page fault, the target address refers to a memory object that has been destroyed",
            10 => "during a page fault, the memory object indicated that the data could not be returned",
            15 => "the name doesn't denote a right in the task",
            16 => "target task isn't an active task",
            17 => "the name denotes a right, but not an appropriate right",
            37 => "object has been terminated and is no longer available",
            46 => "remote node down or inaccessible",
            49 => "some thread-oriented operation (semaphore_wait) timed out",
            53 => "denied by security policy",
            _ => return write!(f, "kern_return_t {}", self.0),
        };
        f.write_str(desc)
    }
}

impl std::error::Error for KernelError {}

impl From<i32> for KernelError {
    fn from(kr: i32) -> Self {
        Self(kr)
    }
}

/// The ways a remote symbol lookup can fail before simply not finding the
/// symbol. All of these collapse to "not found" at the public surface; the
/// detail exists for the diagnostics a human operator sees.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("failed to call {syscall}: {error}")]
    Kernel {
        syscall: &'static str,
        error: KernelError,
    },
    #[error("read {actual} of {expected} bytes at {address:#018x}")]
    ShortRead {
        address: u64,
        expected: u64,
        actual: u64,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kernel_error_display() {
        assert_eq!(
            KernelError(1).to_string(),
            "specified address is not currently valid"
        );
        // codes outside the described set fall back to the raw value
        assert_eq!(KernelError(33).to_string(), "kern_return_t 33");
    }

    #[test]
    fn lookup_error_carries_syscall_name() {
        let err = LookupError::Kernel {
            syscall: "mach_vm_read_overwrite",
            error: KernelError(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("mach_vm_read_overwrite"), "{msg}");
    }
}
