//! End-to-end lookups against our own process and a spawned child. The
//! local dynamic linker (`dlsym`) is the oracle: whatever it resolves for
//! this process, a remote lookup against our own task must agree with.
#![cfg(target_os = "macos")]

use mach2::traps::mach_task_self;
use task_symbols::lookup;

fn dlsym_addr(name: &str) -> u64 {
    let name = std::ffi::CString::new(name).unwrap();
    // SAFETY: dlsym with a valid NUL-terminated name
    unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) as u64 }
}

fn own_task() -> u32 {
    // SAFETY: syscall
    unsafe { mach_task_self() }
}

#[test]
fn resolves_malloc_like_the_local_linker() {
    let expected = dlsym_addr("malloc");
    assert_ne!(expected, 0);

    let actual = lookup(own_task(), "malloc").expect("malloc not found in own task");
    assert_eq!(actual, expected);
}

#[test]
fn underscore_spelling_is_equivalent() {
    let plain = lookup(own_task(), "printf").expect("printf not found");
    let underscored = lookup(own_task(), "_printf").expect("_printf not found");

    assert_ne!(plain, 0);
    assert_eq!(plain, underscored);
}

#[test]
fn unknown_symbol_resolves_to_none() {
    assert_eq!(
        lookup(own_task(), "definitely_not_a_real_symbol_xyz123"),
        None
    );
}

#[test]
fn repeated_lookups_agree() {
    let first = lookup(own_task(), "malloc");
    let second = lookup(own_task(), "malloc");
    assert!(first.is_some());
    assert_eq!(first, second);
}

// Deliberately un-mangled so this test binary's symbol table carries it
// under a predictable name.
#[unsafe(no_mangle)]
extern "C" fn lookup_test_marker() -> u32 {
    0x0ddba11
}

#[test]
fn main_image_symbol_lands_on_the_function() {
    let resolved = lookup(own_task(), "lookup_test_marker").expect("marker symbol not found");

    // the rebase must compose the link-time offset with the actual load
    // address, which is exactly where the function pointer points
    assert_eq!(resolved, lookup_test_marker as usize as u64);
    assert_ne!(resolved, 0);
}

#[test]
#[should_panic]
fn empty_symbol_name_is_a_caller_bug() {
    let _ = lookup(own_task(), "");
}

/// Spawns the helper binary, obtains its task port, and resolves a libc
/// symbol through the child's handle. The dyld shared cache is mapped at
/// one boot-wide slide, so the child's answer must equal our own.
#[test]
fn resolves_across_processes() {
    use std::io::BufRead;

    let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_test"))
        .stdout(std::process::Stdio::piped())
        .spawn()
        .expect("failed to spawn test helper");

    let pid = {
        let mut reader =
            std::io::BufReader::new(child.stdout.as_mut().expect("can't open child stdout"));
        let mut line = String::new();
        reader.read_line(&mut line).expect("failed to read pid");
        line.trim().parse::<i32>().expect("helper printed garbage")
    };

    let mut task = mach2::port::MACH_PORT_NULL;
    // SAFETY: syscall
    let kr = unsafe { mach2::traps::task_for_pid(own_task(), pid, &mut task) };
    if kr != mach2::kern_return::KERN_SUCCESS {
        // task_for_pid needs elevated privileges or an entitlement; losing
        // that lottery shouldn't fail the suite
        eprintln!("skipping cross-process lookup, task_for_pid returned {kr}");
        child.kill().expect("failed to kill helper");
        return;
    }

    let in_child = lookup(task, "nanosleep").expect("nanosleep not found in child");
    assert_eq!(in_child, dlsym_addr("nanosleep"));

    child.kill().expect("failed to kill helper");
}
