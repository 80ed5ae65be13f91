// This binary shouldn't be under /src, but under /tests, but that is
// currently not possible (https://github.com/rust-lang/cargo/issues/4356)
//
// Spawned by the integration tests as a lookup target: reports its pid,
// then spends its life inside a well-known libc function.

#[cfg(target_os = "macos")]
fn main() {
    use std::io::Write;

    println!("{}", std::process::id());
    std::io::stdout().flush().expect("failed to flush stdout");

    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}

#[cfg(not(target_os = "macos"))]
fn main() {}
