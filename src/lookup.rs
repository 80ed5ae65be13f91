//! The lookup orchestrator: one snapshot of the target's images, scanned
//! in registry order, with the address biases composed at the end.

use crate::{
    images::{image_path, read_images},
    macho::{Bits32, Bits64, MachArch},
    scanner::scan_image,
    task_reader::TaskReader,
};
use log::{debug, warn};
use mach2::mach_types::task_t;

/// Resolves `symbol_name` to its runtime virtual address inside `task`.
///
/// Images are searched in dyld registry order (main executable first) and
/// the first match wins. The returned address is absolute in the target's
/// address space: main-image matches are rebased from the width's static
/// link base onto the actual (ASLR-slid) load address, and matches in
/// shared-cache images get the target's cache slide added.
///
/// `None` covers both "no image exports that name" and any environment
/// failure along the way; the distinction only shows up in the log. A
/// symbol whose table entry carries no address is never returned.
///
/// The symbol name must be non-empty. Both spellings of a C symbol are
/// accepted: `"malloc"` and `"_malloc"` resolve identically.
pub fn lookup(task: task_t, symbol_name: &str) -> Option<u64> {
    assert!(!symbol_name.is_empty(), "symbol name must be non-empty");

    let reader = TaskReader::new(task);

    let images = match read_images(&reader) {
        Ok(images) => images,
        Err(error) => {
            warn!("unable to enumerate images in task {task}: {error}");
            return None;
        }
    };

    for (index, image) in images.headers.iter().enumerate() {
        let outcome = match scan_image(&reader, image.load_address, symbol_name) {
            Ok(outcome) => outcome,
            Err(error) => {
                // a torn image aborts only itself, the search goes on
                debug!(
                    "skipping image {index} ({}): {error}",
                    image_path(&reader, image).as_deref().unwrap_or("?")
                );
                continue;
            }
        };

        let Some(value) = outcome.symbol else {
            continue;
        };

        let resolved = if index == 0 {
            // Main-image nlist values are link-time absolute; strip the
            // static base the linker assumed and re-anchor on the actual
            // load address, which already carries the ASLR slide. The
            // cache slide never applies on top of this.
            let base = if outcome.is_64_bit {
                <Bits64 as MachArch>::DEFAULT_BASE
            } else {
                <Bits32 as MachArch>::DEFAULT_BASE
            };
            value.wrapping_sub(base).wrapping_add(images.headers[0].load_address)
        } else if outcome.in_shared_cache {
            value.wrapping_add(images.shared_cache_slide)
        } else {
            value
        };

        return Some(resolved);
    }

    None
}
