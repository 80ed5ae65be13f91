//! Enumerates the Mach-O images loaded into a target task by reading
//! dyld's all-images registry out of the task's own memory.

use crate::{
    errors::LookupError,
    macho::{AllImageInfos, Bits32, Bits64, ImageEntry, MachArch, TASK_DYLD_ALL_IMAGE_INFO_32},
    task_reader::TaskReader,
};

/// One loaded image, as dyld records it.
#[derive(Copy, Clone, Debug)]
pub struct ImageHandle {
    /// Address of the image's Mach-O header in the target
    pub load_address: u64,
    /// Address of the image's path string in the target; 0 when dyld has
    /// not recorded one
    pub file_path: u64,
}

/// A snapshot of the target's loaded images.
///
/// The list is ordered as dyld keeps it: entry 0 is the main executable.
/// Image loads or unloads after the snapshot are not observed.
pub struct TaskImages {
    pub headers: Vec<ImageHandle>,
    /// The per-process slide applied to everything mapped out of the dyld
    /// shared cache; 0 when the target has no cache mapped
    pub shared_cache_slide: u64,
}

/// Reads the target's dyld bookkeeping record and the image array it
/// points at.
///
/// The record's format (32- vs 64-bit layout) comes from the kernel's
/// `task_dyld_info`, not from the target's headers; dyld keeps exactly one
/// of the two layouts per process.
pub fn read_images(reader: &TaskReader) -> Result<TaskImages, LookupError> {
    let dyld_info = reader.task_info::<mach2::task_info::task_dyld_info>()?;

    if dyld_info.all_image_info_format == TASK_DYLD_ALL_IMAGE_INFO_32 {
        read_image_list::<Bits32>(reader, dyld_info.all_image_info_addr)
    } else {
        read_image_list::<Bits64>(reader, dyld_info.all_image_info_addr)
    }
}

fn read_image_list<A: MachArch>(
    reader: &TaskReader,
    all_images_addr: u64,
) -> Result<TaskImages, LookupError> {
    // Read only the record prefix this crate defines; dyld appends fields
    // to the record between OS revisions, the prefix is stable.
    let infos: A::AllImages = reader.read_struct(all_images_addr)?;

    let entries: Vec<A::Image> =
        reader.read_memory(infos.image_array_addr(), infos.image_count() as usize)?;

    let headers = entries
        .iter()
        .map(|entry| ImageHandle {
            load_address: entry.load_address(),
            file_path: entry.file_path(),
        })
        .collect();

    Ok(TaskImages {
        headers,
        shared_cache_slide: infos.shared_cache_slide(),
    })
}

/// Best-effort read of an image's file path, for diagnostics only.
pub fn image_path(reader: &TaskReader, image: &ImageHandle) -> Option<String> {
    if image.file_path == 0 {
        return None;
    }
    reader.read_string(image.file_path).ok()
}
