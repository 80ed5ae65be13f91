//! The Mach-O and dyld on-disk/in-memory structures this crate reads out of
//! a target task, transcribed from `usr/include/mach-o/loader.h` and
//! `usr/include/mach-o/dyld_images.h`. These are platform ABI and must
//! match byte-for-byte, which the layout tests at the bottom pin down.
//!
//! Everything that differs between the 32- and 64-bit worlds is factored
//! into the [`MachArch`] trait so the scanner and the image enumerator are
//! written once and instantiated per width.

// usr/include/mach-o/loader.h, magic number for a 32-bit MachHeader
pub const MH_MAGIC: u32 = 0xfeedface;
// usr/include/mach-o/loader.h, magic number for a 64-bit MachHeader
pub const MH_MAGIC_64: u32 = 0xfeedfacf;
// usr/include/mach-o/loader.h, link-edit stab symbol table info
pub const LC_SYMTAB: u32 = 0x2;
// usr/include/mach-o/loader.h, command to map a 32-bit segment
pub const LC_SEGMENT: u32 = 0x1;
// usr/include/mach-o/loader.h, command to map a 64-bit segment
pub const LC_SEGMENT_64: u32 = 0x19;

/// Name of the segment holding executable code, NUL-padded on disk
pub const SEG_TEXT: &[u8] = b"__TEXT";
/// Name of the segment holding link-edit metadata, including the symbol
/// and string tables
pub const SEG_LINKEDIT: &[u8] = b"__LINKEDIT";

// usr/include/mach/task_info.h, discriminators for
// task_dyld_info.all_image_info_format
pub const TASK_DYLD_ALL_IMAGE_INFO_32: i32 = 0;
pub const TASK_DYLD_ALL_IMAGE_INFO_64: i32 = 1;

bitflags::bitflags! {
    /// `mach_header.flags` bits, usr/include/mach-o/loader.h
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        /// the object file has no undefined references
        const NOUNDEFS = 0x1;
        /// the object file is input for the dynamic linker
        const DYLDLINK = 0x4;
        /// the executable is loaded at a random address (ASLR)
        const PIE = 0x20_0000;
        /// the image was loaded out of the dyld shared cache, so its
        /// link-edit data is slid by the per-process cache slide
        const DYLIB_IN_CACHE = 0x8000_0000;
    }
}

/// The fixed Mach-O header fields shared by both widths.
///
/// `mach_header_64` only appends a reserved word to `mach_header`, so this
/// 28-byte prefix is enough to classify an image and walk its commands;
/// [`MachArch::HEADER_SIZE`] accounts for the width difference when
/// locating the first load command.
// usr/include/mach-o/loader.h
#[repr(C)]
#[derive(Copy, Clone)]
pub struct MachHeader {
    pub magic: u32,         // mach magic number identifier
    pub cpu_type: i32,      // cpu_type_t cpu specifier
    pub cpu_sub_type: i32,  // cpu_subtype_t machine specifier
    pub file_type: u32,     // type of file
    pub num_commands: u32,  // number of load commands
    pub size_commands: u32, // size of all the load commands
    pub flags: u32,
}

// usr/include/mach-o/loader.h
#[repr(C)]
#[derive(Copy, Clone)]
pub struct LoadCommandBase {
    pub cmd: u32,      // type of load command
    pub cmd_size: u32, // total size of the command in bytes
}

/*
 * A segment load command indicates that a part of the file is to be mapped
 * into the task's address space. The 32- and 64-bit forms differ only in
 * the width of the address/offset fields.
 */
#[repr(C)]
#[derive(Copy, Clone)]
pub struct SegmentCommand32 {
    pub cmd: u32,               // type of load command
    pub cmd_size: u32,          // total size of the command in bytes
    pub segment_name: [u8; 16], // string name of the segment
    pub vm_addr: u32,           // memory address the segment is mapped to
    pub vm_size: u32,           // total size of the segment
    pub file_off: u32,          // file offset of the segment
    pub file_size: u32,         // amount mapped from the file
    pub max_prot: i32,          // maximum VM protection
    pub init_prot: i32,         // initial VM protection
    pub num_sections: u32,      // number of sections in the segment
    pub flags: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct SegmentCommand64 {
    pub cmd: u32,               // type of load command
    pub cmd_size: u32,          // total size of the command in bytes
    pub segment_name: [u8; 16], // string name of the segment
    pub vm_addr: u64,           // memory address the segment is mapped to
    pub vm_size: u64,           // total size of the segment
    pub file_off: u64,          // file offset of the segment
    pub file_size: u64,         // amount mapped from the file
    pub max_prot: i32,          // maximum VM protection
    pub init_prot: i32,         // initial VM protection
    pub num_sections: u32,      // number of sections in the segment
    pub flags: u32,
}

/*
 * The symtab_command contains the offsets and sizes of the link-edit 4.3BSD
 * "stab" style symbol table information. The offsets are relative to the
 * start of the file, not to memory; the scanner applies the per-image file
 * slide to turn them into addresses.
 */
#[repr(C)]
#[derive(Copy, Clone)]
pub struct SymtabCommand {
    pub cmd: u32,      // LC_SYMTAB
    pub cmd_size: u32, // sizeof(struct symtab_command)
    pub sym_off: u32,  // symbol table offset
    pub num_syms: u32, // number of symbol table entries
    pub str_off: u32,  // string table offset
    pub str_size: u32, // string table size in bytes
}

// usr/include/mach-o/nlist.h
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Nlist32 {
    pub string_index: u32, // index into the string table
    pub n_type: u8,        // type flag
    pub n_sect: u8,        // section number or NO_SECT
    pub n_desc: i16,       // see <mach-o/stab.h>
    pub value: u32,        // value of this symbol (or stab offset)
}

// usr/include/mach-o/nlist.h
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Nlist64 {
    pub string_index: u32, // index into the string table
    pub n_type: u8,        // type flag
    pub n_sect: u8,        // section number or NO_SECT
    pub n_desc: u16,       // see <mach-o/stab.h>
    pub value: u64,        // value of this symbol (or stab offset)
}

/*
 * dyld's process-wide bookkeeping record, usr/include/mach-o/dyld_images.h.
 * Only the prefix through sharedCacheSlide is defined here; dyld has grown
 * fields past it repeatedly, and reading exactly this prefix keeps us
 * independent of which dyld revision the target runs.
 */
#[repr(C)]
#[derive(Copy, Clone)]
pub struct DyldAllImageInfos32 {
    pub version: u32,
    pub info_array_count: u32,
    pub info_array_addr: u32,
    pub notification: u32,
    pub process_detached_from_shared_region: u8,
    pub lib_system_initialized: u8,
    __pad: [u8; 2],
    pub dyld_image_load_address: u32,
    pub jit_info: u32,
    pub dyld_version: u32,
    pub error_message: u32,
    pub termination_flags: u32,
    pub core_symbolication_shm_page: u32,
    pub system_order_flag: u32,
    pub uuid_array_count: u32,
    pub uuid_array: u32,
    pub dyld_all_image_infos_address: u32,
    pub initial_image_count: u32,
    pub error_kind: u32,
    pub error_client_of_dylib_path: u32,
    pub error_target_dylib_path: u32,
    pub error_symbol: u32,
    pub shared_cache_slide: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct DyldAllImageInfos64 {
    pub version: u32,
    pub info_array_count: u32,
    pub info_array_addr: u64,
    pub notification: u64,
    pub process_detached_from_shared_region: u8,
    pub lib_system_initialized: u8,
    __pad: [u8; 6],
    pub dyld_image_load_address: u64,
    pub jit_info: u64,
    pub dyld_version: u64,
    pub error_message: u64,
    pub termination_flags: u64,
    pub core_symbolication_shm_page: u64,
    pub system_order_flag: u64,
    pub uuid_array_count: u64,
    pub uuid_array: u64,
    pub dyld_all_image_infos_address: u64,
    pub initial_image_count: u64,
    pub error_kind: u64,
    pub error_client_of_dylib_path: u64,
    pub error_target_dylib_path: u64,
    pub error_symbol: u64,
    pub shared_cache_slide: u64,
}

// dyld_image_info, usr/include/mach-o/dyld_images.h
#[repr(C)]
#[derive(Copy, Clone)]
pub struct DyldImageInfo32 {
    pub load_address: u32,
    pub file_path: u32,
    pub file_mod_date: u32,
}

// dyld_image_info, usr/include/mach-o/dyld_images.h
#[repr(C)]
#[derive(Copy, Clone)]
pub struct DyldImageInfo64 {
    pub load_address: u64,
    pub file_path: u64,
    pub file_mod_date: u64,
}

/// Width-independent view of a segment load command.
pub trait SegmentCommand: Copy {
    fn segment_name(&self) -> &[u8; 16];
    fn vm_addr(&self) -> u64;
    fn file_off(&self) -> u64;
}

/// Width-independent view of an nlist symbol entry.
pub trait SymbolEntry: Copy {
    fn string_index(&self) -> u32;
    fn value(&self) -> u64;
}

/// Width-independent view of dyld's all-image-infos record.
pub trait AllImageInfos: Copy {
    fn image_count(&self) -> u32;
    fn image_array_addr(&self) -> u64;
    fn shared_cache_slide(&self) -> u64;
}

/// Width-independent view of one dyld image-info entry.
pub trait ImageEntry: Copy {
    fn load_address(&self) -> u64;
    fn file_path(&self) -> u64;
}

impl SegmentCommand for SegmentCommand32 {
    fn segment_name(&self) -> &[u8; 16] {
        &self.segment_name
    }
    fn vm_addr(&self) -> u64 {
        self.vm_addr.into()
    }
    fn file_off(&self) -> u64 {
        self.file_off.into()
    }
}

impl SegmentCommand for SegmentCommand64 {
    fn segment_name(&self) -> &[u8; 16] {
        &self.segment_name
    }
    fn vm_addr(&self) -> u64 {
        self.vm_addr
    }
    fn file_off(&self) -> u64 {
        self.file_off
    }
}

impl SymbolEntry for Nlist32 {
    fn string_index(&self) -> u32 {
        self.string_index
    }
    fn value(&self) -> u64 {
        self.value.into()
    }
}

impl SymbolEntry for Nlist64 {
    fn string_index(&self) -> u32 {
        self.string_index
    }
    fn value(&self) -> u64 {
        self.value
    }
}

impl AllImageInfos for DyldAllImageInfos32 {
    fn image_count(&self) -> u32 {
        self.info_array_count
    }
    fn image_array_addr(&self) -> u64 {
        self.info_array_addr.into()
    }
    fn shared_cache_slide(&self) -> u64 {
        self.shared_cache_slide.into()
    }
}

impl AllImageInfos for DyldAllImageInfos64 {
    fn image_count(&self) -> u32 {
        self.info_array_count
    }
    fn image_array_addr(&self) -> u64 {
        self.info_array_addr
    }
    fn shared_cache_slide(&self) -> u64 {
        self.shared_cache_slide
    }
}

impl ImageEntry for DyldImageInfo32 {
    fn load_address(&self) -> u64 {
        self.load_address.into()
    }
    fn file_path(&self) -> u64 {
        self.file_path.into()
    }
}

impl ImageEntry for DyldImageInfo64 {
    fn load_address(&self) -> u64 {
        self.load_address
    }
    fn file_path(&self) -> u64 {
        self.file_path
    }
}

/// Everything that differs between the 32- and 64-bit Mach-O worlds: the
/// header magic, the size of the fixed header preceding the load commands,
/// the default static link base for executables, and the layouts of the
/// variable-width structures.
pub trait MachArch {
    const MAGIC: u32;
    const HEADER_SIZE: u64;
    /// Static base executables of this width are linked at; symbols in the
    /// main image are rebased from here to the actual (slid) load address.
    const DEFAULT_BASE: u64;

    type Segment: SegmentCommand;
    type Symbol: SymbolEntry;
    type AllImages: AllImageInfos;
    type Image: ImageEntry;
}

/// 32-bit x86-family Mach-O.
pub struct Bits32;

/// 64-bit x86-family Mach-O.
pub struct Bits64;

impl MachArch for Bits32 {
    const MAGIC: u32 = MH_MAGIC;
    const HEADER_SIZE: u64 = size_of::<MachHeader>() as u64;
    const DEFAULT_BASE: u64 = 0x1000;

    type Segment = SegmentCommand32;
    type Symbol = Nlist32;
    type AllImages = DyldAllImageInfos32;
    type Image = DyldImageInfo32;
}

impl MachArch for Bits64 {
    const MAGIC: u32 = MH_MAGIC_64;
    // mach_header_64 appends one reserved word to the common fields
    const HEADER_SIZE: u64 = (size_of::<MachHeader>() + size_of::<u32>()) as u64;
    const DEFAULT_BASE: u64 = 0x1_0000_0000;

    type Segment = SegmentCommand64;
    type Symbol = Nlist64;
    type AllImages = DyldAllImageInfos64;
    type Image = DyldImageInfo64;
}

/// Compares a NUL-padded 16-byte segment name field against a name.
pub fn segment_name_is(field: &[u8; 16], name: &[u8]) -> bool {
    let len = field.iter().position(|&c| c == 0).unwrap_or(field.len());
    &field[..len] == name
}

#[cfg(test)]
mod test {
    use super::*;
    use std::mem::offset_of;

    // The kernel and dyld hand us these structures as raw bytes, so any
    // layout drift silently corrupts every read after it. Pin the sizes
    // and the offsets the readers rely on.

    #[test]
    fn loader_struct_layout() {
        assert_eq!(size_of::<MachHeader>(), 28);
        assert_eq!(size_of::<LoadCommandBase>(), 8);
        assert_eq!(size_of::<SegmentCommand32>(), 56);
        assert_eq!(size_of::<SegmentCommand64>(), 72);
        assert_eq!(size_of::<SymtabCommand>(), 24);
        assert_eq!(size_of::<Nlist32>(), 12);
        assert_eq!(size_of::<Nlist64>(), 16);

        assert_eq!(offset_of!(SegmentCommand32, segment_name), 8);
        assert_eq!(offset_of!(SegmentCommand64, segment_name), 8);
        assert_eq!(offset_of!(SegmentCommand32, vm_addr), 24);
        assert_eq!(offset_of!(SegmentCommand64, vm_addr), 24);
        assert_eq!(offset_of!(SegmentCommand32, file_off), 32);
        assert_eq!(offset_of!(SegmentCommand64, file_off), 40);
        assert_eq!(offset_of!(Nlist64, value), 8);
        assert_eq!(offset_of!(Nlist32, value), 8);
    }

    #[test]
    fn dyld_struct_layout() {
        assert_eq!(size_of::<DyldImageInfo32>(), 12);
        assert_eq!(size_of::<DyldImageInfo64>(), 24);
        assert_eq!(size_of::<DyldAllImageInfos32>(), 0x54);
        assert_eq!(size_of::<DyldAllImageInfos64>(), 0xa0);

        assert_eq!(offset_of!(DyldAllImageInfos32, info_array_addr), 0x08);
        assert_eq!(offset_of!(DyldAllImageInfos64, info_array_addr), 0x08);
        assert_eq!(offset_of!(DyldAllImageInfos32, dyld_image_load_address), 0x14);
        assert_eq!(offset_of!(DyldAllImageInfos64, dyld_image_load_address), 0x20);
        assert_eq!(offset_of!(DyldAllImageInfos32, shared_cache_slide), 0x50);
        assert_eq!(offset_of!(DyldAllImageInfos64, shared_cache_slide), 0x98);
    }

    #[test]
    fn header_size_per_width() {
        assert_eq!(<Bits32 as MachArch>::HEADER_SIZE, 28);
        assert_eq!(<Bits64 as MachArch>::HEADER_SIZE, 32);
    }

    #[test]
    fn segment_name_comparison() {
        let mut field = [0u8; 16];
        field[..6].copy_from_slice(b"__TEXT");
        assert!(segment_name_is(&field, SEG_TEXT));
        assert!(!segment_name_is(&field, SEG_LINKEDIT));

        // a name that fills the field entirely has no NUL terminator
        let full = *b"0123456789abcdef";
        assert!(segment_name_is(&full, b"0123456789abcdef"));
        assert!(!segment_name_is(&full, b"0123456789"));
    }
}
