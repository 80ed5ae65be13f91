//! Searches one remote Mach-O image's classic symbol table for a name,
//! without ever mapping the image locally: the header, every load command,
//! every nlist entry and every candidate name string are read individually
//! out of the target's address space.

use crate::{
    errors::LookupError,
    macho::{
        Bits32, Bits64, HeaderFlags, LC_SEGMENT, LC_SEGMENT_64, LC_SYMTAB, LoadCommandBase,
        MH_MAGIC, MH_MAGIC_64, MachArch, MachHeader, SEG_LINKEDIT, SEG_TEXT, SegmentCommand,
        SymbolEntry, SymtabCommand, segment_name_is,
    },
    task_reader::TaskReader,
};
use log::{debug, warn};

/// What scanning one image produced.
///
/// The header facts are reported whether or not the symbol was found; the
/// orchestrator needs the width and the cache flag to compose the final
/// address when `symbol` is present.
pub struct ScanOutcome {
    /// The image was mapped out of the dyld shared cache
    pub in_shared_cache: bool,
    /// The image is 64-bit (by header magic)
    pub is_64_bit: bool,
    /// The symbol's nlist value: its virtual address as linked, before any
    /// slide or rebase
    pub symbol: Option<u64>,
}

/// Scans the image whose Mach-O header lives at `header_addr` in the
/// target for `symbol_name`.
///
/// An unrecognized magic or a missing required load command skips the
/// image (outcome with `symbol: None`); a failed remote read propagates as
/// an error and the caller decides how much of the lookup to abandon.
pub fn scan_image(
    reader: &TaskReader,
    header_addr: u64,
    symbol_name: &str,
) -> Result<ScanOutcome, LookupError> {
    assert!(header_addr > 0);

    let header: MachHeader = reader.read_struct(header_addr)?;
    let in_shared_cache =
        HeaderFlags::from_bits_retain(header.flags).contains(HeaderFlags::DYLIB_IN_CACHE);

    let (is_64_bit, symbol) = match header.magic {
        MH_MAGIC => (
            false,
            find_symbol::<Bits32>(reader, header_addr, &header, symbol_name)?,
        ),
        MH_MAGIC_64 => (
            true,
            find_symbol::<Bits64>(reader, header_addr, &header, symbol_name)?,
        ),
        magic => {
            warn!("image at {header_addr:#x} has unsupported magic {magic:#010x}, skipping it");
            (false, None)
        }
    };

    Ok(ScanOutcome {
        in_shared_cache,
        is_64_bit,
        symbol,
    })
}

fn find_symbol<A: MachArch>(
    reader: &TaskReader,
    header_addr: u64,
    header: &MachHeader,
    symbol_name: &str,
) -> Result<Option<u64>, LookupError> {
    let mut symtab_addr = None;
    let mut text_addr = None;
    let mut linkedit_addr = None;

    let mut command_addr = header_addr + A::HEADER_SIZE;
    for _ in 0..header.num_commands {
        let command: LoadCommandBase = reader.read_struct(command_addr)?;

        match command.cmd {
            LC_SYMTAB => symtab_addr = Some(command_addr),
            LC_SEGMENT | LC_SEGMENT_64 => {
                // the 16-byte segment name sits right past the (cmd, cmdsize)
                // prefix in both widths
                let name: [u8; 16] =
                    reader.read_struct(command_addr + size_of::<LoadCommandBase>() as u64)?;
                if segment_name_is(&name, SEG_TEXT) {
                    text_addr = Some(command_addr);
                } else if segment_name_is(&name, SEG_LINKEDIT) {
                    linkedit_addr = Some(command_addr);
                }
            }
            _ => {}
        }

        if (command.cmd_size as usize) < size_of::<LoadCommandBase>() {
            // a cmdsize this small can't advance the cursor; the header lied
            debug!(
                "image at {header_addr:#x} declares cmdsize {}, abandoning the walk",
                command.cmd_size
            );
            break;
        }
        command_addr += u64::from(command.cmd_size);
    }

    let (Some(symtab_addr), Some(text_addr), Some(linkedit_addr)) =
        (symtab_addr, text_addr, linkedit_addr)
    else {
        debug!("image at {header_addr:#x} is missing LC_SYMTAB, __TEXT or __LINKEDIT, skipping it");
        return Ok(None);
    };

    let symtab: SymtabCommand = reader.read_struct(symtab_addr)?;
    let text: A::Segment = reader.read_struct(text_addr)?;
    let linkedit: A::Segment = reader.read_struct(linkedit_addr)?;

    // The symtab command stores file offsets. In memory that data lives in
    // __LINKEDIT, displaced from its file offset by however far the segment
    // was placed from __TEXT; the difference converts a file offset into an
    // address relative to the image header. Recomputed per image.
    let file_slide = linkedit
        .vm_addr()
        .wrapping_sub(text.vm_addr())
        .wrapping_sub(linkedit.file_off());
    let strings_base = header_addr
        .wrapping_add(u64::from(symtab.str_off))
        .wrapping_add(file_slide);
    let mut symbol_addr = header_addr
        .wrapping_add(u64::from(symtab.sym_off))
        .wrapping_add(file_slide);

    for _ in 0..symtab.num_syms {
        let symbol: A::Symbol = reader.read_struct(symbol_addr)?;
        symbol_addr += size_of::<A::Symbol>() as u64;

        // undefined/external entries carry no address, never a match
        if symbol.value() == 0 {
            continue;
        }

        let stored =
            reader.read_string(strings_base.wrapping_add(u64::from(symbol.string_index())))?;
        if symbol_name_matches(symbol_name, &stored) {
            return Ok(Some(symbol.value()));
        }
    }

    Ok(None)
}

/// C symbols land in the table with a leading underscore while callers
/// usually pass the unadorned name; accept either form.
fn symbol_name_matches(requested: &str, stored: &str) -> bool {
    requested == stored || stored.strip_prefix('_').is_some_and(|tail| tail == requested)
}
