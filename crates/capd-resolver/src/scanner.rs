#![allow(unsafe_code)]

//! Walks a native library's dynamic symbol table to find candidate entry
//! points. Two independent paths exist, per spec &4.1: the on-disk file
//! (preferred — a plain `goblin` parse) and the live memory image (fallback,
//! for libraries whose backing file isn't readable from this process, e.g.
//! because it lives inside a read-only system partition this process has
//! only `mmap` access to, not `open` access).

use std::fs;
use std::path::Path;

use goblin::elf::Elf;
use regex::Regex;

use crate::demangle;
use crate::error::{Error, Result};
use crate::image::LibraryImage;
use crate::symbol::Symbol;

/// Upper bound on symbols visited during the live-memory walk when the
/// library exposes only `DT_HASH` (its `nchain` count is unreliable on some
/// platform builds) and no `DT_GNU_HASH`. See open question in spec &9:
/// a fully correct implementation would walk the GNU hash bucket/chain
/// arrays precisely instead of bounding the scan.
const LIVE_SCAN_SYMBOL_LIMIT: usize = 10_000;

pub struct SymbolScanner;

impl SymbolScanner {
    /// Walks the on-disk ELF file backing `image`, matching `.dynsym`
    /// entries of type `STT_FUNC` whose mangled name matches `pattern`.
    pub fn scan_on_disk(image: &LibraryImage, pattern: &Regex) -> Result<Vec<Symbol>> {
        let bytes = fs::read(&image.path).map_err(|e| {
            Error::SymbolTableUnreadable(image.path.display().to_string(), e.to_string())
        })?;
        let elf = Elf::parse(&bytes).map_err(|e| {
            Error::SymbolTableUnreadable(image.path.display().to_string(), e.to_string())
        })?;

        let mut out = Vec::new();
        for sym in elf.dynsyms.iter() {
            if !sym.is_function() || sym.st_value == 0 {
                continue;
            }
            let Some(name) = elf.dynstrtab.get_at(sym.st_name) else {
                continue;
            };
            if !pattern.is_match(name) {
                continue;
            }
            out.push(make_symbol(name, sym.st_value as usize));
        }
        Ok(out)
    }

    /// Walks `PT_DYNAMIC` / `DT_SYMTAB` / `DT_STRTAB` directly in this
    /// process's live memory image of `image`. Used when the file cannot be
    /// opened (only the mapping is accessible) or as a cross-check against
    /// the on-disk result.
    ///
    /// # Safety contract
    /// This reads raw process memory starting at `image.base`. The caller
    /// must guarantee `image` was produced by [`crate::image::probe`] for a
    /// mapping that is still live; the library is never unloaded for the
    /// lifetime of the process (spec &9), so this invariant holds for the
    /// resolver's own usage.
    pub fn scan_live(image: &LibraryImage, pattern: &Regex) -> Result<Vec<Symbol>> {
        let dynamic = unsafe { find_dynamic_section(image) }.ok_or_else(|| {
            Error::SymbolTableUnreadable(image.path.display().to_string(), "no PT_DYNAMIC".into())
        })?;

        let mut out = Vec::new();
        let mut i = 0usize;
        while i < LIVE_SCAN_SYMBOL_LIMIT {
            let Some((name_ptr, value)) = (unsafe { dynamic.nth_symbol(i) }) else {
                break;
            };
            i += 1;
            let Some(name) = (unsafe { read_cstr(name_ptr) }) else {
                continue;
            };
            if value == 0 || !pattern.is_match(&name) {
                continue;
            }
            out.push(make_symbol(&name, value - image.base));
        }
        Ok(out)
    }

    /// Tries the on-disk path first, falling back to the live-memory walk.
    pub fn scan(image: &LibraryImage, pattern: &Regex) -> Result<Vec<Symbol>> {
        match Self::scan_on_disk(image, pattern) {
            Ok(syms) if !syms.is_empty() => Ok(syms),
            Ok(_) | Err(_) => Self::scan_live(image, pattern),
        }
    }

    /// Convenience matching the display-creation family: prefers names
    /// containing `createVirtualDisplay`, then greater parameter count.
    pub fn find_create_display(image: &LibraryImage) -> Result<Symbol> {
        let pattern =
            Regex::new(r".*SurfaceComposerClient.*(createDisplay|createVirtualDisplay).*").unwrap();
        Self::find_create_display_matching(image, &pattern)
    }

    /// Same preference order as [`Self::find_create_display`], but against
    /// a caller-supplied pattern — used by the catalog to try each ABI
    /// variant's own narrower pattern in turn.
    pub fn find_create_display_matching(image: &LibraryImage, pattern: &Regex) -> Result<Symbol> {
        let mut candidates = Self::scan(image, pattern)?;
        if candidates.is_empty() {
            return Err(Error::PrivateApiUnavailable {
                operation: "create_display",
                platform: 0,
            });
        }
        candidates.sort_by(|a, b| {
            let a_key = (a.demangled.contains("createVirtualDisplay"), a.param_count);
            let b_key = (b.demangled.contains("createVirtualDisplay"), b.param_count);
            b_key.cmp(&a_key)
        });
        Ok(candidates.remove(0))
    }
}

fn make_symbol(mangled: &str, offset: usize) -> Symbol {
    let demangled = demangle::demangle(mangled);
    let param_count = demangle::estimate_param_count(&demangled);
    Symbol {
        name: mangled.to_string(),
        demangled,
        offset,
        param_count,
    }
}

/// A live-memory view of a library's `.dynsym`/`.dynstr` pair, located by
/// walking `PT_DYNAMIC`.
struct LiveDynamic {
    symtab: usize,
    strtab: usize,
    syment: usize,
}

impl LiveDynamic {
    /// Reads the `n`th `Elf64_Sym`-shaped entry starting at `symtab`,
    /// returning (pointer to its name in `strtab`, absolute symbol value).
    ///
    /// # Safety
    /// `symtab`/`strtab` must point at live, mapped ELF dynamic-symbol
    /// structures for the duration of the call.
    unsafe fn nth_symbol(&self, n: usize) -> Option<(*const u8, usize)> {
        #[repr(C)]
        struct Elf64Sym {
            st_name: u32,
            st_info: u8,
            st_other: u8,
            st_shndx: u16,
            st_value: u64,
            st_size: u64,
        }
        let entry_ptr = (self.symtab + n * self.syment) as *const Elf64Sym;
        // Heuristically bounded by the caller's scan limit; there is no
        // portable way to learn the exact symbol count without walking
        // DT_HASH/DT_GNU_HASH precisely (see module doc).
        let sym = std::ptr::read_unaligned(entry_ptr);
        if sym.st_value == 0 && sym.st_name == 0 {
            return None;
        }
        let name_ptr = (self.strtab + sym.st_name as usize) as *const u8;
        Some((name_ptr, sym.st_value as usize))
    }
}

/// Walks this process's own ELF headers at `image.base` to find
/// `PT_DYNAMIC`, then `DT_SYMTAB` / `DT_STRTAB` / `DT_SYMENT` within it.
///
/// # Safety
/// `image.base` must be the start of a live ELF mapping in this process.
unsafe fn find_dynamic_section(image: &LibraryImage) -> Option<LiveDynamic> {
    const PT_DYNAMIC: u32 = 2;
    const DT_SYMTAB: i64 = 6;
    const DT_STRTAB: i64 = 5;
    const DT_SYMENT: i64 = 11;
    const DT_NULL: i64 = 0;

    #[repr(C)]
    struct Elf64Ehdr {
        e_ident: [u8; 16],
        e_type: u16,
        e_machine: u16,
        e_version: u32,
        e_entry: u64,
        e_phoff: u64,
        e_shoff: u64,
        e_flags: u32,
        e_ehsize: u16,
        e_phentsize: u16,
        e_phnum: u16,
        e_shentsize: u16,
        e_shnum: u16,
        e_shstrndx: u16,
    }
    #[repr(C)]
    struct Elf64Phdr {
        p_type: u32,
        p_flags: u32,
        p_offset: u64,
        p_vaddr: u64,
        p_paddr: u64,
        p_filesz: u64,
        p_memsz: u64,
        p_align: u64,
    }
    #[repr(C)]
    struct Elf64Dyn {
        d_tag: i64,
        d_val: u64,
    }

    let base = image.base;
    let ehdr = std::ptr::read_unaligned(base as *const Elf64Ehdr);
    if &ehdr.e_ident[0..4] != b"\x7fELF" {
        return None;
    }

    let phdr_base = base + ehdr.e_phoff as usize;
    let mut dynamic_vaddr = None;
    for i in 0..ehdr.e_phnum as usize {
        let phdr = std::ptr::read_unaligned(
            (phdr_base + i * ehdr.e_phentsize as usize) as *const Elf64Phdr,
        );
        if phdr.p_type == PT_DYNAMIC {
            dynamic_vaddr = Some(phdr.p_vaddr as usize);
            break;
        }
    }
    let dynamic_vaddr = dynamic_vaddr?;

    let mut symtab = None;
    let mut strtab = None;
    let mut syment = 24usize; // sizeof(Elf64_Sym)
    let mut i = 0usize;
    loop {
        let entry = std::ptr::read_unaligned(
            (base + dynamic_vaddr + i * std::mem::size_of::<Elf64Dyn>()) as *const Elf64Dyn,
        );
        match entry.d_tag {
            DT_NULL => break,
            DT_SYMTAB => symtab = Some(base + entry.d_val as usize),
            DT_STRTAB => strtab = Some(base + entry.d_val as usize),
            DT_SYMENT => syment = entry.d_val as usize,
            _ => {}
        }
        i += 1;
        if i > 4096 {
            break;
        }
    }

    Some(LiveDynamic {
        symtab: symtab?,
        strtab: strtab?,
        syment,
    })
}

/// Reads a NUL-terminated C string at `ptr`. Bounded at 4096 bytes to avoid
/// running away on a corrupt string table.
///
/// # Safety
/// `ptr` must point at a live, mapped, NUL-terminated byte sequence.
unsafe fn read_cstr(ptr: *const u8) -> Option<String> {
    let mut len = 0usize;
    while len < 4096 && *ptr.add(len) != 0 {
        len += 1;
    }
    let slice = std::slice::from_raw_parts(ptr, len);
    std::str::from_utf8(slice).ok().map(str::to_string)
}

#[allow(dead_code)]
fn _unused(_: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_create_display_prefers_virtual_display_and_param_count() {
        let candidates = vec![
            Symbol {
                name: "_ZN7android20SurfaceComposerClient13createDisplayERKNS_8String8Eb".into(),
                demangled: "android::SurfaceComposerClient::createDisplay(android::String8 const&, bool)".into(),
                offset: 0x10,
                param_count: 2,
            },
            Symbol {
                name: "_ZN7android20SurfaceComposerClient20createVirtualDisplayERKNS_8String8Ebb".into(),
                demangled: "android::SurfaceComposerClient::createVirtualDisplay(android::String8 const&, bool, bool)".into(),
                offset: 0x20,
                param_count: 3,
            },
        ];
        let mut sorted = candidates;
        sorted.sort_by(|a, b| {
            let a_key = (a.demangled.contains("createVirtualDisplay"), a.param_count);
            let b_key = (b.demangled.contains("createVirtualDisplay"), b.param_count);
            b_key.cmp(&a_key)
        });
        assert!(sorted[0].demangled.contains("createVirtualDisplay"));
    }
}
