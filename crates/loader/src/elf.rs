//! ELF container parsing.
//!
//! Pulls the pieces the linker stage needs out of a relocatable executable:
//! the unique text section, a flat merge of the read-only data sections,
//! the entry address, defined function symbols and every relocation
//! targeting text. Anything structurally off (truncated section data,
//! missing or duplicated text) is rejected here; semantic resolution
//! happens in [`crate::link`].

use goblin::elf::section_header::{SHT_DYNSYM, SHT_NOBITS};
use goblin::elf::sym::STT_FUNC;
use goblin::elf::Elf;

use crate::LoadError;

/// One relocation against the text section, with its symbol pre-resolved.
#[derive(Debug, Clone)]
pub struct ElfReloc {
    pub r_type: u32,
    /// Raw virtual address of the patched slot in the object.
    pub offset: u64,
    pub sym_name: Option<String>,
    /// Raw `st_value`; meaningful only when `sym_defined`.
    pub sym_value: u64,
    pub sym_defined: bool,
}

/// The parsed container, before decoding and resolution.
#[derive(Debug)]
pub struct ElfUnit {
    pub entry: u64,
    pub text_addr: u64,
    pub text: Vec<u8>,
    pub rodata_addr: u64,
    pub rodata: Vec<u8>,
    /// Raw addresses of defined function symbols.
    pub func_vaddrs: Vec<u64>,
    pub relocs: Vec<ElfReloc>,
}

struct Section<'a> {
    name: &'a str,
    addr: u64,
    data: &'a [u8],
}

fn collect_sections<'a>(elf: &Elf<'a>, bytes: &'a [u8]) -> Result<Vec<Section<'a>>, LoadError> {
    let mut sections = Vec::new();
    for header in elf.section_headers.iter() {
        let Some(name) = elf.shdr_strtab.get_at(header.sh_name) else {
            continue;
        };
        if header.sh_type == SHT_NOBITS {
            continue;
        }
        let offset = header.sh_offset as usize;
        let size = header.sh_size as usize;
        let end = offset
            .checked_add(size)
            .ok_or_else(|| LoadError::SectionOutOfBounds(name.to_string()))?;
        if end > bytes.len() {
            return Err(LoadError::SectionOutOfBounds(name.to_string()));
        }
        sections.push(Section { name, addr: header.sh_addr, data: &bytes[offset..end] });
    }
    Ok(sections)
}

/// Largest span a flat section merge may cover. Sections scattered across
/// the address space would otherwise dictate the allocation size.
const MAX_MERGED_SPAN: u64 = 16 * 1024 * 1024;

/// Flat merge of all sections whose name starts with `prefix`, returning
/// the merged bytes and their base address. Gaps between sections are
/// zero-filled.
fn flat_merge(sections: &[Section], prefix: &str) -> Result<(Vec<u8>, u64), LoadError> {
    let picked: Vec<&Section> = sections.iter().filter(|s| s.name.starts_with(prefix)).collect();
    if picked.is_empty() {
        return Ok((Vec::new(), 0));
    }
    let min_addr = picked.iter().map(|s| s.addr).min().unwrap_or(0);
    let mut max_addr = min_addr;
    for section in &picked {
        let end = section
            .addr
            .checked_add(section.data.len() as u64)
            .ok_or_else(|| LoadError::SectionOutOfBounds(prefix.to_string()))?;
        max_addr = max_addr.max(end);
    }
    if max_addr - min_addr > MAX_MERGED_SPAN {
        return Err(LoadError::SectionOutOfBounds(prefix.to_string()));
    }
    let mut flat = vec![0u8; (max_addr - min_addr) as usize];
    for section in picked {
        let off = (section.addr - min_addr) as usize;
        flat[off..off + section.data.len()].copy_from_slice(section.data);
    }
    Ok((flat, min_addr))
}

fn resolve_sym(elf: &Elf, dynamic: bool, idx: usize) -> (Option<String>, u64, bool) {
    let (sym, name) = if dynamic {
        let Some(sym) = elf.dynsyms.get(idx) else {
            return (None, 0, false);
        };
        let name = elf.dynstrtab.get_at(sym.st_name).map(str::to_string);
        (sym, name)
    } else {
        let Some(sym) = elf.syms.get(idx) else {
            return (None, 0, false);
        };
        let name = elf.strtab.get_at(sym.st_name).map(str::to_string);
        (sym, name)
    };
    (name, sym.st_value, sym.st_shndx != 0)
}

/// Parses the container. Structural validation only; no decoding.
pub fn parse_elf(bytes: &[u8]) -> Result<ElfUnit, LoadError> {
    let elf = Elf::parse(bytes).map_err(|e| LoadError::Malformed(e.to_string()))?;
    let sections = collect_sections(&elf, bytes)?;

    let text_sections: Vec<&Section> =
        sections.iter().filter(|s| s.name.starts_with(".text")).collect();
    let text = match text_sections.as_slice() {
        [] => return Err(LoadError::MissingSection(".text")),
        [one] => one,
        _ => return Err(LoadError::DuplicateSection(".text".to_string())),
    };

    let (rodata, rodata_addr) = flat_merge(&sections, ".rodata")?;

    let mut func_vaddrs = Vec::new();
    for sym in elf.syms.iter().chain(elf.dynsyms.iter()) {
        if sym.st_type() == STT_FUNC && sym.st_shndx != 0 {
            func_vaddrs.push(sym.st_value);
        }
    }
    func_vaddrs.sort_unstable();
    func_vaddrs.dedup();

    let mut relocs = Vec::new();
    for (shdr_idx, rels) in elf.shdr_relocs.iter() {
        let dynamic = elf
            .section_headers
            .get(*shdr_idx)
            .and_then(|sh| elf.section_headers.get(sh.sh_link as usize))
            .map(|link| link.sh_type == SHT_DYNSYM)
            .unwrap_or(false);
        for rel in rels.iter() {
            let (sym_name, sym_value, sym_defined) = resolve_sym(&elf, dynamic, rel.r_sym);
            relocs.push(ElfReloc {
                r_type: rel.r_type,
                offset: rel.r_offset,
                sym_name,
                sym_value,
                sym_defined,
            });
        }
    }
    for rel in elf.dynrels.iter().chain(elf.dynrelas.iter()) {
        let (sym_name, sym_value, sym_defined) = resolve_sym(&elf, true, rel.r_sym);
        relocs.push(ElfReloc {
            r_type: rel.r_type,
            offset: rel.r_offset,
            sym_name,
            sym_value,
            sym_defined,
        });
    }

    tracing::debug!(
        target: "loader",
        text = text.data.len(),
        rodata = rodata.len(),
        relocs = relocs.len(),
        funcs = func_vaddrs.len(),
        "parsed program container"
    );

    Ok(ElfUnit {
        entry: elf.header.e_entry,
        text_addr: text.addr,
        text: text.data.to_vec(),
        rodata_addr,
        rodata,
        func_vaddrs,
        relocs,
    })
}
