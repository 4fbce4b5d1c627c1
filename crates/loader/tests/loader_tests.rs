use loader::{link, load, parse, LoadError, RawProgram, RawReloc, R_BPF_64_32, R_BPF_64_64};
use vm::decoder::opc;
use vm::instruction::Instruction;
use vm::memory::PROGRAM_REGION_START;
use vm::program::{CallTarget, MAX_INSTRUCTION_COUNT};
use vm::sys_call::{default_registry, hash_internal_pc, hash_symbol_name, SyscallRegistry};

fn ins(op: u8, dst: u8, src: u8, offset: i16, imm: i32) -> [u8; 8] {
    let mut b = [0u8; 8];
    b[0] = op;
    b[1] = (src << 4) | (dst & 0x0f);
    b[2..4].copy_from_slice(&offset.to_le_bytes());
    b[4..8].copy_from_slice(&imm.to_le_bytes());
    b
}

fn text(slots: &[[u8; 8]]) -> Vec<u8> {
    slots.iter().flatten().copied().collect()
}

fn registry() -> SyscallRegistry {
    default_registry().expect("default registry")
}

fn raw(text: Vec<u8>) -> RawProgram {
    RawProgram { text, ..RawProgram::default() }
}

#[test]
fn single_unresolved_import_fails_the_load() {
    // The program's only flaw is one call whose hash resolves nowhere.
    let program = raw(text(&[
        ins(opc::CALL, 0, 0, 0, 0x1234_5678),
        ins(opc::EXIT, 0, 0, 0, 0),
    ]));
    match link(program, &registry()) {
        Err(LoadError::UnresolvedImport(hash)) => assert_eq!(hash, 0x1234_5678),
        other => panic!("expected UnresolvedImport, got {other:?}"),
    }
}

#[test]
fn pre_hashed_syscall_calls_resolve_against_the_namespace() {
    let id = hash_symbol_name(b"sol_log_64_");
    let program = raw(text(&[
        ins(opc::CALL, 0, 0, 0, id as i32),
        ins(opc::EXIT, 0, 0, 0, 0),
    ]));
    let image = link(program, &registry()).expect("load");
    assert_eq!(image.call_table.get(&id), Some(&CallTarget::Syscall(id)));
}

#[test]
fn call_reloc_against_an_undefined_symbol_resolves_by_name() {
    let mut program = raw(text(&[
        ins(opc::CALL, 0, 0, 0, -1),
        ins(opc::EXIT, 0, 0, 0, 0),
    ]));
    program.relocs.push(RawReloc {
        r_type: R_BPF_64_32,
        offset: 0,
        sym_name: Some("sol_log_64_".to_string()),
        sym_value: 0,
        sym_defined: false,
    });
    let image = link(program, &registry()).expect("load");
    let id = hash_symbol_name(b"sol_log_64_");
    assert_eq!(image.instructions[0], Instruction::Call { hash: id });
}

#[test]
fn call_reloc_against_an_unknown_name_is_an_unresolved_import() {
    let mut program = raw(text(&[
        ins(opc::CALL, 0, 0, 0, -1),
        ins(opc::EXIT, 0, 0, 0, 0),
    ]));
    program.relocs.push(RawReloc {
        r_type: R_BPF_64_32,
        offset: 0,
        sym_name: Some("sol_no_such_syscall".to_string()),
        sym_value: 0,
        sym_defined: false,
    });
    assert!(matches!(
        link(program, &registry()),
        Err(LoadError::UnresolvedImport(_))
    ));
}

#[test]
fn call_reloc_against_a_defined_function_becomes_an_internal_target() {
    let mut program = raw(text(&[
        ins(opc::CALL, 0, 0, 0, -1),
        ins(opc::EXIT, 0, 0, 0, 0),
        ins(opc::EXIT, 0, 0, 0, 0), // callee at pc 2
    ]));
    program.relocs.push(RawReloc {
        r_type: R_BPF_64_32,
        offset: 0,
        sym_name: Some("helper".to_string()),
        sym_value: 16,
        sym_defined: true,
    });
    let image = link(program, &registry()).expect("load");
    let hash = hash_internal_pc(2);
    assert_eq!(image.call_table.get(&hash), Some(&CallTarget::Internal(2)));
    assert_eq!(image.instructions[0], Instruction::Call { hash });
}

#[test]
fn lddw_reloc_rebases_into_the_program_region() {
    let mut program = raw(text(&[
        ins(opc::LDDW, 1, 0, 0, 0x10), // addend 0x10
        ins(0, 0, 0, 0, 0),
        ins(opc::EXIT, 0, 0, 0, 0),
    ]));
    program.rodata = vec![0; 0x100];
    program.rodata_off = 0x1000;
    program.relocs.push(RawReloc {
        r_type: R_BPF_64_64,
        offset: 0,
        sym_name: None,
        sym_value: 0x1000,
        sym_defined: true,
    });
    let image = link(program, &registry()).expect("load");
    assert_eq!(
        image.instructions[0],
        Instruction::LoadImm64 { dst: 1, imm: PROGRAM_REGION_START + 0x1010 }
    );
}

#[test]
fn lddw_reloc_outside_rodata_is_out_of_bounds() {
    let mut program = raw(text(&[
        ins(opc::LDDW, 1, 0, 0, 0),
        ins(0, 0, 0, 0, 0),
        ins(opc::EXIT, 0, 0, 0, 0),
    ]));
    program.rodata = vec![0; 0x10];
    program.rodata_off = 0x1000;
    program.relocs.push(RawReloc {
        r_type: R_BPF_64_64,
        offset: 0,
        sym_name: None,
        sym_value: 0x2000,
        sym_defined: true,
    });
    assert!(matches!(
        link(program, &registry()),
        Err(LoadError::RelocationOutOfBounds(0))
    ));
}

#[test]
fn unsupported_relocation_types_are_rejected() {
    let mut program = raw(text(&[ins(opc::EXIT, 0, 0, 0, 0)]));
    program.relocs.push(RawReloc {
        r_type: 99,
        offset: 0,
        sym_name: None,
        sym_value: 0,
        sym_defined: true,
    });
    assert!(matches!(
        link(program, &registry()),
        Err(LoadError::UnsupportedRelocation(99))
    ));
}

#[test]
fn text_must_be_slot_aligned() {
    let mut bytes = text(&[ins(opc::EXIT, 0, 0, 0, 0)]);
    bytes.push(0);
    assert!(matches!(
        link(raw(bytes), &registry()),
        Err(LoadError::UnalignedText(9))
    ));
}

#[test]
fn trailing_lddw_head_is_truncated() {
    let program = raw(text(&[ins(opc::LDDW, 1, 0, 0, 0)]));
    assert!(matches!(
        link(program, &registry()),
        Err(LoadError::TruncatedInstruction)
    ));
}

#[test]
fn entry_must_sit_inside_text() {
    let mut program = raw(text(&[ins(opc::EXIT, 0, 0, 0, 0)]));
    program.entry_off = 8;
    assert!(matches!(
        link(program, &registry()),
        Err(LoadError::EntryOutOfBounds(8))
    ));

    let mut program = raw(text(&[ins(opc::EXIT, 0, 0, 0, 0), ins(opc::EXIT, 0, 0, 0, 0)]));
    program.entry_off = 4; // misaligned
    assert!(matches!(
        link(program, &registry()),
        Err(LoadError::EntryOutOfBounds(4))
    ));
}

#[test]
fn instruction_count_is_capped() {
    let slots = vec![ins(opc::EXIT, 0, 0, 0, 0); MAX_INSTRUCTION_COUNT + 1];
    assert!(matches!(
        link(raw(text(&slots)), &registry()),
        Err(LoadError::TooManyInstructions(_))
    ));
}

#[test]
fn text_and_rodata_must_not_overlap() {
    let mut program = raw(text(&[ins(opc::EXIT, 0, 0, 0, 0), ins(opc::EXIT, 0, 0, 0, 0)]));
    program.text_off = 0;
    program.rodata = vec![0; 16];
    program.rodata_off = 8;
    assert!(matches!(
        link(program, &registry()),
        Err(LoadError::OverlappingSections)
    ));
}

// --- container-level tests ------------------------------------------------

/// Minimal ELF64 little-endian builder: header, section bodies, then the
/// section header table (null section + the given sections + .shstrtab).
fn build_elf(entry: u64, sections: &[(&str, u64, Vec<u8>)]) -> Vec<u8> {
    const EHSIZE: usize = 64;
    const SHENTSIZE: usize = 64;

    let mut shstrtab = vec![0u8];
    let mut name_offs = Vec::new();
    for (name, _, _) in sections {
        name_offs.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(name.as_bytes());
        shstrtab.push(0);
    }
    let shstrtab_name = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab\0");

    let mut body = Vec::new();
    let mut offsets = Vec::new();
    let mut cursor = EHSIZE;
    for (_, _, data) in sections {
        offsets.push(cursor as u64);
        body.extend_from_slice(data);
        cursor += data.len();
    }
    let shstrtab_off = cursor as u64;
    body.extend_from_slice(&shstrtab);
    cursor += shstrtab.len();
    while cursor % 8 != 0 {
        body.push(0);
        cursor += 1;
    }
    let shoff = cursor as u64;
    let shnum = (sections.len() + 2) as u16;

    let mut out = Vec::new();
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    out.extend_from_slice(&3u16.to_le_bytes()); // e_type = ET_DYN
    out.extend_from_slice(&247u16.to_le_bytes()); // e_machine = EM_BPF
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&entry.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
    out.extend_from_slice(&shoff.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHSIZE as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&(SHENTSIZE as u16).to_le_bytes());
    out.extend_from_slice(&shnum.to_le_bytes());
    out.extend_from_slice(&(shnum - 1).to_le_bytes()); // e_shstrndx
    out.extend_from_slice(&body);

    let mut shdr = |name: u32, sh_type: u32, addr: u64, offset: u64, size: u64| {
        out.extend_from_slice(&name.to_le_bytes());
        out.extend_from_slice(&sh_type.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
        out.extend_from_slice(&addr.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // sh_link
        out.extend_from_slice(&0u32.to_le_bytes()); // sh_info
        out.extend_from_slice(&1u64.to_le_bytes()); // sh_addralign
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_entsize
    };
    shdr(0, 0, 0, 0, 0); // null section
    for (i, (_, addr, data)) in sections.iter().enumerate() {
        shdr(name_offs[i], 1, *addr, offsets[i], data.len() as u64); // PROGBITS
    }
    shdr(shstrtab_name, 3, 0, shstrtab_off, shstrtab.len() as u64); // STRTAB
    out
}

#[test]
fn garbage_bytes_are_a_malformed_container() {
    assert!(matches!(
        parse(b"definitely not an elf"),
        Err(LoadError::Malformed(_))
    ));
}

#[test]
fn minimal_container_loads_end_to_end() {
    let code = text(&[
        ins(opc::MOV64_IMM, 0, 0, 0, 0),
        ins(opc::EXIT, 0, 0, 0, 0),
    ]);
    let rodata = vec![1, 2, 3, 4];
    let bytes = build_elf(
        0x1000,
        &[(".text", 0x1000, code), (".rodata", 0x2000, rodata)],
    );
    let image = load(&bytes, &registry()).expect("load");
    assert_eq!(image.entry_pc, 0);
    assert_eq!(image.instructions.len(), 2);
    assert_eq!(image.text_off, 0x1000);
    assert_eq!(image.rodata_off, 0x2000);
    assert_eq!(image.rodata.as_slice(), [1, 2, 3, 4]);
}

#[test]
fn missing_text_section_is_rejected() {
    let bytes = build_elf(0, &[(".rodata", 0x2000, vec![0; 8])]);
    assert!(matches!(
        parse(&bytes),
        Err(LoadError::MissingSection(".text"))
    ));
}

#[test]
fn duplicate_text_sections_are_rejected() {
    let code = text(&[ins(opc::EXIT, 0, 0, 0, 0)]);
    let bytes = build_elf(
        0x1000,
        &[(".text", 0x1000, code.clone()), (".text", 0x2000, code)],
    );
    assert!(matches!(
        parse(&bytes),
        Err(LoadError::DuplicateSection(_))
    ));
}

#[test]
fn container_entry_outside_text_is_rejected() {
    let code = text(&[ins(opc::EXIT, 0, 0, 0, 0)]);
    let bytes = build_elf(0x4000, &[(".text", 0x1000, code)]);
    assert!(matches!(
        parse(&bytes),
        Err(LoadError::EntryOutOfBounds(0x4000))
    ));
}

#[test]
fn truncated_section_data_is_rejected() {
    let code = text(&[ins(opc::EXIT, 0, 0, 0, 0)]);
    let mut bytes = build_elf(0x1000, &[(".text", 0x1000, code)]);
    // Grow the recorded size of .text (first non-null shdr) past the file.
    let shoff = u64::from_le_bytes(bytes[40..48].try_into().unwrap()) as usize;
    let size_field = shoff + 64 + 32;
    bytes[size_field..size_field + 8].copy_from_slice(&0x10_0000u64.to_le_bytes());
    assert!(matches!(
        parse(&bytes),
        Err(LoadError::SectionOutOfBounds(_))
    ));
}
