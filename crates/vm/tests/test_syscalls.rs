use std::collections::BTreeMap;
use std::rc::Rc;

use k256::ecdsa::SigningKey;
use sha2::{Digest, Sha256};

use vm::arena::Arena;
use vm::decoder::{decode_program, opc};
use vm::memory::{HEAP_REGION_START, INPUT_REGION_START};
use vm::program::{CallTarget, ProgramImage};
use vm::sys_call::{default_registry, hash_symbol_name};
use vm::{Effects, ExecResult, InputSlice, InvocationInput, Vm};

fn ins(op: u8, dst: u8, src: u8, offset: i16, imm: i32) -> [u8; 8] {
    let mut b = [0u8; 8];
    b[0] = op;
    b[1] = (src << 4) | (dst & 0x0f);
    b[2..4].copy_from_slice(&offset.to_le_bytes());
    b[4..8].copy_from_slice(&imm.to_le_bytes());
    b
}

fn lddw(dst: u8, imm: u64) -> [[u8; 8]; 2] {
    [
        ins(opc::LDDW, dst, 0, 0, imm as u32 as i32),
        ins(0, 0, 0, 0, (imm >> 32) as u32 as i32),
    ]
}

fn call(name: &str) -> [u8; 8] {
    ins(opc::CALL, 0, 0, 0, hash_symbol_name(name.as_bytes()) as i32)
}

/// Builds an image whose call table resolves the named syscalls.
fn run(slots: &[[u8; 8]], names: &[&str], input: InvocationInput) -> Effects {
    let text: Vec<u8> = slots.iter().flatten().copied().collect();
    let instructions = decode_program(&text).expect("test program must decode");
    let mut call_table = BTreeMap::new();
    for name in names {
        let id = hash_symbol_name(name.as_bytes());
        call_table.insert(id, CallTarget::Syscall(id));
    }
    let image = Rc::new(ProgramImage {
        entry_pc: 0,
        instructions,
        text: Rc::new(text),
        text_off: 0,
        rodata: Rc::new(Vec::new()),
        rodata_off: 0,
        call_table,
    });
    let registry = Rc::new(default_registry().expect("default registry"));
    Vm::new(image, registry).invoke(input, &Arena::new()).expect("layout")
}

fn custom(effects: &Effects) -> Option<u64> {
    match effects.result {
        ExecResult::InstructionError { custom, .. } => custom,
        _ => None,
    }
}

fn slice(pubkey: u8, data: Vec<u8>, writable: bool) -> InputSlice {
    InputSlice { pubkey: [pubkey; 32], data, writable, resizable: false }
}

/// Input layout shared by the recovery scenarios: hash at +0, signature
/// at +32, output buffer at +96.
fn recover_input(hash: [u8; 32], sig: [u8; 64]) -> InvocationInput {
    let mut input = InvocationInput::new(1_000_000);
    input.slices.push(slice(1, hash.to_vec(), false));
    input.slices.push(slice(2, sig.to_vec(), false));
    input.slices.push(slice(3, vec![0; 64], true));
    input
}

fn recover_program(recovery_id: i32) -> Vec<[u8; 8]> {
    let sig = lddw(3, INPUT_REGION_START + 32);
    let out = lddw(4, INPUT_REGION_START + 96);
    vec![
        // r1 already holds the input base (the hash slice)
        ins(opc::MOV64_IMM, 2, 0, 0, recovery_id),
        sig[0],
        sig[1],
        out[0],
        out[1],
        call("sol_secp256k1_recover"),
        ins(opc::EXIT, 0, 0, 0, 0),
    ]
}

#[test]
fn recover_with_recovery_id_over_four_returns_one_untouched_buffer() {
    let effects = run(
        &recover_program(5),
        &["sol_secp256k1_recover"],
        recover_input([0x11; 32], [0x22; 64]),
    );
    assert_eq!(custom(&effects), Some(1));
    assert_eq!(effects.modified_slices[0].data, vec![0u8; 64]);
}

#[test]
fn recover_with_garbage_signature_returns_two_untouched_buffer() {
    // s of all-ones is far above the curve order; parsing fails.
    let effects = run(
        &recover_program(0),
        &["sol_secp256k1_recover"],
        recover_input([0x11; 32], [0xff; 64]),
    );
    assert_eq!(custom(&effects), Some(2));
    assert_eq!(effects.modified_slices[0].data, vec![0u8; 64]);
}

#[test]
fn recover_round_trips_a_known_key() {
    let signing_key = SigningKey::from_slice(&[1u8; 32]).expect("valid scalar");
    let digest: [u8; 32] = Sha256::digest(b"vm recover test").into();
    let (signature, recovery_id) =
        signing_key.sign_prehash_recoverable(&digest).expect("signable");
    let mut sig = [0u8; 64];
    sig.copy_from_slice(&signature.to_bytes());

    let effects = run(
        &recover_program(recovery_id.to_byte() as i32),
        &["sol_secp256k1_recover"],
        recover_input(digest, sig),
    );
    assert_eq!(effects.result, ExecResult::Success);

    let encoded_point = signing_key.verifying_key().to_encoded_point(false);
    let expected = &encoded_point.as_bytes()[1..65];
    assert_eq!(effects.modified_slices[0].data, expected);
}

#[test]
fn recover_charges_its_scheduled_cost() {
    let effects = run(
        &recover_program(5),
        &["sol_secp256k1_recover"],
        recover_input([0; 32], [0; 64]),
    );
    // Five retired instructions (each lddw pair is one) plus the flat
    // recovery charge.
    assert_eq!(effects.compute_units_consumed, 5 + 25_000);
}

#[test]
fn memset_then_memcpy_round_trips_through_the_heap() {
    let dst = lddw(1, HEAP_REGION_START);
    let cpy_dst = lddw(1, HEAP_REGION_START + 16);
    let cpy_src = lddw(2, HEAP_REGION_START);
    let expect = lddw(4, 0xabab_abab_abab_abab);
    let slots = vec![
        dst[0],
        dst[1],
        ins(opc::MOV64_IMM, 2, 0, 0, 0xab),
        ins(opc::MOV64_IMM, 3, 0, 0, 8),
        call("sol_memset_"),
        cpy_dst[0],
        cpy_dst[1],
        cpy_src[0],
        cpy_src[1],
        ins(opc::MOV64_IMM, 3, 0, 0, 8),
        call("sol_memcpy_"),
        ins(opc::LDXDW, 0, 2, 16, 0),
        expect[0],
        expect[1],
        ins(opc::SUB64_REG, 0, 4, 0, 0), // zero iff the copy matched
        ins(opc::EXIT, 0, 0, 0, 0),
    ];
    let effects = run(
        &slots,
        &["sol_memset_", "sol_memcpy_"],
        InvocationInput::new(10_000),
    );
    assert_eq!(effects.result, ExecResult::Success);
}

#[test]
fn overlapping_memcpy_faults() {
    let dst = lddw(1, HEAP_REGION_START + 4);
    let src = lddw(2, HEAP_REGION_START);
    let slots = vec![
        dst[0],
        dst[1],
        src[0],
        src[1],
        ins(opc::MOV64_IMM, 3, 0, 0, 8),
        call("sol_memcpy_"),
        ins(opc::EXIT, 0, 0, 0, 0),
    ];
    let effects = run(&slots, &["sol_memcpy_"], InvocationInput::new(10_000));
    assert_eq!(effects.result, ExecResult::Fault { code: 13 });
}

#[test]
fn sha256_matches_the_reference_digest() {
    // Slice layout: data "abc" at +0, the (addr, len) table at +3, the
    // 32-byte output at +19.
    let mut table = Vec::new();
    table.extend_from_slice(&INPUT_REGION_START.to_le_bytes());
    table.extend_from_slice(&3u64.to_le_bytes());

    let mut input = InvocationInput::new(10_000);
    input.slices.push(slice(1, b"abc".to_vec(), false));
    input.slices.push(slice(2, table, false));
    input.slices.push(slice(3, vec![0; 32], true));

    let vals = lddw(1, INPUT_REGION_START + 3);
    let out = lddw(3, INPUT_REGION_START + 19);
    let slots = vec![
        vals[0],
        vals[1],
        ins(opc::MOV64_IMM, 2, 0, 0, 1),
        out[0],
        out[1],
        call("sol_sha256"),
        ins(opc::EXIT, 0, 0, 0, 0),
    ];
    let effects = run(&slots, &["sol_sha256"], input);
    assert_eq!(effects.result, ExecResult::Success);
    let expected: [u8; 32] = Sha256::digest(b"abc").into();
    assert_eq!(effects.modified_slices[0].data, expected);
}

#[test]
fn return_data_set_and_get_round_trip() {
    let payload = b"hello";
    let mut input = InvocationInput::new(10_000);
    input.slices.push(slice(1, payload.to_vec(), false));
    input.slices.push(slice(2, vec![0; 8], true));

    let get_dst = lddw(1, INPUT_REGION_START + 5);
    let slots = vec![
        // r1 = input base (payload), r2 = 5
        ins(opc::MOV64_IMM, 2, 0, 0, 5),
        call("sol_set_return_data"),
        get_dst[0],
        get_dst[1],
        ins(opc::MOV64_IMM, 2, 0, 0, 5),
        call("sol_get_return_data"),
        ins(opc::SUB64_IMM, 0, 0, 0, 5), // r0 was the full length
        ins(opc::EXIT, 0, 0, 0, 0),
    ];
    let effects = run(
        &slots,
        &["sol_set_return_data", "sol_get_return_data"],
        input,
    );
    assert_eq!(effects.result, ExecResult::Success);
    assert_eq!(effects.return_data, payload);
    assert_eq!(effects.modified_slices[0].data[..5], payload[..]);
}

#[test]
fn oversized_return_data_faults() {
    let mut input = InvocationInput::new(10_000);
    input.slices.push(slice(1, vec![0; 8], false));
    let slots = vec![
        ins(opc::MOV64_IMM, 2, 0, 0, 1_025),
        call("sol_set_return_data"),
        ins(opc::EXIT, 0, 0, 0, 0),
    ];
    let effects = run(&slots, &["sol_set_return_data"], input);
    assert_eq!(effects.result, ExecResult::Fault { code: 13 });
}

#[test]
fn account_resize_grows_in_place_and_honors_the_budget() {
    let mut input = InvocationInput::new(10_000);
    input.slices.push(InputSlice {
        pubkey: [5; 32],
        data: vec![0xcd; 8],
        writable: true,
        resizable: true,
    });

    let grow = vec![
        ins(opc::MOV64_IMM, 2, 0, 0, 20),
        call("sol_account_resize"),
        ins(opc::EXIT, 0, 0, 0, 0),
    ];
    let effects = run(&grow, &["sol_account_resize"], input.clone());
    assert_eq!(effects.result, ExecResult::Success);
    let data = &effects.modified_slices[0].data;
    assert_eq!(data.len(), 20);
    assert_eq!(data[..8], [0xcd; 8]);
    assert_eq!(data[8..], [0; 12]);

    // 8 + 10_240 headroom allows 10_248 at most.
    let too_big = vec![
        ins(opc::MOV64_IMM, 2, 0, 0, 10_249),
        call("sol_account_resize"),
        ins(opc::EXIT, 0, 0, 0, 0),
    ];
    let effects = run(&too_big, &["sol_account_resize"], input);
    assert_eq!(effects.result, ExecResult::Fault { code: 14 });
}

#[test]
fn abort_and_panic_fault_with_their_own_codes() {
    let effects = run(
        &[call("abort"), ins(opc::EXIT, 0, 0, 0, 0)],
        &["abort"],
        InvocationInput::new(100),
    );
    assert_eq!(effects.result, ExecResult::Fault { code: 11 });

    let effects = run(
        &[
            ins(opc::MOV64_IMM, 1, 0, 0, 0),
            ins(opc::MOV64_IMM, 2, 0, 0, 0),
            call("sol_panic_"),
            ins(opc::EXIT, 0, 0, 0, 0),
        ],
        &["sol_panic_"],
        InvocationInput::new(100),
    );
    assert_eq!(effects.result, ExecResult::Fault { code: 12 });
}

#[test]
fn log_syscalls_charge_the_schedule() {
    let mut input = InvocationInput::new(10_000);
    input.slices.push(slice(1, b"hi".to_vec(), false));
    let slots = vec![
        ins(opc::MOV64_IMM, 2, 0, 0, 2),
        call("sol_log_"),
        call("sol_log_64_"),
        ins(opc::MOV64_IMM, 0, 0, 0, 0),
        ins(opc::EXIT, 0, 0, 0, 0),
    ];
    let effects = run(&slots, &["sol_log_", "sol_log_64_"], input);
    assert_eq!(effects.result, ExecResult::Success);
    // 5 instructions + max(base, len) + the flat log_64 charge.
    assert_eq!(effects.compute_units_consumed, 5 + 100 + 100);
}
