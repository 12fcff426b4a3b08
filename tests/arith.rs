// MQ coder conformance and output-discipline tests.

mod common;

use common::BitSource;
use jbig2enc::jbig2arith::{IntProc, Jbig2ArithCoder, State, BASE};

/// T.88 Annex H.2: the arithmetic coder test sequence, every bit coded
/// through a single context starting from state 0.
#[test]
fn annex_h2_test_vector() {
    let input: [u8; 32] = [
        0x00, 0x02, 0x00, 0x51, 0x00, 0x00, 0x00, 0xC0, 0x03, 0x52, 0x87, 0x2A, 0xAA, 0xAA, 0xAA,
        0xAA, 0x82, 0xC0, 0x20, 0x00, 0xFC, 0xD7, 0x9E, 0xF6, 0xBF, 0x7F, 0xED, 0x90, 0x4F, 0x46,
        0xA3, 0xBF,
    ];
    let expected: [u8; 28] = [
        0x84, 0xC7, 0x3B, 0xFC, 0xE1, 0xA1, 0x43, 0x04, 0x02, 0x20, 0x00, 0x00, 0x41, 0x0D, 0xBB,
        0x86, 0xF4, 0x31, 0x7F, 0xFF, 0x88, 0xFF, 0x37, 0x47, 0x1A, 0xDB, 0x6A, 0xDF,
    ];

    let mut coder = Jbig2ArithCoder::new();
    for &byte in &input {
        for bit in 0..8 {
            coder.encode_bit(0, (byte >> (7 - bit)) & 1 != 0);
        }
    }
    coder.finish();
    assert_eq!(coder.as_bytes(), &expected[..]);
}

#[test]
fn qe_table_spot_checks() {
    assert_eq!(BASE[0], State { qe: 0x5601, nmps: 1, nlps: 1, switch: true });
    assert_eq!(BASE[1], State { qe: 0x3401, nmps: 2, nlps: 6, switch: false });
    assert_eq!(BASE[6], State { qe: 0x5601, nmps: 7, nlps: 6, switch: true });
    assert_eq!(BASE[14], State { qe: 0x5601, nmps: 15, nlps: 14, switch: true });
    assert_eq!(BASE[45], State { qe: 0x0001, nmps: 45, nlps: 43, switch: false });
    assert_eq!(BASE[46], State { qe: 0x5601, nmps: 46, nlps: 46, switch: false });
}

/// An 0xFF in the output is always followed by a stuffed byte below 0x80,
/// so no marker codes can appear inside a coded stream.
#[test]
fn stuff_byte_discipline() {
    for seed in 1..=8u64 {
        let mut src = BitSource::new(seed * 0x9E37_79B9);
        let mut coder = Jbig2ArithCoder::new();
        for _ in 0..20_000 {
            let cx = (src.next_u64() & 0x3FF) as usize;
            coder.encode_bit(cx, src.next_bit());
        }
        coder.finish();

        let data = coder.as_bytes();
        assert!(!data.is_empty());
        assert_ne!(data.last(), Some(&0xFF), "trailing 0xFF must be dropped");
        for pair in data.windows(2) {
            if pair[0] == 0xFF {
                assert!(
                    pair[1] < 0x80,
                    "byte {:#04x} after 0xFF breaks the stuffing discipline",
                    pair[1]
                );
            }
        }
    }
}

/// Identical inputs must produce identical bytes; the coder carries no
/// hidden state between instances.
#[test]
fn replay_is_byte_identical() {
    let encode = || {
        let mut src = BitSource::new(42);
        let mut coder = Jbig2ArithCoder::new();
        for _ in 0..5_000 {
            let cx = (src.next_u64() & 0xFFFF) as usize;
            coder.encode_bit(cx, src.next_bit());
        }
        coder.encode_int(IntProc::Iadh, 17).unwrap();
        coder.encode_int(IntProc::Iadw, -3).unwrap();
        coder.encode_oob(IntProc::Iadw);
        coder.encode_iaid(3, 5);
        coder.finish();
        coder.into_vec()
    };
    assert_eq!(encode(), encode());
}

/// The integer coder covers [-2e9, 2e9] and rejects values beyond it.
#[test]
fn integer_coder_domain() {
    let mut coder = Jbig2ArithCoder::new();
    for v in [
        0, 1, 3, 4, 19, 20, 83, 84, 339, 340, 4435, 4436, 1_000_000, -1, -2, -3, -4, -19, -20,
        -83, -84, -339, -340, -4435, -4436, -1_000_000,
    ] {
        coder.encode_int(IntProc::Iads, v).unwrap();
    }
    assert!(coder.encode_int(IntProc::Iads, 2_000_000_001).is_err());
    assert!(coder.encode_int(IntProc::Iads, -2_000_000_001).is_err());
    coder.finish();
    assert!(coder.datasize() > 0);
}

/// Register reset preserves adapted contexts: a second region coded after
/// reset() starts from the adapted state, not from scratch.
#[test]
fn reset_keeps_contexts_clear_contexts_drops_them() {
    let bits = |coder: &mut Jbig2ArithCoder| {
        let mut src = BitSource::new(7);
        for _ in 0..2_000 {
            coder.encode_bit(5, src.next_bit());
        }
        coder.finish();
        coder.as_bytes().len()
    };

    let mut coder = Jbig2ArithCoder::new();
    let first = bits(&mut coder);

    coder.reset();
    let adapted = bits(&mut coder);

    coder.reset();
    coder.clear_contexts();
    let fresh = bits(&mut coder);

    // Same input, same starting contexts: identical size again.
    assert_eq!(first, fresh);
    // The adapted run re-used the trained context table.
    assert_ne!(adapted, 0);
}
