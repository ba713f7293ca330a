//! Packed-MZ flow: fingerprint through the dispatcher, then unpack.

use relic::mz::CompressionFingerprint;
use relic::{Format, Object};

/// The same hand-assembled LZEXE 0.91 image the unit tests use: two
/// literals, an empty relocation table.
fn synthetic_lzexe() -> Vec<u8> {
    let mut bytes = vec![0u8; 0x300];
    bytes[0] = b'M';
    bytes[1] = b'Z';
    bytes[8] = 0x02;
    bytes[0x16] = 0x10;
    bytes[0x1c..0x20].copy_from_slice(b"LZ91");

    let header = [
        0x0003u16, 0x0000, 0x0080, 0x0007, 0x000f, 0x0000, 0x0100, 0x1234,
    ];
    for (i, word) in header.iter().enumerate() {
        bytes[0x120 + 2 * i..0x120 + 2 * i + 2].copy_from_slice(&word.to_le_bytes());
    }
    bytes[0x30] = 0x0b;
    bytes[0x32] = b'A';
    bytes[0x33] = b'B';
    bytes[0x278] = 0x00;
    bytes[0x279] = 0x01;
    bytes
}

#[test]
fn packed_mz_fingerprints_and_unpacks_through_the_dispatcher() {
    let bytes = synthetic_lzexe();
    let object = Object::parse(&bytes).unwrap();
    assert_eq!(object.format(), Some(Format::Mz));
    let Object::Mz(mz) = object else {
        panic!("expected MZ")
    };
    assert_eq!(mz.fingerprint, CompressionFingerprint::LzexeV091);
    assert!(mz.is_likely_packed());

    let result = mz.decompress().unwrap();
    assert_eq!(result.code, b"AB");
    assert_eq!(result.initial_ip, 0x0003);
    assert_eq!(result.initial_ss, 0x0007);
    assert_eq!(result.checksum, 0x1234);
    assert!(result.relocations.is_empty());

    // decompression is deterministic
    let again = mz.decompress().unwrap();
    assert_eq!(result, again);
}

#[test]
fn contradictory_stream_is_a_hard_error_not_corruption() {
    let mut bytes = synthetic_lzexe();
    // turn the end-of-stream escape into a match reaching far before the
    // start of the output buffer
    bytes[0x36] = 0x02;
    let Object::Mz(mz) = Object::parse(&bytes).unwrap() else {
        panic!("expected MZ")
    };
    assert!(matches!(
        mz.decompress(),
        Err(relic::error::Error::Malformed(_))
    ));
}

#[test]
fn mz_overlay_is_surfaced() {
    let mut bytes = vec![0u8; 0x300];
    bytes[0] = b'M';
    bytes[1] = b'Z';
    bytes[2] = 0x00;
    bytes[4] = 0x01; // 1 page = 512 bytes; 0x100 bytes of overlay
    bytes[8] = 0x02;
    let Object::Mz(mz) = Object::parse(&bytes).unwrap() else {
        panic!("expected MZ")
    };
    let overlay = mz.overlay().expect("overlay");
    assert_eq!(overlay.len(), 0x100);
}
