//! Format dispatch boundaries plus NE and LE end-to-end scenarios.

use relic::le::{LeEntryType, LeFile};
use relic::ne::{NeFile, NeTargetOs};
use relic::{Format, Object};

#[test]
fn e_lfanew_past_eof_falls_back_to_plain_mz() {
    let mut bytes = vec![0u8; 0x80];
    bytes[0] = b'M';
    bytes[1] = b'Z';
    bytes[4] = 0x01;
    bytes[8] = 0x04;
    bytes[0x3c..0x40].copy_from_slice(&0xffff_0000u32.to_le_bytes());
    let object = Object::parse(&bytes).unwrap();
    assert_eq!(object.format(), Some(Format::Mz));
}

#[test]
fn e_lfanew_to_garbage_falls_back_to_plain_mz() {
    let mut bytes = vec![0u8; 0x100];
    bytes[0] = b'M';
    bytes[1] = b'Z';
    bytes[4] = 0x01;
    bytes[8] = 0x04;
    bytes[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    bytes[0x80..0x84].copy_from_slice(b"XY\0\0");
    let object = Object::parse(&bytes).unwrap();
    assert_eq!(object.format(), Some(Format::Mz));
}

/// A minimal NE image: one code segment, a Windows resource table with one
/// RT_RCDATA entry, resident names, and an entry bundle.
fn build_ne() -> Vec<u8> {
    let mut bytes = vec![0u8; 0x400];
    bytes[0] = b'M';
    bytes[1] = b'Z';
    bytes[4] = 0x02;
    bytes[8] = 0x04;
    bytes[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());

    let ne = 0x80usize;
    bytes[ne] = b'N';
    bytes[ne + 1] = b'E';
    bytes[ne + 2] = 5; // linker version
    bytes[ne + 0x14..ne + 0x16].copy_from_slice(&0x10u16.to_le_bytes()); // entry ip
    bytes[ne + 0x16..ne + 0x18].copy_from_slice(&1u16.to_le_bytes()); // entry cs
    bytes[ne + 0x1c..ne + 0x1e].copy_from_slice(&1u16.to_le_bytes()); // one segment
    bytes[ne + 0x22..ne + 0x24].copy_from_slice(&0x40u16.to_le_bytes()); // segment table
    bytes[ne + 0x24..ne + 0x26].copy_from_slice(&0x48u16.to_le_bytes()); // resource table
    bytes[ne + 0x26..ne + 0x28].copy_from_slice(&0x70u16.to_le_bytes()); // resident names
    bytes[ne + 0x04..ne + 0x06].copy_from_slice(&0x80u16.to_le_bytes()); // entry table
    bytes[ne + 0x32..ne + 0x34].copy_from_slice(&4u16.to_le_bytes()); // alignment shift
    bytes[ne + 0x36] = 2; // target os: windows

    // segment table at ne+0x40: file offset 0x20 << 4 = 0x200, 0x30 bytes of code
    bytes[ne + 0x40..ne + 0x42].copy_from_slice(&0x20u16.to_le_bytes());
    bytes[ne + 0x42..ne + 0x44].copy_from_slice(&0x30u16.to_le_bytes());
    bytes[ne + 0x44..ne + 0x46].copy_from_slice(&0u16.to_le_bytes()); // code
    bytes[0x200] = 0xcb; // retf

    // resource table at ne+0x48: shift 4, one RT_RCDATA (0x800a), id 5,
    // data at (0x30 << 4) = 0x300, length (2 << 4) = 0x20
    let rt = ne + 0x48;
    bytes[rt..rt + 2].copy_from_slice(&4u16.to_le_bytes());
    bytes[rt + 2..rt + 4].copy_from_slice(&0x800au16.to_le_bytes());
    bytes[rt + 4..rt + 6].copy_from_slice(&1u16.to_le_bytes());
    // name info: offset, length, flags, id, handle, usage
    bytes[rt + 10..rt + 12].copy_from_slice(&0x30u16.to_le_bytes());
    bytes[rt + 12..rt + 14].copy_from_slice(&0x2u16.to_le_bytes());
    bytes[rt + 16..rt + 18].copy_from_slice(&0x8005u16.to_le_bytes());
    // type id 0 terminator
    bytes[rt + 22..rt + 24].copy_from_slice(&0u16.to_le_bytes());
    bytes[0x300..0x308].copy_from_slice(b"RCDATA!!");

    // resident names at ne+0x70: module name "DEMO"
    bytes[ne + 0x70] = 4;
    bytes[ne + 0x71..ne + 0x75].copy_from_slice(b"DEMO");
    bytes[ne + 0x75..ne + 0x77].copy_from_slice(&0u16.to_le_bytes());
    bytes[ne + 0x77] = 0; // end

    // entry table at ne+0x80: one 16-bit exported entry in segment 1
    bytes[ne + 0x80] = 1; // count
    bytes[ne + 0x81] = 1; // type: 16-bit
    bytes[ne + 0x82] = 1; // object
    bytes[ne + 0x83] = 0x01; // flags: exported
    bytes[ne + 0x84..ne + 0x86].copy_from_slice(&0x0010u16.to_le_bytes());
    bytes[ne + 0x86] = 0; // terminating bundle
    bytes[ne + 0x87] = 0;
    bytes
}

#[test]
fn ne_segments_names_entries_and_resources() {
    let bytes = build_ne();
    let object = Object::parse(&bytes).unwrap();
    assert_eq!(object.format(), Some(Format::Ne));
    let Object::Ne(ne) = object else {
        panic!("expected NE")
    };
    assert_eq!(ne.target_os(), NeTargetOs::Windows);
    assert_eq!(ne.segments.len(), 1);
    assert_eq!(ne.segments[0].file_offset, 0x200);
    assert!(ne.segments[0].is_code());
    assert_eq!(ne.code_section().unwrap()[0], 0xcb);
    assert_eq!(ne.module_name(), Some("DEMO"));

    assert_eq!(ne.entries.len(), 1);
    assert_eq!(ne.entries[0].entry_type, LeEntryType::Entry16);
    assert_eq!(ne.entries[0].offset, 0x10);
    assert!(ne.entries[0].is_exported());

    let resources = ne.resources.as_ref().expect("resource table");
    assert_eq!(resources.types(), vec![10]);
    let rc = resources.find(10, 5).expect("rcdata entry");
    // both the offset and the length are alignment-shifted
    assert_eq!(rc.data.len(), 0x20);
    assert_eq!(&rc.data[..8], b"RCDATA!!");
}

#[test]
fn ne_parse_direct() {
    let bytes = build_ne();
    let ne = NeFile::parse(&bytes).unwrap();
    assert_eq!(ne.header.linker_version, 5);
    assert_eq!(ne.header.entry_cs, 1);
    assert_eq!(ne.header.entry_ip, 0x10);
}

/// A bound LE file matching the stripping scenario: stub 0x80, data pages
/// at 0x200, non-resident names at 0x180.
fn build_bound_le() -> Vec<u8> {
    let mut bytes = vec![0u8; 0x400];
    bytes[0] = b'M';
    bytes[1] = b'Z';
    bytes[2] = 0x80;
    bytes[4] = 0x01;
    bytes[0x18..0x1a].copy_from_slice(&0x40u16.to_le_bytes());
    bytes[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    // extender banner in the stub
    bytes[0x50..0x56].copy_from_slice(b"DOS/4G");

    let le = 0x80usize;
    bytes[le] = b'L';
    bytes[le + 1] = b'E';
    bytes[le + 0x08] = 0x02; // cpu 386
    bytes[le + 0x0a] = 0x03; // os: dos4
    bytes[le + 0x14..le + 0x18].copy_from_slice(&1u32.to_le_bytes()); // pages
    bytes[le + 0x18..le + 0x1c].copy_from_slice(&1u32.to_le_bytes()); // eip object
    bytes[le + 0x1c..le + 0x20].copy_from_slice(&0x1000u32.to_le_bytes()); // eip
    bytes[le + 0x28..le + 0x2c].copy_from_slice(&0x1000u32.to_le_bytes()); // page size
    bytes[le + 0x40..le + 0x44].copy_from_slice(&0xb0u32.to_le_bytes()); // object table
    bytes[le + 0x44..le + 0x48].copy_from_slice(&1u32.to_le_bytes()); // one object
    bytes[le + 0x48..le + 0x4c].copy_from_slice(&0xc8u32.to_le_bytes()); // page table
    bytes[le + 0x5c..le + 0x60].copy_from_slice(&0xd0u32.to_le_bytes()); // entry table
    bytes[le + 0x80..le + 0x84].copy_from_slice(&0x200u32.to_le_bytes()); // data pages (abs)
    bytes[le + 0x88..le + 0x8c].copy_from_slice(&0x180u32.to_le_bytes()); // nonres names (abs)

    // object 1: 0x1000 bytes, readable+executable, pages 1..1
    let obj = le + 0xb0;
    bytes[obj..obj + 4].copy_from_slice(&0x1000u32.to_le_bytes());
    bytes[obj + 4..obj + 8].copy_from_slice(&0x10000u32.to_le_bytes());
    bytes[obj + 8..obj + 12].copy_from_slice(&0x0005u32.to_le_bytes());
    bytes[obj + 12..obj + 16].copy_from_slice(&1u32.to_le_bytes());
    bytes[obj + 16..obj + 20].copy_from_slice(&1u32.to_le_bytes());

    // page table entry: page 1, legal
    let page = le + 0xc8;
    bytes[page] = 0x00;
    bytes[page + 1] = 0x00;
    bytes[page + 2] = 0x01;
    bytes[page + 3] = 0x00;

    // entry table: two 32-bit entries, a skip bundle, then one more
    let entry = le + 0xd0;
    bytes[entry] = 0x02;
    bytes[entry + 1] = 0x03;
    bytes[entry + 2..entry + 4].copy_from_slice(&1u16.to_le_bytes());
    bytes[entry + 4] = 0x01;
    bytes[entry + 5..entry + 9].copy_from_slice(&0x1000u32.to_le_bytes());
    bytes[entry + 9] = 0x00;
    bytes[entry + 10..entry + 14].copy_from_slice(&0x2000u32.to_le_bytes());
    bytes[entry + 14] = 0x03; // skip three ordinals
    bytes[entry + 15] = 0x00;
    bytes[entry + 16] = 0x01;
    bytes[entry + 17] = 0x03;
    bytes[entry + 18..entry + 20].copy_from_slice(&1u16.to_le_bytes());
    bytes[entry + 20] = 0x01;
    bytes[entry + 21..entry + 25].copy_from_slice(&0x3000u32.to_le_bytes());
    bytes[entry + 25] = 0x00;
    bytes[entry + 26] = 0x00;

    // non-resident names at 0x180 (absolute)
    bytes[0x180] = 3;
    bytes[0x181..0x184].copy_from_slice(b"LEX");
    bytes[0x184..0x186].copy_from_slice(&1u16.to_le_bytes());
    bytes[0x186] = 0;
    bytes
}

#[test]
fn le_entry_bundles_respect_ordinal_gaps() {
    let bytes = build_bound_le();
    let le = LeFile::parse(&bytes).unwrap();
    assert!(!le.is_lx());
    assert!(le.is_bound());
    assert_eq!(le.entry_count(), 3);
    assert_eq!(le.get_entry(1).unwrap().offset, 0x1000);
    assert!(le.get_entry(1).unwrap().is_exported());
    assert_eq!(le.get_entry(2).unwrap().offset, 0x2000);
    assert!(!le.get_entry(2).unwrap().is_exported());
    // ordinals 3..5 are skipped by the type-0 bundle
    assert!(le.get_entry(3).is_none());
    assert!(le.get_entry(5).is_none());
    assert_eq!(le.get_entry(6).unwrap().offset, 0x3000);
    assert_eq!(le.nonresident_names[0].name, "LEX");
    assert_eq!(
        le.extender,
        relic::le::DosExtender::Dos4Gw,
    );
}

#[test]
fn le_strip_extender_adjusts_absolute_offsets() {
    let bytes = build_bound_le();
    let le = LeFile::parse(&bytes).unwrap();
    let stripped = le.strip_extender().unwrap();

    assert_eq!(stripped.len(), bytes.len() - 0x80);
    assert_eq!(&stripped[..2], b"LE");
    let data_pages = u32::from_le_bytes(stripped[0x80..0x84].try_into().unwrap());
    assert_eq!(data_pages, 0x180);
    let nonres = u32::from_le_bytes(stripped[0x88..0x8c].try_into().unwrap());
    assert_eq!(nonres, 0x100);

    let reparsed = LeFile::parse(&stripped).unwrap();
    assert!(!reparsed.is_bound());
    assert_eq!(reparsed.le_header_offset(), 0);
    assert_eq!(reparsed.entry_count(), 3);
    assert_eq!(reparsed.nonresident_names[0].name, "LEX");
}

#[test]
fn lx_pages_are_shifted() {
    let mut bytes = build_bound_le();
    let le = 0x80usize;
    bytes[le + 1] = b'X'; // LX magic
    bytes[le + 0x2c..le + 0x30].copy_from_slice(&2u32.to_le_bytes()); // shift
    // LX page record: offset 0x10 << 2, size 0x40, legal
    let page = le + 0xc8;
    bytes[page..page + 4].copy_from_slice(&0x10u32.to_le_bytes());
    bytes[page + 4..page + 6].copy_from_slice(&0x40u16.to_le_bytes());
    bytes[page + 6..page + 8].copy_from_slice(&0u16.to_le_bytes());

    let lx = LeFile::parse(&bytes).unwrap();
    assert!(lx.is_lx());
    assert_eq!(lx.pages.len(), 1);
    // data pages 0x200 + (0x10 << 2)
    assert_eq!(lx.pages[0].file_offset, 0x240);
    assert_eq!(lx.pages[0].data_size, 0x40);
}
