//! PE end-to-end scenarios over synthetic, byte-built images.

use relic::diag::{Code, Severity};
use relic::pe::section_table::{
    IMAGE_SCN_CNT_CODE, IMAGE_SCN_CNT_INITIALIZED_DATA, IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_READ,
    IMAGE_SCN_MEM_WRITE,
};
use relic::pe::PE;
use relic::resource::{RT_MANIFEST, RT_VERSION};
use relic::{Format, Object};

const FILE_ALIGN: u32 = 0x200;
const SECTION_ALIGN: u32 = 0x1000;

struct SectionSpec {
    name: &'static [u8; 8],
    virtual_address: u32,
    virtual_size: u32,
    characteristics: u32,
    data: Vec<u8>,
}

/// Assemble a minimal PE32: 0x80-byte DOS area, headers, a section table,
/// and file-aligned raw data.
fn build_pe32(entry: u32, sections: &[SectionSpec], directories: &[(usize, u32, u32)]) -> Vec<u8> {
    let nsections = sections.len();
    let headers_size = 0x200usize;
    let mut raw_ptr = headers_size as u32;
    let mut placed: Vec<(u32, u32)> = Vec::new(); // (raw_ptr, raw_size)
    for section in sections {
        let raw_size = (section.data.len() as u32).div_ceil(FILE_ALIGN) * FILE_ALIGN;
        placed.push((raw_ptr, raw_size));
        raw_ptr += raw_size;
    }
    let file_size = raw_ptr as usize;
    let mut bytes = vec![0u8; file_size];

    // DOS header
    bytes[0] = b'M';
    bytes[1] = b'Z';
    bytes[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());

    // PE signature + COFF
    let pe = 0x80usize;
    bytes[pe..pe + 4].copy_from_slice(b"PE\0\0");
    bytes[pe + 4..pe + 6].copy_from_slice(&0x014cu16.to_le_bytes()); // machine
    bytes[pe + 6..pe + 8].copy_from_slice(&(nsections as u16).to_le_bytes());
    bytes[pe + 20..pe + 22].copy_from_slice(&0x00e0u16.to_le_bytes()); // optional size
    bytes[pe + 22..pe + 24].copy_from_slice(&0x0102u16.to_le_bytes()); // EXECUTABLE | 32BIT

    // optional header
    let opt = pe + 24;
    bytes[opt..opt + 2].copy_from_slice(&0x10bu16.to_le_bytes());
    bytes[opt + 16..opt + 20].copy_from_slice(&entry.to_le_bytes());
    bytes[opt + 28..opt + 32].copy_from_slice(&0x0040_0000u32.to_le_bytes()); // image base
    bytes[opt + 32..opt + 36].copy_from_slice(&SECTION_ALIGN.to_le_bytes());
    bytes[opt + 36..opt + 40].copy_from_slice(&FILE_ALIGN.to_le_bytes());
    let size_of_image = sections
        .iter()
        .map(|s| (s.virtual_address + s.virtual_size).div_ceil(SECTION_ALIGN) * SECTION_ALIGN)
        .max()
        .unwrap_or(SECTION_ALIGN);
    bytes[opt + 56..opt + 60].copy_from_slice(&size_of_image.to_le_bytes());
    bytes[opt + 60..opt + 64].copy_from_slice(&(headers_size as u32).to_le_bytes());
    bytes[opt + 68..opt + 70].copy_from_slice(&2u16.to_le_bytes()); // GUI subsystem
    bytes[opt + 92..opt + 96].copy_from_slice(&16u32.to_le_bytes()); // rva+size count
    for &(index, rva, size) in directories {
        let dd = opt + 96 + index * 8;
        bytes[dd..dd + 4].copy_from_slice(&rva.to_le_bytes());
        bytes[dd + 4..dd + 8].copy_from_slice(&size.to_le_bytes());
    }

    // section table
    let mut sect = opt + 0xe0;
    for (section, &(raw, raw_size)) in sections.iter().zip(&placed) {
        bytes[sect..sect + 8].copy_from_slice(section.name);
        bytes[sect + 8..sect + 12].copy_from_slice(&section.virtual_size.to_le_bytes());
        bytes[sect + 12..sect + 16].copy_from_slice(&section.virtual_address.to_le_bytes());
        bytes[sect + 16..sect + 20].copy_from_slice(&raw_size.to_le_bytes());
        bytes[sect + 20..sect + 24].copy_from_slice(&raw.to_le_bytes());
        bytes[sect + 36..sect + 40].copy_from_slice(&section.characteristics.to_le_bytes());
        sect += 40;
    }

    for (section, &(raw, _)) in sections.iter().zip(&placed) {
        bytes[raw as usize..raw as usize + section.data.len()].copy_from_slice(&section.data);
    }
    bytes
}

fn text_section(data: Vec<u8>) -> SectionSpec {
    SectionSpec {
        name: b".text\0\0\0",
        virtual_address: 0x1000,
        virtual_size: 0x1000,
        characteristics: IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ,
        data,
    }
}

#[test]
fn minimal_well_formed_pe32() {
    let mut code = vec![0u8; 0x200];
    code[0] = 0xc3; // ret
    let bytes = build_pe32(0x1000, &[text_section(code)], &[]);

    let object = Object::parse(&bytes).unwrap();
    assert_eq!(object.format(), Some(Format::Pe32));
    let Object::Pe(pe) = object else {
        panic!("expected a PE");
    };
    assert!(!pe.is_64);
    assert_eq!(pe.entry, 0x1000);
    assert_eq!(pe.sections.len(), 1);
    assert_eq!(pe.sections[0].name(), ".text");
    assert_eq!(pe.image_base, 0x0040_0000);
    let code_section = pe.code_section().unwrap();
    assert_eq!(code_section[0], 0xc3);
    assert!(
        pe.diagnostics.is_empty(),
        "expected no diagnostics, got: {:?}",
        pe.diagnostics.all()
    );
}

#[test]
fn rva_translation_is_bounded() {
    let bytes = build_pe32(0x1000, &[text_section(vec![0u8; 0x200])], &[]);
    let pe = PE::parse(&bytes).unwrap();
    assert_eq!(pe.rva_to_offset(0x1000), Some(0x200));
    assert_eq!(pe.rva_to_offset(0x100), Some(0x100)); // header region
    assert_eq!(pe.rva_to_offset(0x0050_0000), None);
}

/// A version info blob with just the fixed info and one string.
fn build_version_blob() -> Vec<u8> {
    fn push_utf16(out: &mut Vec<u8>, value: &str) {
        for unit in value.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(&0u16.to_le_bytes());
    }
    fn pad4(out: &mut Vec<u8>) {
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
    let mut out = Vec::new();
    out.extend_from_slice(&[0u8; 2]); // root length, patched below
    out.extend_from_slice(&52u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    push_utf16(&mut out, "VS_VERSION_INFO");
    pad4(&mut out);
    let mut fixed = [0u8; 52];
    fixed[0..4].copy_from_slice(&0xfeef_04bdu32.to_le_bytes());
    fixed[8..12].copy_from_slice(&0x0001_0002u32.to_le_bytes()); // file version ms
    fixed[12..16].copy_from_slice(&0x0003_0004u32.to_le_bytes()); // file version ls
    out.extend_from_slice(&fixed);
    let total = out.len() as u16;
    out[0..2].copy_from_slice(&total.to_le_bytes());
    out
}

/// `.rsrc` with one RT_VERSION (id 1, lang 0x409) and one RT_MANIFEST
/// (id 1, lang 0).
fn build_rsrc(rsrc_rva: u32) -> Vec<u8> {
    let version = build_version_blob();
    let manifest = b"<assembly xmlns=\"urn:schemas-microsoft-com:asm.v1\"/>".to_vec();

    let mut rsrc = vec![0u8; 0xa8];
    let dir = |bytes: &mut Vec<u8>, at: usize, ids: u16| {
        bytes[at + 12..at + 14].copy_from_slice(&0u16.to_le_bytes());
        bytes[at + 14..at + 16].copy_from_slice(&ids.to_le_bytes());
    };
    let entry = |bytes: &mut Vec<u8>, at: usize, id: u32, target: u32| {
        bytes[at..at + 4].copy_from_slice(&id.to_le_bytes());
        bytes[at + 4..at + 8].copy_from_slice(&target.to_le_bytes());
    };
    const SUBDIR: u32 = 0x8000_0000;

    dir(&mut rsrc, 0x00, 2); // root: two type entries
    entry(&mut rsrc, 0x10, RT_VERSION as u32, SUBDIR | 0x28);
    entry(&mut rsrc, 0x18, RT_MANIFEST as u32, SUBDIR | 0x40);
    dir(&mut rsrc, 0x28, 1); // version ids
    entry(&mut rsrc, 0x38, 1, SUBDIR | 0x58);
    dir(&mut rsrc, 0x40, 1); // manifest ids
    entry(&mut rsrc, 0x50, 1, SUBDIR | 0x70);
    dir(&mut rsrc, 0x58, 1); // version languages
    entry(&mut rsrc, 0x68, 0x0409, 0x88);
    dir(&mut rsrc, 0x70, 1); // manifest languages
    entry(&mut rsrc, 0x80, 0, 0x98);

    let version_at = rsrc.len();
    rsrc.extend_from_slice(&version);
    while rsrc.len() % 4 != 0 {
        rsrc.push(0);
    }
    let manifest_at = rsrc.len();
    rsrc.extend_from_slice(&manifest);

    // data entries
    let data_entry = |bytes: &mut Vec<u8>, at: usize, rva: u32, size: u32| {
        bytes[at..at + 4].copy_from_slice(&rva.to_le_bytes());
        bytes[at + 4..at + 8].copy_from_slice(&size.to_le_bytes());
    };
    data_entry(&mut rsrc, 0x88, rsrc_rva + version_at as u32, version.len() as u32);
    data_entry(&mut rsrc, 0x98, rsrc_rva + manifest_at as u32, manifest.len() as u32);
    rsrc
}

#[test]
fn resource_traversal() {
    let rsrc_rva = 0x2000u32;
    let rsrc = build_rsrc(rsrc_rva);
    let rsrc_len = rsrc.len() as u32;
    let sections = [
        text_section(vec![0xc3]),
        SectionSpec {
            name: b".rsrc\0\0\0",
            virtual_address: rsrc_rva,
            virtual_size: 0x1000,
            characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
            data: rsrc,
        },
    ];
    let bytes = build_pe32(0x1000, &sections, &[(2, rsrc_rva, rsrc_len)]);
    let pe = PE::parse(&bytes).unwrap();
    let resources = pe.resources.as_ref().expect("resource directory");

    assert_eq!(resources.types(), vec![RT_VERSION, RT_MANIFEST]);

    let version = resources.find(RT_VERSION, 1).expect("version resource");
    assert_eq!(version.language, 0x0409);
    let info = version.version_info().expect("version info parses");
    assert_eq!(info.fixed.unwrap().signature, 0xfeef_04bd);
    assert_eq!(info.file_version_string().unwrap(), "1.2.3.4");

    let manifest = resources.find(RT_MANIFEST, 1).expect("manifest resource");
    assert_eq!(manifest.data[0], b'<');

    // lookup coherence: find and resources_by_type agree
    let by_type = resources.resources_by_type(RT_VERSION);
    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[0].data, version.data);
    assert_eq!(resources.all_languages(RT_VERSION, 1).len(), 1);
}

#[test]
fn entry_point_in_non_executable_section() {
    let data_section = SectionSpec {
        name: b".data\0\0\0",
        virtual_address: 0x1000,
        virtual_size: 0x1000,
        characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_WRITE,
        data: vec![0u8; 0x200],
    };
    let bytes = build_pe32(0x1080, &[data_section], &[]);
    let pe = PE::parse(&bytes).unwrap();
    let finding = pe
        .diagnostics
        .all()
        .iter()
        .find(|d| d.code == Code::EpNonExecutable)
        .expect("EP_NON_EXECUTABLE emitted");
    assert_eq!(finding.code as u32, 0x2302);
    assert_eq!(finding.rva, 0x1080);
    assert_eq!(finding.severity, Severity::Anomaly);
}

#[test]
fn zero_sections_is_a_diagnostic_not_an_error() {
    let bytes = build_pe32(0, &[], &[]);
    let pe = PE::parse(&bytes).unwrap();
    assert!(pe.sections.is_empty());
    assert!(pe.diagnostics.has(Code::CoffZeroSections));
}

#[test]
fn zero_sized_reloc_block_stops_traversal() {
    // a reloc directory whose single block declares SizeOfBlock == 0
    let mut reloc = vec![0u8; 16];
    reloc[0..4].copy_from_slice(&0x1000u32.to_le_bytes());
    reloc[4..8].copy_from_slice(&0u32.to_le_bytes());
    let sections = [
        text_section(vec![0xc3]),
        SectionSpec {
            name: b".reloc\0\0",
            virtual_address: 0x3000,
            virtual_size: 0x1000,
            characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
            data: reloc,
        },
    ];
    let bytes = build_pe32(0x1000, &sections, &[(5, 0x3000, 16)]);
    let pe = PE::parse(&bytes).unwrap();
    assert!(pe.relocations.is_empty());
    assert!(pe.diagnostics.has(Code::RelocInvalidType));
}

#[test]
fn imports_are_joined_across_thunks() {
    // import section at VA 0x2000 with one descriptor for KERNEL32.dll:
    // a name import and an ordinal import
    let rva = |offset: u32| 0x2000 + offset;
    let mut idata = vec![0u8; 0x200];
    // descriptor 0
    idata[0..4].copy_from_slice(&rva(0x40).to_le_bytes()); // ILT
    idata[12..16].copy_from_slice(&rva(0x60).to_le_bytes()); // name
    idata[16..20].copy_from_slice(&rva(0x50).to_le_bytes()); // IAT
    // descriptor 1 is the null terminator
    // ILT at 0x40: hint/name rva, ordinal import, null
    idata[0x40..0x44].copy_from_slice(&rva(0x70).to_le_bytes());
    idata[0x44..0x48].copy_from_slice(&0x8000_0007u32.to_le_bytes());
    // IAT mirrors it at 0x50
    idata[0x50..0x54].copy_from_slice(&rva(0x70).to_le_bytes());
    idata[0x54..0x58].copy_from_slice(&0x8000_0007u32.to_le_bytes());
    idata[0x60..0x6d].copy_from_slice(b"KERNEL32.dll\0");
    idata[0x70..0x72].copy_from_slice(&3u16.to_le_bytes()); // hint
    idata[0x72..0x7c].copy_from_slice(b"ExitThread");

    let sections = [
        text_section(vec![0xc3]),
        SectionSpec {
            name: b".idata\0\0",
            virtual_address: 0x2000,
            virtual_size: 0x1000,
            characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
            data: idata,
        },
    ];
    let bytes = build_pe32(0x1000, &sections, &[(1, 0x2000, 40)]);
    let pe = PE::parse(&bytes).unwrap();
    assert_eq!(pe.imports.len(), 1);
    let dll = &pe.imports[0];
    assert_eq!(dll.name, "KERNEL32.dll");
    assert_eq!(dll.functions.len(), 2);
    assert_eq!(dll.functions[0].name.as_deref(), Some("ExitThread"));
    assert_eq!(dll.functions[0].hint, Some(3));
    assert_eq!(dll.functions[0].iat_index, 0);
    assert!(dll.functions[1].is_ordinal);
    assert_eq!(dll.functions[1].ordinal, Some(7));
    assert_eq!(dll.functions[1].iat_index, 1);
}

#[test]
fn exports_join_names_ordinals_and_forwarders() {
    // export section at VA 0x2000:
    // 0x00 export directory (40 bytes)
    // 0x28 EAT: 3 entries
    // 0x34 name pointers: 2
    // 0x3c ordinal table: 2
    // 0x40 strings
    let rva = |offset: u32| 0x2000u32 + offset;
    let mut edata = vec![0u8; 0x200];
    edata[12..16].copy_from_slice(&rva(0x40).to_le_bytes()); // module name
    edata[16..20].copy_from_slice(&1u32.to_le_bytes()); // ordinal base
    edata[20..24].copy_from_slice(&3u32.to_le_bytes()); // eat entries
    edata[24..28].copy_from_slice(&2u32.to_le_bytes()); // names
    edata[28..32].copy_from_slice(&rva(0x28).to_le_bytes()); // eat
    edata[32..36].copy_from_slice(&rva(0x34).to_le_bytes()); // name pointers
    edata[36..40].copy_from_slice(&rva(0x3c).to_le_bytes()); // ordinal table
    // EAT: code rva, forwarder rva (inside directory), by-ordinal-only rva
    edata[0x28..0x2c].copy_from_slice(&0x1000u32.to_le_bytes());
    edata[0x2c..0x30].copy_from_slice(&rva(0x60).to_le_bytes());
    edata[0x30..0x34].copy_from_slice(&0x1004u32.to_le_bytes());
    // names -> "alpha", "fwd"
    edata[0x34..0x38].copy_from_slice(&rva(0x4a).to_le_bytes());
    edata[0x38..0x3c].copy_from_slice(&rva(0x50).to_le_bytes());
    // ordinal table: EAT slots 0 and 1
    edata[0x3c..0x3e].copy_from_slice(&0u16.to_le_bytes());
    edata[0x3e..0x40].copy_from_slice(&1u16.to_le_bytes());
    edata[0x40..0x4a].copy_from_slice(b"mylib.dll\0");
    edata[0x4a..0x50].copy_from_slice(b"alpha\0");
    edata[0x50..0x54].copy_from_slice(b"fwd\0");
    edata[0x60..0x70].copy_from_slice(b"OTHER.stub\0\0\0\0\0\0");

    let sections = [
        text_section(vec![0xc3]),
        SectionSpec {
            name: b".edata\0\0",
            virtual_address: 0x2000,
            virtual_size: 0x1000,
            characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
            data: edata,
        },
    ];
    let bytes = build_pe32(0x1000, &sections, &[(0, 0x2000, 0x100)]);
    let pe = PE::parse(&bytes).unwrap();
    let exports = pe.exports.as_ref().expect("export directory");
    assert_eq!(exports.name.as_deref(), Some("mylib.dll"));
    assert_eq!(pe.name.as_deref(), Some("mylib.dll"));
    assert_eq!(exports.exports.len(), 3);

    let alpha = exports.exports.iter().find(|e| e.name.as_deref() == Some("alpha")).unwrap();
    assert_eq!(alpha.ordinal, 1);
    assert_eq!(alpha.rva, 0x1000);
    assert!(!alpha.is_forwarder());

    let fwd = exports.exports.iter().find(|e| e.name.as_deref() == Some("fwd")).unwrap();
    assert_eq!(fwd.forwarder.as_deref(), Some("OTHER.stub"));

    let by_ordinal = exports.exports.iter().find(|e| e.name.is_none()).unwrap();
    assert_eq!(by_ordinal.ordinal, 3);
    assert_eq!(by_ordinal.rva, 0x1004);
}

#[test]
fn reparsing_yields_identical_model_and_diagnostics() {
    let bytes = build_pe32(0x1080, &[text_section(vec![0u8; 0x40])], &[]);
    let first = PE::parse(&bytes).unwrap();
    // serialise the diagnostics through the display formatter, then parse
    // again: same model, same findings
    let rendered: Vec<String> = first.diagnostics.all().iter().map(|d| d.to_string()).collect();
    let second = PE::parse(&bytes).unwrap();
    assert_eq!(first.sections, second.sections);
    assert_eq!(first.diagnostics, second.diagnostics);
    let rerendered: Vec<String> =
        second.diagnostics.all().iter().map(|d| d.to_string()).collect();
    assert_eq!(rendered, rerendered);
}

#[test]
fn security_features_project_from_flags() {
    let mut bytes = build_pe32(0x1000, &[text_section(vec![0xc3])], &[]);
    // set DllCharacteristics: DYNAMIC_BASE | NX_COMPAT | GUARD_CF
    let dllchar_at = 0x80 + 24 + 70;
    bytes[dllchar_at..dllchar_at + 2].copy_from_slice(&0x4140u16.to_le_bytes());
    let pe = PE::parse(&bytes).unwrap();
    assert!(pe.has_aslr());
    assert!(pe.has_dep());
    assert!(pe.has_cfg());
    assert!(!pe.has_high_entropy_aslr()); // PE32
    assert!(!pe.has_safeseh()); // no load config
    assert!(!pe.is_dotnet());
}
