//! COFF file characteristics and DLL characteristics flags.

/// Relocation info stripped from file
pub const IMAGE_FILE_RELOCS_STRIPPED: u16 = 0x0001;
/// File is executable
pub const IMAGE_FILE_EXECUTABLE_IMAGE: u16 = 0x0002;
/// Line numbers stripped (deprecated)
pub const IMAGE_FILE_LINE_NUMS_STRIPPED: u16 = 0x0004;
/// Local symbols stripped (deprecated)
pub const IMAGE_FILE_LOCAL_SYMS_STRIPPED: u16 = 0x0008;
/// Aggressively trim working set (deprecated)
pub const IMAGE_FILE_AGGRESIVE_WS_TRIM: u16 = 0x0010;
/// Can handle > 2GiB addresses
pub const IMAGE_FILE_LARGE_ADDRESS_AWARE: u16 = 0x0020;
/// Bytes reversed, little endian (deprecated)
pub const IMAGE_FILE_BYTES_REVERSED_LO: u16 = 0x0080;
/// Machine is 32-bit
pub const IMAGE_FILE_32BIT_MACHINE: u16 = 0x0100;
/// Debug info stripped
pub const IMAGE_FILE_DEBUG_STRIPPED: u16 = 0x0200;
/// Copy to swap if on removable media
pub const IMAGE_FILE_REMOVABLE_RUN_FROM_SWAP: u16 = 0x0400;
/// Copy to swap if on network media
pub const IMAGE_FILE_NET_RUN_FROM_SWAP: u16 = 0x0800;
/// System file
pub const IMAGE_FILE_SYSTEM: u16 = 0x1000;
/// File is a DLL
pub const IMAGE_FILE_DLL: u16 = 0x2000;
/// Uniprocessor only
pub const IMAGE_FILE_UP_SYSTEM_ONLY: u16 = 0x4000;
/// Bytes reversed, big endian (deprecated)
pub const IMAGE_FILE_BYTES_REVERSED_HI: u16 = 0x8000;

/// Characteristics flags that are documented as deprecated; seeing them set
/// is worth a diagnostic.
pub const IMAGE_FILE_DEPRECATED_MASK: u16 = IMAGE_FILE_LINE_NUMS_STRIPPED
    | IMAGE_FILE_LOCAL_SYMS_STRIPPED
    | IMAGE_FILE_AGGRESIVE_WS_TRIM
    | IMAGE_FILE_BYTES_REVERSED_LO
    | IMAGE_FILE_BYTES_REVERSED_HI;

pub fn is_dll(characteristics: u16) -> bool {
    characteristics & IMAGE_FILE_DLL != 0
}

/// Image can handle a high entropy 64-bit virtual address space
pub const IMAGE_DLLCHARACTERISTICS_HIGH_ENTROPY_VA: u16 = 0x0020;
/// DLL can be relocated at load time (ASLR)
pub const IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE: u16 = 0x0040;
/// Code integrity checks are enforced
pub const IMAGE_DLLCHARACTERISTICS_FORCE_INTEGRITY: u16 = 0x0080;
/// Image is NX compatible (DEP)
pub const IMAGE_DLLCHARACTERISTICS_NX_COMPAT: u16 = 0x0100;
/// Isolation aware, but do not isolate the image
pub const IMAGE_DLLCHARACTERISTICS_NO_ISOLATION: u16 = 0x0200;
/// No structured exception handling
pub const IMAGE_DLLCHARACTERISTICS_NO_SEH: u16 = 0x0400;
/// Do not bind the image
pub const IMAGE_DLLCHARACTERISTICS_NO_BIND: u16 = 0x0800;
/// Image must execute in an AppContainer
pub const IMAGE_DLLCHARACTERISTICS_APPCONTAINER: u16 = 0x1000;
/// A WDM driver
pub const IMAGE_DLLCHARACTERISTICS_WDM_DRIVER: u16 = 0x2000;
/// Image supports Control Flow Guard
pub const IMAGE_DLLCHARACTERISTICS_GUARD_CF: u16 = 0x4000;
/// Terminal server aware
pub const IMAGE_DLLCHARACTERISTICS_TERMINAL_SERVER_AWARE: u16 = 0x8000;

/// The low four DllCharacteristics bits are reserved and must be zero.
pub const IMAGE_DLLCHARACTERISTICS_RESERVED_MASK: u16 = 0x000f;
