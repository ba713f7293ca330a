//! Decompressors for the executable packers historically applied to DOS MZ
//! files.
//!
//! Each packer gets its own module with a short-lived decompressor value:
//! construct it from the file bytes (and the DOS header fields it needs),
//! then call `decompress()` once. All of them produce the same
//! [`DecompressionResult`] shape: the unpacked code image, the reconstructed
//! relocation table, and the original entry-point registers. Decoding is
//! deterministic; a contradictory stream (back-reference before the start of
//! the buffer, unknown opcode, truncated bit stream) is a hard error, never
//! silent corruption.

pub mod bitstream;
pub mod diet;
pub mod exepack;
pub mod kdyn;
pub mod lzexe;
pub mod pklite;

pub use bitstream::BitReader;

/// A single MZ relocation: a far pointer at `segment:offset` in the unpacked
/// image that DOS patches at load time.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct Relocation {
    pub segment: u16,
    pub offset: u16,
}

/// The output of any packer's decompressor.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecompressionResult {
    /// The unpacked load module
    pub code: Vec<u8>,
    /// The reconstructed relocation table
    pub relocations: Vec<Relocation>,
    pub initial_cs: u16,
    pub initial_ip: u16,
    pub initial_ss: u16,
    pub initial_sp: u16,
    pub checksum: u16,
    pub min_extra_paragraphs: u16,
    pub max_extra_paragraphs: u16,
}
