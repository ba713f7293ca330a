//! The attribute certificate (security) directory.
//!
//! The directory's `virtual_address` is a *file offset*, not an RVA — the
//! loader never maps certificates. Each entry is a `WIN_CERTIFICATE`:
//! `(length, revision, certificate_type)` followed by the certificate blob,
//! padded to an 8-byte boundary. The PKCS#7 body is surfaced opaquely;
//! decoding X.509 is out of scope here, but the digest algorithm can be
//! sniffed conservatively from well-known OID encodings.

use scroll::{Pread, Pwrite, SizeWith};

use crate::diag::{Code, Diagnostics, Severity};
use crate::error;
use crate::pe::data_directories;

/// WIN_CERT_REVISION_1_0
pub const WIN_CERT_REVISION_1_0: u16 = 0x0100;
/// WIN_CERT_REVISION_2_0
pub const WIN_CERT_REVISION_2_0: u16 = 0x0200;

/// WIN_CERT_TYPE_X509
pub const WIN_CERT_TYPE_X509: u16 = 0x0001;
/// WIN_CERT_TYPE_PKCS_SIGNED_DATA: an Authenticode PKCS#7 SignedData blob
pub const WIN_CERT_TYPE_PKCS_SIGNED_DATA: u16 = 0x0002;
/// WIN_CERT_TYPE_TS_STACK_SIGNED
pub const WIN_CERT_TYPE_TS_STACK_SIGNED: u16 = 0x0004;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct AttributeCertificateHeader {
    pub length: u32,
    pub revision: u16,
    pub certificate_type: u16,
}

pub const SIZEOF_ATTRIBUTE_CERTIFICATE_HEADER: usize = 8;

/// The digest algorithm sniffed from a PKCS#7 blob's OIDs.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Unknown,
}

impl DigestAlgorithm {
    /// MD5 and SHA-1 are broken for signing purposes.
    pub fn is_weak(self) -> bool {
        matches!(self, DigestAlgorithm::Md5 | DigestAlgorithm::Sha1)
    }
}

/// One certificate table entry; the body is an opaque borrow of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeCertificate<'a> {
    pub length: u32,
    pub revision: u16,
    pub certificate_type: u16,
    pub certificate: &'a [u8],
}

impl<'a> AttributeCertificate<'a> {
    pub fn is_authenticode(&self) -> bool {
        self.certificate_type == WIN_CERT_TYPE_PKCS_SIGNED_DATA
    }

    /// Conservative OID sniff over the DER bytes; `Unknown` whenever no
    /// well-known digest OID is found.
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        // id-md5, id-sha1 and id-sha256 DER-encoded OID bodies
        const OID_MD5: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x02, 0x05];
        const OID_SHA1: &[u8] = &[0x2b, 0x0e, 0x03, 0x02, 0x1a];
        const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
        let contains = |oid: &[u8]| self.certificate.windows(oid.len()).any(|w| w == oid);
        if contains(OID_SHA256) {
            DigestAlgorithm::Sha256
        } else if contains(OID_SHA1) {
            DigestAlgorithm::Sha1
        } else if contains(OID_MD5) {
            DigestAlgorithm::Md5
        } else {
            DigestAlgorithm::Unknown
        }
    }

    pub fn parse(bytes: &'a [u8], offset: &mut usize) -> error::Result<Self> {
        let header: AttributeCertificateHeader = bytes.gread_with(offset, scroll::LE)?;
        let body_len = header
            .length
            .saturating_sub(SIZEOF_ATTRIBUTE_CERTIFICATE_HEADER as u32) as usize;
        let certificate = bytes.get(*offset..*offset + body_len).ok_or_else(|| {
            error::Error::Malformed(format!(
                "certificate of {} bytes at {:#x} extends past end of file",
                body_len, offset
            ))
        })?;
        *offset = offset.saturating_add(body_len);
        // entries are padded to a quadword boundary
        *offset = (*offset + 7) & !7;
        Ok(AttributeCertificate {
            length: header.length,
            revision: header.revision,
            certificate_type: header.certificate_type,
            certificate,
        })
    }
}

pub fn parse<'a>(
    bytes: &'a [u8],
    dd: data_directories::DataDirectory,
    diagnostics: &mut Diagnostics,
) -> Vec<AttributeCertificate<'a>> {
    let mut certificates = Vec::new();
    let table_start = dd.virtual_address as usize;
    let table_end = table_start.saturating_add(dd.size as usize);
    if table_end > bytes.len() {
        diagnostics.push(
            Code::TruncatedFile,
            Severity::Error,
            table_start as u64,
            0,
            "certificate table extends past end of file",
        );
        return certificates;
    }
    let mut offset = table_start;
    while offset + SIZEOF_ATTRIBUTE_CERTIFICATE_HEADER <= table_end {
        let before = offset;
        match AttributeCertificate::parse(bytes, &mut offset) {
            Ok(certificate) => certificates.push(certificate),
            Err(_) => {
                diagnostics.push(
                    Code::TruncatedFile,
                    Severity::Error,
                    before as u64,
                    0,
                    "malformed certificate entry; table traversal stopped",
                );
                break;
            }
        }
        if offset <= before {
            break;
        }
    }
    certificates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_padded_entries() {
        // one Authenticode entry with a 5-byte body padded to 8
        let mut bytes = vec![0u8; 24];
        bytes[0..4].copy_from_slice(&13u32.to_le_bytes());
        bytes[4..6].copy_from_slice(&WIN_CERT_REVISION_2_0.to_le_bytes());
        bytes[6..8].copy_from_slice(&WIN_CERT_TYPE_PKCS_SIGNED_DATA.to_le_bytes());
        bytes[8..13].copy_from_slice(&[0x2b, 0x0e, 0x03, 0x02, 0x1a]);
        let mut diags = crate::diag::Diagnostics::new();
        let certs = parse(
            &bytes,
            data_directories::DataDirectory {
                virtual_address: 0,
                size: 16,
            },
            &mut diags,
        );
        assert_eq!(certs.len(), 1);
        assert!(certs[0].is_authenticode());
        assert_eq!(certs[0].digest_algorithm(), DigestAlgorithm::Sha1);
        assert!(certs[0].digest_algorithm().is_weak());
    }
}
