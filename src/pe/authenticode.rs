//! Authenticode hash ranges.
//!
//! Authenticode digests the whole file except three spans: the optional
//! header's checksum field, the security data-directory entry, and the
//! certificate table itself. This module exposes those spans and a generic
//! digest over their complement.

use sha2::digest::{Digest, Output};

use crate::pe::data_directories::DataDirectoryType;
use crate::pe::header::{SIZEOF_COFF_HEADER, SIZEOF_PE_MAGIC};
use crate::pe::optional_header;
use crate::pe::PE;

impl PE<'_> {
    /// The file ranges that participate in the Authenticode digest, in
    /// order.
    pub fn authenticode_ranges(&self) -> Vec<&[u8]> {
        let bytes = self.bytes;
        let Some(optional_header) = self.header.optional_header else {
            return vec![bytes];
        };
        let opt_offset =
            self.header.pe_pointer as usize + SIZEOF_PE_MAGIC + SIZEOF_COFF_HEADER;

        // CheckSum sits 64 bytes into the optional header in both layouts
        let checksum_start = opt_offset + 64;
        let checksum_end = checksum_start + 4;

        // the security directory entry follows the standard+windows fields
        let fields_size = if optional_header.is_64() {
            optional_header::SIZEOF_STANDARD_FIELDS_64 + optional_header::SIZEOF_WINDOWS_FIELDS_64
        } else {
            optional_header::SIZEOF_STANDARD_FIELDS_32 + optional_header::SIZEOF_WINDOWS_FIELDS_32
        };
        let certtable_entry_start =
            opt_offset + fields_size + DataDirectoryType::Security as usize * 8;
        let certtable_entry_end = certtable_entry_start + 8;

        let certtable = optional_header
            .data_directories
            .get_certificate_table()
            .map(|dd| {
                let start = dd.virtual_address as usize;
                (start, start.saturating_add(dd.size as usize))
            });

        let len = bytes.len();
        // malformed inputs can put these boundaries out of order; an empty
        // span beats a panic
        let span = |from: usize, to: usize| {
            let to = to.min(len);
            &bytes[from.min(to)..to]
        };
        let mut ranges = vec![
            span(0, checksum_start),
            span(checksum_end, certtable_entry_start),
        ];
        match certtable {
            Some((start, end)) => {
                ranges.push(span(certtable_entry_end, start));
                ranges.push(span(end, len));
            }
            None => ranges.push(span(certtable_entry_end, len)),
        }
        ranges
    }

    /// Digest the Authenticode-relevant ranges with `D`.
    pub fn authenticode_digest<D: Digest>(&self) -> Output<D> {
        let mut digest = D::new();
        for chunk in self.authenticode_ranges() {
            digest.update(chunk);
        }
        digest.finalize()
    }
}
