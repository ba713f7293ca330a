//! The sixteen-entry data directory table of the optional header.

use crate::diag::{Code, Diagnostics, Severity};
use crate::error;
use scroll::{Pread, Pwrite, SizeWith};

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

pub const SIZEOF_DATA_DIRECTORY: usize = 8;
pub const NUM_DATA_DIRECTORIES: usize = 16;

impl DataDirectory {
    pub fn parse(bytes: &[u8], offset: &mut usize) -> error::Result<Self> {
        Ok(bytes.gread_with(offset, scroll::LE)?)
    }
}

/// The closed index space of the directory table.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(usize)]
pub enum DataDirectoryType {
    Export = 0,
    Import,
    Resource,
    Exception,
    /// A file offset, not an RVA
    Security,
    BaseReloc,
    Debug,
    Architecture,
    GlobalPtr,
    Tls,
    LoadConfig,
    BoundImport,
    Iat,
    DelayImport,
    ComDescriptor,
    Reserved,
}

#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct DataDirectories {
    pub data_directories: [Option<DataDirectory>; NUM_DATA_DIRECTORIES],
}

impl DataDirectories {
    /// Parse `count` directory entries. A count above sixteen is clamped
    /// with a diagnostic; all-zero entries become `None`.
    pub fn parse(
        bytes: &[u8],
        count: usize,
        offset: &mut usize,
        diagnostics: &mut Diagnostics,
    ) -> error::Result<Self> {
        let mut data_directories = [None; NUM_DATA_DIRECTORIES];
        let count = if count > NUM_DATA_DIRECTORIES {
            diagnostics.push(
                Code::OptReservedNonzero,
                Severity::Anomaly,
                *offset as u64,
                0,
                format!(
                    "NumberOfRvaAndSizes is {}, clamped to {}",
                    count, NUM_DATA_DIRECTORIES
                ),
            );
            NUM_DATA_DIRECTORIES
        } else {
            count
        };
        for dir in data_directories.iter_mut().take(count) {
            let dd = DataDirectory::parse(bytes, offset)?;
            *dir = if dd.virtual_address == 0 && dd.size == 0 {
                None
            } else {
                Some(dd)
            };
        }
        Ok(DataDirectories { data_directories })
    }

    pub fn get(&self, which: DataDirectoryType) -> &Option<DataDirectory> {
        &self.data_directories[which as usize]
    }

    pub fn get_export_table(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::Export)
    }
    pub fn get_import_table(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::Import)
    }
    pub fn get_resource_table(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::Resource)
    }
    pub fn get_exception_table(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::Exception)
    }
    pub fn get_certificate_table(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::Security)
    }
    pub fn get_base_relocation_table(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::BaseReloc)
    }
    pub fn get_debug_table(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::Debug)
    }
    pub fn get_tls_table(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::Tls)
    }
    pub fn get_load_config_table(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::LoadConfig)
    }
    pub fn get_bound_import_table(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::BoundImport)
    }
    pub fn get_import_address_table(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::Iat)
    }
    pub fn get_delay_import_descriptor(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::DelayImport)
    }
    pub fn get_clr_runtime_header(&self) -> &Option<DataDirectory> {
        self.get(DataDirectoryType::ComDescriptor)
    }
}
