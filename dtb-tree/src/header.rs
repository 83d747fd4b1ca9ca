//! The 40-byte header at the start of every blob.

use crate::define::FDT_MIN_VERSION;
use crate::{FDT_MAGIC, FdtError};

/// Header size in bytes: ten big-endian u32 fields.
pub(crate) const HEADER_BYTES: usize = 40;

/// The FDT header.
///
/// All fields are stored big-endian on the wire and converted to host
/// order when parsed.
#[derive(Debug, Clone)]
pub struct Header {
    /// FDT header magic number (must be 0xd00dfeed)
    pub magic: u32,
    /// Total size in bytes of the blob
    pub totalsize: u32,
    /// Offset in bytes from the start of the blob to the structure block
    pub off_dt_struct: u32,
    /// Offset in bytes from the start of the blob to the strings block
    pub off_dt_strings: u32,
    /// Offset in bytes from the start of the blob to the memory reservation block
    pub off_mem_rsvmap: u32,
    /// FDT version number
    pub version: u32,
    /// Last compatible FDT version
    pub last_comp_version: u32,
    /// Physical ID of the boot CPU
    pub boot_cpuid_phys: u32,
    /// Length in bytes of the strings block
    pub size_dt_strings: u32,
    /// Length in bytes of the structure block
    pub size_dt_struct: u32,
}

impl Header {
    /// Parses a header from the beginning of a byte slice.
    ///
    /// Validates the magic number and rejects blob versions older than 16.
    ///
    /// # Errors
    ///
    /// Returns `FdtError::BufferTooSmall` if the slice cannot contain a
    /// complete header, `FdtError::InvalidMagic` on a magic mismatch, or
    /// `FdtError::UnsupportedVersion` for pre-16 blobs.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FdtError> {
        if data.len() < HEADER_BYTES {
            return Err(FdtError::BufferTooSmall { pos: HEADER_BYTES });
        }
        let word = |index: usize| {
            u32::from_be_bytes(data[index * 4..index * 4 + 4].try_into().unwrap())
        };

        let magic = word(0);
        if magic != FDT_MAGIC {
            return Err(FdtError::InvalidMagic(magic));
        }
        let header = Header {
            magic,
            totalsize: word(1),
            off_dt_struct: word(2),
            off_dt_strings: word(3),
            off_mem_rsvmap: word(4),
            version: word(5),
            last_comp_version: word(6),
            boot_cpuid_phys: word(7),
            size_dt_strings: word(8),
            size_dt_struct: word(9),
        };
        if header.version < FDT_MIN_VERSION {
            return Err(FdtError::UnsupportedVersion(header.version));
        }
        Ok(header)
    }
}
