use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::error::{Error, Result};
use crate::stream::GenericWorker;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    /// No compression, the only method this builder writes
    #[default]
    Store,
}

impl CompressionMethod {
    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Store => 0,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::Store),
            _ => None,
        }
    }

    /// Pipeline stage producing this method's output from the raw bytes
    pub fn compress_worker(&self) -> GenericWorker {
        match self {
            CompressionMethod::Store => GenericWorker::passthrough("STORE compression"),
        }
    }
}

/// Host system recorded in the "version made by" field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    #[default]
    Unix,
    Dos,
}

/// Default UNIX mode of directory entries (`drwxrwxr-x`)
pub const DEFAULT_DIR_MODE: u32 = 0o40775;
/// Default UNIX mode of file entries (`-rw-rw-r--`)
pub const DEFAULT_FILE_MODE: u32 = 0o100664;

/// MS-DOS directory attribute
const DOS_DIRECTORY: u32 = 0x10;

impl Platform {
    /// UNIX / 3.0 or DOS / 2.0
    pub fn version_made_by(&self) -> u16 {
        match self {
            Platform::Unix => 0x031E,
            Platform::Dos => 0x0014,
        }
    }

    /// External file attributes of a central directory record
    pub fn external_attributes(
        &self,
        dir: bool,
        unix_permissions: Option<u32>,
        dos_permissions: Option<u8>,
    ) -> u32 {
        let mut attrs = if dir { DOS_DIRECTORY } else { 0 };
        match self {
            Platform::Unix => {
                let mode = unix_permissions
                    .filter(|&mode| mode != 0)
                    .unwrap_or(if dir { DEFAULT_DIR_MODE } else { DEFAULT_FILE_MODE });
                attrs |= (mode & 0xFFFF) << 16;
            }
            Platform::Dos => {
                attrs |= u32::from(dos_permissions.unwrap_or(0)) & 0x3F;
            }
        }
        attrs
    }
}

/// Version needed to extract: 1.0, plain stored data
pub const VERSION_NEEDED: u16 = 0x000A;

/// General purpose flag bit 11: name and comment are UTF-8
pub const FLAG_UTF8: u16 = 0x0800;

/// Info-ZIP Unicode Path extra field
pub const UNICODE_PATH_EXTRA_ID: u16 = 0x7075;
/// Info-ZIP Unicode Comment extra field
pub const UNICODE_COMMENT_EXTRA_ID: u16 = 0x6375;

/// Packed MS-DOS timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// Earliest representable timestamp, 1980-01-01 00:00:00
    pub const MIN: DosDateTime = DosDateTime {
        time: 0,
        date: (1 << 5) | 1,
    };

    /// Latest representable timestamp, 2107-12-31 23:59:58
    pub const MAX: DosDateTime = DosDateTime {
        time: (23 << 11) | (59 << 5) | 29,
        date: (127 << 9) | (12 << 5) | 31,
    };

    /// Pack the UTC components of `date`, clamping to the DOS range
    pub fn from_datetime(date: &DateTime<Utc>) -> Self {
        let year = date.year();
        if year < 1980 {
            return Self::MIN;
        }
        if year > 2107 {
            return Self::MAX;
        }

        let mut time = date.hour() as u16;
        time <<= 6;
        time |= date.minute() as u16;
        time <<= 5;
        time |= (date.second() / 2) as u16;

        let mut dos_date = (year - 1980) as u16;
        dos_date <<= 4;
        dos_date |= date.month() as u16;
        dos_date <<= 5;
        dos_date |= date.day() as u16;

        Self {
            time,
            date: dos_date,
        }
    }

    /// Unpack the date to (year, month, day)
    pub fn ymd(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Unpack the time to (hour, minute, second)
    pub fn hms(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

/// Fields shared by the local header and the central directory record
#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub flags: u16,
    pub compression: CompressionMethod,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
}

impl EntryHeader {
    fn write_common(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.compression.as_u16())?;
        out.write_u16::<LittleEndian>(self.modified.time)?;
        out.write_u16::<LittleEndian>(self.modified.date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(self.compressed_size)?;
        out.write_u32::<LittleEndian>(self.uncompressed_size)?;
        out.write_u16::<LittleEndian>(len_u16(self.file_name.len(), "file name")?)?;
        out.write_u16::<LittleEndian>(len_u16(self.extra_field.len(), "extra field")?)?;
        Ok(())
    }
}

/// Local File Header (LFH) - 30 bytes plus name and extra field
pub struct LocalFileHeader<'a> {
    pub header: &'a EntryHeader,
}

impl LocalFileHeader<'_> {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let h = self.header;
        let mut out = Vec::with_capacity(Self::SIZE + h.file_name.len() + h.extra_field.len());
        out.extend_from_slice(Self::SIGNATURE);
        h.write_common(&mut out)?;
        out.extend_from_slice(&h.file_name);
        out.extend_from_slice(&h.extra_field);
        Ok(out)
    }
}

/// Central Directory File Header (CDFH) - 46 bytes plus variable fields
pub struct CentralDirectoryHeader<'a> {
    pub header: &'a EntryHeader,
    pub version_made_by: u16,
    pub comment: Vec<u8>,
    pub external_attributes: u32,
    pub local_header_offset: u32,
}

impl CentralDirectoryHeader<'_> {
    pub const SIGNATURE: &'static [u8] = b"PK\x01\x02";
    pub const MIN_SIZE: usize = 46;

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let h = self.header;
        let mut out = Vec::with_capacity(
            Self::MIN_SIZE + h.file_name.len() + h.extra_field.len() + self.comment.len(),
        );
        out.extend_from_slice(Self::SIGNATURE);
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        h.write_common(&mut out)?;
        out.write_u16::<LittleEndian>(len_u16(self.comment.len(), "file comment")?)?;
        out.write_u16::<LittleEndian>(0)?; // disk number start
        out.write_u16::<LittleEndian>(0)?; // internal file attributes
        out.write_u32::<LittleEndian>(self.external_attributes)?;
        out.write_u32::<LittleEndian>(self.local_header_offset)?;
        out.extend_from_slice(&h.file_name);
        out.extend_from_slice(&h.extra_field);
        out.extend_from_slice(&self.comment);
        Ok(out)
    }
}

/// End of Central Directory (EOCD) - 22 bytes plus comment
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Record for a single-disk archive
    pub fn new(entries: usize, cd_size: u64, cd_offset: u64, comment: Vec<u8>) -> Result<Self> {
        let entries = u16::try_from(entries)
            .map_err(|_| Error::Unsupported(format!("{entries} entries need ZIP64")))?;
        Ok(Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size: offset_u32(cd_size, "central directory size")?,
            cd_offset: offset_u32(cd_offset, "central directory offset")?,
            comment,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(Self::SIZE + self.comment.len());
        out.extend_from_slice(Self::SIGNATURE);
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(len_u16(self.comment.len(), "archive comment")?)?;
        out.extend_from_slice(&self.comment);
        Ok(out)
    }
}

/// Info-ZIP Unicode Path / Comment extra field
///
/// Carries the CRC-32 of the bytes stored in the standard field so readers
/// can tell whether the UTF-8 value still matches it.
pub fn unicode_extra_field(id: u16, stored: &[u8], utf8: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(9 + utf8.len());
    out.write_u16::<LittleEndian>(id)?;
    out.write_u16::<LittleEndian>(len_u16(5 + utf8.len(), "unicode extra field")?)?;
    out.write_u8(1)?; // version
    out.write_u32::<LittleEndian>(crate::crc32::crc32(0, stored))?;
    out.extend_from_slice(utf8);
    Ok(out)
}

fn len_u16(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| Error::Unsupported(format!("{what} longer than 65535 bytes")))
}

pub(crate) fn offset_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Unsupported(format!("{what} {value} needs ZIP64")))
}
