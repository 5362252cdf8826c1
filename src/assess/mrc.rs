//! MRC Stack Headers
//!
//! Just enough of the MRC2014 header to count the sections of a class
//! average stack and to join several stacks into the single file that
//! `2dassess` reads.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Fixed header size; an extended header of `nsymbt` bytes may follow.
const HEADER_LEN: usize = 1024;

// Word offsets (4 bytes each) inside the fixed header
const NX: usize = 0;
const NY: usize = 1;
const NZ: usize = 2;
const MODE: usize = 3;
const MZ: usize = 9;
const NSYMBT: usize = 23;

/// Byte offset of the machine stamp.
const MACHST: usize = 212;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

/// Dimensions and layout of one MRC file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MrcHeader {
    pub nx: u32,
    pub ny: u32,
    /// Number of sections; one per class average in a stack
    pub nz: u32,
    pub mode: u32,
    /// Length of the extended header in bytes
    pub extended: u32,
    order: ByteOrder,
}

impl MrcHeader {
    /// Parses the fixed header.
    pub fn parse(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(invalid("file is shorter than an MRC header"));
        }

        // 0x11 marks big-endian data; anything else is read as little-endian
        let order = if bytes[MACHST] == 0x11 {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        };
        let word = |index: usize| read_word(bytes, index, order);

        let header = Self {
            nx: word(NX),
            ny: word(NY),
            nz: word(NZ),
            mode: word(MODE),
            extended: word(NSYMBT),
            order,
        };

        if header.nx == 0 || header.ny == 0 || header.nz == 0 {
            return Err(invalid(&format!(
                "empty MRC dimensions {}x{}x{}",
                header.nx, header.ny, header.nz
            )));
        }
        if bytes_per_voxel(header.mode).is_none() {
            return Err(invalid(&format!("unsupported MRC mode {}", header.mode)));
        }

        Ok(header)
    }

    /// Reads and checks the header of `path`, including that the data is complete.
    pub fn read(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut bytes = vec![0u8; HEADER_LEN];
        file.read_exact(&mut bytes)
            .map_err(|_| invalid("file is shorter than an MRC header"))?;

        let header = Self::parse(&bytes)?;
        let expected = header.data_offset() + header.data_len();
        let actual = file.metadata()?.len();
        if actual < expected {
            return Err(invalid(&format!(
                "truncated MRC data: {} bytes, expected at least {}",
                actual, expected
            )));
        }

        Ok(header)
    }

    /// Bytes of one section.
    pub fn section_len(&self) -> u64 {
        let voxel = bytes_per_voxel(self.mode).unwrap_or(4);
        u64::from(self.nx) * u64::from(self.ny) * voxel
    }

    pub fn data_offset(&self) -> u64 {
        HEADER_LEN as u64 + u64::from(self.extended)
    }

    pub fn data_len(&self) -> u64 {
        self.section_len() * u64::from(self.nz)
    }

    /// Whether sections of `other` can be appended to a stack of `self`.
    pub fn compatible(&self, other: &MrcHeader) -> bool {
        self.nx == other.nx
            && self.ny == other.ny
            && self.mode == other.mode
            && self.order == other.order
    }
}

/// Writes the sections of all `parts` into one stack at `target`.
///
/// The header of the first part is reused with the section count updated
/// and the extended header dropped. Parts must be [`MrcHeader::compatible`].
pub fn write_stack(parts: &[(&Path, MrcHeader)], target: &Path) -> io::Result<u32> {
    let Some((first_path, first)) = parts.first() else {
        return Err(invalid("no sections to write"));
    };

    let total: u32 = parts.iter().map(|(_, h)| h.nz).sum();

    let mut header = vec![0u8; HEADER_LEN];
    File::open(first_path)?.read_exact(&mut header)?;
    write_word(&mut header, NZ, total, first.order);
    write_word(&mut header, MZ, total, first.order);
    write_word(&mut header, NSYMBT, 0, first.order);

    let mut out = File::create(target)?;
    out.write_all(&header)?;

    for (path, part) in parts {
        if !first.compatible(part) {
            return Err(invalid(&format!(
                "{} is {}x{} mode {}, stack is {}x{} mode {}",
                path.display(),
                part.nx,
                part.ny,
                part.mode,
                first.nx,
                first.ny,
                first.mode
            )));
        }

        let mut file = File::open(path)?;
        io::copy(&mut (&mut file).take(part.data_offset()), &mut io::sink())?;
        let copied = io::copy(&mut file.take(part.data_len()), &mut out)?;
        if copied < part.data_len() {
            return Err(invalid(&format!("truncated MRC data in {}", path.display())));
        }
    }

    out.flush()?;
    Ok(total)
}

fn bytes_per_voxel(mode: u32) -> Option<u64> {
    match mode {
        0 => Some(1),
        1 | 6 | 12 => Some(2),
        2 | 3 => Some(4),
        4 => Some(8),
        _ => None,
    }
}

fn read_word(bytes: &[u8], index: usize, order: ByteOrder) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[index * 4..index * 4 + 4]);
    match order {
        ByteOrder::Little => u32::from_le_bytes(word),
        ByteOrder::Big => u32::from_be_bytes(word),
    }
}

fn write_word(bytes: &mut [u8], index: usize, value: u32, order: ByteOrder) {
    let word = match order {
        ByteOrder::Little => value.to_le_bytes(),
        ByteOrder::Big => value.to_be_bytes(),
    };
    bytes[index * 4..index * 4 + 4].copy_from_slice(&word);
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Writes a little-endian float32 stack whose voxels of section `k` all equal `k`.
#[cfg(test)]
pub(crate) fn write_test_stack(path: &Path, nx: u32, ny: u32, nz: u32) {
    let mut header = vec![0u8; HEADER_LEN];
    write_word(&mut header, NX, nx, ByteOrder::Little);
    write_word(&mut header, NY, ny, ByteOrder::Little);
    write_word(&mut header, NZ, nz, ByteOrder::Little);
    write_word(&mut header, MODE, 2, ByteOrder::Little);
    write_word(&mut header, MZ, nz, ByteOrder::Little);
    header[208..212].copy_from_slice(b"MAP ");
    header[MACHST] = 0x44;
    header[MACHST + 1] = 0x44;

    let mut bytes = header;
    for section in 1..=nz {
        for _ in 0..nx * ny {
            bytes.extend_from_slice(&(section as f32).to_le_bytes());
        }
    }
    std::fs::write(path, bytes).unwrap();
}
