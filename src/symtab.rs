//! C8: the `*.sym` file codec.
//!
//! Format, per `original_source/src/symbol.cpp::SaveEnv`/`LoadEnv`: a 4-byte
//! little-endian magic `0x72297962`, then a stream of
//! `(NUL-terminated identifier, 8-byte little-endian TypeValue)` records
//! until EOF. Byte-for-byte I/O uses `byteorder`, the way the teacher crate's
//! `codegen.rs` writes its own binary headers with `WriteBytesExt`.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{self, Read, Write};

pub const MAGIC: u32 = 0x7229_7962;

#[derive(Debug)]
pub struct SymRecord {
    pub name: String,
    pub ty: crate::types::TypeValue,
}

#[derive(Debug)]
pub enum SymError {
    Io(io::Error),
    BadMagic,
}

impl From<io::Error> for SymError {
    fn from(e: io::Error) -> Self {
        SymError::Io(e)
    }
}

impl std::fmt::Display for SymError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymError::Io(e) => write!(f, "i/o error: {e}"),
            SymError::BadMagic => write!(f, "not a symbol file (bad magic)"),
        }
    }
}

impl std::error::Error for SymError {}

/// Writes the magic header followed by one record per entry.
pub fn write_symbols<W: Write>(w: &mut W, records: &[SymRecord]) -> Result<(), SymError> {
    w.write_u32::<LE>(MAGIC)?;
    for rec in records {
        w.write_all(rec.name.as_bytes())?;
        w.write_u8(0)?;
        w.write_i64::<LE>(rec.ty)?;
    }
    Ok(())
}

/// Reads the magic header, then records until EOF. Rejects a mismatched
/// magic outright (`LoadEnvReturn::FileError` in the original).
pub fn read_symbols<R: Read>(r: &mut R) -> Result<Vec<SymRecord>, SymError> {
    let magic = r.read_u32::<LE>()?;
    if magic != MAGIC {
        return Err(SymError::BadMagic);
    }
    let mut records = Vec::new();
    loop {
        let mut name = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match r.read(&mut byte)? {
                0 if name.is_empty() => return Ok(records),
                0 => return Err(SymError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated identifier"))),
                _ => {}
            }
            if byte[0] == 0 {
                break;
            }
            name.push(byte[0]);
        }
        let ty = r.read_i64::<LE>()?;
        records.push(SymRecord {
            name: String::from_utf8_lossy(&name).into_owned(),
            ty,
        });
    }
}
