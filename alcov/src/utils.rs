//! Little-endian primitives shared by every record of the format.
//!
//! Fields are never read through a host struct layout. Each one is decoded from
//! the byte buffer at an explicit offset, which keeps the codec independent of
//! host endianness and alignment.

use std::io::{self, Write};

use scroll::ctx::TryFromCtx;
use scroll::{Endian, IOwrite, Pread, LE};

use crate::AlcovError;

fn read_le<'a, T>(buf: &'a [u8], mut offset: usize) -> Result<(T, usize), AlcovError>
where
    T: TryFromCtx<'a, Endian, Error = scroll::Error>,
{
    let value = buf.gread_with::<T>(&mut offset, LE)?;
    Ok((value, offset))
}

/// Reads a little-endian `u16` at `offset`, returning it with the offset past it.
pub fn read_u16(buf: &[u8], offset: usize) -> Result<(u16, usize), AlcovError> {
    read_le(buf, offset)
}

/// Reads a little-endian `u32` at `offset`, returning it with the offset past it.
pub fn read_u32(buf: &[u8], offset: usize) -> Result<(u32, usize), AlcovError> {
    read_le(buf, offset)
}

/// Reads a little-endian `u64` at `offset`, returning it with the offset past it.
pub fn read_u64(buf: &[u8], offset: usize) -> Result<(u64, usize), AlcovError> {
    read_le(buf, offset)
}

/// Reads a little-endian `i64` at `offset`, returning it with the offset past it.
pub fn read_i64(buf: &[u8], offset: usize) -> Result<(i64, usize), AlcovError> {
    read_le(buf, offset)
}

/// Writes `value` as two little-endian bytes.
pub fn write_u16<W: Write + ?Sized>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.iowrite_with(value, LE)
}

/// Writes `value` as four little-endian bytes.
pub fn write_u32<W: Write + ?Sized>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.iowrite_with(value, LE)
}

/// Writes `value` as eight little-endian bytes.
pub fn write_u64<W: Write + ?Sized>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.iowrite_with(value, LE)
}

/// Writes `value` as eight little-endian bytes.
pub fn write_i64<W: Write + ?Sized>(writer: &mut W, value: i64) -> io::Result<()> {
    writer.iowrite_with(value, LE)
}
