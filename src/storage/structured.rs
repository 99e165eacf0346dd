//! Checksummed binary encoding for counter snapshots and journal records.
//!
//! Writers and readers keep a running CRC32 of every byte that passes
//! through them; [`StructWriter::finish`] appends it and
//! [`StructReader::verify_checksum`] checks it.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Result, SegrankError};
use crate::segment::partition::IntervalKey;
use crate::util::varint::{MAX_VARINT_LEN, decode_i64, decode_u64, encode_i64, encode_u64};

/// A structured writer for binary data.
pub struct StructWriter<W: Write> {
    writer: W,
    hasher: Hasher,
}

impl<W: Write> StructWriter<W> {
    /// Create a new structured writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
        }
    }

    fn write_hashed(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.hasher.update(bytes);
        Ok(())
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_hashed(&[value])
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_hashed(&buf)
    }

    /// Write an i64 value (little-endian).
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_i64(&mut buf, value);
        self.write_hashed(&buf)
    }

    /// Write a variable-length unsigned integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        self.write_hashed(&encode_u64(value))
    }

    /// Write a zigzag variable-length signed integer.
    pub fn write_signed_varint(&mut self, value: i64) -> Result<()> {
        self.write_hashed(&encode_i64(value))
    }

    /// Write an interval key followed by a signed value.
    pub fn write_counter(&mut self, key: &IntervalKey, value: i64) -> Result<()> {
        self.write_signed_varint(key.lower)?;
        self.write_signed_varint(key.upper)?;
        self.write_signed_varint(value)
    }

    /// CRC32 of everything written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Append the checksum and return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        let checksum = self.checksum();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush()?;
        Ok(self.writer)
    }

    /// Return the inner writer without a checksum footer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// A structured reader for binary data.
pub struct StructReader<R: Read> {
    reader: R,
    hasher: Hasher,
}

impl<R: Read> StructReader<R> {
    /// Create a new structured reader.
    pub fn new(reader: R) -> Self {
        StructReader {
            reader,
            hasher: Hasher::new(),
        }
    }

    fn read_hashed(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf)?;
        self.hasher.update(buf);
        Ok(())
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_hashed(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_hashed(&mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    /// Read an i64 value (little-endian).
    pub fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_hashed(&mut buf)?;
        Ok(LittleEndian::read_i64(&buf))
    }

    // Pull bytes up to and including the one without a continuation bit.
    fn read_varint_bytes(&mut self) -> Result<([u8; MAX_VARINT_LEN], usize)> {
        let mut buf = [0u8; MAX_VARINT_LEN];
        for len in 1..=MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            buf[len - 1] = byte;
            if byte & 0x80 == 0 {
                return Ok((buf, len));
            }
        }
        Err(SegrankError::codec("VarInt overflow"))
    }

    /// Read a variable-length unsigned integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let (buf, len) = self.read_varint_bytes()?;
        Ok(decode_u64(&buf[..len])?.0)
    }

    /// Read a zigzag variable-length signed integer.
    pub fn read_signed_varint(&mut self) -> Result<i64> {
        let (buf, len) = self.read_varint_bytes()?;
        Ok(decode_i64(&buf[..len])?.0)
    }

    /// Read an interval key followed by a signed value.
    pub fn read_counter(&mut self) -> Result<(IntervalKey, i64)> {
        let lower = self.read_signed_varint()?;
        let upper = self.read_signed_varint()?;
        let value = self.read_signed_varint()?;
        if lower > upper {
            return Err(SegrankError::codec(format!(
                "inverted interval {lower}-{upper}"
            )));
        }
        Ok((IntervalKey::new(lower, upper), value))
    }

    /// Read the checksum footer and compare it with everything read so far.
    pub fn verify_checksum(mut self) -> Result<()> {
        let expected = self.hasher.clone().finalize();
        let stored = self.reader.read_u32::<LittleEndian>()?;
        if stored != expected {
            return Err(SegrankError::codec(format!(
                "checksum mismatch: stored {stored:08x}, computed {expected:08x}"
            )));
        }
        Ok(())
    }
}
