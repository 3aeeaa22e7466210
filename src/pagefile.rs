//! Run length codec for staged pages on disk.
//!
//! A page is a sequence of runs. Each run starts with a descriptor byte,
//! the mode in the top two bits and the length minus one in the lower six.
//! Full runs carry two big endian bytes per value, compressed runs one
//! byte per value, draw and illegal runs have no payload at all. During
//! generation most of a table is still draws and illegal positions, so
//! pages shrink by an order of magnitude.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, BE};

use crate::types::Value;

const MODE_FULL: u8 = 0;
const MODE_COMPRESSED: u8 = 1;
const MODE_DRAW: u8 = 2;
const MODE_ILLEGAL: u8 = 3;

const MAX_RUN: usize = 64;

fn mode_of(value: Value) -> u8 {
    if value == Value::ILLEGAL {
        MODE_ILLEGAL
    } else if value == Value::DRAW {
        MODE_DRAW
    } else if value.compress().is_some() {
        MODE_COMPRESSED
    } else {
        MODE_FULL
    }
}

fn descriptor(mode: u8, len: usize) -> u8 {
    debug_assert!(1 <= len && len <= MAX_RUN);
    (mode << 6) | (len - 1) as u8
}

pub fn write_page<W: Write>(writer: &mut W, values: &[Value]) -> io::Result<()> {
    let mut rest = values;
    while let Some(&first) = rest.first() {
        let mode = mode_of(first);
        let len = rest
            .iter()
            .take(MAX_RUN)
            .take_while(|v| mode_of(**v) == mode)
            .count();
        let (run, tail) = rest.split_at(len);
        rest = tail;

        writer.write_u8(descriptor(mode, len))?;
        match mode {
            MODE_FULL => {
                for value in run {
                    writer.write_i16::<BE>(value.to_raw())?;
                }
            }
            MODE_COMPRESSED => {
                for value in run {
                    match value.compress() {
                        Some(compressed) => writer.write_i8(compressed)?,
                        None => unreachable!("run values verified compressible"),
                    }
                }
            }
            _ => (),
        }
    }
    Ok(())
}

pub fn read_page<R: Read>(reader: &mut R, values: &mut [Value]) -> io::Result<()> {
    let mut filled = 0;
    while filled < values.len() {
        let descriptor = reader.read_u8()?;
        let mode = descriptor >> 6;
        let len = usize::from(descriptor & 0x3f) + 1;
        let run = values
            .get_mut(filled..filled + len)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "run past end of page"))?;

        match mode {
            MODE_FULL => {
                for value in run.iter_mut() {
                    *value = Value::from_raw(reader.read_i16::<BE>()?).ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidData, "invalid value in page")
                    })?;
                }
            }
            MODE_COMPRESSED => {
                for value in run.iter_mut() {
                    *value = Value::decompress(reader.read_i8()?);
                }
            }
            MODE_DRAW => run.fill(Value::DRAW),
            _ => run.fill(Value::ILLEGAL),
        }
        filled += len;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn round_trip(values: &[Value]) {
        let mut buffer = Vec::new();
        write_page(&mut buffer, values).unwrap();
        let mut decoded = vec![Value::DRAW; values.len()];
        read_page(&mut Cursor::new(&buffer), &mut decoded).unwrap();
        assert_eq!(values, &decoded[..]);
    }

    #[test]
    fn test_page_round_trip() {
        let mut values = vec![Value::ILLEGAL; 200];
        values.extend(vec![Value::DRAW; 70]);
        values.push(Value::win_in(3));
        values.push(Value::lose_in(8));
        values.push(Value::win_in(2000));
        values.extend(vec![Value::ILLEGAL; 5]);
        round_trip(&values);
    }

    #[test]
    fn test_runs_shrink_pages() {
        let values = vec![Value::ILLEGAL; 1 << 12];
        let mut buffer = Vec::new();
        write_page(&mut buffer, &values).unwrap();
        assert_eq!(buffer.len(), (1 << 12) / MAX_RUN);
    }

    #[test]
    fn test_truncated_page() {
        let values = [Value::win_in(1), Value::win_in(3)];
        let mut buffer = Vec::new();
        write_page(&mut buffer, &values).unwrap();
        buffer.pop();
        let mut decoded = [Value::DRAW; 2];
        assert!(read_page(&mut Cursor::new(&buffer), &mut decoded).is_err());
    }
}
