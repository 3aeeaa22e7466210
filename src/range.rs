//! Byte oriented range coder.
//!
//! The coder keeps a range `low..high` between two and five bytes wide.
//! Encoding a symbol narrows the range to the subrange proportional to the
//! symbol probability. Whenever the top byte of both boundaries agrees it
//! is shifted out to the stream. If the range gets too narrow without the
//! top bytes agreeing, the larger half around the byte border is kept, so
//! a byte can always be shifted out. The decoder mirrors the same
//! arithmetic and reads zeros once the stream is exhausted, which lets the
//! encoder drop trailing bytes of the final state.

use std::io::{self, Read, Write};

use byteorder::WriteBytesExt;

const MIN_RANGE_BYTES: u32 = 2;
const MIN_RANGE_BITS: u32 = 8 * MIN_RANGE_BYTES;
const MIN_RANGE_WIDTH: u64 = 1 << MIN_RANGE_BITS;

const MAX_RANGE_BYTES: u32 = 5;
const MAX_RANGE_BITS: u32 = 8 * MAX_RANGE_BYTES;
const MAX_RANGE_WIDTH: u64 = 1 << MAX_RANGE_BITS;

const HIGH_BYTE: u64 = 0xff << (MAX_RANGE_BITS - 8);

pub const MAX_SYMBOL_BITS: u32 = MIN_RANGE_BITS;
pub const MAX_SYMBOL_CDF: u32 = 1 << MAX_SYMBOL_BITS;
pub const MIN_SYMBOL_PROBABILITY: u32 = 1;

const SYMBOLS_BY_CDF_BITS: u32 = 8;
const SYMBOLS_BY_CDF_COUNT: usize = 1 << SYMBOLS_BY_CDF_BITS;
const SYMBOLS_BY_CDF_SHIFT: u32 = MAX_SYMBOL_BITS - SYMBOLS_BY_CDF_BITS;

/// Fixed probability distribution over the symbols of one context.
#[derive(Debug, Clone)]
pub struct ProbabilityModel {
    /// Cumulative distribution, `cdf[symbol]..cdf[symbol + 1]` is the
    /// subrange of the symbol. Scaled to sum up to `MAX_SYMBOL_CDF`.
    cdf: Vec<u32>,
    /// Lowest symbol whose subrange reaches into each 256th of the range.
    symbols_by_cdf: Box<[u16; SYMBOLS_BY_CDF_COUNT]>,
}

impl ProbabilityModel {
    /// Builds a model from probabilities that must sum up to
    /// `MAX_SYMBOL_CDF` with no probability below the minimum.
    pub fn new(probabilities: &[u32]) -> ProbabilityModel {
        let mut cdf = Vec::with_capacity(probabilities.len() + 1);
        cdf.push(0);
        let mut sum = 0;
        for &probability in probabilities {
            assert!(probability >= MIN_SYMBOL_PROBABILITY, "zero probability");
            sum += probability;
            cdf.push(sum);
        }
        assert_eq!(sum, MAX_SYMBOL_CDF, "probabilities do not sum to one");

        let mut symbols_by_cdf = Box::new([0; SYMBOLS_BY_CDF_COUNT]);
        let mut min_symbol = 0;
        for (i, entry) in symbols_by_cdf.iter_mut().enumerate() {
            while cdf[min_symbol + 1] <= (i as u32) << SYMBOLS_BY_CDF_SHIFT {
                min_symbol += 1;
            }
            *entry = min_symbol as u16;
        }

        ProbabilityModel {
            cdf,
            symbols_by_cdf,
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.cdf.len() - 1
    }

    pub fn probability(&self, symbol: usize) -> u32 {
        self.cdf[symbol + 1] - self.cdf[symbol]
    }

    fn cdf_lower_bound(&self, symbol: usize) -> u32 {
        self.cdf[symbol]
    }

    fn symbol_for_cdf(&self, cdf: u32) -> usize {
        usize::from(self.symbols_by_cdf[(cdf >> SYMBOLS_BY_CDF_SHIFT) as usize])
    }
}

/// Scales raw frequencies to probabilities summing up to
/// `MAX_SYMBOL_CDF`, giving every symbol at least the minimum probability.
pub fn normalize_frequencies(frequencies: &[u64]) -> Vec<u32> {
    assert!(!frequencies.is_empty());
    assert!(frequencies.len() <= MAX_SYMBOL_CDF as usize, "too many symbols");
    let mut frequency_sum: u64 = frequencies.iter().sum();

    let mut probabilities = Vec::with_capacity(frequencies.len());
    let mut remaining_range = MAX_SYMBOL_CDF;

    for (i, &frequency) in frequencies.iter().enumerate() {
        let mut probability = if frequency == 0 {
            0
        } else {
            ((frequency as u128 * u128::from(remaining_range) + u128::from(frequency_sum / 2))
                / u128::from(frequency_sum)) as u32
        };
        let remaining_symbols = (frequencies.len() - i - 1) as u32;
        probability = probability.min(remaining_range - remaining_symbols);
        probability = probability.max(MIN_SYMBOL_PROBABILITY);

        probabilities.push(probability);
        remaining_range -= probability;
        frequency_sum -= frequency;
    }

    if let Some(last) = probabilities.last_mut() {
        *last += remaining_range;
    }
    probabilities
}

fn symbol_lower_bound(model: &ProbabilityModel, low: u64, range: u64, symbol: usize) -> u64 {
    low + ((u64::from(model.cdf_lower_bound(symbol)) * range) >> MAX_SYMBOL_BITS)
}

#[derive(Debug)]
pub struct RangeEncoder<W> {
    writer: W,
    low: u64,
    high: u64,
}

impl<W: Write> RangeEncoder<W> {
    pub fn new(writer: W) -> RangeEncoder<W> {
        RangeEncoder {
            writer,
            low: 0,
            high: MAX_RANGE_WIDTH,
        }
    }

    pub fn encode(&mut self, model: &ProbabilityModel, symbol: usize) -> io::Result<()> {
        let range = self.high - self.low;
        let low = self.low;
        self.low = symbol_lower_bound(model, low, range, symbol);
        self.high = symbol_lower_bound(model, low, range, symbol + 1);
        debug_assert!(self.low < self.high, "empty symbol subrange");
        self.normalize()
    }

    fn shift_out(&mut self) -> io::Result<()> {
        while self.low & HIGH_BYTE == (self.high - 1) & HIGH_BYTE {
            let high_byte = self.low & HIGH_BYTE;
            self.writer
                .write_u8((high_byte >> (MAX_RANGE_BITS - 8)) as u8)?;
            self.low = (self.low - high_byte) << 8;
            self.high = (self.high - high_byte) << 8;
        }
        Ok(())
    }

    fn normalize(&mut self) -> io::Result<()> {
        self.shift_out()?;
        if self.high - self.low < MIN_RANGE_WIDTH {
            // Two distinct top bytes remain. Keep the bigger half around
            // the byte border so a byte can be shifted out.
            let border = self.high & (HIGH_BYTE | MAX_RANGE_WIDTH);
            if border - self.low > self.high - border {
                self.high = border;
            } else {
                self.low = border;
            }
            self.shift_out()?;
        }
        Ok(())
    }

    /// Flushes the shortest byte sequence that still identifies the final
    /// range and returns the writer.
    pub fn finish(mut self) -> io::Result<W> {
        let requested = self.high - 1;
        let mut stored = 0;
        for i in (0..MAX_RANGE_BYTES).rev() {
            if stored >= self.low {
                break;
            }
            let shift = 8 * i;
            let digit = (requested >> shift) & 0xff;
            stored |= digit << shift;
            self.writer.write_u8(digit as u8)?;
        }
        Ok(self.writer)
    }
}

#[derive(Debug)]
pub struct RangeDecoder<R> {
    reader: R,
    low: u64,
    high: u64,
    number: u64,
}

impl<R: Read> RangeDecoder<R> {
    pub fn new(reader: R) -> io::Result<RangeDecoder<R>> {
        let mut decoder = RangeDecoder {
            reader,
            low: 0,
            high: 1,
            number: 0,
        };
        for _ in 0..MAX_RANGE_BYTES {
            decoder.add_byte()?;
        }
        Ok(decoder)
    }

    fn add_byte(&mut self) -> io::Result<()> {
        let high_byte = self.low & HIGH_BYTE;
        self.low = (self.low - high_byte) << 8;
        self.high = (self.high - high_byte) << 8;
        self.number = self.number.wrapping_sub(high_byte).wrapping_shl(8);

        // Bytes past the end of the stream read as zero.
        let mut buf = [0];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    self.number = self.number.wrapping_add(u64::from(buf[0]));
                    break;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    pub fn decode(&mut self, model: &ProbabilityModel) -> io::Result<usize> {
        if self.number < self.low || self.number >= self.high {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "range decoder desynchronized",
            ));
        }

        let range = self.high - self.low;
        let cdf = (((self.number - self.low) << MAX_SYMBOL_BITS) / range) as u32;

        let mut symbol = model.symbol_for_cdf(cdf);
        let mut updated_high = symbol_lower_bound(model, self.low, range, symbol);
        let mut updated_low;
        loop {
            symbol += 1;
            updated_low = updated_high;
            updated_high = symbol_lower_bound(model, self.low, range, symbol);
            if updated_high > self.number {
                break;
            }
        }

        self.low = updated_low;
        self.high = updated_high;
        self.normalize()?;
        Ok(symbol - 1)
    }

    fn shift_out(&mut self) -> io::Result<()> {
        while self.low & HIGH_BYTE == (self.high - 1) & HIGH_BYTE {
            self.add_byte()?;
        }
        Ok(())
    }

    fn normalize(&mut self) -> io::Result<()> {
        self.shift_out()?;
        if self.high - self.low < MIN_RANGE_WIDTH {
            let border = self.high & (HIGH_BYTE | MAX_RANGE_WIDTH);
            if border - self.low > self.high - border {
                self.high = border;
            } else {
                self.low = border;
            }
            self.shift_out()?;
        }
        Ok(())
    }
}
