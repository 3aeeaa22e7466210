//! Serialization of a finished table into the `.tbs` container.
//!
//! Two passes over the table. The statistics pass collects per context
//! symbol frequencies and turns them into probability models. The encode
//! pass range codes the symbols of the legal positions block by block,
//! appending a CRC-32 over the block's results. Illegal positions are not
//! coded at all, the reader re-derives them from the position validity
//! test. The context selector is reset at every block boundary in both
//! passes, so any block can later be decoded on its own.

use std::io::Write;

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use rustc_hash::FxHashMap;
use shakmaty::{Position, Role};
use tracing::debug;

use crate::{
    cursor::Cursor,
    definition::TableDefinition,
    errors::GenResult,
    model::{ClassificationSelector, ModelSelector, DEFAULT_HISTORY_LENGTH},
    range::{normalize_frequencies, ProbabilityModel, RangeEncoder, MIN_SYMBOL_PROBABILITY},
    staged::StagedTable,
    types::Value,
};

pub(crate) const MAGIC: [u8; 4] = *b"TBBS";
pub(crate) const VERSION: u8 = 0;

pub const BLOCK_SHIFT: u32 = 12;
pub const BLOCK_LEN: usize = 1 << BLOCK_SHIFT;

pub(crate) const SMALL_PROBABILITY_LIMIT: u32 = MIN_SYMBOL_PROBABILITY + (1 << 7);
pub(crate) const LARGE_PROBABILITY_LIMIT: u32 = SMALL_PROBABILITY_LIMIT + (1 << 14);
pub(crate) const MAX_ONE_COUNT: u32 = 63;

pub(crate) const SMALL_PROBABILITY_ID: u8 = 0x00;
pub(crate) const LARGE_PROBABILITY_ID: u8 = 0x80;
pub(crate) const FULL_PROBABILITY_ID: u8 = 0xc0;
pub(crate) const ONE_COUNT_ID: u8 = 0xc0;

pub(crate) fn write_uint<W: Write>(writer: &mut W, value: u64, bytes: usize) -> std::io::Result<()> {
    for i in (0..bytes).rev() {
        writer.write_u8((value >> (8 * i)) as u8)?;
    }
    Ok(())
}

pub(crate) fn read_uint_from<R: std::io::Read>(
    reader: &mut R,
    bytes: usize,
) -> std::io::Result<u64> {
    let mut value = 0;
    for _ in 0..bytes {
        value = value << 8 | u64::from(reader.read_u8()?);
    }
    Ok(value)
}

struct SymbolMap {
    results: Vec<Value>,
    symbols: FxHashMap<i16, usize>,
}

impl SymbolMap {
    /// Symbols are the distinct legal results ordered by raw value.
    fn from_table(definition: &TableDefinition, table: &StagedTable) -> SymbolMap {
        let mut raws = Vec::new();
        for index in 0..definition.index_count() {
            let value = table.value_at(index);
            if value.is_legal() {
                raws.push(value.to_raw());
            }
        }
        raws.sort_unstable();
        raws.dedup();

        let results = raws
            .iter()
            .filter_map(|&raw| Value::from_raw(raw))
            .collect();
        let symbols = raws
            .iter()
            .enumerate()
            .map(|(symbol, &raw)| (raw, symbol))
            .collect();
        SymbolMap { results, symbols }
    }

    fn symbol(&self, value: Value) -> usize {
        self.symbols[&value.to_raw()]
    }
}

fn selector_for(definition: &TableDefinition, symbols: &SymbolMap) -> ClassificationSelector {
    let material = definition.material();
    ClassificationSelector::new(
        &symbols.results,
        DEFAULT_HISTORY_LENGTH,
        true,
        u32::from(material.side(shakmaty::Color::White).by_role(Role::Bishop)),
        u32::from(material.side(shakmaty::Color::Black).by_role(Role::Bishop)),
    )
}

/// Writes a finished table. The staged table must be in read mode.
pub fn write_table<W: Write>(
    definition: &TableDefinition,
    table: &StagedTable,
    writer: &mut W,
) -> GenResult<()> {
    assert_eq!(definition.index_count(), table.index_count());

    let symbols = SymbolMap::from_table(definition, table);
    let mut selector = selector_for(definition, &symbols);
    debug!(
        material = %definition.material(),
        symbols = symbols.results.len(),
        models = selector.model_count(),
        "collecting statistics"
    );

    let probabilities = collect_probabilities(definition, table, &symbols, &mut selector);
    let models: Vec<ProbabilityModel> = probabilities
        .iter()
        .map(|p| ProbabilityModel::new(p))
        .collect();

    let (blocks, block_positions) =
        encode_blocks(definition, table, &symbols, &mut selector, &models)?;

    write_header(definition, &symbols, &selector, &probabilities, writer)?;

    let bytes_per_position = needed_bytes(*block_positions.last().unwrap_or(&0));
    writer.write_u64::<BE>(block_positions.len() as u64)?;
    writer.write_u8(BLOCK_SHIFT as u8)?;
    writer.write_u8(bytes_per_position as u8)?;
    for &position in &block_positions {
        write_uint(writer, position, bytes_per_position)?;
    }
    writer.write_all(&blocks)?;
    Ok(())
}

fn needed_bytes(mut value: u64) -> usize {
    let mut bytes = 0;
    while value > 0 {
        bytes += 1;
        value >>= 8;
    }
    bytes
}

fn collect_probabilities(
    definition: &TableDefinition,
    table: &StagedTable,
    symbols: &SymbolMap,
    selector: &mut ClassificationSelector,
) -> Vec<Vec<u32>> {
    let mut frequencies = vec![vec![0u64; symbols.results.len()]; selector.model_count()];

    let mut cursor = Cursor::new(definition);
    while cursor.is_valid() {
        if cursor.table_index() % BLOCK_LEN as u64 == 0 {
            selector.reset();
        }
        if let Some(pos) = definition.checked_position(cursor.setup()) {
            let value = table.value_at(cursor.table_index());
            let symbol = symbols.symbol(value);
            let model_index = selector.model_index(pos.board());
            selector.add_symbol(pos.board(), symbol);
            frequencies[model_index][symbol] += 1;
        }
        cursor.advance();
    }

    frequencies
        .iter()
        .map(|f| normalize_frequencies(f))
        .collect()
}

fn encode_blocks(
    definition: &TableDefinition,
    table: &StagedTable,
    symbols: &SymbolMap,
    selector: &mut ClassificationSelector,
    models: &[ProbabilityModel],
) -> GenResult<(Vec<u8>, Vec<u64>)> {
    let block_count = (definition.index_count() + BLOCK_LEN as u64 - 1) >> BLOCK_SHIFT;
    let mut blocks = Vec::new();
    let mut block_positions = Vec::with_capacity(block_count as usize + 1);
    block_positions.push(0);

    let mut cursor = Cursor::new(definition);
    for _ in 0..block_count {
        selector.reset();
        let mut crc = crc32fast::Hasher::new();
        let mut encoder = RangeEncoder::new(Vec::new());

        for _ in 0..BLOCK_LEN {
            if !cursor.is_valid() {
                break;
            }
            if let Some(pos) = definition.checked_position(cursor.setup()) {
                let value = table.value_at(cursor.table_index());
                assert!(value.is_legal(), "legal position marked illegal");
                let symbol = symbols.symbol(value);
                let model = &models[selector.model_index(pos.board())];
                encoder.encode(model, symbol)?;
                selector.add_symbol(pos.board(), symbol);
                crc.update(&value.to_raw().to_be_bytes());
            }
            cursor.advance();
        }

        let mut block = encoder.finish()?;
        block.extend_from_slice(&crc.finalize().to_be_bytes());
        blocks.extend_from_slice(&block);
        block_positions.push(blocks.len() as u64);
    }

    Ok((blocks, block_positions))
}

fn write_header<W: Write>(
    definition: &TableDefinition,
    symbols: &SymbolMap,
    selector: &ClassificationSelector,
    probabilities: &[Vec<u32>],
    writer: &mut W,
) -> GenResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_u8(VERSION)?;
    writer.write_u8(0)?; // flags
    writer.write_u8(definition.turn().fold_wb(0, 1))?;

    writer.write_u8(definition.definitions().len() as u8)?;
    for combination in definition.definitions() {
        writer.write_u8(combination.to_byte())?;
    }

    writer.write_u16::<BE>(symbols.results.len() as u16)?;
    writer.write_u8(
        (selector.history_length() as u8) << 1 | u8::from(selector.previous_win()),
    )?;
    for &result in &symbols.results {
        writer.write_i16::<BE>(result.to_raw())?;
    }

    for model in probabilities {
        write_probabilities(writer, model)?;
    }
    Ok(())
}

fn write_probabilities<W: Write>(writer: &mut W, probabilities: &[u32]) -> GenResult<()> {
    let mut one_count = 0;
    for &probability in probabilities {
        if probability == 1 {
            one_count += 1;
            if one_count >= MAX_ONE_COUNT {
                writer.write_u8(ONE_COUNT_ID | one_count as u8)?;
                one_count = 0;
            }
        } else {
            if one_count > 0 {
                writer.write_u8(ONE_COUNT_ID | one_count as u8)?;
                one_count = 0;
            }
            write_probability(writer, probability)?;
        }
    }
    if one_count > 0 {
        writer.write_u8(ONE_COUNT_ID | one_count as u8)?;
    }
    Ok(())
}

fn write_probability<W: Write>(writer: &mut W, probability: u32) -> GenResult<()> {
    if probability < SMALL_PROBABILITY_LIMIT {
        writer.write_u8(SMALL_PROBABILITY_ID | (probability - MIN_SYMBOL_PROBABILITY) as u8)?;
    } else if probability < LARGE_PROBABILITY_LIMIT {
        let moved = probability - SMALL_PROBABILITY_LIMIT;
        writer.write_u8(LARGE_PROBABILITY_ID | (moved >> 8) as u8)?;
        writer.write_u8(moved as u8)?;
    } else {
        writer.write_u8(FULL_PROBABILITY_ID)?;
        writer.write_u16::<BE>((probability - MIN_SYMBOL_PROBABILITY) as u16)?;
    }
    Ok(())
}
