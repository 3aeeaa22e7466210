//! Random access to `.tbs` table files.
//!
//! [`FileTable::open()`] parses and validates the header eagerly, so a
//! corrupt or mismatched file fails at open time rather than on first
//! probe. Result data is decoded one block at a time on demand, each
//! block is independently range coded and carries its own CRC-32.

use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
    sync::Mutex,
};

use byteorder::{ReadBytesExt, BE};
use shakmaty::{Color, Position, Role};
use tracing::trace;

use crate::{
    cursor::Cursor,
    definition::{CombinationDefinition, TableDefinition},
    errors::{ProbeError, ProbeResult},
    material::{Material, MaterialSide},
    model::{ClassificationSelector, ModelSelector},
    range::{ProbabilityModel, RangeDecoder, MAX_SYMBOL_CDF, MIN_SYMBOL_PROBABILITY},
    types::Value,
    writer::{
        read_uint_from, BLOCK_LEN, BLOCK_SHIFT, FULL_PROBABILITY_ID, LARGE_PROBABILITY_ID,
        MAGIC, ONE_COUNT_ID, SMALL_PROBABILITY_LIMIT, VERSION,
    },
};

/// A decoded block of consecutive table values.
#[derive(Debug)]
pub struct Block {
    first_index: u64,
    values: Vec<Value>,
}

impl Block {
    #[cfg(test)]
    pub(crate) fn empty_for_test(first_index: u64) -> Block {
        Block {
            first_index,
            values: Vec::new(),
        }
    }

    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    pub fn value_at(&self, table_index: u64) -> Value {
        self.values[(table_index - self.first_index) as usize]
    }
}

/// An open table file.
pub struct FileTable {
    file: Mutex<File>,
    definition: TableDefinition,
    symbol_results: Vec<Value>,
    history_length: u32,
    previous_win: bool,
    models: Vec<ProbabilityModel>,
    block_positions: Vec<u64>,
    data_start: u64,
}

impl FileTable {
    pub fn open<P: AsRef<Path>>(path: P, material: &Material) -> ProbeResult<FileTable> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(ProbeError::Magic { magic });
        }
        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(ProbeError::Version { version });
        }
        // No flags are defined for version 0.
        let flags = reader.read_u8()?;
        if flags != 0 {
            return Err(ProbeError::Flags { flags });
        }

        let turn = Color::from_white(reader.read_u8()? == 0);
        let combination_count = reader.read_u8()?;
        let mut definitions = Vec::with_capacity(usize::from(combination_count));
        for _ in 0..combination_count {
            definitions.push(u!(CombinationDefinition::from_byte(reader.read_u8()?)));
        }
        let file_material = material_of(&definitions, turn);
        if file_material != *material {
            return Err(ProbeError::Material);
        }
        let definition = TableDefinition::new(&file_material);
        ensure!(definition.definitions() == definitions.as_slice());

        let symbol_count = usize::from(reader.read_u16::<BE>()?);
        let selector_data = reader.read_u8()?;
        let history_length = u32::from(selector_data >> 1);
        let previous_win = selector_data & 1 != 0;

        let mut symbol_results: Vec<Value> = Vec::with_capacity(symbol_count);
        for _ in 0..symbol_count {
            let result = u!(Value::from_raw(reader.read_i16::<BE>()?));
            ensure!(result.is_legal());
            if let Some(previous) = symbol_results.last() {
                ensure!(previous.to_raw() < result.to_raw());
            }
            symbol_results.push(result);
        }

        let selector = selector_of(
            &symbol_results,
            history_length,
            previous_win,
            &file_material,
        );
        let mut models = Vec::with_capacity(selector.model_count());
        for _ in 0..selector.model_count() {
            models.push(read_model(&mut reader, symbol_count)?);
        }

        let block_position_count = reader.read_u64::<BE>()?;
        let block_count = (definition.index_count() + BLOCK_LEN as u64 - 1) >> BLOCK_SHIFT;
        ensure!(block_position_count == block_count + 1);
        ensure!(u32::from(reader.read_u8()?) == BLOCK_SHIFT);
        let bytes_per_position = usize::from(reader.read_u8()?);
        ensure!(bytes_per_position <= 8);

        let mut block_positions = Vec::with_capacity(block_position_count as usize);
        for _ in 0..block_position_count {
            let position = read_uint_from(&mut reader, bytes_per_position)?;
            if let Some(previous) = block_positions.last() {
                // Every block holds at least its CRC.
                ensure!(position >= previous + 4);
            } else {
                ensure!(position == 0);
            }
            block_positions.push(position);
        }

        let data_start = reader.stream_position()?;
        trace!(
            material = %file_material,
            blocks = block_count,
            models = models.len(),
            "opened table file"
        );

        Ok(FileTable {
            file: Mutex::new(reader.into_inner()),
            definition,
            symbol_results,
            history_length,
            previous_win,
            models,
            block_positions,
            data_start,
        })
    }

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    pub fn block_index(&self, table_index: u64) -> u64 {
        table_index >> BLOCK_SHIFT
    }

    /// Reads and decodes a single block.
    pub fn read_block(&self, block_index: u64) -> ProbeResult<Block> {
        ensure!(block_index + 1 < self.block_positions.len() as u64);
        let start = self.block_positions[block_index as usize];
        let end = self.block_positions[block_index as usize + 1];
        let mut data = vec![0; (end - start) as usize];
        {
            let mut file = self
                .file
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            file.seek(SeekFrom::Start(self.data_start + start))?;
            file.read_exact(&mut data)?;
        }
        self.decode_block(block_index, &data)
    }

    fn decode_block(&self, block_index: u64, data: &[u8]) -> ProbeResult<Block> {
        ensure!(data.len() >= 4);
        let (coded, crc_bytes) = data.split_at(data.len() - 4);
        let expected_crc = u32::from_be_bytes([
            crc_bytes[0],
            crc_bytes[1],
            crc_bytes[2],
            crc_bytes[3],
        ]);

        let first_index = block_index << BLOCK_SHIFT;
        let len = BLOCK_LEN.min((self.definition.index_count() - first_index) as usize);
        let mut values = Vec::with_capacity(len);

        let mut selector = selector_of(
            &self.symbol_results,
            self.history_length,
            self.previous_win,
            self.definition.material(),
        );
        let mut decoder = RangeDecoder::new(coded)?;
        let mut crc = crc32fast::Hasher::new();
        let mut cursor = Cursor::at(&self.definition, first_index);
        for _ in 0..len {
            let value = match self.definition.checked_position(cursor.setup()) {
                Some(pos) => {
                    let model = &self.models[selector.model_index(pos.board())];
                    let symbol = decoder.decode(model)?;
                    let result = *u!(self.symbol_results.get(symbol));
                    selector.add_symbol(pos.board(), symbol);
                    crc.update(&result.to_raw().to_be_bytes());
                    result
                }
                None => Value::ILLEGAL,
            };
            values.push(value);
            cursor.advance();
        }
        ensure!(crc.finalize() == expected_crc);

        Ok(Block {
            first_index,
            values,
        })
    }
}

fn material_of(definitions: &[CombinationDefinition], turn: Color) -> Material {
    let by_color = shakmaty::ByColor::new_with(|color| {
        // Kings are implicit, both in the file and in `MaterialSide`.
        let mut side = MaterialSide::empty();
        for definition in definitions {
            if definition.piece.color == color {
                *side.by_role_mut(definition.piece.role) += definition.count;
            }
        }
        side
    });
    Material::new(by_color, turn)
}

fn selector_of(
    symbol_results: &[Value],
    history_length: u32,
    previous_win: bool,
    material: &Material,
) -> ClassificationSelector {
    ClassificationSelector::new(
        symbol_results,
        history_length,
        previous_win,
        u32::from(material.side(Color::White).by_role(Role::Bishop)),
        u32::from(material.side(Color::Black).by_role(Role::Bishop)),
    )
}

fn read_model<R: Read>(reader: &mut R, symbol_count: usize) -> ProbeResult<ProbabilityModel> {
    let mut probabilities = Vec::with_capacity(symbol_count);
    while probabilities.len() < symbol_count {
        let head = reader.read_u8()?;
        if head & 0x80 == 0 {
            probabilities.push(MIN_SYMBOL_PROBABILITY + u32::from(head));
        } else if head & 0xc0 == LARGE_PROBABILITY_ID {
            let low = reader.read_u8()?;
            probabilities.push(
                SMALL_PROBABILITY_LIMIT + (u32::from(head & 0x3f) << 8) + u32::from(low),
            );
        } else if head == FULL_PROBABILITY_ID {
            probabilities.push(MIN_SYMBOL_PROBABILITY + u32::from(reader.read_u16::<BE>()?));
        } else {
            let count = usize::from(head & !ONE_COUNT_ID);
            ensure!(probabilities.len() + count <= symbol_count);
            probabilities.resize(probabilities.len() + count, MIN_SYMBOL_PROBABILITY);
        }
    }
    ensure!(probabilities.iter().map(|&p| u64::from(p)).sum::<u64>() == u64::from(MAX_SYMBOL_CDF));
    Ok(ProbabilityModel::new(&probabilities))
}
