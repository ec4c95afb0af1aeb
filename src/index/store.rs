//! Exhaustive L2 vector store and its binary file format.
//!
//! Layout of `vectors.bin` (all integers little-endian):
//!
//! ```text
//! magic   b"NRAGVEC\0"
//! version u32
//! dim     u32
//! count   u64
//! count × { id_len u32, id bytes (UTF-8), dim × f32 }
//! ```
//!
//! Storing the chunk id next to each vector makes the ordinal → id mapping part of the vector
//! file itself, so a desynchronized metadata file is detected on load.

use super::IndexError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 8] = b"NRAGVEC\0";
const STORE_VERSION: u32 = 1;
const MAX_ID_BYTES: u32 = 64 * 1024;

/// Flat (brute-force) nearest-neighbour store under Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Store {
    dimension: usize,
    ids: Vec<String>,
    data: Vec<f32>,
}

impl FlatL2Store {
    /// Create an empty store for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Vector dimension.
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when the store holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append a vector and return its ordinal.
    pub fn add(&mut self, id: &str, vector: &[f32]) -> Result<usize, IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.ids.push(id.to_string());
        self.data.extend_from_slice(vector);
        Ok(self.ids.len() - 1)
    }

    /// Chunk id stored at `ordinal`.
    pub fn id(&self, ordinal: usize) -> Option<&str> {
        self.ids.get(ordinal).map(String::as_str)
    }

    /// Vector stored at `ordinal`.
    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// The `k` nearest ordinals with their Euclidean distances.
    ///
    /// Results are ordered by non-decreasing distance, ties by ascending ordinal. Fewer than `k`
    /// results are returned when the store is smaller.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|ordinal| {
                let start = ordinal * self.dimension;
                let stored = &self.data[start..start + self.dimension];
                let squared = squared_l2(stored, query);
                (ordinal, if squared.is_nan() { f32::INFINITY } else { squared })
            })
            .collect();

        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank_order);
            scored.truncate(k);
        }
        scored.sort_unstable_by(rank_order);

        Ok(scored
            .into_iter()
            .map(|(ordinal, squared)| (ordinal, squared.sqrt()))
            .collect())
    }

    /// Persist the store to `path`.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let io_error = |source: io::Error| IndexError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
        self.write_to(&mut writer).map_err(io_error)?;
        writer.flush().map_err(io_error)
    }

    /// Read a store previously written by [`FlatL2Store::save`].
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read_from(&mut BufReader::new(file)).map_err(|reason| IndexError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(STORE_VERSION)?;
        writer.write_u32::<LittleEndian>(to_u32(self.dimension)?)?;
        writer.write_u64::<LittleEndian>(self.len() as u64)?;
        for (ordinal, id) in self.ids.iter().enumerate() {
            writer.write_u32::<LittleEndian>(to_u32(id.len())?)?;
            writer.write_all(id.as_bytes())?;
            let start = ordinal * self.dimension;
            for value in &self.data[start..start + self.dimension] {
                writer.write_f32::<LittleEndian>(*value)?;
            }
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self, String> {
        let mut magic = [0_u8; 8];
        reader.read_exact(&mut magic).map_err(truncated)?;
        if &magic != MAGIC {
            return Err("not a vector store file".to_string());
        }
        let version = reader.read_u32::<LittleEndian>().map_err(truncated)?;
        if version != STORE_VERSION {
            return Err(format!("unsupported store version {version}"));
        }
        let dimension = reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let count = reader.read_u64::<LittleEndian>().map_err(truncated)?;
        let count = usize::try_from(count).map_err(|_| format!("vector count {count} too large"))?;

        let mut store = Self::new(dimension);
        let mut vector = vec![0.0_f32; dimension];
        for ordinal in 0..count {
            let id_len = reader.read_u32::<LittleEndian>().map_err(truncated)?;
            if id_len > MAX_ID_BYTES {
                return Err(format!("chunk id at ordinal {ordinal} is {id_len} bytes long"));
            }
            let mut id = vec![0_u8; id_len as usize];
            reader.read_exact(&mut id).map_err(truncated)?;
            let id = String::from_utf8(id)
                .map_err(|_| format!("chunk id at ordinal {ordinal} is not UTF-8"))?;
            reader
                .read_f32_into::<LittleEndian>(&mut vector)
                .map_err(truncated)?;
            store.ids.push(id);
            store.data.extend_from_slice(&vector);
        }

        let mut trailing = [0_u8; 1];
        if reader.read(&mut trailing).map_err(|error| error.to_string())? != 0 {
            return Err("unexpected data after the last vector".to_string());
        }
        Ok(store)
    }
}

fn rank_order(left: &(usize, f32), right: &(usize, f32)) -> Ordering {
    left.1.total_cmp(&right.1).then(left.0.cmp(&right.0))
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let diff = a - b;
            diff * diff
        })
        .sum()
}

fn to_u32(value: usize) -> io::Result<u32> {
    u32::try_from(value).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "value exceeds u32"))
}

fn truncated(error: io::Error) -> String {
    if error.kind() == io::ErrorKind::UnexpectedEof {
        "file is truncated".to_string()
    } else {
        error.to_string()
    }
}
