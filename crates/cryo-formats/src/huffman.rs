//! Huffman-coded bundle names
//!
//! Manifest2019 TOCs may store bundle names as one Huffman bit stream. The
//! decoding table is an array of `u32` node pairs; the root pair is the last
//! one. A child value with bit 31 set is a leaf holding the bitwise NOT of
//! its symbol, any other value is the index of the next pair. Bits are taken
//! least significant first from 32-bit words, and symbol 0 ends a name.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use binrw::io::Cursor;
use binrw::{BinRead, Endian};
use thiserror::Error;

/// Huffman decoding errors
#[derive(Debug, Error)]
pub enum HuffmanError {
    /// Table has no node pairs
    #[error("huffman table is empty")]
    EmptyTable,

    /// Bit stream ended inside a name
    #[error("huffman data ends before name at bit {0} is terminated")]
    OutOfData(usize),

    /// Node refers outside the table or to a symbol wider than a byte
    #[error("invalid huffman node {0:#010X}")]
    BadNode(u32),

    /// Word array could not be read
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

/// Result type for Huffman operations
pub type HuffmanResult<T> = Result<T, HuffmanError>;

const LEAF_BIT: u32 = 0x8000_0000;

fn read_words(bytes: &[u8], count: usize, endian: Endian) -> HuffmanResult<Vec<u32>> {
    let mut cursor = Cursor::new(bytes);
    (0..count)
        .map(|_| u32::read_options(&mut cursor, endian, ()).map_err(HuffmanError::from))
        .collect()
}

/// Decoder over an encoded name stream
#[derive(Debug, Clone)]
pub struct HuffmanDecoder {
    data: Vec<u32>,
    table: Vec<u32>,
}

impl HuffmanDecoder {
    /// Create a decoder from decoded words
    pub fn new(data: Vec<u32>, table: Vec<u32>) -> HuffmanResult<Self> {
        if table.len() < 2 {
            return Err(HuffmanError::EmptyTable);
        }
        Ok(Self { data, table })
    }

    /// Read `data_count` data words and `table_count` table words
    pub fn from_bytes(
        data: &[u8],
        data_count: usize,
        table: &[u8],
        table_count: usize,
        endian: Endian,
    ) -> HuffmanResult<Self> {
        Self::new(
            read_words(data, data_count, endian)?,
            read_words(table, table_count, endian)?,
        )
    }

    /// Decode the name starting at `bit_offset`
    pub fn decode(&self, bit_offset: usize) -> HuffmanResult<String> {
        let root = self.table.len() / 2 - 1;
        let mut bit = bit_offset;
        let mut out = Vec::new();

        loop {
            let mut index = root;
            let symbol = loop {
                let word = self
                    .data
                    .get(bit / 32)
                    .ok_or(HuffmanError::OutOfData(bit_offset))?;
                let branch = ((word >> (bit % 32)) & 1) as usize;
                bit += 1;

                let node = self.table[index * 2 + branch];
                if node & LEAF_BIT != 0 {
                    break !node;
                }
                index = node as usize;
                if index * 2 + 1 >= self.table.len() {
                    return Err(HuffmanError::BadNode(node));
                }
            };

            match symbol {
                0 => break,
                1..=0xFF => out.push(symbol as u8),
                _ => return Err(HuffmanError::BadNode(!symbol)),
            }
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Node {
    Leaf(u8),
    Pair(u32),
}

/// Encoded name table produced by [`HuffmanEncoder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedNames {
    /// Bit stream words
    pub data: Vec<u32>,
    /// Node pairs, root last
    pub table: Vec<u32>,
    /// Bit offset of each input name
    pub offsets: Vec<u32>,
}

/// Builds a code from name frequencies and encodes names with it
#[derive(Debug, Default)]
pub struct HuffmanEncoder;

impl HuffmanEncoder {
    /// Encode `names`, each terminated by symbol 0
    pub fn encode<S: AsRef<str>>(names: &[S]) -> EncodedNames {
        let mut frequencies = [0u64; 256];
        for name in names {
            for b in name.as_ref().bytes() {
                frequencies[b as usize] += 1;
            }
            frequencies[0] += 1;
        }

        // (weight, tiebreak, node) min-heap
        let mut heap = BinaryHeap::new();
        for (symbol, &count) in frequencies.iter().enumerate() {
            if count > 0 {
                heap.push(Reverse((count, symbol as u32, Node::Leaf(symbol as u8))));
            }
        }
        // at least one pair must exist
        while heap.len() < 2 {
            heap.push(Reverse((0, 0, Node::Leaf(0))));
        }

        let mut pairs: Vec<[Node; 2]> = Vec::new();
        let mut tiebreak = 256u32;
        while heap.len() > 1 {
            let (Some(Reverse((w0, _, n0))), Some(Reverse((w1, _, n1)))) = (heap.pop(), heap.pop())
            else {
                break;
            };
            pairs.push([n0, n1]);
            heap.push(Reverse((w0 + w1, tiebreak, Node::Pair(pairs.len() as u32 - 1))));
            tiebreak += 1;
        }

        let table = pairs
            .iter()
            .flatten()
            .map(|node| match node {
                Node::Leaf(symbol) => !u32::from(*symbol),
                Node::Pair(index) => *index,
            })
            .collect();

        let mut codes: Vec<Vec<bool>> = vec![Vec::new(); 256];
        let mut stack = vec![(pairs.len() - 1, Vec::new())];
        while let Some((index, prefix)) = stack.pop() {
            for (branch, node) in pairs[index].iter().enumerate() {
                let mut code: Vec<bool> = prefix.clone();
                code.push(branch == 1);
                match node {
                    Node::Leaf(symbol) => codes[*symbol as usize] = code,
                    Node::Pair(next) => stack.push((*next as usize, code)),
                }
            }
        }

        let mut data = Vec::new();
        let mut offsets = Vec::with_capacity(names.len());
        let mut bit = 0usize;
        let mut push_bit = |set: bool, bit: &mut usize| {
            if *bit % 32 == 0 {
                data.push(0u32);
            }
            if set {
                if let Some(word) = data.last_mut() {
                    *word |= 1 << (*bit % 32);
                }
            }
            *bit += 1;
        };
        for name in names {
            offsets.push(bit as u32);
            for b in name.as_ref().bytes().chain([0]) {
                for &set in &codes[b as usize] {
                    push_bit(set, &mut bit);
                }
            }
        }

        EncodedNames {
            data,
            table,
            offsets,
        }
    }
}
