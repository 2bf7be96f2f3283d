/// Bit-per-block index selecting the live copy of a [`DuplexStorage`].
///
/// A clear bit means copy A holds the current data for that block, a set bit
/// means copy B does.
///
/// On disk the bitmap is a sequence of little-endian 32-bit words, each read
/// most significant bit first: block 0 is bit 31 of the first word, block 32
/// is bit 31 of the second word. Only whole words carry bits.
///
/// [`DuplexStorage`]: super::DuplexStorage
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DuplexBitmap {
    words: Vec<u32>,
    len: usize,
}

impl DuplexBitmap {
    /// Decodes a bitmap holding 32 bits per whole word of `bytes`.
    ///
    /// Trailing bytes that do not fill a word are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let len = words.len() * 32;

        Self { words, len }
    }

    /// Builds a bitmap from one flag per block.
    pub fn from_bits(bits: impl IntoIterator<Item = bool>) -> Self {
        let mut bitmap = Self::default();

        for bit in bits {
            if bitmap.len % 32 == 0 {
                bitmap.words.push(0);
            }

            if bit {
                bitmap.words[bitmap.len / 32] |= mask(bitmap.len);
            }

            bitmap.len += 1;
        }

        bitmap
    }

    /// Returns the number of blocks this bitmap describes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the bit for `index`, or `None` past the end of the bitmap.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }

        Some(self.words[index / 32] & mask(index) != 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).filter_map(|i| self.get(i))
    }

    /// Encodes the bitmap in its on-disk form, padded to whole words.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

impl std::fmt::Debug for DuplexBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexBitmap")
            .field("len", &self.len)
            .field("set", &self.iter().filter(|&b| b).count())
            .finish()
    }
}

fn mask(index: usize) -> u32 {
    0x8000_0000 >> (index % 32)
}
