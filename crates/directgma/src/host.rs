//! Host mirror buffers used to seed the transfer and check its result.

use crate::error::ValidationError;

/// Byte length of one seed word.
pub const WORD_BYTES: usize = std::mem::size_of::<u32>();

/// `input[i] = i + 1` source pattern and a zeroed output mirror.
#[derive(Debug, Clone)]
pub struct HostMirror {
    input: Vec<u32>,
    output: Vec<u32>,
}

impl HostMirror {
    /// Mirrors for a buffer of `size` bytes. `size` must be a multiple of
    /// [`WORD_BYTES`]; any trailing partial word is not covered.
    pub fn new(size: usize) -> Self {
        let words = size / WORD_BYTES;
        Self { input: seed_pattern(words), output: vec![0u32; words] }
    }

    pub fn words(&self) -> usize {
        self.input.len()
    }

    pub fn input_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.input)
    }

    pub fn output_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.output)
    }

    pub fn input(&self) -> &[u32] {
        &self.input
    }

    pub fn output(&self) -> &[u32] {
        &self.output
    }

    /// Byte-compare the read-back output against the seed.
    pub fn verify(&self) -> Result<(), ValidationError> {
        let mut mismatched = self.input.iter().zip(&self.output).enumerate().filter(|(_, (a, b))| a != b);
        let Some((word, (&expected, &actual))) = mismatched.next() else {
            return Ok(());
        };
        Err(ValidationError::DataMismatch {
            word,
            offset: word * WORD_BYTES,
            expected,
            actual,
            mismatched_words: 1 + mismatched.count(),
        })
    }
}

/// `words` values `1..=words`, wrapping at `u32::MAX`.
pub fn seed_pattern(words: usize) -> Vec<u32> {
    (0..words).map(|i| (i as u32).wrapping_add(1)).collect()
}
