use reed_solomon_erasure::galois_8::ReedSolomon;
use thiserror::Error as ThisError;

/// GF(2^8) limits the total number of pieces per chunk.
pub const MAX_PIECES: usize = 256;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ErasureError {
    #[error("Invalid erasure parameters: {data} data, {parity} parity")]
    InvalidParams { data: usize, parity: usize },
    #[error("Need {needed} pieces to reconstruct, have {available}")]
    TooFewPieces { needed: usize, available: usize },
    #[error("Reed-Solomon failure: {0}")]
    Codec(String),
}

/// Reed-Solomon coder for chunks of `data` data pieces and `parity` parity
/// pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErasureCoder {
    data: usize,
    parity: usize,
}

impl ErasureCoder {
    pub fn new(data: usize, parity: usize) -> Result<Self, ErasureError> {
        if data == 0 || data + parity > MAX_PIECES {
            return Err(ErasureError::InvalidParams { data, parity });
        }
        Ok(Self { data, parity })
    }

    pub fn data_pieces(&self) -> usize {
        self.data
    }

    pub fn total_pieces(&self) -> usize {
        self.data + self.parity
    }

    fn codec(&self) -> Result<ReedSolomon, ErasureError> {
        ReedSolomon::new(self.data, self.parity).map_err(|e| ErasureError::Codec(format!("{:?}", e)))
    }

    /// Pads `chunk` to `data * piece_size` bytes and returns all pieces, data
    /// pieces first.
    pub fn encode(&self, chunk: &[u8], piece_size: usize) -> Result<Vec<Vec<u8>>, ErasureError> {
        let mut padded = chunk.to_vec();
        padded.resize(piece_size * self.data, 0);
        let mut pieces: Vec<Vec<u8>> = padded.chunks(piece_size).map(|p| p.to_vec()).collect();
        pieces.extend((0..self.parity).map(|_| vec![0u8; piece_size]));
        if self.parity > 0 {
            self.codec()?
                .encode(&mut pieces)
                .map_err(|e| ErasureError::Codec(format!("{:?}", e)))?;
        }
        Ok(pieces)
    }

    /// Fills every `None` slot. At least `data` pieces must be present.
    pub fn reconstruct(&self, pieces: &mut [Option<Vec<u8>>]) -> Result<(), ErasureError> {
        let available = pieces.iter().filter(|p| p.is_some()).count();
        if available < self.data {
            return Err(ErasureError::TooFewPieces {
                needed: self.data,
                available,
            });
        }
        if available == pieces.len() {
            return Ok(());
        }
        self.codec()?
            .reconstruct(pieces)
            .map_err(|e| ErasureError::Codec(format!("{:?}", e)))
    }

    /// Concatenates the data pieces and trims the padding.
    pub fn join(&self, pieces: &[Option<Vec<u8>>], len: usize) -> Result<Vec<u8>, ErasureError> {
        let mut out = Vec::with_capacity(len);
        for (i, piece) in pieces.iter().take(self.data).enumerate() {
            let piece = piece.as_ref().ok_or(ErasureError::TooFewPieces {
                needed: self.data,
                available: i,
            })?;
            out.extend_from_slice(piece);
        }
        out.truncate(len);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_from_any_data_sized_subset() {
        let coder = ErasureCoder::new(2, 2).unwrap();
        let chunk: Vec<u8> = (0..100u8).collect();
        let pieces = coder.encode(&chunk, 64).unwrap();
        assert_eq!(pieces.len(), 4);

        let mut partial: Vec<Option<Vec<u8>>> = pieces.into_iter().map(Some).collect();
        partial[0] = None;
        partial[1] = None;
        coder.reconstruct(&mut partial).unwrap();
        assert_eq!(coder.join(&partial, chunk.len()).unwrap(), chunk);
    }

    #[test]
    fn refuses_below_data_pieces() {
        let coder = ErasureCoder::new(2, 1).unwrap();
        let mut pieces = vec![Some(vec![0u8; 8]), None, None];
        assert_eq!(
            coder.reconstruct(&mut pieces),
            Err(ErasureError::TooFewPieces {
                needed: 2,
                available: 1
            })
        );
    }

    #[test]
    fn no_parity_is_plain_striping() {
        let coder = ErasureCoder::new(3, 0).unwrap();
        let pieces = coder.encode(b"abcdefg", 3).unwrap();
        assert_eq!(pieces, vec![b"abc".to_vec(), b"def".to_vec(), b"g\0\0".to_vec()]);
    }
}
