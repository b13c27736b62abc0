//! Crockford base32 as used for keys, hashes and signatures on the wire.
//!
//! Bits are consumed most-significant first, five at a time; a trailing partial group is padded with zero bits.
//! Decoding is case-insensitive and accepts the usual look-alike substitutions (`O` → `0`, `I`/`L` → `1`,
//! `U` → `V`).
use thiserror::Error;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Base32Error {
    #[error("Invalid base32 character '{0}'")]
    InvalidCharacter(char),
    #[error("Encoded length {0} does not match the expected {1} bytes")]
    InvalidLength(usize, usize),
}

/// Number of characters needed to encode `len` bytes.
pub fn encoded_len(len: usize) -> usize {
    (len * 8 + 4) / 5
}

pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(encoded_len(data.len()));
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for byte in data {
        buffer = (buffer << 8) | u32::from(*byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn decode_char(c: char) -> Result<u32, Base32Error> {
    let upper = match c.to_ascii_uppercase() {
        'O' => '0',
        'I' | 'L' => '1',
        'U' => 'V',
        u => u,
    };
    ALPHABET.iter().position(|a| *a as char == upper).map(|p| p as u32).ok_or(Base32Error::InvalidCharacter(c))
}

/// Decodes a string of arbitrary length.
pub fn decode(s: &str) -> Result<Vec<u8>, Base32Error> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for c in s.chars() {
        buffer = (buffer << 5) | decode_char(c)?;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            #[allow(clippy::cast_possible_truncation)]
            out.push((buffer >> bits) as u8);
        }
        buffer &= (1 << bits) - 1;
    }
    Ok(out)
}

/// Decodes into a fixed-size array; the input must be exactly `encoded_len(N)` characters long.
pub fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], Base32Error> {
    if s.len() != encoded_len(N) {
        return Err(Base32Error::InvalidLength(s.len(), N));
    }
    let bytes = decode(s)?;
    bytes.try_into().map_err(|v: Vec<u8>| Base32Error::InvalidLength(v.len(), N))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(encode(b""), "");
        assert_eq!(encode(&[0]), "00");
        assert_eq!(encode(&[0xff]), "ZW");
        assert_eq!(encode(b"foobar"), "CSQPYRK1E8");
        assert_eq!(decode("CSQPYRK1E8").unwrap(), b"foobar");
    }

    #[test]
    fn lenient_decoding() {
        assert_eq!(decode("csqpyrk1e8").unwrap(), b"foobar");
        assert_eq!(decode("CSQPYRKLE8").unwrap(), b"foobar");
        assert_eq!(decode("0O").unwrap(), decode("00").unwrap());
        assert!(matches!(decode("C*"), Err(Base32Error::InvalidCharacter('*'))));
    }

    #[test]
    fn fixed_size() {
        let key = [7u8; 32];
        let enc = encode(&key);
        assert_eq!(enc.len(), 52);
        assert_eq!(decode_fixed::<32>(&enc).unwrap(), key);
        assert!(matches!(decode_fixed::<32>(&enc[1..]), Err(Base32Error::InvalidLength(51, 32))));
        let hash = [0xabu8; 64];
        assert_eq!(encode(&hash).len(), 103);
    }
}
