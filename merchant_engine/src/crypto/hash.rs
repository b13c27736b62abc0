use sha2::{Digest, Sha512, Sha512_256};

use crate::crypto::keys::fixed_bytes;

fixed_bytes!(
    /// A SHA-512 digest. Used for `h_contract_terms`, `h_wire`, tip ids and pickup ids.
    HashCode,
    64
);

fixed_bytes!(
    /// A 256-bit digest, used where a shorter key is enough (e.g. long-poll resume keys).
    ShortHash,
    32
);

impl HashCode {
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha512::digest(data);
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Hashes several byte slices as if they had been concatenated.
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha512::new();
        for part in parts {
            hasher.update(part);
        }
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }
}

impl ShortHash {
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha512_256::new();
        for part in parts {
            hasher.update(part);
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hashes_are_stable() {
        let h1 = HashCode::of(b"hello world");
        let h2 = HashCode::of_parts(&[b"hello", b" ", b"world"]);
        assert_eq!(h1, h2);
        let s = h1.to_string();
        assert_eq!(s.len(), 103);
        assert_eq!(s.parse::<HashCode>().unwrap(), h1);
        assert_ne!(ShortHash::of_parts(&[b"a", b"b"]), ShortHash::of_parts(&[b"b", b"a"]));
    }
}
