/// A 32-byte BLAKE3 hash.
///
/// Used for two things during reconciliation:
/// 1. Checksum annotations on pod templates, so that a workload rolls when
///    the configuration or secret it mounts changes.
/// 2. Deterministic generated secrets, so that re-applying the same desired
///    state never rotates a password.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    /// Hashes a sequence of parts. Each part is length-prefixed so that
    /// `["ab", "c"]` and `["a", "bc"]` produce different hashes.
    pub fn hash_parts<I, B>(parts: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut hasher = blake3::Hasher::new();

        for part in parts {
            let part = part.as_ref();
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }

        hasher.finalize().into()
    }

    /// Derives a stable secret value for `purpose` from owner identity.
    pub fn derive(purpose: &str, material: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new_derive_key(purpose)
            .update(material.as_ref())
            .finalize()
            .into()
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}
