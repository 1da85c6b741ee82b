//! Out-of-band key material.
//!
//! BPSec keys are supplied by the operator, never carried in bundles. The
//! wrapper owns the bytes and zeroizes them on drop, so a key never
//! lingers in freed memory; its `Debug` form is redacted for the same
//! reason.

use zeroize::Zeroize;

pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for KeyMaterial {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for KeyMaterial {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for KeyMaterial {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for KeyMaterial {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.0.zeroize()
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyMaterial({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        let key = KeyMaterial::from([0xABu8; 16]);
        assert_eq!(key.len(), 16);
        assert!(!key.is_empty());
        assert_eq!(key.as_ref(), &[0xAB; 16]);

        let key = KeyMaterial::from(&b"from a slice"[..]);
        assert_eq!(key.as_ref(), b"from a slice");
    }

    #[test]
    fn debug_is_redacted() {
        let key = KeyMaterial::new(vec![0x01, 0x02, 0x03]);
        assert_eq!(format!("{key:?}"), "KeyMaterial(3 bytes)");
    }
}
