use {
    crate::error::TransferError,
    aes::{Aes128, Aes256},
    ctr::{
        Ctr128BE,
        cipher::{KeyIvInit, StreamCipher},
    },
    pbkdf2::pbkdf2_hmac,
    rangecrypt_protocol::{AesBits, KeyMaterial},
    sha1::Sha1,
    std::fmt,
};

pub const BLOCK_SIZE: u64 = 16;
pub const IV_LEN: usize = 16;

pub type Iv = [u8; IV_LEN];

/// Salt and round count used by the archive when stretching passphrases.
const KDF_SALT: [u8; 8] = [0xf4, 0x22, 0x01, 0x00, 0x9e, 0xdf, 0x4e, 0x15];
const KDF_ROUNDS: u32 = 1024;

/// AES key ready for use by [`CounterCipher`].
#[derive(Clone, PartialEq, Eq)]
pub enum CipherKey {
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

impl CipherKey {
    /// Builds a key of the requested size from a passphrase (PBKDF2-HMAC-SHA1)
    /// or from raw bytes of exactly the right length.
    #[inline]
    pub fn from_material(material: &KeyMaterial, bits: AesBits) -> Result<Self, TransferError> {
        match bits {
            AesBits::Aes128 => {
                let mut key = [0; 16];
                fill_key(material, &mut key)?;
                Ok(Self::Aes128(key))
            }
            AesBits::Aes256 => {
                let mut key = [0; 32];
                fill_key(material, &mut key)?;
                Ok(Self::Aes256(key))
            }
        }
    }

    #[must_use]
    #[inline]
    pub fn bits(&self) -> AesBits {
        match self {
            Self::Aes128(_) => AesBits::Aes128,
            Self::Aes256(_) => AesBits::Aes256,
        }
    }
}

fn fill_key(material: &KeyMaterial, out: &mut [u8]) -> Result<(), TransferError> {
    match material {
        KeyMaterial::Passphrase(passphrase) => {
            pbkdf2_hmac::<Sha1>(passphrase.as_bytes(), &KDF_SALT, KDF_ROUNDS, out);
        }
        KeyMaterial::Raw(bytes) => {
            if bytes.len() != out.len() {
                return Err(TransferError::InvalidKey(format!(
                    "raw key has {} bytes, expected {}",
                    bytes.len(),
                    out.len()
                )));
            }
            out.copy_from_slice(bytes);
        }
    }
    Ok(())
}

impl fmt::Debug for CipherKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CipherKey").field(&self.bits()).finish()
    }
}

/// Adds `blocks` to a 128-bit big-endian counter, wrapping on overflow.
#[must_use]
#[inline]
pub fn advance_iv(iv: &Iv, blocks: u64) -> Iv {
    u128::from_be_bytes(*iv)
        .wrapping_add(u128::from(blocks))
        .to_be_bytes()
}

enum Keystream {
    Aes128(Ctr128BE<Aes128>),
    Aes256(Ctr128BE<Aes256>),
}

/// AES in counter mode with a full 128-bit big-endian counter.
///
/// Encryption and decryption are the same operation.
pub struct CounterCipher {
    keystream: Keystream,
}

impl CounterCipher {
    #[must_use]
    #[inline]
    pub fn new(key: &CipherKey, iv: &Iv) -> Self {
        let keystream = match key {
            CipherKey::Aes128(key) => Keystream::Aes128(Ctr128BE::new(key.into(), iv.into())),
            CipherKey::Aes256(key) => Keystream::Aes256(Ctr128BE::new(key.into(), iv.into())),
        };
        Self { keystream }
    }

    /// Positions the keystream at an arbitrary plaintext offset: the counter is
    /// advanced by whole blocks and the remainder of the keystream is discarded.
    #[must_use]
    #[inline]
    pub fn at_offset(key: &CipherKey, iv: &Iv, offset: u64) -> Self {
        let mut cipher = Self::new(key, &advance_iv(iv, offset / BLOCK_SIZE));
        let skip = usize::try_from(offset % BLOCK_SIZE).unwrap_or_default();
        let mut scratch = [0_u8; IV_LEN];
        if let Some(discard) = scratch.get_mut(..skip) {
            cipher.apply(discard);
        }
        cipher
    }

    #[inline]
    pub fn apply(&mut self, buf: &mut [u8]) {
        match &mut self.keystream {
            Keystream::Aes128(inner) => inner.apply_keystream(buf),
            Keystream::Aes256(inner) => inner.apply_keystream(buf),
        }
    }
}

#[cfg(test)]
#[expect(
    clippy::default_numeric_fallback,
    clippy::indexing_slicing,
    reason = "test"
)]
mod tests {
    use {super::*, ctr::cipher::StreamCipherSeek};

    fn hex_bytes<const N: usize>(s: &str) -> [u8; N] {
        hex_decode(s).try_into().unwrap()
    }

    fn hex_decode(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    fn nist_key() -> CipherKey {
        CipherKey::Aes128(hex_bytes("2b7e151628aed2a6abf7158809cf4f3c"))
    }

    fn nist_iv() -> Iv {
        hex_bytes("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff")
    }

    #[test]
    fn nist_ctr_vectors() {
        let mut block1 = hex_decode("6bc1bee22e409f96e93d7e117393172a");
        CounterCipher::new(&nist_key(), &nist_iv()).apply(&mut block1);
        assert_eq!(block1, hex_decode("874d6191b620e3261bef6864990db6ce"));

        let mut block2 = hex_decode("ae2d8a571e03ac9c9eb76fac45af8e51");
        CounterCipher::at_offset(&nist_key(), &nist_iv(), 16).apply(&mut block2);
        assert_eq!(block2, hex_decode("9806f66b7970fdff8617187bb9fffdff"));
    }

    #[test]
    fn advance_iv_carries() {
        assert_eq!(advance_iv(&[0xff; 16], 1), [0; 16]);
        let mut expected = [0; 16];
        expected[14] = 1;
        let mut iv = [0; 16];
        iv[15] = 0xff;
        assert_eq!(advance_iv(&iv, 1), expected);

        let mut iv = [0; 16];
        iv[8..].copy_from_slice(&[0xff; 8]);
        let mut expected = [0; 16];
        expected[7] = 1;
        assert_eq!(advance_iv(&iv, 1), expected);
        assert_eq!(advance_iv(&iv, 0), iv);
    }

    #[test]
    fn advanced_counter_matches_seek() {
        let key = CipherKey::Aes256([7; 32]);
        let mut iv = [0x12; 16];
        iv[12..].copy_from_slice(&[0xff; 4]);
        for n in [0_u64, 1, 255, 256, 65536, 1 << 32, (1 << 32) + 1] {
            let mut ours = [0_u8; 48];
            CounterCipher::new(&key, &advance_iv(&iv, n)).apply(&mut ours);

            let CipherKey::Aes256(raw) = &key else {
                unreachable!()
            };
            let mut reference = Ctr128BE::<Aes256>::new(raw.into(), (&iv).into());
            reference.seek(n * BLOCK_SIZE);
            let mut expected = [0_u8; 48];
            reference.apply_keystream(&mut expected);
            assert_eq!(ours, expected, "block {n}");
        }
    }

    #[test]
    fn unaligned_offset_matches_seek() {
        let key = nist_key();
        let iv = nist_iv();
        let mut whole = [0_u8; 100];
        CounterCipher::new(&key, &iv).apply(&mut whole);
        for offset in [0, 1, 15, 16, 17, 31, 63] {
            let mut tail = [0_u8; 20];
            CounterCipher::at_offset(&key, &iv, offset).apply(&mut tail);
            let offset = usize::try_from(offset).unwrap();
            assert_eq!(tail[..], whole[offset..offset + 20], "offset {offset}");
        }
    }

    #[test]
    fn round_trip() {
        let key = CipherKey::from_material(&KeyMaterial::Passphrase("p".into()), AesBits::Aes256)
            .unwrap();
        let iv = [3; 16];
        let plaintext: Vec<u8> = (0..1000).map(|_| rand::random::<u8>()).collect();
        let mut data = plaintext.clone();
        CounterCipher::new(&key, &iv).apply(&mut data);
        assert_ne!(data, plaintext);
        CounterCipher::new(&key, &iv).apply(&mut data);
        assert_eq!(data, plaintext);
    }

    #[test]
    fn key_derivation() {
        let material = KeyMaterial::Passphrase("archive secret".into());
        let CipherKey::Aes128(short) = CipherKey::from_material(&material, AesBits::Aes128).unwrap()
        else {
            panic!("expected a 128-bit key");
        };
        let CipherKey::Aes256(long) = CipherKey::from_material(&material, AesBits::Aes256).unwrap()
        else {
            panic!("expected a 256-bit key");
        };
        // PBKDF2 output blocks do not depend on the requested length.
        assert_eq!(short[..], long[..16]);

        let mut expected = [0; 16];
        pbkdf2_hmac::<Sha1>(b"archive secret", &KDF_SALT, 1024, &mut expected);
        assert_eq!(short, expected);
    }

    #[test]
    fn raw_key_length() {
        let raw = KeyMaterial::Raw(vec![1; 16]);
        assert_eq!(
            CipherKey::from_material(&raw, AesBits::Aes128).unwrap(),
            CipherKey::Aes128([1; 16])
        );
        assert!(matches!(
            CipherKey::from_material(&raw, AesBits::Aes256),
            Err(TransferError::InvalidKey(_))
        ));
    }
}
