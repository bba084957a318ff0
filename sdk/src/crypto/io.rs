use {
    crate::crypto::{BLOCK_SIZE, CipherKey, CounterCipher, Iv, advance_iv},
    bytes::{Bytes, BytesMut},
    rand::RngCore,
};

/// Re-encrypts plaintext for the client.
///
/// When the client supplies an IV the keystream is positioned at the
/// (block-aligned) start coordinate. Otherwise a random IV is generated and
/// must be sent ahead of the payload; see [`DestinationCipher::take_prefix`].
pub enum DestinationCipher {
    Passthrough,
    Encrypt {
        cipher: CounterCipher,
        key: CipherKey,
        /// Counter of the first payload byte.
        iv: Iv,
        prefix: Option<Iv>,
    },
}

impl DestinationCipher {
    #[must_use]
    #[inline]
    pub fn encrypting(key: CipherKey, supplied_iv: Option<Iv>, start: u64) -> Self {
        let (iv, prefix) = match supplied_iv {
            Some(iv) => (advance_iv(&iv, start / BLOCK_SIZE), None),
            None => {
                let mut iv = Iv::default();
                rand::rng().fill_bytes(&mut iv);
                (iv, Some(iv))
            }
        };
        Self::Encrypt {
            cipher: CounterCipher::new(&key, &iv),
            key,
            iv,
            prefix,
        }
    }

    /// Length of the IV prefix that precedes the payload.
    #[must_use]
    #[inline]
    pub fn prefix_len(&self) -> u64 {
        match self {
            Self::Encrypt {
                prefix: Some(_), ..
            } => BLOCK_SIZE,
            Self::Passthrough | Self::Encrypt { prefix: None, .. } => 0,
        }
    }

    /// Returns the generated IV once; subsequent calls return `None`.
    #[inline]
    pub fn take_prefix(&mut self) -> Option<Bytes> {
        match self {
            Self::Encrypt { prefix, .. } => prefix.take().map(|iv| Bytes::copy_from_slice(&iv)),
            Self::Passthrough => None,
        }
    }

    /// An independent cipher that decrypts the payload produced by `self`.
    #[must_use]
    #[inline]
    pub fn inverse(&self) -> Option<CounterCipher> {
        match self {
            Self::Encrypt { key, iv, .. } => Some(CounterCipher::new(key, iv)),
            Self::Passthrough => None,
        }
    }

    #[inline]
    pub fn apply(&mut self, chunk: Bytes) -> Bytes {
        match self {
            Self::Passthrough => chunk,
            Self::Encrypt { cipher, .. } => {
                let mut buf = BytesMut::from(&chunk[..]);
                cipher.apply(&mut buf);
                buf.freeze()
            }
        }
    }
}
