use {
    crate::crypto::CounterCipher,
    md5::{Digest, Md5},
    rangecrypt_protocol::ContentDigest,
};

/// Checks that the bytes sent to the client decode back to the plaintext
/// read from the archive.
///
/// Three MD5 digests are kept: of the plaintext fed into the destination
/// cipher, of the bytes written to the sink, and of the sink bytes decrypted by
/// an independent cipher. The first and last must match.
pub struct IntegrityVerifier {
    source: Md5,
    sink: Md5,
    decoded: Md5,
    inverse: Option<CounterCipher>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityReport {
    pub source: ContentDigest,
    pub sink: ContentDigest,
    pub decoded: ContentDigest,
}

impl IntegrityReport {
    #[must_use]
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.source == self.decoded
    }
}

impl IntegrityVerifier {
    /// `inverse` undoes the destination encryption; `None` for plaintext output.
    #[must_use]
    #[inline]
    pub fn new(inverse: Option<CounterCipher>) -> Self {
        Self {
            source: Md5::new(),
            sink: Md5::new(),
            decoded: Md5::new(),
            inverse,
        }
    }

    #[inline]
    pub fn observe_source(&mut self, plaintext: &[u8]) {
        self.source.update(plaintext);
    }

    /// Bytes sent to the sink that are not part of the payload, such as a
    /// generated IV.
    #[inline]
    pub fn observe_prefix(&mut self, prefix: &[u8]) {
        self.sink.update(prefix);
    }

    #[inline]
    pub fn observe_sink(&mut self, sent: &[u8]) {
        self.sink.update(sent);
        match &mut self.inverse {
            Some(inverse) => {
                let mut decoded = sent.to_vec();
                inverse.apply(&mut decoded);
                self.decoded.update(&decoded);
            }
            None => self.decoded.update(sent),
        }
    }

    #[must_use]
    #[inline]
    pub fn finish(self) -> IntegrityReport {
        IntegrityReport {
            source: ContentDigest(self.source.finalize().into()),
            sink: ContentDigest(self.sink.finalize().into()),
            decoded: ContentDigest(self.decoded.finalize().into()),
        }
    }
}
