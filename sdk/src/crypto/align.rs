use {crate::crypto::BLOCK_SIZE, rangecrypt_protocol::ByteRange};

/// A plaintext range widened to whole cipher blocks.
///
/// Decrypting `aligned` and dropping `leading` bytes from the front and
/// `trailing` bytes from the back yields exactly the requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedRange {
    pub requested: ByteRange,
    pub aligned: ByteRange,
    pub leading: u64,
    pub trailing: u64,
}

impl AlignedRange {
    #[must_use]
    #[inline]
    pub fn new(requested: ByteRange) -> Self {
        let leading = requested.start % BLOCK_SIZE;
        let trailing = BLOCK_SIZE - requested.end % BLOCK_SIZE - 1;
        Self {
            requested,
            aligned: ByteRange::new(requested.start - leading, requested.end + trailing),
            leading,
            trailing,
        }
    }

    /// Stops the aligned range at the last plaintext byte of the file. The
    /// final block of a file may be partial.
    #[must_use]
    #[inline]
    pub fn within(mut self, plain_size: u64) -> Self {
        let last = plain_size.saturating_sub(1);
        if self.aligned.end > last {
            self.aligned.end = last.max(self.requested.end);
            self.trailing = self.aligned.end - self.requested.end;
        }
        self
    }

    /// Location of the aligned range in the stored object, which carries
    /// `data_offset` bytes (IV and any integrity prefix) before the payload.
    #[must_use]
    #[inline]
    pub fn stored_range(&self, data_offset: u64) -> ByteRange {
        ByteRange::new(
            self.aligned.start.saturating_add(data_offset),
            self.aligned.end.saturating_add(data_offset),
        )
    }
}
