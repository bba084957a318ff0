use {
    crate::{
        cache::PageCache,
        content::CipherHeader,
        crypto::{AlignedRange, CounterCipher},
        engine::envelope::PlaintextStream,
        error::TransferError,
        fetch::ByteStream,
    },
    bytes::{Bytes, BytesMut},
    futures::StreamExt,
    rangecrypt_protocol::ByteRange,
    std::sync::Arc,
};

/// Produces the plaintext of a file from a start offset onwards.
pub enum PlaintextReader {
    Paged {
        pages: PageCache,
        header: Arc<CipherHeader>,
        index: u64,
        offset: u64,
    },
    Direct {
        stream: ByteStream,
        cipher: CounterCipher,
        /// Decrypted bytes still to drop before the requested start.
        skip: u64,
    },
    Passthrough {
        stream: PlaintextStream,
    },
}

impl PlaintextReader {
    pub fn paged(pages: PageCache, header: Arc<CipherHeader>, start: u64) -> Self {
        let page_size = pages.page_size();
        Self::Paged {
            index: start / page_size,
            offset: start % page_size,
            pages,
            header,
        }
    }

    /// Opens a reader over `range` using a single block-aligned fetch.
    pub fn direct(header: &CipherHeader, range: AlignedRange, stream: ByteStream) -> Self {
        Self::Direct {
            stream,
            cipher: CounterCipher::at_offset(&header.key, &header.iv, range.aligned.start),
            skip: range.leading,
        }
    }

    /// Stored range that [`PlaintextReader::direct`] needs for `requested`.
    pub fn direct_range(header: &CipherHeader, requested: ByteRange) -> (AlignedRange, ByteRange) {
        let aligned = AlignedRange::new(requested).within(header.plain_size);
        (aligned, aligned.stored_range(header.data_offset))
    }

    /// Next chunk of plaintext, or `None` at the end of the file.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError> {
        match self {
            Self::Paged {
                pages,
                header,
                index,
                offset,
            } => {
                if *index >= pages.page_count(header.plain_size) {
                    return Ok(None);
                }
                let page = pages.get(header, *index).await?;
                let page_start = index.saturating_mul(pages.page_size());
                let expected = pages
                    .page_size()
                    .min(header.plain_size.saturating_sub(page_start));
                let len = u64::try_from(page.plaintext.len()).unwrap_or_default();
                if len < expected || *offset >= len {
                    return Err(TransferError::Page {
                        file_id: header.file_id.clone(),
                        page: *index,
                        reason: format!("page has {len} bytes, expected {expected}"),
                    });
                }
                let data = page
                    .plaintext
                    .slice(usize::try_from(*offset).unwrap_or_default()..);
                *index = index.saturating_add(1);
                *offset = 0;
                Ok(Some(data))
            }
            Self::Direct {
                stream,
                cipher,
                skip,
            } => loop {
                let Some(chunk) = stream.next().await.transpose()? else {
                    return Ok(None);
                };
                let mut buf = BytesMut::from(&chunk[..]);
                cipher.apply(&mut buf);
                let chunk_len = u64::try_from(buf.len()).unwrap_or_default();
                if *skip >= chunk_len {
                    *skip -= chunk_len;
                    continue;
                }
                let mut data = buf.freeze();
                if *skip > 0 {
                    data = data.slice(usize::try_from(*skip).unwrap_or_default()..);
                    *skip = 0;
                }
                return Ok(Some(data));
            },
            Self::Passthrough { stream } => stream.next().await.transpose(),
        }
    }
}
