use {
    crate::{
        crypto::{CipherKey, Iv},
        fetch::ObjectLocation,
    },
    bytes::Bytes,
    rangecrypt_protocol::{ContentDigest, EncryptionFormat, FileId, KeyMaterial},
};

/// Everything known about an archived file after metadata resolution.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub id: FileId,
    pub location: ObjectLocation,
    /// Size of the stored object, including any header.
    pub stored_size: u64,
    /// Offset of the first payload byte in the stored object.
    pub data_offset: u64,
    pub format: EncryptionFormat,
    pub key: Option<KeyMaterial>,
    /// MD5 of the plaintext, checked after whole-file transfers.
    pub checksum: Option<ContentDigest>,
}

impl FileHandle {
    /// Size of the plaintext payload.
    #[must_use]
    #[inline]
    pub fn plain_size(&self) -> u64 {
        self.stored_size.saturating_sub(self.data_offset)
    }
}

/// Decryption parameters of an AES-encrypted archived file.
#[derive(Debug, Clone)]
pub struct CipherHeader {
    pub file_id: FileId,
    pub location: ObjectLocation,
    pub iv: Iv,
    pub key: CipherKey,
    /// Offset of the first ciphertext byte in the stored object.
    pub data_offset: u64,
    pub plain_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub file_id: FileId,
    pub index: u64,
}

/// Decrypted plaintext of one fixed-size page of a file. The last page of a
/// file may be shorter.
#[derive(Debug, Clone)]
pub struct CachePage {
    pub key: PageKey,
    pub plaintext: Bytes,
}
