//! Archived files encrypted with AES are stored as a 16-byte IV followed by
//! the AES-CTR ciphertext of the payload. The counter is the full 128-bit IV
//! interpreted as a big-endian integer, so the keystream for plaintext offset
//! `o` starts at counter `IV + o / 16`, skipping `o % 16` bytes.
//!
//! Keys are either raw bytes or passphrases stretched with PBKDF2-HMAC-SHA1
//! (1024 rounds, fixed archive salt).
//!
//! Output for the client is produced by decrypting the stored bytes and
//! applying a second, independent counter-mode keystream. A client-supplied IV
//! is advanced to the block of the start coordinate. Without one, a random IV
//! is generated and sent before the payload.

mod align;
mod cipher;
mod io;

pub use {
    align::AlignedRange,
    cipher::{BLOCK_SIZE, CipherKey, CounterCipher, IV_LEN, Iv, advance_iv},
    io::DestinationCipher,
};
