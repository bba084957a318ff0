use {
    anyhow::{Error, bail, ensure, format_err},
    base64::{
        Engine,
        prelude::{BASE64_STANDARD, BASE64_URL_SAFE_NO_PAD},
    },
    serde::{Deserialize, Deserializer, de},
    std::{
        borrow::Cow,
        fmt::{self, Debug},
        str::FromStr,
    },
};

/// Secret token used by clients to gain access to the streaming API.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct AccessToken(String);

const ACCESS_TOKEN_MIN_LENGTH: usize = 16;

impl AccessToken {
    #[must_use]
    #[inline]
    pub fn as_unmasked_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccessToken {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(
            s.len() >= ACCESS_TOKEN_MIN_LENGTH,
            "access token is too short; got {}, expected at least {ACCESS_TOKEN_MIN_LENGTH}",
            s.len(),
        );
        if let Some(c) = s.chars().find(|c| !c.is_ascii_alphanumeric()) {
            bail!("must be alphanumeric but contains invalid character `{c}`");
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for AccessToken {
    type Error = Error;

    #[inline]
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Debug for AccessToken {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken").finish()
    }
}

/// Key material supplied for a file or a destination.
///
/// Strings prefixed with `base64:` are raw keys; anything else is a passphrase
/// that is stretched into a key of the required size.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    Passphrase(String),
    Raw(Vec<u8>),
}

const RAW_KEY_PREFIX: &str = "base64:";

impl FromStr for KeyMaterial {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(encoded) = s.strip_prefix(RAW_KEY_PREFIX) {
            let bytes = BASE64_STANDARD
                .decode(encoded)
                .or_else(|_| BASE64_URL_SAFE_NO_PAD.decode(encoded))
                .map_err(|err| format_err!("invalid raw key: {err}"))?;
            ensure!(!bytes.is_empty(), "raw key is empty");
            Ok(Self::Raw(bytes))
        } else {
            ensure!(!s.is_empty(), "passphrase is empty");
            Ok(Self::Passphrase(s.to_owned()))
        }
    }
}

impl<'de> Deserialize<'de> for KeyMaterial {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Cow::<'_, str>::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl Debug for KeyMaterial {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passphrase(_) => f.debug_struct("Passphrase").finish(),
            Self::Raw(bytes) => f.debug_struct("Raw").field("len", &bytes.len()).finish(),
        }
    }
}

/// Client-supplied initialization vector for the destination cipher.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DestinationIv(pub [u8; 16]);

impl FromStr for DestinationIv {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const IV_LENGTH: usize = 16;

        let bytes = BASE64_STANDARD
            .decode(s.trim())
            .or_else(|_| BASE64_URL_SAFE_NO_PAD.decode(s.trim()))?;
        let array = <[u8; IV_LENGTH]>::try_from(bytes).map_err(|bytes| {
            format_err!("invalid IV length; got {}, expected {IV_LENGTH}", bytes.len())
        })?;
        Ok(Self(array))
    }
}

impl Debug for DestinationIv {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationIv").finish()
    }
}
