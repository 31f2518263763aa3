//! Wireless network credentials delivered by the provisioning transport.

use std::fmt;

use thiserror::Error;

/// Errors constructing [`Credentials`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("ssid must not be empty")]
    EmptySsid,

    #[error("ssid is {0} bytes, maximum is {max}", max = Credentials::MAX_SSID)]
    SsidTooLong(usize),

    #[error("password is {0} bytes, maximum is {max}", max = Credentials::MAX_PASSWORD)]
    PasswordTooLong(usize),
}

/// A network name and its secret.
///
/// Both fields are raw bytes: SSIDs are not guaranteed to be UTF-8.  The
/// password is never printed by the `Debug` implementation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    ssid: Vec<u8>,
    password: Vec<u8>,
}

impl Credentials {
    /// Longest SSID the radio accepts.
    pub const MAX_SSID: usize = 32;
    /// Longest passphrase the radio accepts.
    pub const MAX_PASSWORD: usize = 64;
    /// Largest encoded credentials report (two length bytes plus both fields).
    pub const ENCODED_MAX: usize = 2 + Self::MAX_SSID + Self::MAX_PASSWORD;

    /// # Errors
    ///
    /// Returns [`CredentialsError`] if the SSID is empty or either field is
    /// longer than its maximum.  An empty password is allowed (open network).
    pub fn new(ssid: &[u8], password: &[u8]) -> Result<Self, CredentialsError> {
        if ssid.is_empty() {
            return Err(CredentialsError::EmptySsid);
        }
        if ssid.len() > Self::MAX_SSID {
            return Err(CredentialsError::SsidTooLong(ssid.len()));
        }
        if password.len() > Self::MAX_PASSWORD {
            return Err(CredentialsError::PasswordTooLong(password.len()));
        }
        Ok(Self {
            ssid: ssid.to_vec(),
            password: password.to_vec(),
        })
    }

    pub fn ssid(&self) -> &[u8] {
        &self.ssid
    }

    pub fn password(&self) -> &[u8] {
        &self.password
    }

    /// SSID for log output, with invalid UTF-8 replaced.
    pub fn ssid_lossy(&self) -> String {
        String::from_utf8_lossy(&self.ssid).into_owned()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid_lossy())
            .field("password", &"<redacted>")
            .finish()
    }
}
