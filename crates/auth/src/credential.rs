//! Refresh credential generation and presented-access parsing.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};

/// Refresh credential size in bytes (256 bits of entropy).
pub const REFRESH_VALUE_BYTES: usize = 32;

/// Generate a fresh opaque refresh credential value.
///
/// OS entropy, base64url without padding (43 characters).
pub fn generate_refresh_value() -> String {
    let mut buffer = [0u8; REFRESH_VALUE_BYTES];
    OsRng.fill_bytes(&mut buffer);
    URL_SAFE_NO_PAD.encode(buffer)
}

/// The access credential as it arrived with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentedAccess<'a> {
    /// No credential at all.
    Absent,
    /// Something was sent, but not under a recognized scheme or it was empty.
    Malformed,
    /// A bearer token (not yet verified).
    Bearer(&'a str),
}

impl<'a> PresentedAccess<'a> {
    /// Classify a raw `Authorization` header value.
    pub fn from_authorization(header: Option<&'a str>) -> Self {
        let Some(header) = header else {
            return PresentedAccess::Absent;
        };

        let Some((scheme, token)) = header.trim().split_once(' ') else {
            return PresentedAccess::Malformed;
        };
        if !scheme.eq_ignore_ascii_case("bearer") {
            return PresentedAccess::Malformed;
        }

        let token = token.trim();
        if token.is_empty() {
            return PresentedAccess::Malformed;
        }

        PresentedAccess::Bearer(token)
    }

    pub fn bearer(&self) -> Option<&'a str> {
        match self {
            PresentedAccess::Bearer(token) => Some(token),
            _ => None,
        }
    }
}
