//! OAuth `state` parameter codec.
//!
//! The state round-trips `{locationId, userId}` through the provider's
//! consent redirect. Decoding is size-bounded and field-validated before the
//! JSON is touched — the parameter comes back from the client and is not
//! trusted as arbitrary structure.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use serde::{Deserialize, Serialize};

/// Maximum accepted length of the raw state parameter
const MAX_STATE_LEN: usize = 512;

/// Maximum accepted length of an id carried in the state
const MAX_ID_LEN: usize = 255;

/// Context carried through the OAuth redirect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    #[serde(rename = "locationId")]
    pub location_id: String,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
}

/// Why a state parameter was rejected.
#[derive(Debug, PartialEq)]
pub enum StateDecodeError {
    /// Parameter exceeds the size bound
    TooLong,
    /// Not base64url or not the expected JSON shape
    Malformed,
    /// Decoded fields are empty or oversized
    InvalidFields,
}

impl std::fmt::Display for StateDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateDecodeError::TooLong => write!(f, "state parameter too long"),
            StateDecodeError::Malformed => write!(f, "state parameter is not valid"),
            StateDecodeError::InvalidFields => write!(f, "state parameter has invalid fields"),
        }
    }
}

impl std::error::Error for StateDecodeError {}

impl AuthState {
    pub fn new(location_id: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            location_id: location_id.into(),
            user_id,
        }
    }

    /// Encodes as base64url-wrapped JSON for the `state` query parameter.
    pub fn encode(&self) -> String {
        // Safe: serializing two string fields cannot fail
        let json = serde_json::to_vec(self).unwrap();
        BASE64URL.encode(json)
    }

    /// Decodes and validates a client-supplied state parameter.
    pub fn decode(raw: &str) -> Result<Self, StateDecodeError> {
        if raw.len() > MAX_STATE_LEN {
            return Err(StateDecodeError::TooLong);
        }

        let json = BASE64URL
            .decode(raw)
            .map_err(|_| StateDecodeError::Malformed)?;
        let state: AuthState =
            serde_json::from_slice(&json).map_err(|_| StateDecodeError::Malformed)?;

        if state.location_id.is_empty() || state.location_id.len() > MAX_ID_LEN {
            return Err(StateDecodeError::InvalidFields);
        }
        if let Some(user_id) = &state.user_id {
            if user_id.is_empty() || user_id.len() > MAX_ID_LEN {
                return Err(StateDecodeError::InvalidFields);
            }
        }

        Ok(state)
    }
}
