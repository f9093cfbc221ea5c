//! OAuth 2.0 provider client and state codec.
//!
//! Authorization code flow:
//! 1. `GET /oauth/authorize` → Redirect to the provider's consent page
//! 2. User picks a location and authorizes
//! 3. Provider redirects to `/oauth/callback?code=&state=`
//! 4. Code is exchanged for a token set, stored encrypted
//! 5. `/proxy/hl/*` calls are forwarded with the live access token

mod client;
mod state;

pub use client::{OAuthClient, OAuthError, TokenSet};
pub use state::{AuthState, StateDecodeError};
