//! OAuth token lifecycle and the mailbox connection flow.

pub mod routes;
pub mod tokens;

pub use routes::{OAuthRouteState, oauth_routes};
pub use tokens::{REFRESH_SKEW_MINUTES, TokenManager};
