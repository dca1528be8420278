//! Client configuration.
//!
//! Provides the [`ClientConfig`] struct passed to
//! [`MemberClient::new`](crate::MemberClient::new).  Users construct it
//! manually; no config-file parsing dependencies are required.
//!
//! # Example
//!
//! ```rust
//! use chatmesh::chatmesh::config::ClientConfig;
//! use std::time::Duration;
//!
//! // Use the default (broker on localhost:3000)
//! let config = ClientConfig::default();
//!
//! // Or point at a deployed broker with a tighter call budget
//! let config = ClientConfig {
//!     base_url: "https://chat.example.com".into(),
//!     call_timeout: Duration::from_secs(10),
//!     ..ClientConfig::default()
//! };
//! ```

use std::time::Duration;

/// Connection settings for a member client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP base of the broker, e.g. `http://localhost:3000`.  The websocket
    /// endpoint is derived from it.
    pub base_url: String,
    /// How long `login` waits for the broker's login response before giving
    /// up.  Login does not retry on its own.
    pub connect_timeout: Duration,
    /// Default timeout for request/response calls over the socket.
    pub call_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            connect_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}
