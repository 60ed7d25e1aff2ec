//! External collaborator contracts.
//!
//! The supervisor never speaks the wire protocol itself. It consumes:
//! - [`ProtocolClient`]: handshake, tool listing and close for one backend
//! - [`Connector`]: builds clients over a spawned process' standard streams, or opens
//!   an authenticated HTTP streaming transport
//! - [`OAuthProvider`]: token lookup, OAuth discovery and the interactive login flow
//!
//! Embedders implement these traits on top of their protocol library of choice.

mod oauth;
mod protocol;
mod transport;

pub use oauth::OAuthProvider;
pub use protocol::{ProtocolClient, Tool};
pub use transport::{Connector, HttpAuth, HttpConnect, StdioPipes, StreamingConnection, Transport};
