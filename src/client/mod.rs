//! Client-side conversation orchestration.
//!
//! [`ChatSession`] runs the turn-taking protocol over a [`ChatBackend`]
//! transport. [`HttpBackend`] is the production transport; tests drive the
//! session with scripted backends.

pub mod backend;
pub mod http;
pub mod session;

pub use backend::{ByteStream, ChatBackend, ClientError};
pub use http::HttpBackend;
pub use session::{ChatEntry, ChatSession, EntryId, TurnOutcome, TurnPhase};
