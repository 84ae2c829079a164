//! # Audio Module
//!
//! Playback core of the bot: one [`session::Session`] per guild, kept in a
//! [`registry::SessionRegistry`] and driven by [`command::Command`]s.
//!
//! ## Architecture
//!
//! ### [`session`] - Session State Machine
//! - Serializes every command for a guild behind one async mutex
//! - Resolves and connects without holding the lock, committing results
//!   only if no newer command superseded them
//! - Turns transport events (track end, disconnect) into transitions
//!
//! ### [`queue`] - Track Queue
//! - Strict FIFO, append at the tail, pop from the head
//! - Cheap snapshots for display
//!
//! ### [`resolver`] / [`transport`] - External seams
//! - Traits implemented by `sources` (yt-dlp) and `bot::voice` (songbird)
//! - [`mock`] implements both in memory for tests

pub mod command;
pub mod mock;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod track;
pub mod transport;

pub use command::{Command, CommandOutcome};
pub use registry::SessionRegistry;
pub use session::{NoticeKind, PlaybackContext, PlaybackState, SessionNotice, SessionPolicy};
