//! # Symphony
//!
//! Per-guild music playback for Discord.
//!
//! The playback core ([`audio`]) is independent of Discord: sessions talk to
//! a [`TrackResolver`](audio::resolver::TrackResolver) and a
//! [`VoiceTransport`](audio::transport::VoiceTransport). The binary wires in
//! the yt-dlp resolver from [`sources`] and the songbird transport from
//! [`bot`].

pub mod audio;
pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;
