//! Discord presentation: embeds for command outcomes, errors and
//! background notices.

pub mod embeds;
