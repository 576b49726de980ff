//! Request classification, wire envelopes and side-channel commands.

pub mod classify;
pub mod commands;
pub mod envelope;
