//! Proxy behaviour: strategies, lifecycle, side channel and event dispatch.

pub mod background;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod strategy;
pub mod upstream;
pub mod worker;
