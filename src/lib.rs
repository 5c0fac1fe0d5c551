#![warn(clippy::dbg_macro)]

pub mod core;
pub mod external;
pub mod transport;
