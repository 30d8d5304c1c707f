pub mod actor;
pub mod client;

pub use actor::*;
pub use client::*;
