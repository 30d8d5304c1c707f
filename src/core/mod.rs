pub mod envelope;
pub mod frame;
pub mod health;
pub mod ping;
pub mod reconnect;
pub mod types;

pub use envelope::*;
pub use frame::*;
pub use health::*;
pub use ping::*;
pub use reconnect::*;
pub use types::*;
