//! Host emulator for the Hub: a real [`hub_core::Hub`] wired to a simulated
//! Device Link board that runs on virtual time.

pub mod board;
pub mod clock;
pub mod session;

pub use session::{Session, TranscriptProfile};
