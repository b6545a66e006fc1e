pub mod controller;
pub mod machine;

pub use controller::{ChatController, ControllerParts};
pub use machine::{Effect, Input, MatchMachine, MediaStatus, Room};
