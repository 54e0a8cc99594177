// Keyfire State Module
// Pressed-key tracking shared across all devices

mod keystate;

pub use keystate::{KeySet, KeyState, UsedKeys};
