// Keyfire Output Layer
// Where activated shortcut commands go

mod launcher;

pub use launcher::{CommandSink, LaunchError, ProcessLauncher, RecordingSink};
