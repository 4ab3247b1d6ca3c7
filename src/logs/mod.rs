// Logs module - timestamped capture of child output

mod writer;

pub use writer::{spawn_pump, LogWriter};
