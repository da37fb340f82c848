// Pure signal logic: no IO in this module
pub mod signal;
pub mod volume_filter;

pub use signal::{evaluate, growth, SignalConfig};
pub use volume_filter::volume_confirmed;
