pub mod sanitize;
pub mod time;

pub use sanitize::{sanitize_for_log, sanitize_for_log_default};
pub use time::{Clock, FixedClock, SystemClock};
