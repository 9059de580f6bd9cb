pub mod escape;
pub mod time;

pub use escape::{escape_line_breaks, first_line};
pub use time::{epoch_millis, format_timestamp, parse_system_time};
