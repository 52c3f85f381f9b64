mod stopwatch;
mod value_format;

pub use stopwatch::Stopwatch;
pub use value_format::format_bytes;
pub use value_format::format_value;
