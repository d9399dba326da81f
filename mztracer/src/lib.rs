mod args;
mod driver;
mod progress;
mod time_range;
mod write;

pub use args::*;
pub use driver::{MZTracer, MZTracerError};
pub use progress::ProgressRecord;
pub use time_range::{TimeRange, TimeRangeParseError};
pub use write::{write_features_json, write_features_tsv, write_output, OutputFormat};
