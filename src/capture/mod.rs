//! Output capture: multiplexes child stdout/stderr into timestamped,
//! rotated per-stream files, or passes them through untouched.

pub mod line_writer;
pub mod rotate;
pub mod sink;
pub mod timestamp;

pub use line_writer::LineWriter;
pub use rotate::{RotatingFile, RotationConfig};
pub use sink::{join_captures, spawn_capture, SinkConfig};
pub use timestamp::TimestampFormat;
