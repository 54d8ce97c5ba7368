//! Report assembly, serialization and sinks.

pub mod builder;
pub mod generator;
pub mod sink;

pub use builder::build;
pub use generator::serialize;
pub use sink::{FileSink, ReportSink};
