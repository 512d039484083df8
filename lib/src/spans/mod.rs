mod collector;
mod json_exporter;

pub use collector::*;
pub use json_exporter::*;
