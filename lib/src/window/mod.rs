mod controller;
mod counters;
mod links;
mod summary;

pub use controller::*;
pub use counters::*;
pub use links::*;
pub use summary::*;
