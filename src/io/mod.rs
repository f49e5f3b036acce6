pub mod dataset;
pub mod input;
pub mod output;

pub use dataset::*;
pub use input::*;
pub use output::*;
