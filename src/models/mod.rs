pub mod dialogue;
pub mod dpics;
pub mod pattern;
pub mod report;

pub use dialogue::*;
pub use dpics::*;
pub use pattern::*;
pub use report::*;
