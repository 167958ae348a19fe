pub mod errors;
pub mod merge;
pub mod params;

pub use errors::*;
pub use merge::*;
pub use params::*;
