pub mod meta;
pub mod pic;

pub use meta::*;
pub use pic::*;
