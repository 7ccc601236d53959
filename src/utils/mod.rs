mod display;
pub use display::*;
mod parse;
pub use parse::*;
