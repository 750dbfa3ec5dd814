pub mod token;
pub mod parse;
pub mod debug;
