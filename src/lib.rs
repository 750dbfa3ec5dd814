pub mod prelude;
pub mod error;
pub mod shopt;
pub mod signal;
pub mod utils;
pub mod helper;
pub mod shellenv;
pub mod interp;
pub mod expand;
pub mod execute;
pub mod builtin;
pub mod interpret;
pub mod prompt;

pub use error::RashResult;
pub use interpret::InputMode;
pub use shellenv::Rash;
