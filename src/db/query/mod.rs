mod executor;
mod fingerprint;
mod parser;
mod script;
mod types;

pub use executor::*;
pub use fingerprint::*;
pub use parser::*;
pub use script::*;
pub use types::*;

#[cfg(test)]
mod query_tests;
