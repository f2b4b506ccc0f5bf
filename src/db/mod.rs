pub mod connection;
pub mod error;
pub mod handler;
pub mod options;
pub mod query;
pub mod session;

pub use connection::OracleConnector;
pub use options::SourceOptions;
pub use session::{ConnectionIds, ProcessRegistry, RunReport, Session, SessionBuilder};
