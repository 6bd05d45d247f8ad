//! spade: declarative configuration convergence.
//!
//! A script is a YAML list of statements, each naming an asserter. Every
//! statement is asserted first and rectified only when the assertion fails,
//! so a second run of a converged script changes nothing. Scripts run on the
//! local machine or are shipped to remote hosts over SSH/SFTP.

pub mod cli;
pub mod core;
pub mod resources;
pub mod transport;
