//! # kerngov
//!
//! Library half of the `kerngov` binary: the clap command tree and the
//! command implementations, exposed so they can be driven from tests.

pub mod cli;
