//! emrakul-cli library: command definitions and handlers, exposed for tests.

pub mod commands;
pub mod detach;
pub mod progress;
