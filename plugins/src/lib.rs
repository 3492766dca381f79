//! Concrete collaborators for `emrakul-core`: an OS process runner and a
//! directory-backed task store, selected from configuration by [`factory`].

pub mod factory;
pub mod runner;
pub mod services;
pub mod store;
