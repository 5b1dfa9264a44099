//! Domain types shared by every backend

pub mod errors;
pub mod relpath;
