#![doc = include_str!("../readme.md")]

pub mod core;
pub mod error;
pub mod extensions;
pub mod simulation;

pub use error::{Error, Result};
