#![forbid(unsafe_code)]
#![warn(clippy::wildcard_enum_match_arm)]

pub mod codegen;
pub mod collections;
pub mod exec;
pub mod ir;
pub mod lower;
pub mod lsra;
pub mod target;
