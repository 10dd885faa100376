#![doc = include_str!("../README.md")]

pub mod addr;
pub mod check;
pub mod flood;
pub mod forward;
mod harvest;
pub mod metric;
pub mod query;
pub mod route;
pub mod table;
pub mod wire;
