#![forbid(unsafe_code)]

pub mod cli;
pub mod fetch;
pub mod ident;
pub mod lists;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod publications;
pub mod retry;
pub mod store;
