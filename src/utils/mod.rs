//! Utils module - logging setup shared by the library and the binary

pub mod logging;
