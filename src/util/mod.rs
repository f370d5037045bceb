/// Logging setup shared by the binary
pub mod logging;
