//! CLI subcommand implementations for the `geomask` binary.

pub mod client;
pub mod control;
pub mod output;
pub mod proxy_cmd;
pub mod start;
pub mod status;
pub mod stop;
