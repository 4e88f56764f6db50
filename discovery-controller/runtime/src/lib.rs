//! Runs a discovery watch against a Consul agent, exporting metrics and probes
//! over an admin server.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use gateway_discovery_consul as consul;
pub use gateway_discovery_core as core;
pub use gateway_discovery_watch as watch;

mod args;

pub use self::args::Args;
