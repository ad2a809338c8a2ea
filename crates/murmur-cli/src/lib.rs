// ABOUTME: murmur CLI library: stdio JSON-RPC tool server and subcommand runners.
// ABOUTME: The binary in main.rs only parses arguments and dispatches here.

pub mod rpc;
pub mod serve;

pub use serve::{run_init, run_serve, run_tools, ServeOptions, StdioServer};
