pub mod domain;
pub mod error;
pub mod print_time;
pub mod protocol;

/// Identifier the host uses for this plugin's settings and push messages.
pub const PLUGIN_IDENTIFIER: &str = "playlist";
