/// Application name
pub const APP_NAME: &str = "meshchat";

/// Default TCP port the relay listens on
pub const DEFAULT_RELAY_PORT: u16 = 3000;

/// Relay URL used by clients when nothing else is configured
pub const DEFAULT_SIGNAL_URL: &str = "ws://localhost:3000";

/// Label of the eagerly opened text sub-channel
pub const TEXT_CHANNEL_LABEL: &str = "text";

/// Label of the on-demand file transfer sub-channels
pub const FILE_CHANNEL_LABEL: &str = "file";

/// File transfer chunk size in bytes (16 KiB)
pub const FILE_CHUNK_SIZE: usize = 16 * 1024;

/// Maximum size of a locally shared file in bytes (50 MiB)
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Author of synthesized system notices
pub const SYSTEM_AUTHOR: &str = "SYSTEM";

/// Color of messages written by the local participant
pub const DEFAULT_MESSAGE_COLOR: &str = "black";
