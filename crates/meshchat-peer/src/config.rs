use std::time::Duration;

use meshchat_shared::constants::DEFAULT_SIGNAL_URL;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Participant name used to log in.
    pub name: String,

    /// WebSocket URL of the relay.
    /// Env: `SIGNAL_URL`
    /// Default: `ws://localhost:3000`
    pub relay_url: String,

    /// How long to wait for the relay's login reply.
    /// Default: 10 s
    pub login_timeout: Duration,
}

impl MeshConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relay_url: DEFAULT_SIGNAL_URL.to_string(),
            login_timeout: Duration::from_secs(10),
        }
    }

    /// Defaults for `name`, with the relay URL taken from `SIGNAL_URL`.
    pub fn from_env(name: impl Into<String>) -> Self {
        Self::from_lookup(name, |key| std::env::var(key).ok())
    }

    fn from_lookup(name: impl Into<String>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(name);
        if let Some(url) = lookup("SIGNAL_URL").filter(|u| !u.trim().is_empty()) {
            config.relay_url = url;
        }
        config
    }

    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }
}
