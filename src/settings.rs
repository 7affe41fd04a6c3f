use std::time::Duration;

use config::{Config, File, FileFormat};
use tracing::trace;

/// Typed access to the node configuration.
///
/// Values resolve from an optional `config-default` file overridden by an
/// optional `config` file in the working directory. Every key has a code
/// default, so a missing file still yields a runnable node.
pub struct Settings {
    conf: Config,
}

impl Settings {
    pub fn new() -> crate::Result<Settings> {
        let mut conf = Config::default();
        conf.merge(File::with_name("config-default").required(false))?;
        conf.merge(File::with_name("config").required(false))?;
        Ok(Settings { conf })
    }

    /// Build settings from a literal TOML string.
    pub fn from_toml(toml: &str) -> crate::Result<Settings> {
        let mut conf = Config::default();
        conf.merge(File::from_str(toml, FileFormat::Toml))?;
        Ok(Settings { conf })
    }

    pub fn get<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> std::result::Result<T, config::ConfigError> {
        self.conf.get(key)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.conf.get::<bool>(key) {
            Ok(value) => {
                trace!("{} = \"{}\"", key, value);
                value
            }
            Err(_) => {
                trace!("{} not defined, assuming {}", key, default);
                default
            }
        }
    }

    pub fn get_int(&self, key: &str, default: u64) -> u64 {
        match self.conf.get::<u64>(key) {
            Ok(value) => {
                trace!("{} = \"{}\"", key, value);
                value
            }
            Err(_) => {
                trace!("{} not defined, assuming {}", key, default);
                default
            }
        }
    }

    /// Address the peer server binds to.
    pub fn host(&self) -> [u8; 4] {
        self.conf.get::<[u8; 4]>("network.host").unwrap_or([127, 0, 0, 1])
    }

    /// Port the peer server binds to.
    pub fn port(&self) -> u16 {
        self.conf.get::<u16>("network.port").unwrap_or(3030)
    }

    /// Bound on the outbound websocket upgrade.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.get_int("network.connect_timeout", 4000))
    }

    /// Bound on the wait for a POST response.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.get_int("network.read_timeout", 8000))
    }

    /// Client-side idle policy; 0 disables it.
    pub fn websocket_idle_timeout(&self) -> Option<Duration> {
        match self.get_int("network.websocket_idle_timeout", 30_000) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Per-message gzip for peer traffic.
    pub fn gzip_enabled(&self) -> bool {
        self.get_bool("network.enable_gzip", true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_toml() {
        let settings = Settings::from_toml(
            "[network]\n\
             host = [0, 0, 0, 0]\n\
             port = 3031\n\
             connect_timeout = 1500\n\
             read_timeout = 2500\n\
             websocket_idle_timeout = 0\n\
             enable_gzip = false\n",
        )
        .unwrap();
        assert_eq!(settings.host(), [0, 0, 0, 0]);
        assert_eq!(settings.port(), 3031);
        assert_eq!(settings.connect_timeout(), Duration::from_millis(1500));
        assert_eq!(settings.read_timeout(), Duration::from_millis(2500));
        assert_eq!(settings.websocket_idle_timeout(), None);
        assert!(!settings.gzip_enabled());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.host(), [127, 0, 0, 1]);
        assert_eq!(settings.port(), 3030);
        assert_eq!(settings.connect_timeout(), Duration::from_millis(4000));
        assert_eq!(settings.read_timeout(), Duration::from_millis(8000));
        assert_eq!(
            settings.websocket_idle_timeout(),
            Some(Duration::from_millis(30_000))
        );
        assert!(settings.gzip_enabled());
    }
}
