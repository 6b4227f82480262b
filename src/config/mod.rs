mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::Settings;

/// Prefix of every environment variable read by `load_config`.
pub const ENV_PREFIX: &str = "SWITCHBACK";

/// Loads the configuration from `config/default` (if present) and
/// `SWITCHBACK_*` environment variables, merged over the defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Like [`load_config`], reading the optional file at `path` instead.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge(Settings::default());

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.mailbox_capacity == 0 {
        return Err(ConfigError::Message(
            "mailbox_capacity must be greater than zero".to_string(),
        ));
    }
    if settings.bind_addr.is_empty() {
        return Err(ConfigError::Message("bind_addr must not be empty".to_string()));
    }
    Ok(())
}
