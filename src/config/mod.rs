mod settings;

use config::{Config, Environment, File};

use crate::utils::Result;
use settings::PartialSettings;

pub use settings::{BrokerSettings, LoggingSettings, ServerSettings, Settings};

/// Loads the configuration from `config/default.*` and `PUBSUB_*` environment
/// variables, in that order of precedence (environment wins).
///
/// Nested keys use a double underscore, e.g. `PUBSUB_SERVER__PORT=4000` or
/// `PUBSUB_BROKER__PUBLISH_TIMEOUT_MS=250`. Anything not set falls back to
/// `Settings::default()`.
pub fn load_config() -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("PUBSUB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
