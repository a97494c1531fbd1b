use crate::error::ConfigError;
use crate::settings::IngestSettings;
use figment::providers::Env;
use figment::Figment;

/// Build the [Figment] used to load [IngestSettings] from the process environment.
///
/// Exposed separately from [load_settings] so that tests can merge additional
/// providers (e.g. in-memory values) on top of the environment.
pub fn figment() -> Figment {
    Figment::new().merge(Env::raw())
}

/// Load and validate settings from the environment. Any missing required field
/// or malformed value is a [ConfigError], which aborts startup.
pub fn load_settings() -> Result<IngestSettings, ConfigError> {
    figment().extract().map_err(ConfigError::from)
}
