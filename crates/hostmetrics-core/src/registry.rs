//! Scraper factory registry.
//!
//! Maps a scraper key to the factory for that domain. The built-in registry
//! is built once on first use and is read-only afterwards.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::LazyLock;

use tracing::error;

use crate::config::ConfigError;
use crate::scraper::{DomainConfig, Scraper, ScraperConfig, ScraperSettings, builtin_factories};

/// Builds scrapers of one domain.
pub trait ScraperFactory: Send + Sync {
    fn key(&self) -> &'static str;

    fn default_config(&self) -> ScraperConfig;

    /// Parses the domain's JSON object. `null` yields the default config.
    fn parse_config(&self, value: &serde_json::Value) -> Result<ScraperConfig, ConfigError>;

    fn create(
        &self,
        config: &ScraperConfig,
        settings: &ScraperSettings,
    ) -> Result<Box<dyn Scraper>, ConfigError>;
}

/// Factory for a built-in domain, driven by its config type.
pub(crate) struct BuiltinFactory<C> {
    _config: PhantomData<fn() -> C>,
}

impl<C> BuiltinFactory<C> {
    pub(crate) fn new() -> Self {
        Self {
            _config: PhantomData,
        }
    }
}

impl<C: DomainConfig> ScraperFactory for BuiltinFactory<C> {
    fn key(&self) -> &'static str {
        C::KEY
    }

    fn default_config(&self) -> ScraperConfig {
        C::default().into()
    }

    fn parse_config(&self, value: &serde_json::Value) -> Result<ScraperConfig, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidScraperConfig {
            key: C::KEY.to_string(),
            message,
        };
        let config = if value.is_null() {
            C::default()
        } else {
            serde_json::from_value::<C>(value.clone()).map_err(|e| invalid(e.to_string()))?
        };
        config.validate().map_err(invalid)?;
        Ok(config.into())
    }

    fn create(
        &self,
        config: &ScraperConfig,
        settings: &ScraperSettings,
    ) -> Result<Box<dyn Scraper>, ConfigError> {
        if config.key() != C::KEY {
            return Err(ConfigError::ConfigMismatch {
                expected: C::KEY.to_string(),
                found: config.key().to_string(),
            });
        }
        Ok(config.create_scraper(settings))
    }
}

static BUILTIN: LazyLock<Registry> = LazyLock::new(|| {
    let mut registry = Registry::new();
    for factory in builtin_factories() {
        if let Err(e) = registry.register(factory) {
            error!(error = %e, "built-in scraper registration failed");
        }
    }
    registry
});

/// Key to factory map.
#[derive(Default)]
pub struct Registry {
    factories: BTreeMap<&'static str, Box<dyn ScraperFactory>>,
}

impl Registry {
    /// An empty registry, for hosts that bring their own scrapers.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry of built-in scrapers.
    pub fn builtin() -> &'static Registry {
        &BUILTIN
    }

    pub fn register(&mut self, factory: Box<dyn ScraperFactory>) -> Result<(), ConfigError> {
        let key = factory.key();
        if self.factories.contains_key(key) {
            return Err(ConfigError::DuplicateKey {
                key: key.to_string(),
            });
        }
        self.factories.insert(key, factory);
        Ok(())
    }

    pub fn resolve(&self, key: &str) -> Option<&dyn ScraperFactory> {
        self.factories.get(key).map(|f| f.as_ref())
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}
