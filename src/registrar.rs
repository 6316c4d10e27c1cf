//! Registration Module
//!
//! Composition-root wiring: holds the process-wide database utility and its
//! provisioning collaborator as singletons.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::cosmos::{ClientProvider, DatabaseSetup, DatabaseUtil};
use crate::error::{Error, Result};

/// Singleton registrations for the Cosmos database utility.
pub struct CosmosServices {
    config: Config,
    client_provider: Arc<dyn ClientProvider>,
    database_setup: Mutex<Option<Arc<dyn DatabaseSetup>>>,
    database_util: Mutex<Option<Arc<DatabaseUtil>>>,
}

impl CosmosServices {
    /// Fails with [`Error::Config`] if a required setting is missing.
    pub fn new(config: Config, client_provider: Arc<dyn ClientProvider>) -> Result<Self> {
        Ok(Self {
            config: config.validate()?,
            client_provider,
            database_setup: Mutex::new(None),
            database_util: Mutex::new(None),
        })
    }

    /// Registers `setup` unless one is already registered.
    ///
    /// Returns true if this call registered it.
    pub fn try_add_database_setup(&self, setup: Arc<dyn DatabaseSetup>) -> bool {
        let mut slot = self.database_setup.lock();
        if slot.is_some() {
            debug!("Database setup already registered, keeping existing");
            return false;
        }
        *slot = Some(setup);
        true
    }

    /// Registers the database utility (and `setup` if none is registered)
    /// and returns the singleton.
    ///
    /// Repeated calls return the same instance.
    pub fn add_cosmos_database_util(
        &self,
        setup: Arc<dyn DatabaseSetup>,
    ) -> Result<Arc<DatabaseUtil>> {
        let setup = Arc::clone(self.database_setup.lock().get_or_insert(setup));

        let mut slot = self.database_util.lock();
        if let Some(util) = slot.as_ref() {
            return Ok(Arc::clone(util));
        }

        let util = Arc::new(DatabaseUtil::new(
            &self.config,
            Arc::clone(&self.client_provider),
            setup,
        )?);
        info!(
            "Registered database util for endpoint {}",
            self.config.endpoint
        );
        *slot = Some(Arc::clone(&util));
        Ok(util)
    }

    /// Resolves the registered database utility.
    pub fn database_util(&self) -> Result<Arc<DatabaseUtil>> {
        self.database_util
            .lock()
            .clone()
            .ok_or_else(|| Error::Config("database util is not registered".to_string()))
    }

    /// Disposes registered singletons at shutdown.
    pub fn dispose(&self) {
        if let Some(util) = self.database_util.lock().as_ref() {
            util.dispose();
        }
    }
}
