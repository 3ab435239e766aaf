//! Wiring: store, clock and predictor in; router, processor and alert
//! service out.

use std::sync::Arc;

use tracing::debug;

use crate::alerts::{AlertManager, AlertService};
use crate::clock::Clock;
use crate::config::{Config, ConfigResult};
use crate::events::{EventHandler, EventKind, EventProcessor, EventRouter};
use crate::ml::Predictor;
use crate::storage::StorageBackend;

pub struct Pipeline {
    config: Config,
    store: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    alerts: Arc<AlertService>,
    processor: Arc<EventProcessor>,
    router: EventRouter,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Wire a pipeline. Fails if `config` does not validate.
    pub fn new(
        config: Config,
        store: Arc<dyn StorageBackend>,
        predictor: Arc<dyn Predictor>,
        clock: Arc<dyn Clock>,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let manager = AlertManager::new(store.clone(), clock.clone())
            .with_dedup_windows(config.dedup_windows())
            .with_dedup_failure(config.alerts.dedup_failure);
        let alerts = Arc::new(AlertService::new(manager, &config.alerts));

        let processor = Arc::new(EventProcessor::new(
            store.clone(),
            alerts.clone(),
            predictor,
            clock.clone(),
            &config,
        ));

        let mut router =
            EventRouter::new(config.events.channels.clone(), store.clone(), clock.clone());
        for kind in EventKind::ALL {
            let handler: Arc<dyn EventHandler> = processor.clone();
            router.register_handler(kind.channel(&config.events.channels), handler);
        }
        debug!("pipeline wired for channels {:?}", router.channels());

        Ok(Self {
            config,
            store,
            clock,
            alerts,
            processor,
            router,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StorageBackend> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn alerts(&self) -> &Arc<AlertService> {
        &self.alerts
    }

    pub fn processor(&self) -> &Arc<EventProcessor> {
        &self.processor
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Channel names to LISTEN on: the configured names in configuration
    /// order, followed by the aliases the router also accepts
    pub fn channels(&self) -> Vec<String> {
        let names = &self.config.events.channels;
        let mut channels: Vec<String> = names.all().into_iter().map(str::to_string).collect();
        for kind in EventKind::ALL {
            for alias in kind.aliases(names) {
                if !channels.contains(&alias) {
                    channels.push(alias);
                }
            }
        }
        channels
    }
}
