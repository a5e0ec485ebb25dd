//! Shared application state wiring.

use std::sync::Arc;

use crate::alerts::AlertManager;
use crate::config::Config;
use crate::detect::Detector;
use crate::events::{EventBusClient, Notifier};
use crate::ingest::IngestHandler;
use crate::llm::{HttpLlmTransport, LlmClient};
use crate::location::LocationResolver;
use crate::persistence::Database;
use crate::rag::ZoneIndex;

/// Application state shared across routes and background loops.
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub ingest: IngestHandler,
    pub zones: ZoneIndex,
    pub alerts: AlertManager,
    pub detector: Arc<Detector<HttpLlmTransport>>,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        let config = Arc::new(config);

        let events = EventBusClient::new(config.event_bus_url.clone());
        let notifier = Notifier::new(config.notifier_url.clone());

        let ingest = IngestHandler::new(db.clone(), Arc::clone(&config), events);
        let zones = ZoneIndex::new(db.clone(), &config);
        let alerts = AlertManager::new(db.clone(), &config, notifier);

        let transport = HttpLlmTransport::new(
            config.llm_url.clone(),
            config.llm_api_key.clone(),
            config.llm_timeout_s,
        );
        let llm = LlmClient::new(transport, &config);

        let detector = Arc::new(Detector::new(
            db.clone(),
            Arc::clone(&config),
            llm,
            zones.clone(),
            alerts.clone(),
            LocationResolver::new(config.geocoder_url.clone()),
        ));

        Self {
            config,
            db,
            ingest,
            zones,
            alerts,
            detector,
        }
    }
}
