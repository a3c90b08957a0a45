pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod push;
pub mod routes;

use std::sync::Arc;

use config::Config;
use db::kv::KeyValueStore;
use error::PushError;
use gateway::hub::ConnectionHub;
use push::clock::Clock;
use push::encoder::{EncoderFactory, StructuredEncoder};
use push::registrar::ChannelRegistrar;
use push::repository::SubscriptionsRepository;
use push::service::PushService;
use push::transport::Transport;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<ConnectionHub>,
    pub registrar: Arc<ChannelRegistrar>,
    pub push: Arc<PushService>,
}

impl AppState {
    /// Wire every capability once, at process start.
    ///
    /// Structured schemas are read from `config.structured_schema_path` when set.
    pub fn assemble(
        config: Config,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PushError> {
        let structured = match &config.structured_schema_path {
            Some(path) => StructuredEncoder::load(path)?,
            None => StructuredEncoder::new(),
        };
        Self::assemble_with_schemas(config, kv, clock, structured)
    }

    pub fn assemble_with_schemas(
        config: Config,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        structured: StructuredEncoder,
    ) -> Result<Self, PushError> {
        config.validate()?;

        let hub = Arc::new(ConnectionHub::new(
            clock.clone(),
            config.channel_token_minutes,
        )?);
        let transport: Arc<dyn Transport> = hub.clone();

        let repository = Arc::new(SubscriptionsRepository::new(
            kv,
            clock.clone(),
            config.store_timeout,
        ));

        let registrar = Arc::new(ChannelRegistrar::new(
            transport.clone(),
            repository.clone(),
            clock,
            config.subscriptions_expiration_minutes,
        )?);

        let push = Arc::new(PushService::new(
            repository,
            EncoderFactory::new(structured, config.encoding_mode),
            transport,
            config.send_timeout,
            config.push_max_concurrency,
        ));

        Ok(Self {
            config: Arc::new(config),
            hub,
            registrar,
            push,
        })
    }
}
