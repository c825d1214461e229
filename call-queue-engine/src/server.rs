//! # Engine Server
//!
//! Ties the state store, external collaborators, dispatcher and ingress API
//! together into one runnable unit. Grounded on the teacher's
//! `CallCenterServer`: async `new`/`new_in_memory`, `start`/`stop`/`run`,
//! and a builder for constructing collaborators from config.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use crate::agent::{AgentClient, VoiceAgent};
use crate::api::IngressApi;
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::store::StateStore;
use crate::supervisor::sink::{BackendSink, ResultSink};
use crate::telephony::{TelephonyClient, TelephonyProvider};

/// A fully wired call queue engine: state store, collaborators, dispatcher,
/// and the ingress surface other components submit work through.
pub struct EngineServer {
    config: EngineConfig,
    store: Arc<StateStore>,
    dispatcher: Dispatcher,
    ingress: IngressApi,
}

impl EngineServer {
    /// Build a server against a durable (file-backed) state store.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(StateStore::new(&config.store.database_url).await?);
        Self::with_store(config, store).await
    }

    /// Build a server against an in-memory state store, for tests.
    pub async fn new_in_memory(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(StateStore::new_in_memory().await?);
        Self::with_store(config, store).await
    }

    async fn with_store(config: EngineConfig, store: Arc<StateStore>) -> Result<Self> {
        let telephony: Arc<dyn TelephonyProvider> = Arc::new(TelephonyClient::new(
            config.provider.clone(),
            config.supervisor.request_timeout,
            config.supervisor.min_connected_seconds,
        ));
        let agent: Arc<dyn VoiceAgent> = Arc::new(AgentClient::new(
            config.agent.agent_base_url.clone(),
            config.supervisor.request_timeout,
        ));
        let sink: Arc<dyn ResultSink> = Arc::new(BackendSink::new(
            config.agent.backend_sink_url.clone(),
            config.supervisor.request_timeout,
        ));

        let dispatcher = Dispatcher::new(
            store.clone(),
            telephony,
            agent,
            sink,
            config.clone(),
        );

        let ingress = IngressApi::new(store.clone());

        Ok(Self {
            config,
            store,
            dispatcher,
            ingress,
        })
    }

    /// Start the dispatcher's worker pool, promoter and sweeper.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            database = %self.config.store.database_url,
            "starting call queue engine"
        );
        self.dispatcher.start().await
    }

    /// Stop all background tasks. In-flight supervisions run to completion
    /// or their own stuck-call timeout; they are not forcefully aborted.
    pub async fn stop(&mut self) {
        self.dispatcher.stop().await;
        info!("call queue engine stopped");
    }

    /// Block, periodically logging queue depth, until the process exits.
    pub async fn run(&self) -> Result<()> {
        loop {
            sleep(Duration::from_secs(60)).await;
            let metrics = self.ingress.get_queue_metrics().await?;
            info!(
                active = metrics.active_count,
                scheduled = metrics.scheduled_count,
                "queue status"
            );
        }
    }

    pub fn ingress(&self) -> &IngressApi {
        &self.ingress
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }
}
