//! Bridge - one host and one client wired over a shared bus

use std::sync::Arc;

use tracing::{debug, info};

use crate::bus::EventBus;
use crate::client::ClientProxy;
use crate::config::Config;
use crate::dispatcher::{DispatchMetrics, Dispatcher, DispatcherHandle};
use crate::envelope::Mode;
use crate::error::DispatchError;
use crate::registry::HandlerRegistry;
use crate::sink::LogSink;

/// A running host (registries plus dispatcher) and a client talking to it
pub struct Bridge {
    bus: Arc<EventBus>,
    client: ClientProxy,
    dispatcher: DispatcherHandle,
}

impl Bridge {
    /// Build both registries with `install`, start the dispatcher, then the client
    ///
    /// `install` runs once per mode, so the same handlers serve both lanes.
    /// Must be called inside a tokio runtime.
    pub fn start<F>(config: &Config, sink: Arc<dyn LogSink>, install: F) -> Result<Self, DispatchError>
    where
        F: Fn(&mut HandlerRegistry) -> Result<(), DispatchError>,
    {
        debug!(capacity = config.bus.channel_capacity, "Bridge::start: called");
        let bus = Arc::new(EventBus::new(config.bus.channel_capacity));

        let mut sync_registry = HandlerRegistry::new(Mode::Sync, bus.clone(), sink.clone());
        install(&mut sync_registry)?;
        let mut async_registry = HandlerRegistry::new(Mode::Async, bus.clone(), sink);
        install(&mut async_registry)?;

        let dispatcher = Dispatcher::new(bus.clone(), Arc::new(sync_registry), Arc::new(async_registry))?.spawn();
        let client = ClientProxy::with_config(bus.clone(), &config.client);

        info!("Bridge started");
        Ok(Self { bus, client, dispatcher })
    }

    pub fn client(&self) -> &ClientProxy {
        &self.client
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn stats(&self) -> DispatchMetrics {
        self.dispatcher.stats()
    }

    /// Close the client, then stop the dispatcher
    pub async fn shutdown(self) {
        debug!("Bridge::shutdown: called");
        self.client.close();
        self.dispatcher.shutdown().await;
        info!("Bridge stopped");
    }
}
