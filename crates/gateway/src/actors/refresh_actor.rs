use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time;
use uuid::Uuid;

use common::actors::{Actor, ActorType, ControlMessage};
use signal::SymbolResolver;

/// Re-fetches all futures front contracts on a fixed schedule so the
/// resolver's cache is warm and contract rolls are picked up without a
/// webhook-path miss.
pub struct ContractRefreshActor {
    id: Uuid,
    resolver: Arc<SymbolResolver>,
    interval: Duration,
}

impl ContractRefreshActor {
    pub fn new(resolver: Arc<SymbolResolver>, interval: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            resolver,
            interval,
        }
    }
}

#[async_trait]
impl Actor for ContractRefreshActor {
    fn name(&self) -> ActorType {
        ActorType::ContractRefreshActor
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let _heartbeat = self.spawn_heartbeat(supervisor_tx);

        let mut ticker = time::interval(self.interval);
        loop {
            // First tick fires immediately, warming the cache at startup.
            ticker.tick().await;
            self.resolver.refresh_all().await;
        }
    }
}
