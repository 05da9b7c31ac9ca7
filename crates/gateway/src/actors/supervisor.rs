use std::{collections::HashMap, time::Duration};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{error, warn};
use uuid::Uuid;

use common::actors::{Actor, ActorType, ControlMessage};

type ActorFactory = Box<dyn Fn() -> Box<dyn Actor + Send + Sync> + Send + Sync>;

/// Restarts background actors that stop heartbeating. Actors send
/// heartbeats on a side task, so a long sleep inside an actor's loop does
/// not read as death; a panicked or wedged task does.
pub struct Supervisor {
    factories: HashMap<ActorType, ActorFactory>,
    pulses: HashMap<ActorType, (Uuid, Instant)>,
    handles: HashMap<ActorType, JoinHandle<()>>,
    timeout: Duration,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            pulses: HashMap::new(),
            handles: HashMap::new(),
            timeout: Duration::from_secs(3),
        }
    }

    pub fn register_actor(&mut self, actor_type: ActorType, factory: ActorFactory) {
        self.factories.insert(actor_type, factory);
    }

    pub async fn start(&mut self) {
        let mut check_interval = time::interval(Duration::from_secs(1));
        let (supervisor_tx, mut supervisor_rx) = mpsc::channel::<ControlMessage>(512);

        let registered: Vec<ActorType> = self.factories.keys().copied().collect();
        for actor_type in registered {
            self.spawn_actor(actor_type, supervisor_tx.clone());
        }

        loop {
            tokio::select! {
                Some(msg) = supervisor_rx.recv() => {
                    match msg {
                        ControlMessage::Heartbeat(id) => {
                            for pulse in self.pulses.values_mut() {
                                if pulse.0 == id {
                                    pulse.1 = Instant::now();
                                }
                            }
                        }
                        ControlMessage::Shutdown(id) => {
                            warn!("Actor {} is shutting down gracefully.", id);
                            if let Some(actor_type) = self.actor_type_for(id) {
                                self.pulses.remove(&actor_type);
                                if let Some(handle) = self.handles.remove(&actor_type) {
                                    handle.abort();
                                }
                            }
                        }
                        ControlMessage::Error(id, error_msg) => {
                            error!("Actor {} reported error: {}", id, error_msg);
                        }
                        ControlMessage::Spawn(_) => {
                            warn!("Dynamic actor spawn is not supported here");
                        }
                    }
                }

                _ = check_interval.tick() => {
                    let dead_after = Instant::now() - self.timeout;
                    let dead: Vec<ActorType> = self
                        .pulses
                        .iter()
                        .filter(|(_, (_, at))| *at < dead_after)
                        .map(|(actor_type, _)| *actor_type)
                        .collect();

                    for actor_type in dead {
                        warn!("{:?} is unresponsive, restarting", actor_type);
                        if let Some(handle) = self.handles.remove(&actor_type) {
                            handle.abort();
                        }
                        self.spawn_actor(actor_type, supervisor_tx.clone());
                    }
                }
            }
        }
    }

    fn actor_type_for(&self, id: Uuid) -> Option<ActorType> {
        self.pulses
            .iter()
            .find(|(_, (actor_id, _))| *actor_id == id)
            .map(|(actor_type, _)| *actor_type)
    }

    fn spawn_actor(&mut self, actor_type: ActorType, tx: mpsc::Sender<ControlMessage>) {
        let mut actor = self.factories[&actor_type]();
        let id = actor.id();
        let handle = tokio::spawn(async move {
            if let Err(e) = actor.run(tx).await {
                error!("Actor {:?} crashed: {}", actor_type, e);
            }
        });
        self.handles.insert(actor_type, handle);
        self.pulses.insert(actor_type, (id, Instant::now()));
    }
}
