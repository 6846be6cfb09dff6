//! Node runtime: thread wiring and the owning event loop.
//!
//! Discovery observations, mesh events, user intents and the periodic tick
//! all funnel into one loop thread. That loop is the only place the store
//! mutates through causal delivery or election transitions, which
//! linearizes both without fine-grained locking; the store's mutex exists
//! so the handle (view pump, tests) can read snapshots concurrently.
//!
//! Lock discipline: handlers compute under the store lock and collect
//! outgoing envelopes; sockets are touched only after the lock drops.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use rand::RngCore;

use crate::config::Config;
use crate::controller::{self, UserIntent};
use crate::core::NodeId;
use crate::election::{ElectionAction, ElectionConfig, ElectionEngine};
use crate::error::Result;
use crate::net::discovery::{Discovery, PeerObserved};
use crate::net::proto::{Envelope, Message, encode_envelope};
use crate::net::registry::{self, MeshEvent, MeshServer, Registry};
use crate::playback::coordinator::{PlaybackCoordinator, PlaybackUpdate};
use crate::playback::sink::AudioSink;
use crate::state::causal::CausalDelivery;
use crate::state::store::StateStore;
use crate::view::{StateSnapshot, View};

pub struct Node;

impl Node {
    /// Bind sockets, spawn the background threads and the event loop.
    pub fn start(
        config: Config,
        node_id: NodeId,
        display_name: impl Into<String>,
        sink: Box<dyn AudioSink>,
        rng: Box<dyn RngCore + Send>,
        view: Box<dyn View>,
    ) -> Result<NodeHandle> {
        let display_name = display_name.into();
        let local_ip = crate::net::local_ip();
        let (listener, tcp_port) =
            registry::bind_mesh_listener(config.tcp_port, config.tcp_port_range)?;
        tracing::info!("node {node_id} ({display_name}) listening on tcp port {tcp_port}");

        let registry = Arc::new(Registry::new(config.max_frame_bytes));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (mesh_tx, mesh_rx) = channel::unbounded();
        let (observed_tx, observed_rx) = channel::unbounded();
        let (intents_tx, intents_rx) = channel::unbounded();

        let server = MeshServer::start(
            listener,
            node_id.clone(),
            Arc::clone(&registry),
            mesh_tx.clone(),
            Arc::clone(&shutdown),
        )?;
        let discovery = Discovery::start(
            node_id.clone(),
            local_ip,
            tcp_port,
            config.udp_port,
            config.discovery_interval(),
            observed_tx.clone(),
        );

        let store = Arc::new(Mutex::new(StateStore::new(
            node_id.clone(),
            display_name.clone(),
            config.history_cap,
        )));

        let election_config = ElectionConfig {
            election_timeout: config.election_timeout(),
            host_timeout: config.host_timeout(),
            uptime_threshold_secs: config.uptime_threshold_secs,
            startup_grace: config.startup_grace(),
        };
        let node_loop = NodeLoop {
            engine: ElectionEngine::new(node_id.clone(), election_config, Instant::now()),
            causal: CausalDelivery::new(config.pending_cap, config.pending_ttl()),
            coordinator: PlaybackCoordinator::new(sink, rng, config.media_dirs.clone()),
            config,
            local_id: node_id.clone(),
            display_name,
            local_ip,
            tcp_port,
            store: Arc::clone(&store),
            registry: Arc::clone(&registry),
            view,
            shutdown: Arc::clone(&shutdown),
            mesh_tx,
        };
        let join = thread::Builder::new()
            .name("node-loop".into())
            .spawn(move || node_loop.run(mesh_rx, observed_rx, intents_rx))?;

        Ok(NodeHandle {
            local_id: node_id,
            tcp_port,
            intents_tx,
            observed_tx,
            store,
            shutdown,
            discovery,
            server,
            registry,
            join: Some(join),
        })
    }
}

pub struct NodeHandle {
    local_id: NodeId,
    tcp_port: u16,
    intents_tx: Sender<UserIntent>,
    observed_tx: Sender<PeerObserved>,
    store: Arc<Mutex<StateStore>>,
    shutdown: Arc<AtomicBool>,
    discovery: Discovery,
    server: MeshServer,
    registry: Arc<Registry>,
    join: Option<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    /// Queue a user intent for the event loop.
    pub fn submit(&self, intent: UserIntent) {
        let _ = self.intents_tx.send(intent);
    }

    /// Seed a peer as if discovery had seen it. The mesh works without UDP
    /// discovery when peers are fed through here.
    pub fn observe_peer(&self, id: NodeId, ip: IpAddr, tcp_port: u16) {
        let _ = self.observed_tx.send(PeerObserved { id, ip, tcp_port });
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let store = self.store.lock().expect("store lock poisoned");
        StateSnapshot::capture(&store)
    }

    /// Idempotent: closes every socket and joins the background threads.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("node {} shutting down", self.local_id);
        self.discovery.shutdown();
        self.server.shutdown();
        self.registry.close_all();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Outgoing {
    To(NodeId, Envelope),
    All(Envelope),
}

struct NodeLoop {
    config: Config,
    local_id: NodeId,
    display_name: String,
    local_ip: IpAddr,
    tcp_port: u16,
    store: Arc<Mutex<StateStore>>,
    registry: Arc<Registry>,
    engine: ElectionEngine,
    causal: CausalDelivery,
    coordinator: PlaybackCoordinator,
    view: Box<dyn View>,
    shutdown: Arc<AtomicBool>,
    mesh_tx: Sender<MeshEvent>,
}

impl NodeLoop {
    fn run(
        mut self,
        mesh_rx: Receiver<MeshEvent>,
        observed_rx: Receiver<PeerObserved>,
        intents_rx: Receiver<UserIntent>,
    ) {
        let tick = channel::tick(self.config.heartbeat_interval());
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            crossbeam::select! {
                recv(mesh_rx) -> event => match event {
                    Ok(event) => self.on_mesh(event),
                    Err(_) => break,
                },
                recv(observed_rx) -> observed => match observed {
                    Ok(observed) => self.on_observed(observed),
                    Err(_) => break,
                },
                recv(intents_rx) -> intent => match intent {
                    Ok(intent) => self.on_intent(intent),
                    Err(_) => break,
                },
                recv(tick) -> _ => self.on_tick(),
            }
        }
        self.registry.close_all();
    }

    // -- event handlers -----------------------------------------------------

    fn on_observed(&mut self, observed: PeerObserved) {
        if observed.id == self.local_id || self.registry.contains(&observed.id) {
            return;
        }
        tracing::info!(
            "discovered peer {} at {}:{}",
            observed.id,
            observed.ip,
            observed.tcp_port
        );
        let hello = {
            let store_arc = Arc::clone(&self.store);
            let mut store = store_arc.lock().expect("store lock poisoned");
            self.stamp(
                &mut store,
                Message::Hello {
                    tcp_port: self.tcp_port,
                    display_name: self.display_name.clone(),
                    is_reply: false,
                },
            )
        };
        let bytes = match encode_envelope(&hello) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!("hello encode failed: {err}");
                return;
            }
        };
        registry::spawn_outbound(
            observed.id,
            observed.ip,
            observed.tcp_port,
            bytes,
            Arc::clone(&self.registry),
            self.mesh_tx.clone(),
            Arc::clone(&self.shutdown),
        );
    }

    fn on_mesh(&mut self, event: MeshEvent) {
        match event {
            MeshEvent::Connected {
                id,
                conn: _,
                ip,
                tcp_port,
                display_name,
                needs_reply,
            } => {
                let now = Instant::now();
                let mut out = Vec::new();
                let store_arc = Arc::clone(&self.store);
                {
                    let mut store = store_arc.lock().expect("store lock poisoned");
                    store.upsert_peer(&id, ip, tcp_port, display_name.as_deref());
                    tracing::info!("peer {id} joined the mesh");

                    if needs_reply {
                        let reply = self.stamp(
                            &mut store,
                            Message::Hello {
                                tcp_port: self.tcp_port,
                                display_name: self.display_name.clone(),
                                is_reply: true,
                            },
                        );
                        out.push(Outgoing::To(id.clone(), reply));
                    }

                    if self.engine.is_self_leader() {
                        // Late-join transfer: identify the leader, then push
                        // the whole replicated state unsolicited.
                        let welcome = self.stamp(
                            &mut store,
                            Message::Welcome {
                                leader: self.local_id.clone(),
                            },
                        );
                        out.push(Outgoing::To(id.clone(), welcome));
                        let full = store.full_state();
                        let full = self.stamp(&mut store, Message::FullState(Box::new(full)));
                        out.push(Outgoing::To(id.clone(), full));
                    } else if self.engine.leader().is_none()
                        || self.engine.leader() == Some(&id)
                    {
                        let request = self.stamp(&mut store, Message::RequestState);
                        out.push(Outgoing::To(id.clone(), request));
                    }

                    let higher = store.higher_ranked_alive();
                    let actions = self.engine.on_peer_joined(now, &higher);
                    self.execute_election(actions, &mut store, &mut out);
                }
                self.flush(out);
            }
            MeshEvent::Frame { conn: _, envelope } => self.on_envelope(envelope),
            MeshEvent::Closed { id, conn: _ } => {
                let now = Instant::now();
                let mut out = Vec::new();
                let store_arc = Arc::clone(&self.store);
                {
                    let mut store = store_arc.lock().expect("store lock poisoned");
                    store.mark_dead(&id);
                    tracing::info!("peer {id} left the mesh");
                    let higher = store.higher_ranked_alive();
                    let actions = self.engine.on_peer_dead(&id, now, &higher);
                    self.execute_election(actions, &mut store, &mut out);
                }
                self.flush(out);
            }
        }
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        if envelope.sender == self.local_id {
            return;
        }
        let now = Instant::now();
        let store_arc = Arc::clone(&self.store);

        if envelope.message.is_causal() {
            let mut store = store_arc.lock().expect("store lock poisoned");
            let applied = self.causal.receive(&mut store, envelope, now);
            for env in &applied {
                tracing::debug!("applied {:?} from {}", env.message.kind(), env.sender);
            }
            return;
        }

        let mut out = Vec::new();
        {
            let mut store = store_arc.lock().expect("store lock poisoned");
            let sender = envelope.sender.clone();
            match envelope.message {
                Message::Hello {
                    tcp_port,
                    ref display_name,
                    is_reply,
                } => {
                    store.upsert_peer(
                        &sender,
                        envelope.sender_ip,
                        tcp_port,
                        Some(display_name.as_str()),
                    );
                    if !is_reply {
                        let reply = self.stamp(
                            &mut store,
                            Message::Hello {
                                tcp_port: self.tcp_port,
                                display_name: self.display_name.clone(),
                                is_reply: true,
                            },
                        );
                        out.push(Outgoing::To(sender, reply));
                    }
                }
                Message::Welcome { leader } | Message::Coordinator { leader } => {
                    let actions = self.engine.on_coordinator(leader, now);
                    self.execute_election(actions, &mut store, &mut out);
                }
                Message::Election { uptime_secs } => {
                    let outranks = store.rank_of(&sender) > store.local_rank();
                    let higher = store.higher_ranked_alive();
                    let actions =
                        self.engine
                            .on_election(sender, uptime_secs, outranks, now, &higher);
                    self.execute_election(actions, &mut store, &mut out);
                }
                Message::Answer => {
                    let actions = self.engine.on_answer(now);
                    self.execute_election(actions, &mut store, &mut out);
                }
                Message::Heartbeat => self.engine.on_heartbeat(now),
                Message::RequestState => {
                    if self.engine.is_self_leader() {
                        let full = store.full_state();
                        let full = self.stamp(&mut store, Message::FullState(Box::new(full)));
                        out.push(Outgoing::To(sender, full));
                    }
                }
                Message::NowPlaying { track } => store.apply_now_playing(track),
                Message::PlaybackSync {
                    position_seconds,
                    duration_seconds,
                    is_playing,
                } => store.apply_playback_sync(position_seconds, duration_seconds, is_playing),
                Message::PlaybackStatus {
                    is_playing,
                    shuffle,
                    repeat_mode,
                } => store.apply_playback_status(is_playing, shuffle, repeat_mode),
                Message::QueueAdd { .. }
                | Message::QueueRemove { .. }
                | Message::QueueClear
                | Message::FullState(_) => unreachable!("causal kinds handled above"),
            }
        }
        self.flush(out);
    }

    fn on_intent(&mut self, intent: UserIntent) {
        let mut out = Vec::new();
        let store_arc = Arc::clone(&self.store);
        {
            let mut store = store_arc.lock().expect("store lock poisoned");
            let updates = controller::handle_intent(intent, &mut store, &mut self.coordinator);
            self.queue_updates(updates, &mut store, &mut out);
        }
        self.flush(out);
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        let mut out = Vec::new();
        let store_arc = Arc::clone(&self.store);
        let snapshot = {
            let mut store = store_arc.lock().expect("store lock poisoned");
            store.set_uptime_secs(self.engine.uptime_secs(now));

            let higher = store.higher_ranked_alive();
            let actions = self.engine.on_tick(now, &higher);
            self.execute_election(actions, &mut store, &mut out);

            if self.engine.is_self_leader() {
                let heartbeat = self.stamp(&mut store, Message::Heartbeat);
                out.push(Outgoing::All(heartbeat));
                let updates = self.coordinator.tick(&mut store);
                self.queue_updates(updates, &mut store, &mut out);
            } else {
                store
                    .playback_mut()
                    .dead_reckon(self.config.heartbeat_interval_secs);
            }

            self.causal.sweep(now);
            StateSnapshot::capture(&store)
        };
        self.flush(out);
        self.view.render(&snapshot);
    }

    // -- execution helpers --------------------------------------------------

    fn execute_election(
        &mut self,
        actions: Vec<ElectionAction>,
        store: &mut StateStore,
        out: &mut Vec<Outgoing>,
    ) {
        for action in actions {
            match action {
                ElectionAction::SendElection { to, uptime_secs } => {
                    for peer in to {
                        let election = self.stamp(store, Message::Election { uptime_secs });
                        out.push(Outgoing::To(peer, election));
                    }
                }
                ElectionAction::SendAnswer { to } => {
                    let answer = self.stamp(store, Message::Answer);
                    out.push(Outgoing::To(to, answer));
                }
                ElectionAction::BecameLeader => {
                    store.set_leader(Some(self.local_id.clone()));
                    self.view.notify("You are now the host");
                    let coordinator = self.stamp(
                        store,
                        Message::Coordinator {
                            leader: self.local_id.clone(),
                        },
                    );
                    out.push(Outgoing::All(coordinator));
                }
                ElectionAction::AdoptLeader { leader } => {
                    let is_self = leader == self.local_id;
                    store.set_leader(Some(leader));
                    if !is_self {
                        // Listeners never drive audio.
                        self.coordinator.relinquish();
                    }
                }
            }
        }
    }

    fn queue_updates(
        &self,
        updates: Vec<PlaybackUpdate>,
        store: &mut StateStore,
        out: &mut Vec<Outgoing>,
    ) {
        for update in updates {
            match update {
                PlaybackUpdate::Broadcast(message) => {
                    let envelope = self.stamp(store, message);
                    out.push(Outgoing::All(envelope));
                }
                PlaybackUpdate::Notice(line) => {
                    tracing::info!("{line}");
                    self.view.notify(&line);
                }
            }
        }
    }

    /// Stamp a message with the current clock; causal kinds advance our own
    /// entry first.
    fn stamp(&self, store: &mut StateStore, message: Message) -> Envelope {
        let clock = if message.is_causal() {
            store.increment_clock()
        } else {
            store.clock_snapshot()
        };
        Envelope {
            sender: self.local_id.clone(),
            sender_ip: self.local_ip,
            clock,
            message,
        }
    }

    /// Encode and transmit after the store lock has been released.
    fn flush(&self, out: Vec<Outgoing>) {
        for outgoing in out {
            match outgoing {
                Outgoing::To(peer, envelope) => match encode_envelope(&envelope) {
                    Ok(bytes) => {
                        self.registry.send_to(&peer, &bytes);
                    }
                    Err(err) => tracing::error!("envelope encode failed: {err}"),
                },
                Outgoing::All(envelope) => match encode_envelope(&envelope) {
                    Ok(bytes) => self.registry.broadcast(&bytes),
                    Err(err) => tracing::error!("envelope encode failed: {err}"),
                },
            }
        }
    }
}
