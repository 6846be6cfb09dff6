//! Weighted bully election with an uptime threshold.
//!
//! Routing follows the classic bully shape over the rank tuple
//! `(username, node_id)`: a campaigner sends ELECTION only to strictly
//! higher-ranked live peers, a higher-ranked receiver ANSWERs and campaigns
//! itself, and whoever runs out of superiors broadcasts COORDINATOR.
//!
//! The twist is the uptime veto: a receiver whose uptime trails the
//! sender's by more than the threshold yields - no answer, no
//! counter-campaign - so a freshly joined node never unseats a stable Host
//! just by outranking it.
//!
//! The engine is a pure state machine: inputs carry an explicit `now` and
//! the current fanout set, outputs are [`ElectionAction`]s for the node
//! loop to execute. No sockets, no timers, no clocks in here, which is
//! what makes the scenario tests below possible.

use std::time::{Duration, Instant};

use crate::core::NodeId;

#[derive(Clone, Copy, Debug)]
pub struct ElectionConfig {
    pub election_timeout: Duration,
    pub host_timeout: Duration,
    pub uptime_threshold_secs: u64,
    pub startup_grace: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Campaigning,
    WaitingForCoordinator,
}

/// What the node loop must do on behalf of the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElectionAction {
    /// Send ELECTION (with our uptime) to each named peer.
    SendElection { to: Vec<NodeId>, uptime_secs: u64 },
    /// Acknowledge a lower-ranked campaigner; we are taking over.
    SendAnswer { to: NodeId },
    /// We won: adopt self as leader and broadcast COORDINATOR.
    BecameLeader,
    /// Someone else won (COORDINATOR or WELCOME): adopt them.
    AdoptLeader { leader: NodeId },
}

pub struct ElectionEngine {
    local_id: NodeId,
    config: ElectionConfig,
    phase: Phase,
    leader: Option<NodeId>,
    started_at: Instant,
    last_heartbeat: Instant,
    election_deadline: Option<Instant>,
    coordinator_deadline: Option<Instant>,
    grace_until: Instant,
}

impl ElectionEngine {
    pub fn new(local_id: NodeId, config: ElectionConfig, now: Instant) -> Self {
        Self {
            local_id,
            grace_until: now + config.startup_grace,
            config,
            phase: Phase::Idle,
            leader: None,
            started_at: now,
            last_heartbeat: now,
            election_deadline: None,
            coordinator_deadline: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn leader(&self) -> Option<&NodeId> {
        self.leader.as_ref()
    }

    pub fn is_self_leader(&self) -> bool {
        self.leader.as_ref() == Some(&self.local_id)
    }

    pub fn uptime_secs(&self, now: Instant) -> u64 {
        now.duration_since(self.started_at).as_secs()
    }

    /// Periodic driver: expire timers, detect heartbeat loss, start
    /// spontaneous campaigns once the startup grace has passed.
    pub fn on_tick(&mut self, now: Instant, higher: &[NodeId]) -> Vec<ElectionAction> {
        if self.is_self_leader() {
            return Vec::new();
        }

        match self.phase {
            Phase::Campaigning => {
                if self.deadline_passed(self.election_deadline, now) {
                    tracing::info!("election timeout with no answer, taking over");
                    self.win()
                } else {
                    Vec::new()
                }
            }
            Phase::WaitingForCoordinator => {
                if self.deadline_passed(self.coordinator_deadline, now) {
                    if self.leader.is_some() {
                        // We stood down while a leader was still seated (an
                        // uptime yield); nothing replaced it, resume watching
                        // its heartbeats.
                        self.phase = Phase::Idle;
                        self.coordinator_deadline = None;
                        Vec::new()
                    } else {
                        tracing::info!("coordinator never arrived, restarting campaign");
                        self.campaign(now, higher)
                    }
                } else {
                    Vec::new()
                }
            }
            Phase::Idle => match &self.leader {
                None => {
                    if now >= self.grace_until {
                        tracing::info!("no leader known, starting campaign");
                        self.campaign(now, higher)
                    } else {
                        Vec::new()
                    }
                }
                Some(leader) => {
                    if now.duration_since(self.last_heartbeat) > self.config.host_timeout {
                        tracing::warn!("host {leader} timed out, starting campaign");
                        self.leader = None;
                        self.campaign(now, higher)
                    } else {
                        Vec::new()
                    }
                }
            },
        }
    }

    /// A peer's connection died. Leader death triggers immediate failover.
    pub fn on_peer_dead(
        &mut self,
        peer: &NodeId,
        now: Instant,
        higher: &[NodeId],
    ) -> Vec<ElectionAction> {
        if self.leader.as_ref() != Some(peer) {
            return Vec::new();
        }
        tracing::warn!("host {peer} disconnected, starting failover");
        self.leader = None;
        if self.phase == Phase::Idle {
            self.campaign(now, higher)
        } else {
            Vec::new()
        }
    }

    /// ELECTION received from `from` carrying the sender's uptime.
    ///
    /// `sender_outranks_us` is the rank comparison computed by the caller
    /// against the peer registry (an unknown sender still ranks, with an
    /// empty username).
    pub fn on_election(
        &mut self,
        from: NodeId,
        sender_uptime_secs: u64,
        sender_outranks_us: bool,
        now: Instant,
        higher: &[NodeId],
    ) -> Vec<ElectionAction> {
        let my_uptime = self.uptime_secs(now);
        if sender_uptime_secs > my_uptime + self.config.uptime_threshold_secs {
            // Uptime veto: the campaigner is substantially more stable.
            // Stand down and wait for its COORDINATOR instead of answering.
            tracing::info!(
                "yielding to {from}: uptime {sender_uptime_secs}s vs ours {my_uptime}s \
                 exceeds threshold {}s",
                self.config.uptime_threshold_secs
            );
            self.stand_down(now);
            return Vec::new();
        }

        if sender_outranks_us {
            // A higher-ranked peer is campaigning: our own campaign is moot.
            self.stand_down(now);
            return Vec::new();
        }

        let mut actions = vec![ElectionAction::SendAnswer { to: from }];
        if self.phase != Phase::Campaigning {
            actions.extend(self.campaign(now, higher));
        }
        actions
    }

    /// A higher-ranked peer acknowledged our campaign and will take over.
    pub fn on_answer(&mut self, now: Instant) -> Vec<ElectionAction> {
        if self.phase == Phase::Campaigning {
            tracing::debug!("answered, waiting for coordinator");
            self.stand_down(now);
        }
        Vec::new()
    }

    /// COORDINATOR (or WELCOME) names the leader. Always accepted.
    pub fn on_coordinator(&mut self, leader: NodeId, now: Instant) -> Vec<ElectionAction> {
        self.phase = Phase::Idle;
        self.election_deadline = None;
        self.coordinator_deadline = None;
        self.last_heartbeat = now;
        self.leader = Some(leader.clone());
        vec![ElectionAction::AdoptLeader { leader }]
    }

    pub fn on_heartbeat(&mut self, now: Instant) {
        self.last_heartbeat = now;
    }

    /// A new peer joined. Only matters when we are leaderless and idle:
    /// the fresh fanout set may let a stalled campaign route somewhere.
    pub fn on_peer_joined(&mut self, now: Instant, higher: &[NodeId]) -> Vec<ElectionAction> {
        if self.phase == Phase::Idle && self.leader.is_none() && now >= self.grace_until {
            self.campaign(now, higher)
        } else {
            Vec::new()
        }
    }

    fn campaign(&mut self, now: Instant, higher: &[NodeId]) -> Vec<ElectionAction> {
        if higher.is_empty() {
            tracing::info!("no higher-ranked peers, declaring victory");
            return self.win();
        }
        self.phase = Phase::Campaigning;
        self.election_deadline = Some(now + self.config.election_timeout);
        self.coordinator_deadline = None;
        vec![ElectionAction::SendElection {
            to: higher.to_vec(),
            uptime_secs: self.uptime_secs(now),
        }]
    }

    fn win(&mut self) -> Vec<ElectionAction> {
        self.phase = Phase::Idle;
        self.election_deadline = None;
        self.coordinator_deadline = None;
        self.leader = Some(self.local_id.clone());
        vec![ElectionAction::BecameLeader]
    }

    /// Abandon any campaign and wait out a coordinator announcement.
    fn stand_down(&mut self, now: Instant) {
        self.phase = Phase::WaitingForCoordinator;
        self.election_deadline = None;
        self.coordinator_deadline = Some(now + self.config.election_timeout);
    }

    fn deadline_passed(&self, deadline: Option<Instant>, now: Instant) -> bool {
        deadline.is_some_and(|deadline| now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ElectionConfig {
        ElectionConfig {
            election_timeout: Duration::from_secs(3),
            host_timeout: Duration::from_millis(3100),
            uptime_threshold_secs: 60,
            startup_grace: Duration::from_secs(3),
        }
    }

    fn engine(id: &str, now: Instant) -> ElectionEngine {
        ElectionEngine::new(NodeId::new(id), config(), now)
    }

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::new(*n)).collect()
    }

    #[test]
    fn solo_node_wins_after_grace() {
        let t0 = Instant::now();
        let mut e = engine("alice000", t0);

        // Inside the grace window nothing happens.
        assert!(e.on_tick(t0 + Duration::from_secs(1), &[]).is_empty());

        let actions = e.on_tick(t0 + Duration::from_secs(4), &[]);
        assert_eq!(actions, vec![ElectionAction::BecameLeader]);
        assert!(e.is_self_leader());
        assert_eq!(e.phase(), Phase::Idle);
    }

    #[test]
    fn campaign_with_superiors_sends_election_then_wins_on_silence() {
        let t0 = Instant::now();
        let mut e = engine("bob00000", t0);
        let higher = ids(&["carol000"]);

        let t1 = t0 + Duration::from_secs(4);
        let actions = e.on_tick(t1, &higher);
        assert_eq!(
            actions,
            vec![ElectionAction::SendElection {
                to: higher.clone(),
                uptime_secs: 4,
            }]
        );
        assert_eq!(e.phase(), Phase::Campaigning);

        // Silence until the election timeout: victory.
        assert!(e.on_tick(t1 + Duration::from_secs(2), &higher).is_empty());
        let actions = e.on_tick(t1 + Duration::from_secs(3), &higher);
        assert_eq!(actions, vec![ElectionAction::BecameLeader]);
    }

    #[test]
    fn answer_defers_to_coordinator_then_retries_on_silence() {
        let t0 = Instant::now();
        let mut e = engine("bob00000", t0);
        let higher = ids(&["carol000"]);

        let t1 = t0 + Duration::from_secs(4);
        e.on_tick(t1, &higher);
        assert!(e.on_answer(t1 + Duration::from_secs(1)).is_empty());
        assert_eq!(e.phase(), Phase::WaitingForCoordinator);

        // The promised coordinator never shows: campaign restarts.
        let actions = e.on_tick(t1 + Duration::from_secs(5), &higher);
        assert!(matches!(actions[0], ElectionAction::SendElection { .. }));
    }

    #[test]
    fn coordinator_is_always_accepted() {
        let t0 = Instant::now();
        let mut e = engine("bob00000", t0);
        let higher = ids(&["carol000"]);
        e.on_tick(t0 + Duration::from_secs(4), &higher);

        let actions = e.on_coordinator(NodeId::new("carol000"), t0 + Duration::from_secs(5));
        assert_eq!(
            actions,
            vec![ElectionAction::AdoptLeader {
                leader: NodeId::new("carol000")
            }]
        );
        assert_eq!(e.phase(), Phase::Idle);
        assert_eq!(e.leader(), Some(&NodeId::new("carol000")));
        assert!(!e.is_self_leader());
    }

    #[test]
    fn heartbeat_loss_triggers_failover() {
        let t0 = Instant::now();
        let mut e = engine("bob00000", t0);
        e.on_coordinator(NodeId::new("alice000"), t0 + Duration::from_secs(4));

        let t_beat = t0 + Duration::from_secs(5);
        e.on_heartbeat(t_beat);
        // Within the host timeout: quiet.
        assert!(e.on_tick(t_beat + Duration::from_secs(3), &[]).is_empty());
        // Past it: the leader is gone and, with no superiors, we win.
        let actions = e.on_tick(t_beat + Duration::from_secs(4), &[]);
        assert_eq!(actions, vec![ElectionAction::BecameLeader]);
    }

    #[test]
    fn leader_connection_death_triggers_immediate_campaign() {
        let t0 = Instant::now();
        let mut e = engine("bob00000", t0);
        e.on_coordinator(NodeId::new("alice000"), t0 + Duration::from_secs(4));

        let actions = e.on_peer_dead(&NodeId::new("alice000"), t0 + Duration::from_secs(5), &[]);
        assert_eq!(actions, vec![ElectionAction::BecameLeader]);
    }

    #[test]
    fn non_leader_death_is_ignored() {
        let t0 = Instant::now();
        let mut e = engine("bob00000", t0);
        e.on_coordinator(NodeId::new("alice000"), t0 + Duration::from_secs(4));
        assert!(
            e.on_peer_dead(&NodeId::new("carol000"), t0 + Duration::from_secs(5), &[])
                .is_empty()
        );
        assert_eq!(e.leader(), Some(&NodeId::new("alice000")));
    }

    #[test]
    fn lower_ranked_campaigner_gets_answer_and_counter_campaign() {
        let t0 = Instant::now();
        let mut e = engine("carol000", t0);

        let actions = e.on_election(NodeId::new("bob00000"), 0, false, t0, &[]);
        // Answer plus (no superiors) immediate victory.
        assert_eq!(
            actions,
            vec![
                ElectionAction::SendAnswer {
                    to: NodeId::new("bob00000")
                },
                ElectionAction::BecameLeader,
            ]
        );
    }

    #[test]
    fn uptime_veto_yields_without_answer() {
        let t0 = Instant::now();
        let mut e = engine("carol000", t0);

        // Sender claims 100s of uptime, ours is 0: 100 > 0 + 60 -> yield.
        let actions = e.on_election(NodeId::new("bob00000"), 100, false, t0, &[]);
        assert!(actions.is_empty());
        assert_eq!(e.phase(), Phase::WaitingForCoordinator);

        // The stable sender wins and announces.
        e.on_coordinator(NodeId::new("bob00000"), t0 + Duration::from_secs(1));
        assert_eq!(e.leader(), Some(&NodeId::new("bob00000")));
    }

    #[test]
    fn uptime_within_threshold_is_answered() {
        let t0 = Instant::now();
        let mut e = engine("carol000", t0);
        let actions = e.on_election(NodeId::new("bob00000"), 30, false, t0, &[]);
        assert!(matches!(actions[0], ElectionAction::SendAnswer { .. }));
    }

    #[test]
    fn stable_host_keeps_leadership_against_fresh_joiner() {
        // S4 shape: alice has been Host for 600s; eve (uptime 0) campaigns.
        let t0 = Instant::now();
        let mut alice = engine("alice000", t0);
        alice.on_tick(t0 + Duration::from_secs(4), &[]);
        assert!(alice.is_self_leader());

        let t_join = t0 + Duration::from_secs(600);
        let actions = alice.on_election(NodeId::new("eve00000"), 0, true, t_join, &[]);
        // eve outranks alice, so alice defers silently; she stays seated
        // unless a COORDINATOR actually replaces her.
        assert!(actions.is_empty());
        assert!(alice.is_self_leader());

        // No coordinator arrives; alice resumes idle leadership.
        assert!(
            alice
                .on_tick(t_join + Duration::from_secs(4), &[])
                .is_empty()
        );
        assert!(alice.is_self_leader());
    }

    #[test]
    fn fresh_joiner_yields_to_stable_campaigner() {
        // The complementary S4 half: eve (uptime 0) receives ELECTION from
        // alice carrying uptime 600 and yields despite outranking her.
        let t0 = Instant::now();
        let mut eve = engine("eve00000", t0);
        let actions = eve.on_election(NodeId::new("alice000"), 600, false, t0, &[]);
        assert!(actions.is_empty());
        assert_eq!(eve.phase(), Phase::WaitingForCoordinator);
    }

    #[test]
    fn higher_ranked_election_abandons_own_campaign() {
        let t0 = Instant::now();
        let mut e = engine("bob00000", t0);
        let higher = ids(&["carol000"]);
        e.on_tick(t0 + Duration::from_secs(4), &higher);
        assert_eq!(e.phase(), Phase::Campaigning);

        let actions = e.on_election(
            NodeId::new("carol000"),
            4,
            true,
            t0 + Duration::from_secs(5),
            &higher,
        );
        assert!(actions.is_empty());
        assert_eq!(e.phase(), Phase::WaitingForCoordinator);
    }

    #[test]
    fn election_while_campaigning_answers_without_restarting() {
        let t0 = Instant::now();
        let mut e = engine("carol000", t0);
        let higher = ids(&["zeta0000"]);
        e.on_tick(t0 + Duration::from_secs(4), &higher);
        assert_eq!(e.phase(), Phase::Campaigning);

        let actions = e.on_election(
            NodeId::new("bob00000"),
            0,
            false,
            t0 + Duration::from_secs(5),
            &higher,
        );
        assert_eq!(
            actions,
            vec![ElectionAction::SendAnswer {
                to: NodeId::new("bob00000")
            }]
        );
        assert_eq!(e.phase(), Phase::Campaigning);
    }

    #[test]
    fn leader_self_ignores_ticks() {
        let t0 = Instant::now();
        let mut e = engine("alice000", t0);
        e.on_tick(t0 + Duration::from_secs(4), &[]);
        assert!(e.is_self_leader());
        assert!(e.on_tick(t0 + Duration::from_secs(600), &[]).is_empty());
    }

    #[test]
    fn peer_join_restarts_stalled_leaderless_campaign() {
        let t0 = Instant::now();
        let mut e = engine("bob00000", t0);
        // No-op before grace.
        assert!(e.on_peer_joined(t0, &[]).is_empty());

        let t1 = t0 + Duration::from_secs(4);
        let higher = ids(&["carol000"]);
        let actions = e.on_peer_joined(t1, &higher);
        assert!(matches!(actions[0], ElectionAction::SendElection { .. }));
    }
}
