// Consensus node
// Sequential Raft state machine: elections, log replication and commit tracking.
// All I/O goes through the outbox; time is supplied by the caller.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use metrics::counter;
use tracing::{debug, info, warn};

use cohort_common::{CohortError, NodeId, Result, quorum_size};

use super::config::RaftConfig;
use super::message::{
    AppendEntries, AppendResponse, Message, RaftMessage, RequestVote, VoteResponse,
};
use super::timer::ElectionTimer;
use super::types::{ConsensusState, LogEntry, LogIndex, NodeSnapshot, NodeStatus, Role, Term};

/// Leader-side replication progress for one follower
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplicationCursor {
    pub next_index: LogIndex,
    pub match_index: Option<LogIndex>,
}

/// Sliding window of sequence numbers already seen from one sender
#[derive(Clone, Debug, Default)]
struct SequenceWindow {
    highest: u64,
    seen: BTreeSet<u64>,
}

impl SequenceWindow {
    /// Returns false for duplicates and for sequences that fell out of the window
    fn observe(&mut self, sequence: u64, window: u64) -> bool {
        if sequence.saturating_add(window) <= self.highest {
            return false;
        }
        if !self.seen.insert(sequence) {
            return false;
        }
        if sequence > self.highest {
            self.highest = sequence;
            let floor = self.highest.saturating_sub(window).saturating_add(1);
            self.seen = self.seen.split_off(&floor);
        }
        true
    }
}

#[derive(Debug)]
pub struct ConsensusNode {
    id: NodeId,
    peers: BTreeSet<NodeId>,
    config: RaftConfig,
    status: NodeStatus,
    role: Role,
    state: ConsensusState,
    leader_id: Option<NodeId>,
    votes: BTreeSet<NodeId>,
    cursors: BTreeMap<NodeId, ReplicationCursor>,
    /// Last response from each follower in the current leadership
    last_ack: BTreeMap<NodeId, Instant>,
    leader_since: Option<Instant>,
    timer: ElectionTimer,
    next_heartbeat: Option<Instant>,
    sequence: u64,
    seen: HashMap<NodeId, SequenceWindow>,
    outbox: Vec<Message>,
}

impl ConsensusNode {
    /// Create a follower at term 0. `peers` are the other cluster members; `id` is ignored if present.
    pub fn new<I, S>(id: impl Into<NodeId>, peers: I, config: RaftConfig, now: Instant) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let timer = ElectionTimer::new(&config, now);
        Self::with_timer(id.into(), peers, config, timer)
    }

    /// Like `new`, with a reproducible election timer
    pub fn with_seed<I, S>(
        id: impl Into<NodeId>,
        peers: I,
        config: RaftConfig,
        now: Instant,
        seed: u64,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let timer = ElectionTimer::seeded(&config, now, seed);
        Self::with_timer(id.into(), peers, config, timer)
    }

    fn with_timer<I, S>(id: NodeId, peers: I, config: RaftConfig, timer: ElectionTimer) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let peers = peers
            .into_iter()
            .map(Into::into)
            .filter(|peer| *peer != id)
            .collect();
        Self {
            id,
            peers,
            config,
            status: NodeStatus::Active,
            role: Role::Follower,
            state: ConsensusState::default(),
            leader_id: None,
            votes: BTreeSet::new(),
            cursors: BTreeMap::new(),
            last_ack: BTreeMap::new(),
            leader_since: None,
            timer,
            next_heartbeat: None,
            sequence: 0,
            seen: HashMap::new(),
            outbox: Vec::new(),
        }
    }

    // ==================== Accessors ====================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peers(&self) -> &BTreeSet<NodeId> {
        &self.peers
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn current_term(&self) -> Term {
        self.state.current_term
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.state.voted_for.as_deref()
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    pub fn log(&self) -> &[LogEntry] {
        self.state.log.entries()
    }

    pub fn log_len(&self) -> u64 {
        self.state.log.len()
    }

    pub fn commit_index(&self) -> Option<LogIndex> {
        self.state.commit_index
    }

    pub fn last_applied(&self) -> Option<LogIndex> {
        self.state.last_applied
    }

    pub fn cursor(&self, peer: &str) -> Option<ReplicationCursor> {
        self.cursors.get(peer).copied()
    }

    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id.clone(),
            role: self.role,
            status: self.status,
            term: self.state.current_term,
            leader_id: self.leader_id.clone(),
            log_length: self.state.log.len(),
            commit_index: self.state.commit_index,
            last_applied: self.state.last_applied,
        }
    }

    /// Drain queued outbound messages
    pub fn take_outbox(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }

    // ==================== Timers ====================

    /// Fire whichever timer is due at `now`
    pub fn tick(&mut self, now: Instant) {
        if self.status == NodeStatus::Failed {
            return;
        }
        match self.role {
            Role::Leader => {
                if self.next_heartbeat.is_some_and(|at| now >= at) {
                    self.heartbeat(now);
                }
            }
            Role::Follower | Role::Candidate => {
                if self.timer.is_expired(now) {
                    self.on_election_timeout(now);
                }
            }
        }
    }

    /// When `tick` next has work to do; `None` while failed
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.status, self.role) {
            (NodeStatus::Failed, _) => None,
            (_, Role::Leader) => self.next_heartbeat,
            _ => Some(self.timer.deadline()),
        }
    }

    // ==================== Elections ====================

    pub fn on_election_timeout(&mut self, now: Instant) {
        if self.status == NodeStatus::Failed || self.role == Role::Leader {
            return;
        }
        if self.status == NodeStatus::Recovering {
            info!("Node {} is active again after election timeout", self.id);
            self.status = NodeStatus::Active;
        }

        self.state.current_term += 1;
        self.role = Role::Candidate;
        self.state.voted_for = Some(self.id.clone());
        self.votes = BTreeSet::from([self.id.clone()]);
        self.leader_id = None;
        self.timer.reset(now);
        counter!("cohort_raft_elections_started_total").increment(1);
        info!(
            "Node {} starts election for term {}",
            self.id, self.state.current_term
        );

        if self.votes.len() >= quorum_size(self.cluster_size()) {
            self.become_leader(now);
            return;
        }

        let request = RequestVote {
            term: self.state.current_term,
            candidate_id: self.id.clone(),
            last_log_index: self.state.log.last_index(),
            last_log_term: self.state.log.last_term(),
        };
        self.broadcast(RaftMessage::RequestVote(request));
    }

    pub fn on_request_vote(&mut self, request: &RequestVote, now: Instant) -> VoteResponse {
        if self.status == NodeStatus::Failed || request.term < self.state.current_term {
            return self.vote(false);
        }
        if request.term > self.state.current_term {
            self.step_down(request.term, now);
        }

        let free = self
            .state
            .voted_for
            .as_ref()
            .is_none_or(|voted| *voted == request.candidate_id);
        let up_to_date = self
            .state
            .log
            .is_up_to_date(request.last_log_term, request.last_log_index);
        let granted = free && up_to_date;

        if granted {
            self.state.voted_for = Some(request.candidate_id.clone());
            if self.role != Role::Follower {
                self.step_down(request.term, now);
            }
            self.timer.reset(now);
        }
        debug!(
            "Node {} {} vote for {} in term {}",
            self.id,
            if granted { "grants" } else { "refuses" },
            request.candidate_id,
            self.state.current_term
        );
        self.vote(granted)
    }

    pub fn on_vote_response(&mut self, response: &VoteResponse, now: Instant) {
        if self.status == NodeStatus::Failed {
            return;
        }
        if response.term > self.state.current_term {
            self.step_down(response.term, now);
            return;
        }
        if self.role != Role::Candidate
            || response.term != self.state.current_term
            || !response.granted
        {
            return;
        }
        if !self.peers.contains(&response.voter_id) {
            warn!(
                "Node {} ignores vote from unknown node {}",
                self.id, response.voter_id
            );
            return;
        }

        self.votes.insert(response.voter_id.clone());
        if self.votes.len() >= quorum_size(self.cluster_size()) {
            self.become_leader(now);
        }
    }

    fn become_leader(&mut self, now: Instant) {
        self.role = Role::Leader;
        self.leader_id = Some(self.id.clone());
        self.leader_since = Some(now);
        self.last_ack.clear();
        let next_index = self.state.log.len();
        self.cursors = self
            .peers
            .iter()
            .map(|peer| {
                (
                    peer.clone(),
                    ReplicationCursor {
                        next_index,
                        match_index: None,
                    },
                )
            })
            .collect();
        counter!("cohort_raft_leaders_elected_total").increment(1);
        info!(
            "Node {} became leader for term {} with {} votes",
            self.id,
            self.state.current_term,
            self.votes.len()
        );
        self.heartbeat(now);
    }

    /// Revert to follower, adopting `term` if it is newer
    fn step_down(&mut self, term: Term, now: Instant) {
        if term > self.state.current_term {
            self.state.current_term = term;
            self.state.voted_for = None;
            self.leader_id = None;
        }
        if self.role != Role::Follower {
            info!(
                "Node {} steps down from {} in term {}",
                self.id, self.role, self.state.current_term
            );
        }
        if self.role == Role::Leader {
            self.timer.reset(now);
        }
        self.role = Role::Follower;
        self.votes.clear();
        self.cursors.clear();
        self.last_ack.clear();
        self.leader_since = None;
        self.next_heartbeat = None;
    }

    // ==================== Replication ====================

    /// Append a client command to the leader's log and start replicating it
    pub fn append_command(&mut self, command: impl Into<String>, data: Vec<u8>) -> Result<LogIndex> {
        if self.status == NodeStatus::Failed {
            return Err(CohortError::NodeUnavailable(self.id.clone()));
        }
        if self.role != Role::Leader {
            return Err(CohortError::NotLeader {
                node: self.id.clone(),
                leader: self.leader_id.clone(),
            });
        }

        let index = self
            .state
            .log
            .append(self.state.current_term, command, data);
        debug!(
            "Leader {} appended entry {} in term {}",
            self.id, index, self.state.current_term
        );
        self.maybe_advance_commit();
        self.replicate_all();
        Ok(index)
    }

    /// Send AppendEntries to every peer; a no-op unless leader.
    ///
    /// A leader that has not heard from a quorum within the minimum election
    /// timeout steps down instead.
    pub fn heartbeat(&mut self, now: Instant) {
        if self.role != Role::Leader || self.status == NodeStatus::Failed {
            return;
        }
        if self.lost_quorum_contact(now) {
            warn!(
                "Leader {} lost contact with a quorum in term {}, stepping down",
                self.id, self.state.current_term
            );
            self.step_down(self.state.current_term, now);
            self.leader_id = None;
            return;
        }
        self.replicate_all();
        self.next_heartbeat = Some(now + self.config.heartbeat_interval());
    }

    fn lost_quorum_contact(&self, now: Instant) -> bool {
        let (window, _) = self.config.election_timeout_range();
        let Some(since) = self.leader_since else {
            return false;
        };
        if now.saturating_duration_since(since) < window {
            return false;
        }
        let recent = self
            .last_ack
            .values()
            .filter(|at| now.saturating_duration_since(**at) < window)
            .count();
        recent + 1 < quorum_size(self.cluster_size())
    }

    fn replicate_all(&mut self) {
        let peers: Vec<NodeId> = self.cursors.keys().cloned().collect();
        for peer in peers {
            self.replicate_to(&peer);
        }
    }

    fn replicate_to(&mut self, peer: &str) {
        let Some(cursor) = self.cursors.get(peer) else {
            return;
        };
        let prev_log_index = cursor.next_index.checked_sub(1);
        let prev_log_term = prev_log_index
            .and_then(|index| self.state.log.term_at(index))
            .unwrap_or(0);
        let request = AppendEntries {
            term: self.state.current_term,
            leader_id: self.id.clone(),
            prev_log_index,
            prev_log_term,
            entries: self
                .state
                .log
                .entries_from(cursor.next_index, self.config.max_payload_entries),
            leader_commit: self.state.commit_index,
        };
        self.send(peer, RaftMessage::AppendEntries(request));
    }

    pub fn on_append_entries(&mut self, request: &AppendEntries, now: Instant) -> AppendResponse {
        if self.status == NodeStatus::Failed || request.term < self.state.current_term {
            return self.append_reply(false, None);
        }
        if request.term > self.state.current_term {
            self.step_down(request.term, now);
        } else if self.role == Role::Leader {
            warn!(
                "Leader {} received AppendEntries from {} in its own term {}",
                self.id, request.leader_id, request.term
            );
            return self.append_reply(false, None);
        } else if self.role == Role::Candidate {
            self.step_down(request.term, now);
        }

        self.leader_id = Some(request.leader_id.clone());
        self.timer.reset(now);

        if !self
            .state
            .log
            .matches(request.prev_log_index, request.prev_log_term)
        {
            debug!(
                "Node {} has no entry {:?} with term {}",
                self.id, request.prev_log_index, request.prev_log_term
            );
            return self.append_reply(false, None);
        }
        let expected = request.prev_log_index.map_or(0, |index| index + 1);
        if request
            .entries
            .first()
            .is_some_and(|entry| entry.index != expected)
        {
            warn!(
                "Node {} dropped AppendEntries from {}: first entry is not {}",
                self.id, request.leader_id, expected
            );
            return self.append_reply(false, None);
        }

        let last_new = match self
            .state
            .log
            .merge(&request.entries, self.state.commit_index)
        {
            Ok(last) => last.or(request.prev_log_index),
            Err(e) => {
                warn!(
                    "Node {} dropped AppendEntries from {}: {}",
                    self.id, request.leader_id, e
                );
                return self.append_reply(false, None);
            }
        };

        if let (Some(leader_commit), Some(last_new)) = (request.leader_commit, last_new) {
            let target = leader_commit.min(last_new);
            if self.state.commit_index.is_none_or(|commit| target > commit) {
                self.state.commit_index = Some(target);
            }
        }
        if self.status == NodeStatus::Recovering {
            info!(
                "Node {} is active again after contact with leader {}",
                self.id, request.leader_id
            );
            self.status = NodeStatus::Active;
        }
        self.assert_invariants();
        self.append_reply(true, last_new)
    }

    pub fn on_append_response(&mut self, response: &AppendResponse, now: Instant) {
        if self.status == NodeStatus::Failed {
            return;
        }
        if response.term > self.state.current_term {
            self.step_down(response.term, now);
            return;
        }
        if self.role != Role::Leader || response.term != self.state.current_term {
            return;
        }
        let log_len = self.state.log.len();
        let Some(cursor) = self.cursors.get_mut(&response.follower_id) else {
            warn!(
                "Leader {} ignores append response from unknown node {}",
                self.id, response.follower_id
            );
            return;
        };
        self.last_ack.insert(response.follower_id.clone(), now);

        if response.success {
            if let Some(matched) = response.match_index {
                if matched >= log_len {
                    warn!(
                        "Leader {} ignores match index {} beyond its log from {}",
                        self.id, matched, response.follower_id
                    );
                    return;
                }
                if cursor.match_index.is_none_or(|current| matched > current) {
                    cursor.match_index = Some(matched);
                }
                cursor.next_index = cursor.next_index.max(matched + 1);
            }
            let behind = cursor.next_index < log_len;
            if self.maybe_advance_commit() {
                self.replicate_all();
            } else if behind {
                self.replicate_to(&response.follower_id);
            }
        } else {
            if cursor.next_index == 0 {
                warn!(
                    "Leader {} cannot back off further for {}",
                    self.id, response.follower_id
                );
                return;
            }
            let floor = cursor.match_index.map_or(0, |index| index + 1);
            cursor.next_index = (cursor.next_index - 1).max(floor);
            self.replicate_to(&response.follower_id);
        }
    }

    /// Commit the highest current-term index stored on a quorum
    fn maybe_advance_commit(&mut self) -> bool {
        let Some(last) = self.state.log.last_index() else {
            return false;
        };
        let start = self.state.commit_index.map_or(0, |commit| commit + 1);
        let quorum = quorum_size(self.cluster_size());

        let mut committed = None;
        for index in (start..=last).rev() {
            if self.state.log.term_at(index) != Some(self.state.current_term) {
                break;
            }
            let replicas = 1 + self
                .cursors
                .values()
                .filter(|cursor| cursor.match_index.is_some_and(|matched| matched >= index))
                .count();
            if replicas >= quorum {
                committed = Some(index);
                break;
            }
        }

        let Some(index) = committed else {
            return false;
        };
        counter!("cohort_raft_entries_committed_total").increment(index - start + 1);
        debug!("Leader {} commits up to {}", self.id, index);
        self.state.commit_index = Some(index);
        self.assert_invariants();
        true
    }

    /// Advance lastApplied to commitIndex, returning the newly committed entries
    pub fn apply_committed(&mut self) -> Vec<LogEntry> {
        let Some(commit) = self.state.commit_index else {
            return Vec::new();
        };
        let from = self.state.last_applied.map_or(0, |applied| applied + 1);
        if from > commit {
            return Vec::new();
        }
        let entries = self.state.log.range(from, commit);
        self.state.last_applied = Some(commit);
        self.assert_invariants();
        entries
    }

    /// Hand each newly committed entry to `apply`; returns how many were applied
    pub fn apply_committed_with<F>(&mut self, mut apply: F) -> usize
    where
        F: FnMut(&str, &[u8]),
    {
        let entries = self.apply_committed();
        for entry in &entries {
            apply(&entry.command, &entry.data);
        }
        entries.len()
    }

    // ==================== Health hooks ====================

    pub fn on_node_failed(&mut self) {
        if self.status == NodeStatus::Failed {
            return;
        }
        let term = self.state.current_term;
        if self.role != Role::Follower {
            info!(
                "Node {} steps down from {} on failure",
                self.id, self.role
            );
        }
        self.role = Role::Follower;
        self.votes.clear();
        self.cursors.clear();
        self.last_ack.clear();
        self.leader_since = None;
        self.next_heartbeat = None;
        self.leader_id = None;
        self.outbox.clear();
        self.status = NodeStatus::Failed;
        info!("Node {} marked failed in term {}", self.id, term);
    }

    pub fn on_node_recovered(&mut self, now: Instant) {
        if self.status != NodeStatus::Failed {
            return;
        }
        self.status = NodeStatus::Recovering;
        self.timer.reset(now);
        info!("Node {} recovering in term {}", self.id, self.state.current_term);
    }

    // ==================== Dispatch ====================

    /// Validate and dispatch one inbound message. Returns whether it was processed.
    pub fn handle_message(&mut self, message: Message, now: Instant) -> bool {
        if self.status == NodeStatus::Failed {
            debug!("Failed node {} drops {}", self.id, message.kind());
            return false;
        }
        if message.target() != Some(self.id.as_str()) {
            warn!(
                "Node {} dropped {} addressed to {:?}",
                self.id,
                message.kind(),
                message.target()
            );
            return false;
        }
        let source = message.source().to_string();
        if source == self.id || !self.peers.contains(&source) {
            warn!(
                "Node {} dropped {} from unexpected sender {}",
                self.id,
                message.kind(),
                source
            );
            return false;
        }
        if message.payload().sender() != source {
            warn!(
                "Node {} dropped {} from {} claiming to be {}",
                self.id,
                message.kind(),
                source,
                message.payload().sender()
            );
            return false;
        }
        let window = self.config.dedupe_window;
        if !self
            .seen
            .entry(source.clone())
            .or_default()
            .observe(message.sequence(), window)
        {
            debug!(
                "Node {} dropped duplicate {} #{} from {}",
                self.id,
                message.kind(),
                message.sequence(),
                source
            );
            return false;
        }

        match message.into_payload() {
            RaftMessage::RequestVote(request) => {
                let response = self.on_request_vote(&request, now);
                self.send(&source, RaftMessage::VoteResponse(response));
            }
            RaftMessage::VoteResponse(response) => self.on_vote_response(&response, now),
            RaftMessage::AppendEntries(request) => {
                let response = self.on_append_entries(&request, now);
                self.send(&source, RaftMessage::AppendResponse(response));
            }
            RaftMessage::AppendResponse(response) => self.on_append_response(&response, now),
        }
        true
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn send(&mut self, target: &str, payload: RaftMessage) {
        let sequence = self.next_sequence();
        self.outbox.push(Message::new(
            self.id.clone(),
            target.to_string(),
            payload,
            sequence,
        ));
    }

    fn broadcast(&mut self, payload: RaftMessage) {
        let sequence = self.next_sequence();
        self.outbox
            .push(Message::broadcast(self.id.clone(), payload, sequence));
    }

    fn vote(&self, granted: bool) -> VoteResponse {
        VoteResponse {
            term: self.state.current_term,
            voter_id: self.id.clone(),
            granted,
        }
    }

    fn append_reply(&self, success: bool, match_index: Option<LogIndex>) -> AppendResponse {
        AppendResponse {
            term: self.state.current_term,
            follower_id: self.id.clone(),
            success,
            match_index,
        }
    }

    /// Panics on states that can only come from a bug in this module
    pub fn assert_invariants(&self) {
        let last = self.state.log.last_index();
        if let Some(commit) = self.state.commit_index {
            assert!(
                last.is_some_and(|last| commit <= last),
                "node {}: commit index {} beyond log end {:?}",
                self.id,
                commit,
                last
            );
        }
        if let Some(applied) = self.state.last_applied {
            assert!(
                self.state.commit_index.is_some_and(|commit| applied <= commit),
                "node {}: last applied {} beyond commit index {:?}",
                self.id,
                applied,
                self.state.commit_index
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;

    const IDS: [&str; 5] = ["a", "b", "c", "d", "e"];

    fn config() -> RaftConfig {
        RaftConfig::default()
    }

    fn node(id: &str, members: &[&str], now: Instant) -> ConsensusNode {
        ConsensusNode::with_seed(id, members.iter().copied(), config(), now, 7)
    }

    /// Minimal synchronous router: every node reaches every other node in `links`
    struct Net {
        nodes: BTreeMap<NodeId, ConsensusNode>,
        blocked: BTreeSet<(NodeId, NodeId)>,
        now: Instant,
    }

    impl Net {
        fn new(members: &[&str]) -> Self {
            let now = Instant::now();
            let nodes = members
                .iter()
                .map(|id| (id.to_string(), node(id, members, now)))
                .collect();
            Self {
                nodes,
                blocked: BTreeSet::new(),
                now,
            }
        }

        fn split(&mut self, group: &[&str]) {
            for a in self.nodes.keys() {
                for b in self.nodes.keys() {
                    let inside = group.contains(&a.as_str());
                    if inside != group.contains(&b.as_str()) {
                        self.blocked.insert((a.clone(), b.clone()));
                    }
                }
            }
        }

        fn node(&mut self, id: &str) -> &mut ConsensusNode {
            self.nodes.get_mut(id).unwrap()
        }

        fn timeout(&mut self, id: &str) {
            let now = self.now;
            self.node(id).on_election_timeout(now);
            self.run();
        }

        fn run(&mut self) {
            let mut queue: VecDeque<Message> = VecDeque::new();
            for _ in 0..10_000 {
                for node in self.nodes.values_mut() {
                    queue.extend(node.take_outbox());
                }
                let Some(message) = queue.pop_front() else {
                    return;
                };
                let targets: Vec<NodeId> = match message.target() {
                    Some(target) => vec![target.to_string()],
                    None => self
                        .nodes
                        .keys()
                        .filter(|id| id.as_str() != message.source())
                        .cloned()
                        .collect(),
                };
                for target in targets {
                    if self
                        .blocked
                        .contains(&(message.source().to_string(), target.clone()))
                    {
                        continue;
                    }
                    let now = self.now;
                    let copy = message.deliver_to(&target);
                    self.node(&target).handle_message(copy, now);
                }
            }
            panic!("message exchange did not settle");
        }

        fn leaders(&self) -> Vec<&ConsensusNode> {
            self.nodes.values().filter(|n| n.is_leader()).collect()
        }
    }

    #[test]
    fn test_single_node_elects_itself_and_commits() {
        let now = Instant::now();
        let mut solo = node("a", &["a"], now);
        solo.on_election_timeout(now);
        assert!(solo.is_leader());
        assert_eq!(solo.current_term(), 1);
        assert_eq!(solo.append_command("SET x=1", Vec::new()).unwrap(), 0);
        assert_eq!(solo.commit_index(), Some(0));
        assert_eq!(solo.apply_committed().len(), 1);
    }

    #[test]
    fn test_five_node_election_and_replication() {
        let mut net = Net::new(&IDS);
        net.timeout("a");

        let leaders = net.leaders();
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].id(), "a");

        let index = net.node("a").append_command("SET x=1", Vec::new()).unwrap();
        assert_eq!(index, 0);
        net.run();

        for node in net.nodes.values() {
            assert_eq!(node.commit_index(), Some(0), "node {}", node.id());
            assert_eq!(node.leader_id(), Some("a"));
            assert_eq!(node.log()[0].command, "SET x=1");
        }
    }

    #[test]
    fn test_minority_cannot_elect_or_commit() {
        let mut net = Net::new(&IDS);
        net.split(&["a", "b"]);

        net.timeout("a");
        assert!(!net.node("a").is_leader());
        assert!(matches!(
            net.node("a").append_command("SET x=1", Vec::new()),
            Err(CohortError::NotLeader { .. })
        ));

        net.timeout("c");
        assert!(net.node("c").is_leader());
        net.node("c").append_command("SET y=2", Vec::new()).unwrap();
        net.run();
        for id in ["c", "d", "e"] {
            assert_eq!(net.node(id).commit_index(), Some(0));
        }
        assert_eq!(net.node("a").commit_index(), None);
        assert!(net.node("b").log().is_empty());
        assert!(matches!(
            net.node("b").append_command("SET z=3", Vec::new()),
            Err(CohortError::NotLeader { .. })
        ));
    }

    #[test]
    fn test_heal_makes_minority_follow_majority() {
        let mut net = Net::new(&IDS);
        net.split(&["a", "b"]);
        net.timeout("c");
        net.node("c").append_command("SET y=2", Vec::new()).unwrap();
        net.run();
        // Minority candidate bumps its term while isolated
        net.timeout("a");
        net.timeout("a");
        assert_eq!(net.node("a").current_term(), 2);
        assert_eq!(net.node("a").role(), Role::Candidate);

        net.blocked.clear();
        // Leader's next AppendEntries carries a stale term; a's reply deposes it
        let now = net.now;
        net.node("c").heartbeat(now);
        net.run();
        assert!(!net.node("c").is_leader());

        net.timeout("c");
        assert!(net.node("c").is_leader());
        assert_eq!(net.node("c").current_term(), 3);
        net.node("c").append_command("SET z=3", Vec::new()).unwrap();
        net.run();

        for node in net.nodes.values() {
            assert_eq!(node.role() == Role::Leader, node.id() == "c");
            assert_eq!(node.log_len(), 2, "node {}", node.id());
            assert_eq!(node.commit_index(), Some(1), "node {}", node.id());
        }
    }

    #[test]
    fn test_leader_without_quorum_contact_steps_down() {
        let mut net = Net::new(&IDS);
        net.timeout("a");
        net.node("a").append_command("SET x=1", Vec::new()).unwrap();
        net.run();

        let beat = |net: &mut Net| {
            net.now += Duration::from_millis(50);
            let now = net.now;
            net.node("a").tick(now);
            net.run();
        };
        for _ in 0..4 {
            beat(&mut net);
        }
        assert!(net.node("a").is_leader());

        // Only b still answers; a needs two followers for a quorum of five
        net.split(&["a", "b"]);
        for _ in 0..4 {
            beat(&mut net);
        }
        assert_eq!(net.node("a").role(), Role::Follower);
        assert_eq!(net.node("a").leader_id(), None);
        assert_eq!(net.node("a").current_term(), 1);
        assert!(matches!(
            net.node("a").append_command("SET z=3", Vec::new()),
            Err(CohortError::NotLeader { leader: None, .. })
        ));
        assert_eq!(net.node("a").log_len(), 1);
    }

    #[test]
    fn test_candidate_steps_down_on_equal_term_append() {
        let now = Instant::now();
        let mut candidate = node("b", &["a", "b", "c"], now);
        candidate.on_election_timeout(now);
        assert_eq!(candidate.role(), Role::Candidate);

        let response = candidate.on_append_entries(
            &AppendEntries {
                term: 1,
                leader_id: "a".to_string(),
                prev_log_index: None,
                prev_log_term: 0,
                entries: Vec::new(),
                leader_commit: None,
            },
            now,
        );
        assert!(response.success);
        assert_eq!(candidate.role(), Role::Follower);
        assert_eq!(candidate.leader_id(), Some("a"));
        assert_eq!(candidate.current_term(), 1);
    }

    #[test]
    fn test_stale_term_rejected_without_mutation() {
        let now = Instant::now();
        let mut follower = node("b", &["a", "b", "c"], now);
        follower.on_election_timeout(now);
        follower.on_election_timeout(now);
        let before = follower.snapshot();

        let vote = follower.on_request_vote(
            &RequestVote {
                term: 1,
                candidate_id: "a".to_string(),
                last_log_index: None,
                last_log_term: 0,
            },
            now,
        );
        assert!(!vote.granted);
        assert_eq!(vote.term, 2);

        let append = follower.on_append_entries(
            &AppendEntries {
                term: 1,
                leader_id: "a".to_string(),
                prev_log_index: None,
                prev_log_term: 0,
                entries: vec![LogEntry::new(1, 0, "x", Vec::new())],
                leader_commit: Some(0),
            },
            now,
        );
        assert!(!append.success);
        assert_eq!(append.term, 2);
        assert_eq!(follower.snapshot(), before);
    }

    #[test]
    fn test_vote_is_first_come_first_served() {
        let now = Instant::now();
        let mut voter = node("c", &["a", "b", "c"], now);
        let request = |candidate: &str| RequestVote {
            term: 1,
            candidate_id: candidate.to_string(),
            last_log_index: None,
            last_log_term: 0,
        };
        assert!(voter.on_request_vote(&request("a"), now).granted);
        assert!(!voter.on_request_vote(&request("b"), now).granted);
        // Repeated request from the same candidate is granted again
        assert!(voter.on_request_vote(&request("a"), now).granted);
        assert_eq!(voter.voted_for(), Some("a"));
    }

    #[test]
    fn test_vote_refused_for_stale_log_but_term_adopted() {
        let now = Instant::now();
        let mut voter = node("c", &["a", "b", "c"], now);
        let accepted = voter.on_append_entries(
            &AppendEntries {
                term: 2,
                leader_id: "a".to_string(),
                prev_log_index: None,
                prev_log_term: 0,
                entries: vec![LogEntry::new(2, 0, "x", Vec::new())],
                leader_commit: None,
            },
            now,
        );
        assert!(accepted.success);
        let response = voter.on_request_vote(
            &RequestVote {
                term: 3,
                candidate_id: "b".to_string(),
                last_log_index: None,
                last_log_term: 0,
            },
            now,
        );
        assert!(!response.granted);
        assert_eq!(voter.current_term(), 3);
        assert_eq!(voter.voted_for(), None);
    }

    #[test]
    fn test_follower_truncates_conflicting_suffix() {
        let now = Instant::now();
        let mut follower = node("c", &["a", "b", "c"], now);
        let entries = vec![
            LogEntry::new(1, 0, "a", Vec::new()),
            LogEntry::new(1, 1, "b", Vec::new()),
            LogEntry::new(1, 2, "c", Vec::new()),
        ];
        let first = AppendEntries {
            term: 1,
            leader_id: "a".to_string(),
            prev_log_index: None,
            prev_log_term: 0,
            entries,
            leader_commit: Some(0),
        };
        assert!(follower.on_append_entries(&first, now).success);
        assert_eq!(follower.commit_index(), Some(0));

        let second = AppendEntries {
            term: 2,
            leader_id: "b".to_string(),
            prev_log_index: Some(0),
            prev_log_term: 1,
            entries: vec![LogEntry::new(2, 1, "B", Vec::new())],
            leader_commit: Some(1),
        };
        let response = follower.on_append_entries(&second, now);
        assert!(response.success);
        assert_eq!(response.match_index, Some(1));
        assert_eq!(follower.log_len(), 2);
        assert_eq!(follower.log()[1].command, "B");
        assert_eq!(follower.commit_index(), Some(1));
    }

    #[test]
    fn test_commit_never_exceeds_last_new_entry() {
        let now = Instant::now();
        let mut follower = node("c", &["a", "b", "c"], now);
        let request = AppendEntries {
            term: 1,
            leader_id: "a".to_string(),
            prev_log_index: None,
            prev_log_term: 0,
            entries: vec![LogEntry::new(1, 0, "a", Vec::new())],
            leader_commit: Some(5),
        };
        assert!(follower.on_append_entries(&request, now).success);
        assert_eq!(follower.commit_index(), Some(0));

        // A heartbeat with a lower leader commit must not move commit backwards
        let heartbeat = AppendEntries {
            entries: Vec::new(),
            prev_log_index: Some(0),
            prev_log_term: 1,
            leader_commit: None,
            ..request
        };
        assert!(follower.on_append_entries(&heartbeat, now).success);
        assert_eq!(follower.commit_index(), Some(0));
    }

    #[test]
    fn test_missing_prev_entry_rejected() {
        let now = Instant::now();
        let mut follower = node("c", &["a", "b", "c"], now);
        let response = follower.on_append_entries(
            &AppendEntries {
                term: 1,
                leader_id: "a".to_string(),
                prev_log_index: Some(3),
                prev_log_term: 1,
                entries: vec![LogEntry::new(1, 4, "x", Vec::new())],
                leader_commit: None,
            },
            now,
        );
        assert!(!response.success);
        assert!(follower.log().is_empty());
        // Contact with a legitimate leader still counts
        assert_eq!(follower.leader_id(), Some("a"));
    }

    #[test]
    fn test_leader_backs_off_to_repair_follower() {
        let mut net = Net::new(&["a", "b", "c"]);
        net.split(&["c"]);
        net.timeout("a");
        for i in 0..3 {
            net.node("a")
                .append_command(format!("cmd-{}", i), Vec::new())
                .unwrap();
        }
        net.run();
        assert!(net.node("c").log().is_empty());
        assert_eq!(net.node("b").commit_index(), Some(2));

        // New leader starts with next_index = 3 for c and must walk back to 0
        net.timeout("b");
        assert!(net.node("b").is_leader());
        net.blocked.clear();
        let now = net.now;
        net.node("b").heartbeat(now);
        net.run();

        assert_eq!(net.node("c").log_len(), 3);
        assert_eq!(net.node("c").commit_index(), Some(2));
        assert_eq!(net.node("c").current_term(), 2);
        assert_eq!(
            net.node("b").cursor("c"),
            Some(ReplicationCursor {
                next_index: 3,
                match_index: Some(2)
            })
        );
    }

    #[test]
    fn test_handle_message_validation() {
        let now = Instant::now();
        let mut receiver = node("b", &["a", "b", "c"], now);
        let payload = |candidate: &str| {
            RaftMessage::RequestVote(RequestVote {
                term: 1,
                candidate_id: candidate.to_string(),
                last_log_index: None,
                last_log_term: 0,
            })
        };

        let wrong_target = Message::new("a".to_string(), "c".to_string(), payload("a"), 1);
        assert!(!receiver.handle_message(wrong_target, now));

        let unknown = Message::new("z".to_string(), "b".to_string(), payload("z"), 1);
        assert!(!receiver.handle_message(unknown, now));

        let spoofed = Message::new("a".to_string(), "b".to_string(), payload("c"), 1);
        assert!(!receiver.handle_message(spoofed, now));

        let valid = Message::new("a".to_string(), "b".to_string(), payload("a"), 2);
        assert!(receiver.handle_message(valid.clone(), now));
        assert!(!receiver.handle_message(valid, now));

        let replies = receiver.take_outbox();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].target(), Some("a"));
        assert!(matches!(
            replies[0].payload(),
            RaftMessage::VoteResponse(VoteResponse { granted: true, .. })
        ));
    }

    #[test]
    fn test_sequence_window() {
        let mut window = SequenceWindow::default();
        assert!(window.observe(3, 4));
        assert!(window.observe(1, 4));
        assert!(!window.observe(3, 4));
        assert!(window.observe(10, 4));
        // Fell out of the window
        assert!(!window.observe(5, 4));
        assert!(window.observe(7, 4));
    }

    #[test]
    fn test_failed_node_is_inert_until_recovered() {
        let mut net = Net::new(&["a", "b", "c"]);
        net.timeout("a");
        assert!(net.node("a").is_leader());

        net.node("a").on_node_failed();
        assert_eq!(net.node("a").role(), Role::Follower);
        assert_eq!(net.node("a").next_deadline(), None);
        assert!(matches!(
            net.node("a").append_command("x", Vec::new()),
            Err(CohortError::NodeUnavailable(_))
        ));
        let now = net.now;
        net.node("a").on_election_timeout(now);
        assert_eq!(net.node("a").current_term(), 1);

        net.timeout("b");
        assert!(net.node("b").is_leader());
        assert_eq!(net.node("a").current_term(), 1);

        net.node("a").on_node_recovered(now);
        assert_eq!(net.node("a").status(), NodeStatus::Recovering);
        net.node("b").heartbeat(now);
        net.run();
        assert_eq!(net.node("a").status(), NodeStatus::Active);
        assert_eq!(net.node("a").leader_id(), Some("b"));
        assert_eq!(net.node("a").current_term(), 2);
    }

    #[test]
    fn test_tick_drives_election_and_heartbeat() {
        let now = Instant::now();
        let mut a = node("a", &["a", "b"], now);
        let deadline = a.next_deadline().unwrap();
        a.tick(deadline - Duration::from_millis(1));
        assert_eq!(a.role(), Role::Follower);

        a.tick(deadline);
        assert_eq!(a.role(), Role::Candidate);
        let outbox = a.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert!(outbox[0].is_broadcast());

        a.on_vote_response(
            &VoteResponse {
                term: 1,
                voter_id: "b".to_string(),
                granted: true,
            },
            deadline,
        );
        assert!(a.is_leader());
        assert_eq!(a.take_outbox().len(), 1);
        let beat = a.next_deadline().unwrap();
        assert_eq!(beat, deadline + Duration::from_millis(50));
        a.tick(beat);
        assert_eq!(a.take_outbox().len(), 1);
    }

    #[test]
    fn test_apply_committed_with_callback() {
        let now = Instant::now();
        let mut solo = node("a", &["a"], now);
        solo.on_election_timeout(now);
        solo.append_command("SET x=1", b"1".to_vec()).unwrap();
        solo.append_command("SET y=2", b"2".to_vec()).unwrap();

        let mut applied = Vec::new();
        let count = solo.apply_committed_with(|command, data| {
            applied.push((command.to_string(), data.to_vec()));
        });
        assert_eq!(count, 2);
        assert_eq!(applied[1], ("SET y=2".to_string(), b"2".to_vec()));
        assert_eq!(solo.last_applied(), Some(1));
        assert_eq!(solo.apply_committed_with(|_, _| {}), 0);
    }

    #[test]
    fn test_vote_from_unknown_node_ignored() {
        let now = Instant::now();
        let mut a = node("a", &["a", "b", "c"], now);
        a.on_election_timeout(now);
        a.on_vote_response(
            &VoteResponse {
                term: 1,
                voter_id: "z".to_string(),
                granted: true,
            },
            now,
        );
        assert_eq!(a.role(), Role::Candidate);
    }

    proptest::proptest! {
        #[test]
        fn prop_at_most_one_leader_per_term(
            events in proptest::collection::vec((0usize..5, 0usize..4), 1..40)
        ) {
            let mut net = Net::new(&IDS);
            let mut leaders: BTreeMap<Term, NodeId> = BTreeMap::new();
            for (who, split) in events {
                net.blocked.clear();
                match split {
                    1 => net.split(&["a", "b"]),
                    2 => net.split(&["a", "c", "e"]),
                    _ => {}
                }
                net.timeout(IDS[who]);
                for node in net.nodes.values() {
                    if node.is_leader() {
                        let previous = leaders
                            .entry(node.current_term())
                            .or_insert_with(|| node.id().to_string());
                        proptest::prop_assert_eq!(previous.as_str(), node.id());
                    }
                    node.assert_invariants();
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "beyond log end")]
    fn test_invariant_violation_panics() {
        let now = Instant::now();
        let mut a = node("a", &["a"], now);
        a.state.commit_index = Some(0);
        a.assert_invariants();
    }
}
