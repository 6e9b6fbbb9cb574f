// Raft wire types
// Each payload variant carries only the fields its handler needs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cohort_common::{NodeId, current_millis};

use super::types::{LogEntry, LogIndex, Term};

/// Candidate asks for a vote
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVote {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: Option<LogIndex>,
    pub last_log_term: Term,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub term: Term,
    pub voter_id: NodeId,
    pub granted: bool,
}

/// Leader replication request; an empty `entries` is a heartbeat
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntries {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: Option<LogIndex>,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: Option<LogIndex>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResponse {
    pub term: Term,
    pub follower_id: NodeId,
    pub success: bool,
    /// Highest index known to match the leader, set on success
    pub match_index: Option<LogIndex>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    RequestVote,
    VoteResponse,
    AppendEntries,
    AppendResponse,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::RequestVote => "REQUEST_VOTE",
            MessageType::VoteResponse => "VOTE_RESPONSE",
            MessageType::AppendEntries => "APPEND_ENTRIES",
            MessageType::AppendResponse => "APPEND_RESPONSE",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RaftMessage {
    RequestVote(RequestVote),
    VoteResponse(VoteResponse),
    AppendEntries(AppendEntries),
    AppendResponse(AppendResponse),
}

impl RaftMessage {
    pub fn term(&self) -> Term {
        match self {
            RaftMessage::RequestVote(m) => m.term,
            RaftMessage::VoteResponse(m) => m.term,
            RaftMessage::AppendEntries(m) => m.term,
            RaftMessage::AppendResponse(m) => m.term,
        }
    }

    pub fn kind(&self) -> MessageType {
        match self {
            RaftMessage::RequestVote(_) => MessageType::RequestVote,
            RaftMessage::VoteResponse(_) => MessageType::VoteResponse,
            RaftMessage::AppendEntries(_) => MessageType::AppendEntries,
            RaftMessage::AppendResponse(_) => MessageType::AppendResponse,
        }
    }

    /// Node id the payload claims to come from
    pub fn sender(&self) -> &str {
        match self {
            RaftMessage::RequestVote(m) => &m.candidate_id,
            RaftMessage::VoteResponse(m) => &m.voter_id,
            RaftMessage::AppendEntries(m) => &m.leader_id,
            RaftMessage::AppendResponse(m) => &m.follower_id,
        }
    }
}

/// Envelope exchanged between nodes. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: Uuid,
    source: NodeId,
    /// `None` means broadcast to every reachable node
    target: Option<NodeId>,
    payload: RaftMessage,
    timestamp: i64,
    sequence: u64,
}

impl Message {
    pub fn new(source: NodeId, target: NodeId, payload: RaftMessage, sequence: u64) -> Self {
        Self::build(source, Some(target), payload, sequence)
    }

    pub fn broadcast(source: NodeId, payload: RaftMessage, sequence: u64) -> Self {
        Self::build(source, None, payload, sequence)
    }

    fn build(source: NodeId, target: Option<NodeId>, payload: RaftMessage, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            target,
            payload,
            timestamp: current_millis(),
            sequence,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn is_broadcast(&self) -> bool {
        self.target.is_none()
    }

    pub fn kind(&self) -> MessageType {
        self.payload.kind()
    }

    pub fn payload(&self) -> &RaftMessage {
        &self.payload
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Copy addressed to one recipient of a broadcast; id and sequence are kept
    /// so receivers can recognize duplicates
    pub fn deliver_to(&self, target: &str) -> Self {
        Self {
            target: Some(target.to_string()),
            ..self.clone()
        }
    }

    pub fn into_payload(self) -> RaftMessage {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote_request() -> RaftMessage {
        RaftMessage::RequestVote(RequestVote {
            term: 3,
            candidate_id: "a".to_string(),
            last_log_index: None,
            last_log_term: 0,
        })
    }

    #[test]
    fn test_payload_accessors() {
        let payload = vote_request();
        assert_eq!(payload.term(), 3);
        assert_eq!(payload.kind(), MessageType::RequestVote);
        assert_eq!(payload.sender(), "a");
        assert_eq!(MessageType::AppendResponse.to_string(), "APPEND_RESPONSE");
    }

    #[test]
    fn test_broadcast_fan_out_keeps_identity() {
        let message = Message::broadcast("a".to_string(), vote_request(), 7);
        assert!(message.is_broadcast());
        assert!(message.timestamp() > 0);

        let copy = message.deliver_to("b");
        assert_eq!(copy.target(), Some("b"));
        assert_eq!(copy.id(), message.id());
        assert_eq!(copy.sequence(), 7);
        assert_eq!(copy.source(), "a");
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = Message::new("a".to_string(), "b".to_string(), vote_request(), 1);
        let b = Message::new("a".to_string(), "b".to_string(), vote_request(), 1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_serialized_shape() {
        let message = Message::new("a".to_string(), "b".to_string(), vote_request(), 1);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["payload"]["type"], "RequestVote");
        assert_eq!(json["payload"]["payload"]["candidateId"], "a");
        assert_eq!(json["target"], "b");
    }
}
