//! In-memory replicated log
//!
//! Entries are append-only from the leader's point of view. Followers may
//! truncate an uncommitted suffix that conflicts with the leader's log.

use cohort_common::{CohortError, Result};

use super::types::{LogEntry, LogIndex, Term};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicatedLog {
    entries: Vec<LogEntry>,
}

impl ReplicatedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_index(&self) -> Option<LogIndex> {
        self.len().checked_sub(1)
    }

    /// Term of the last entry, 0 for an empty log
    pub fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        self.entries.get(index as usize)
    }

    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        self.get(index).map(|e| e.term)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Up to `max` entries starting at `from`
    pub fn entries_from(&self, from: LogIndex, max: u64) -> Vec<LogEntry> {
        self.entries
            .iter()
            .skip(from as usize)
            .take(max as usize)
            .cloned()
            .collect()
    }

    /// Entries in `from..=to`, clamped to the log
    pub fn range(&self, from: LogIndex, to: LogIndex) -> Vec<LogEntry> {
        if from > to {
            return Vec::new();
        }
        let end = (to + 1).min(self.len()) as usize;
        let start = (from as usize).min(end);
        self.entries[start..end].to_vec()
    }

    /// Append a new entry at index = current length
    pub fn append(&mut self, term: Term, command: impl Into<String>, data: Vec<u8>) -> LogIndex {
        let index = self.len();
        self.entries.push(LogEntry::new(term, index, command, data));
        index
    }

    /// Whether the entry preceding an AppendEntries batch is present with the expected term
    pub fn matches(&self, prev_index: Option<LogIndex>, prev_term: Term) -> bool {
        match prev_index {
            None => true,
            Some(index) => self.term_at(index) == Some(prev_term),
        }
    }

    /// Whether a candidate's log is at least as up to date as this one.
    ///
    /// Compares last-entry term first, then length.
    pub fn is_up_to_date(&self, last_log_term: Term, last_log_index: Option<LogIndex>) -> bool {
        let candidate_len = last_log_index.map(|i| i + 1).unwrap_or(0);
        match last_log_term.cmp(&self.last_term()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => candidate_len >= self.len(),
        }
    }

    /// Merge a contiguous batch sent by the leader.
    ///
    /// Entries already present with the same term are skipped; the first entry whose
    /// term differs truncates the local suffix from that index. Truncating at or below
    /// `committed` is refused. Returns the index of the last entry in the batch.
    pub fn merge(
        &mut self,
        batch: &[LogEntry],
        committed: Option<LogIndex>,
    ) -> Result<Option<LogIndex>> {
        let Some(first) = batch.first() else {
            return Ok(None);
        };
        if first.index > self.len() {
            return Err(CohortError::Protocol(format!(
                "entry {} leaves a gap after log length {}",
                first.index,
                self.len()
            )));
        }
        for pair in batch.windows(2) {
            if pair[1].index != pair[0].index + 1 || pair[1].term < pair[0].term {
                return Err(CohortError::Protocol(format!(
                    "batch is not contiguous at index {}",
                    pair[1].index
                )));
            }
        }

        for entry in batch {
            match self.term_at(entry.index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    if committed.is_some_and(|c| entry.index <= c) {
                        return Err(CohortError::Protocol(format!(
                            "conflict at committed index {}",
                            entry.index
                        )));
                    }
                    self.entries.truncate(entry.index as usize);
                    self.entries.push(entry.clone());
                }
                None => self.entries.push(entry.clone()),
            }
        }
        Ok(batch.last().map(|e| e.index))
    }
}
