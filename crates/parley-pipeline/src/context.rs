//! Conversation transcript shared by the aggregators and the model stage.
//!
//! The first turn is always the system prompt. User and assistant turns
//! alternate: appending a turn with the same role as the last one extends
//! that turn instead of adding a new one.
//!
//! The assistant aggregator builds the open assistant turn incrementally
//! (one piece per spoken sentence). When the caller interrupts, the user
//! aggregator seals that turn as it stands and raises the floor epoch so
//! late writes from the interrupted response are ignored.

use parley_types::{Role, Turn};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct PendingTurn {
    epoch: u64,
    text: String,
}

#[derive(Debug)]
struct ContextState {
    turns: Vec<Turn>,
    pending: Option<PendingTurn>,
    floor: u64,
}

impl ContextState {
    fn push(&mut self, role: Role, content: &str) {
        if role != Role::System {
            if let Some(last) = self.turns.last_mut() {
                if last.role == role {
                    if !last.content.is_empty() && !content.is_empty() {
                        last.content.push(' ');
                    }
                    last.content.push_str(content);
                    return;
                }
            }
        }
        self.turns.push(Turn::new(role, content));
    }

    fn last_role(&self) -> Option<Role> {
        self.turns.last().map(|turn| turn.role)
    }
}

#[derive(Debug)]
pub struct ConversationContext {
    state: Mutex<ContextState>,
}

impl ConversationContext {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(ContextState {
                turns: vec![Turn::system(system_prompt)],
                pending: None,
                floor: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a turn. Blank user and assistant turns are ignored.
    /// Returns whether the context changed.
    pub fn append(&self, role: Role, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() && role != Role::System {
            return false;
        }
        self.lock().push(role, content);
        true
    }

    /// Opens the assistant turn for `epoch`.
    pub fn begin_assistant(&self, epoch: u64) {
        let mut state = self.lock();
        if epoch < state.floor {
            return;
        }
        if state.pending.as_ref().map(|pending| pending.epoch) == Some(epoch) {
            return;
        }
        if let Some(previous) = state.pending.take() {
            if !previous.text.is_empty() {
                state.push(Role::Assistant, &previous.text);
            }
        }
        state.pending = Some(PendingTurn {
            epoch,
            text: String::new(),
        });
    }

    /// Adds spoken text to the open assistant turn.
    pub fn extend_assistant(&self, epoch: u64, text: &str) {
        let text = text.trim();
        let mut state = self.lock();
        if epoch < state.floor || text.is_empty() {
            return;
        }
        let pending = state.pending.get_or_insert_with(|| PendingTurn {
            epoch,
            text: String::new(),
        });
        if pending.epoch != epoch {
            return;
        }
        if !pending.text.is_empty() {
            pending.text.push(' ');
        }
        pending.text.push_str(text);
    }

    /// Closes the assistant turn for `epoch` and records what was said.
    pub fn commit_assistant(&self, epoch: u64) {
        let mut state = self.lock();
        if epoch < state.floor {
            return;
        }
        let matches = state
            .pending
            .as_ref()
            .map(|pending| pending.epoch == epoch)
            .unwrap_or(false);
        if !matches {
            return;
        }
        if let Some(pending) = state.pending.take() {
            if !pending.text.is_empty() {
                state.push(Role::Assistant, &pending.text);
            }
        }
    }

    /// Seals the assistant turn cut off by an interruption and ignores any
    /// later writes for epochs below `next_epoch`.
    ///
    /// The sealed turn holds whatever was spoken so far and may be empty,
    /// so the interrupting user turn never merges into the previous one.
    pub fn seal_assistant(&self, next_epoch: u64) {
        let mut state = self.lock();
        let spoken = state
            .pending
            .take()
            .map(|pending| pending.text)
            .unwrap_or_default();
        if !spoken.is_empty() {
            state.push(Role::Assistant, &spoken);
        } else if state.last_role() == Some(Role::User) {
            state.turns.push(Turn::assistant(""));
        }
        state.floor = state.floor.max(next_epoch);
    }

    /// Copy of the turns committed so far.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.lock().turns.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().turns.is_empty()
    }
}
