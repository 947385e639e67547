use std::collections::VecDeque;

/// How a tool result with no id match is paired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Match by id; otherwise hand back the oldest pending invocation. Assumes
    /// results arrive in invocation order whenever ids are missing.
    #[default]
    IdThenFifo,
    /// Only an exact id match pairs a result.
    IdOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingTool<T> {
    pub id: String,
    pub params: T,
}

/// Pairs tool invocations with their results within one execution.
#[derive(Debug, Clone)]
pub struct ToolCorrelator<T> {
    pending: VecDeque<PendingTool<T>>,
    policy: MatchPolicy,
}

impl<T> Default for ToolCorrelator<T> {
    fn default() -> Self {
        Self::new(MatchPolicy::default())
    }
}

impl<T> ToolCorrelator<T> {
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            pending: VecDeque::new(),
            policy,
        }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn add_tool_use(&mut self, id: impl Into<String>, params: T) {
        self.pending.push_back(PendingTool {
            id: id.into(),
            params,
        });
    }

    /// Remove and return the invocation a result with `id` belongs to.
    ///
    /// Under `IdThenFifo` an empty or unmatched id falls back to the oldest
    /// pending entry, so this returns `None` only when nothing is pending.
    pub fn match_result(&mut self, id: &str) -> Option<T> {
        if !id.is_empty() {
            if let Some(position) = self.pending.iter().position(|pending| pending.id == id) {
                return self.pending.remove(position).map(|pending| pending.params);
            }
        }
        match self.policy {
            MatchPolicy::IdThenFifo => self.pending.pop_front().map(|pending| pending.params),
            MatchPolicy::IdOnly => None,
        }
    }

    /// Drain every pending invocation in insertion order.
    pub fn flush(&mut self) -> Vec<PendingTool<T>> {
        self.pending.drain(..).collect()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
