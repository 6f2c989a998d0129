//! Display gating for team-mode agents that run concurrently on the server
//! but should be shown one after another.
//!
//! A gate holds an ordered chain of agent names. The first agent in the
//! chain is visible from the start; each later agent becomes visible once
//! every agent before it has finished at least once. Agents outside the
//! chain are always visible. Events for hidden agents are buffered and the
//! buffer is flushed when the agent is unlocked.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedAgent {
    pub role: String,
    pub content: String,
    pub started: bool,
    pub completed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AgentGate {
    chain: Vec<String>,
    /// Number of chain entries currently visible.
    unlocked: usize,
    buffers: HashMap<String, BufferedAgent>,
    completed_once: HashSet<String>,
}

impl AgentGate {
    pub fn new(chain: Vec<String>) -> Self {
        let unlocked = chain.len().min(1);
        Self {
            chain,
            unlocked,
            buffers: HashMap::new(),
            completed_once: HashSet::new(),
        }
    }

    /// A gate that shows every agent immediately.
    pub fn transparent() -> Self {
        Self::default()
    }

    pub fn is_visible(&self, agent_name: &str) -> bool {
        match self.chain.iter().position(|name| name == agent_name) {
            Some(index) => index < self.unlocked,
            None => true,
        }
    }

    /// Records a (re)start and returns whether the agent is visible.
    pub fn record_start(&mut self, agent_name: &str, role: &str) -> bool {
        let buffer = self.buffers.entry(agent_name.to_string()).or_default();
        buffer.role = role.to_string();
        buffer.content.clear();
        buffer.started = true;
        buffer.completed = false;
        self.is_visible(agent_name)
    }

    pub fn record_message(&mut self, agent_name: &str, content: &str) -> bool {
        let buffer = self.buffers.entry(agent_name.to_string()).or_default();
        if buffer.role.is_empty() {
            buffer.role = agent_name.to_string();
        }
        buffer.started = true;
        buffer.content = content.to_string();
        self.is_visible(agent_name)
    }

    /// Records completion. Returns whether the agent itself is visible and
    /// the agents that became visible because of it, in chain order.
    pub fn record_done(&mut self, agent_name: &str, content: &str) -> (bool, Vec<String>) {
        let buffer = self.buffers.entry(agent_name.to_string()).or_default();
        if buffer.role.is_empty() {
            buffer.role = agent_name.to_string();
        }
        buffer.started = true;
        buffer.content = content.to_string();
        buffer.completed = true;

        let visible = self.is_visible(agent_name);
        self.completed_once.insert(agent_name.to_string());
        (visible, self.advance())
    }

    pub fn buffered(&self, agent_name: &str) -> Option<&BufferedAgent> {
        self.buffers.get(agent_name)
    }

    /// Unlock successors while the last visible chain entry has finished at
    /// least once. Unlocks never go backwards.
    fn advance(&mut self) -> Vec<String> {
        let mut newly_visible = Vec::new();
        while self.unlocked > 0
            && self.unlocked < self.chain.len()
            && self.completed_once.contains(&self.chain[self.unlocked - 1])
        {
            newly_visible.push(self.chain[self.unlocked].clone());
            self.unlocked += 1;
        }
        newly_visible
    }
}
