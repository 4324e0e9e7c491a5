//! Scripted instrument for tests and simulated runs.
//!
//! Queries are answered from per-command reply queues; the last reply in a
//! queue repeats forever. Clones share state, so a test can keep a handle
//! after moving the instrument into a sweep runner or bench.

use super::{Instrument, InstrumentError};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

#[derive(Debug, Default)]
struct MockState {
    replies: HashMap<String, VecDeque<Option<String>>>,
    failing_writes: HashSet<String>,
    commands: Vec<String>,
    closed: bool,
}

/// In-memory SCPI instrument.
#[derive(Debug, Clone)]
pub struct MockInstrument {
    id: String,
    state: Rc<RefCell<MockState>>,
}

impl MockInstrument {
    /// New instrument with no scripted replies.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Rc::new(RefCell::new(MockState::default())),
        }
    }

    /// Queue a reply for `command`.
    pub fn respond(self, command: &str, reply: impl Into<String>) -> Self {
        self.push(command, Some(reply.into()));
        self
    }

    /// Queue several replies for `command`, answered in order.
    pub fn respond_seq<S: Into<String>>(self, command: &str, replies: impl IntoIterator<Item = S>) -> Self {
        for reply in replies {
            self.push(command, Some(reply.into()));
        }
        self
    }

    /// Queue a timeout for `command`.
    pub fn fail_query(self, command: &str) -> Self {
        self.push(command, None);
        self
    }

    /// Make every write of exactly `command` fail.
    pub fn fail_write(self, command: &str) -> Self {
        self.state
            .borrow_mut()
            .failing_writes
            .insert(command.to_string());
        self
    }

    /// Every command and query sent, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    fn push(&self, command: &str, reply: Option<String>) {
        self.state
            .borrow_mut()
            .replies
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
    }

    fn check_open(&self, state: &MockState) -> Result<(), InstrumentError> {
        if state.closed {
            Err(InstrumentError::Closed(self.id.clone()))
        } else {
            Ok(())
        }
    }
}

impl Instrument for MockInstrument {
    fn id(&self) -> &str {
        &self.id
    }

    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        let mut state = self.state.borrow_mut();
        self.check_open(&state)?;
        state.commands.push(command.to_string());
        if state.failing_writes.contains(command) {
            return Err(InstrumentError::Transport {
                instrument: self.id.clone(),
                reason: format!("write '{}' rejected", command),
            });
        }
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        let mut state = self.state.borrow_mut();
        self.check_open(&state)?;
        state.commands.push(command.to_string());

        let reply = match state.replies.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().flatten(),
            Some(queue) => queue.front().cloned().flatten(),
            None => Some(String::new()),
        };

        reply.ok_or_else(|| InstrumentError::Timeout {
            instrument: self.id.clone(),
            command: command.to_string(),
        })
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        self.state.borrow_mut().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_queue_repeats_last() {
        let mut dmm = MockInstrument::new("dmm").respond_seq("meas:volt?", ["1.0", "2.0"]);
        assert_eq!(dmm.query("meas:volt?").unwrap(), "1.0");
        assert_eq!(dmm.query("meas:volt?").unwrap(), "2.0");
        assert_eq!(dmm.query("meas:volt?").unwrap(), "2.0");
    }

    #[test]
    fn test_scripted_timeout() {
        let mut dmm = MockInstrument::new("dmm")
            .respond("meas:volt?", "1.0")
            .fail_query("meas:volt?");
        assert!(dmm.query("meas:volt?").is_ok());
        assert!(matches!(
            dmm.query("meas:volt?"),
            Err(InstrumentError::Timeout { .. })
        ));
    }

    #[test]
    fn test_clones_share_log() {
        let handle = MockInstrument::new("eload");
        let mut boxed: Box<dyn Instrument> = Box::new(handle.clone());
        boxed.write("input on").unwrap();
        boxed.close().unwrap();
        assert_eq!(handle.commands(), vec!["input on".to_string()]);
        assert!(handle.is_closed());
        assert!(boxed.write("input off").is_err());
    }
}
