//! Command sequencing over a Marlin2 serial link
//!
//! The connection owns the FIFO of queued commands and routes every received
//! line to the oldest unfinished one. Only the active command is on the wire,
//! so at most one command is ever unacknowledged.

use super::commands::lines::{is_auto_report, is_metadata};
use super::commands::{Command, CommandReply};
use crate::communication::line_framer::LineFramer;
use crate::communication::LineWriter;
use bedleveler_core::{ConnectionError, Error};
use std::collections::VecDeque;

/// Identifies a command handed to [`CommandConnection::send`]
pub type CommandTicket = u64;

/// Progress reported by the connection
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The command's request line was written to the port
    Written {
        ticket: CommandTicket,
        request: String,
    },
    /// The command consumed its terminal line
    Completed {
        ticket: CommandTicket,
        outcome: Result<CommandReply, Error>,
    },
}

#[derive(Debug)]
struct Entry {
    ticket: CommandTicket,
    command: Command,
    detached: bool,
}

/// FIFO command queue bound to one line writer
pub struct CommandConnection<W: LineWriter> {
    writer: W,
    framer: LineFramer,
    active: Option<Entry>,
    queue: VecDeque<Entry>,
    next_ticket: CommandTicket,
    /// Set while stale reply lines of a detached or failed command may
    /// still arrive
    draining: bool,
    events: Vec<ConnectionEvent>,
}

impl<W: LineWriter> CommandConnection<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            framer: LineFramer::new(),
            active: None,
            queue: VecDeque::new(),
            next_ticket: 1,
            draining: false,
            events: Vec::new(),
        }
    }

    /// Queue a command. It is written immediately when nothing else is
    /// awaiting a reply.
    pub fn send(&mut self, command: Command) -> Result<CommandTicket, ConnectionError> {
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        tracing::debug!("Queued command {}: {}", ticket, command);
        self.queue.push_back(Entry {
            ticket,
            command,
            detached: false,
        });

        if self.active.is_none() {
            self.promote()?;
        }
        Ok(ticket)
    }

    /// Feed raw bytes read from the port
    pub fn receive(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        for line in self.framer.push(bytes) {
            self.handle_line(&line)?;
        }
        Ok(())
    }

    /// Drain the events produced since the last call
    pub fn take_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Stop reporting on a command.
    ///
    /// A queued command is dropped without being written. The active command
    /// keeps consuming its reply lines, but its completion is discarded.
    /// Returns false if the ticket is unknown.
    pub fn detach(&mut self, ticket: CommandTicket) -> bool {
        if let Some(entry) = self.active.as_mut().filter(|e| e.ticket == ticket) {
            tracing::debug!("Detached active command {}", entry.command);
            entry.detached = true;
            self.draining = true;
            return true;
        }

        match self.queue.iter().position(|e| e.ticket == ticket) {
            Some(index) => {
                if let Some(entry) = self.queue.remove(index) {
                    tracing::debug!("Dropped queued command {}", entry.command);
                }
                true
            }
            None => false,
        }
    }

    /// Forget every command and any partial line
    pub fn reset(&mut self) {
        self.framer.clear();
        self.active = None;
        self.queue.clear();
        self.events.clear();
        self.draining = false;
    }

    /// True when no command is active or queued
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }

    /// Ticket of the command awaiting a reply
    pub fn active_ticket(&self) -> Option<CommandTicket> {
        self.active.as_ref().map(|e| e.ticket)
    }

    /// Number of commands waiting behind the active one
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// The underlying writer
    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn promote(&mut self) -> Result<(), ConnectionError> {
        let Some(entry) = self.queue.pop_front() else {
            return Ok(());
        };

        self.writer.write_line(entry.command.request())?;
        self.draining = false;
        self.events.push(ConnectionEvent::Written {
            ticket: entry.ticket,
            request: entry.command.request().to_string(),
        });
        self.active = Some(entry);
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        let Some(entry) = self.active.as_mut() else {
            return self.handle_idle_line(line);
        };

        tracing::trace!("Received for {}: {}", entry.command.kind(), line);
        let outcome = match entry.command.process_line(line) {
            Ok(None) => return Ok(()),
            Ok(Some(reply)) => Ok(reply),
            Err(e) => Err(e),
        };

        if let Some(entry) = self.active.take() {
            if let Err(e) = &outcome {
                tracing::error!("Command {} failed: {}", entry.command, e);
                self.draining = true;
            }
            if entry.detached {
                tracing::debug!("Discarded reply of detached command {}", entry.command);
            } else {
                self.events.push(ConnectionEvent::Completed {
                    ticket: entry.ticket,
                    outcome,
                });
            }
        }

        self.promote()
    }

    fn handle_idle_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        if is_metadata(line) || is_auto_report(line) {
            tracing::trace!("Ignored idle line: {}", line);
            return Ok(());
        }

        if self.draining {
            tracing::debug!("Dropped stale line: {}", line);
            return Ok(());
        }

        tracing::error!("Received a line with no pending command: {}", line);
        Err(ConnectionError::UnexpectedLine {
            line: line.to_string(),
        })
    }
}
