//! Command dispatch
//!
//! Maps command names to handlers and routes decoded packets to them.
//! The table is filled before a connection starts; the receive task
//! works on a read-only snapshot.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::Packet;

/// Dispatch errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Command already registered: {0}")]
    DuplicateCommand(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Handler for {command} failed: {reason}")]
    HandlerFailed { command: String, reason: String },
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Something that reacts to one command
pub trait CommandHandler: Send + Sync + 'static {
    /// Handle a payload sent by `sender_id`
    fn handle(&self, payload: &[u8], sender_id: i32) -> anyhow::Result<()>;
}

impl<F> CommandHandler for F
where
    F: Fn(&[u8], i32) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, payload: &[u8], sender_id: i32) -> anyhow::Result<()> {
        self(payload, sender_id)
    }
}

/// Command name to handler mapping
#[derive(Clone, Default)]
pub struct CommandTable {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded with one built-in handler
    pub(crate) fn with_handler<F>(command: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[u8], i32) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut handlers: HashMap<String, Arc<dyn CommandHandler>> = HashMap::new();
        handlers.insert(command.into(), Arc::new(handler));
        Self { handlers }
    }

    /// Register a closure. An existing entry is never overwritten.
    pub fn register<F>(&mut self, command: impl Into<String>, handler: F) -> DispatchResult<()>
    where
        F: Fn(&[u8], i32) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_handler(command, handler)
    }

    /// Register any `CommandHandler` implementation
    pub fn register_handler<H>(
        &mut self,
        command: impl Into<String>,
        handler: H,
    ) -> DispatchResult<()>
    where
        H: CommandHandler,
    {
        let command = command.into();
        if self.handlers.contains_key(&command) {
            return Err(DispatchError::DuplicateCommand(command));
        }

        tracing::debug!("Registered handler for {}", command);
        self.handlers.insert(command, Arc::new(handler));
        Ok(())
    }

    /// Route a packet to its handler, on the calling thread.
    ///
    /// Errors and panics inside the handler come back as `HandlerFailed`.
    pub fn dispatch(&self, packet: &Packet) -> DispatchResult<()> {
        let handler = self
            .handlers
            .get(&packet.command)
            .ok_or_else(|| DispatchError::UnknownCommand(packet.command.clone()))?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(&packet.payload, packet.sender_id)
        }));

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DispatchError::HandlerFailed {
                command: packet.command.clone(),
                reason: format!("{:#}", e),
            }),
            Err(panic) => Err(DispatchError::HandlerFailed {
                command: packet.command.clone(),
                reason: panic_message(panic.as_ref()),
            }),
        }
    }

    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered command names, sorted
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTable")
            .field("commands", &self.commands())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_invokes_handler() {
        let seen = Arc::new(AtomicI32::new(0));
        let sink = seen.clone();

        let mut table = CommandTable::new();
        table
            .register("spawn", move |payload, sender| {
                sink.store(sender + payload.len() as i32, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        table.dispatch(&Packet::new("spawn", 7, vec![0u8; 3])).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut table = CommandTable::new();
        table.register("spawn", |_, _| Ok(())).unwrap();

        let result = table.register("spawn", |_, _| anyhow::bail!("second"));

        assert_eq!(
            result,
            Err(DispatchError::DuplicateCommand("spawn".to_string()))
        );
        assert_eq!(table.len(), 1);
        assert!(table.dispatch(&Packet::anonymous("spawn", Vec::new())).is_ok());
    }

    #[test]
    fn test_unknown_command_does_not_stop_later_packets() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut table = CommandTable::new();
        table
            .register("known", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let packets = [
            Packet::anonymous("known", Vec::new()),
            Packet::anonymous("mystery", Vec::new()),
            Packet::anonymous("known", Vec::new()),
        ];
        let results: Vec<_> = packets.iter().map(|p| table.dispatch(p)).collect();

        assert_eq!(
            results[1],
            Err(DispatchError::UnknownCommand("mystery".to_string()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_error_is_reported() {
        let mut table = CommandTable::new();
        table
            .register("fails", |_, _| anyhow::bail!("bad payload"))
            .unwrap();

        let result = table.dispatch(&Packet::anonymous("fails", Vec::new()));

        assert_eq!(
            result,
            Err(DispatchError::HandlerFailed {
                command: "fails".to_string(),
                reason: "bad payload".to_string(),
            })
        );
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let mut table = CommandTable::new();
        table
            .register("explodes", |_, _| panic!("boom"))
            .unwrap();

        let result = table.dispatch(&Packet::anonymous("explodes", Vec::new()));

        match result {
            Err(DispatchError::HandlerFailed { command, reason }) => {
                assert_eq!(command, "explodes");
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_seeded_table_keeps_its_entry() {
        let mut table = CommandTable::with_handler("set_id", |_, _| Ok(()));
        assert_eq!(table.commands(), vec!["set_id"]);

        let result = table.register("set_id", |_, _| anyhow::bail!("override"));
        assert_eq!(
            result,
            Err(DispatchError::DuplicateCommand("set_id".to_string()))
        );
        assert!(table.dispatch(&Packet::anonymous("set_id", Vec::new())).is_ok());
    }

    #[test]
    fn test_commands_sorted() {
        let mut table = CommandTable::new();
        table.register("b", |_, _| Ok(())).unwrap();
        table.register("a", |_, _| Ok(())).unwrap();
        assert_eq!(table.commands(), vec!["a", "b"]);
        assert!(table.contains("a"));
        assert!(!table.contains("c"));
    }
}
