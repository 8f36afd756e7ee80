//! Transaction manager for the command channel.
//!
//! ```text
//!   callers ──call_sync / call_async──► writer (Mutex) ──► device
//!      ▲                                                    │
//!      │ per-call sync_channel(1)                           ▼
//!   correlation table ◄──────────── reader thread ◄── MessageReader
//!      sync FIFO                         │
//!      pending async ids                 └─► dispatch thread ─► handlers
//!      pump observers
//! ```
//!
//! Synchronous calls all share one transaction word, so their waiters are
//! queued in send order and completed in reply order. A waiter that times out
//! keeps its place in the queue with no receiver, so the late reply is
//! absorbed instead of completing the next call. Async calls own a
//! one-byte ID for their lifetime: the first reply bearing their word is the
//! acknowledgement, the second the result.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};
use xmmlink_transport::DeviceStream;

use crate::error::{Result, RpcError};
use crate::message::{strip_txid, Message, MessageKind, DEFAULT_MAX_MESSAGE};
use crate::reader::MessageReader;
use crate::writer::MessageWriter;

/// Command codes at or above this value never complete an async call.
pub const DEFAULT_ACK_THRESHOLD: u32 = 2000;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_TXID: u8 = 255;

/// Configuration for [`RpcClient`].
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Timeout used by callers that don't pick their own.
    pub call_timeout: Duration,
    /// Async replies with a command code below this are correlated with
    /// outstanding calls; the rest are treated as notifications.
    pub ack_code_threshold: u32,
    /// Largest message accepted or sent.
    pub max_message_size: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            ack_code_threshold: DEFAULT_ACK_THRESHOLD,
            max_message_size: DEFAULT_MAX_MESSAGE,
        }
    }
}

/// Callback for unsolicited messages. Runs on the dispatch thread.
pub type UnsolicitedHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// What the reader did with one inbound message, as seen by [`RpcClient::pump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub kind: MessageKind,
    pub command: u32,
    pub word: u32,
    pub body: Bytes,
}

struct SyncWaiter {
    token: u64,
    /// `None` for fire-and-forget and timed-out calls: the reply is consumed
    /// and dropped.
    tx: Option<SyncSender<Message>>,
}

struct PendingAsync {
    token: u64,
    acknowledged: bool,
    tx: SyncSender<Message>,
}

#[derive(Default)]
struct Table {
    closed: bool,
    /// Last ID handed out.
    cursor: u8,
    next_token: u64,
    sync_waiters: VecDeque<SyncWaiter>,
    pending: HashMap<u8, PendingAsync>,
    observers: Vec<(u64, SyncSender<MessageSummary>)>,
}

impl Table {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Next free ID after the cursor, skipping IDs still in flight.
    fn allocate(&mut self) -> Option<u8> {
        for _ in 0..MAX_TXID {
            self.cursor = if self.cursor == MAX_TXID {
                1
            } else {
                self.cursor + 1
            };
            if !self.pending.contains_key(&self.cursor) {
                return Some(self.cursor);
            }
        }
        None
    }

    /// Drop every waiter; blocked callers observe `ChannelClosed`.
    fn close(&mut self) {
        self.closed = true;
        self.sync_waiters.clear();
        self.pending.clear();
        self.observers.clear();
    }
}

struct Shared {
    config: RpcConfig,
    writer: Mutex<MessageWriter<Box<dyn Write + Send>>>,
    table: Mutex<Table>,
    handlers: Mutex<HashMap<u32, UnsolicitedHandler>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connection to the modem's command channel.
///
/// Cloning is cheap; all clones share one reader, one writer and one
/// correlation table.
#[derive(Clone)]
pub struct RpcClient {
    shared: Arc<Shared>,
}

impl RpcClient {
    /// Open the command device and start the reader.
    pub fn open(path: impl AsRef<Path>, config: RpcConfig) -> Result<Self> {
        let stream = DeviceStream::open(path)?;
        let reader = stream.try_clone()?;
        Self::new(reader, stream, config)
    }

    /// Start a client over an already-open channel.
    ///
    /// `reader` moves to a dedicated thread; `writer` is shared by callers.
    pub fn new<R, W>(reader: R, writer: W, config: RpcConfig) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let writer: Box<dyn Write + Send> = Box::new(writer);
        let shared = Arc::new(Shared {
            writer: Mutex::new(MessageWriter::with_max_message(
                writer,
                config.max_message_size,
            )),
            table: Mutex::new(Table::default()),
            handlers: Mutex::new(HashMap::new()),
            config,
        });

        let (unsolicited_tx, unsolicited_rx) = mpsc::channel();

        let dispatch_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("rpc-dispatch".into())
            .spawn(move || dispatch_loop(&dispatch_shared, unsolicited_rx))?;

        let reader = MessageReader::with_max_message(reader, shared.config.max_message_size);
        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("rpc-reader".into())
            .spawn(move || reader_loop(reader, &reader_shared, unsolicited_tx))?;

        Ok(Self { shared })
    }

    pub fn config(&self) -> &RpcConfig {
        &self.shared.config
    }

    /// Send a call with the synchronous word and wait for the next
    /// synchronous reply.
    pub fn call_sync(&self, command: impl Into<u32>, body: &[u8], timeout: Duration) -> Result<Bytes> {
        let command = command.into();
        let (tx, rx) = mpsc::sync_channel(1);

        let token = {
            let mut writer = lock(&self.shared.writer);
            let token = {
                let mut table = lock(&self.shared.table);
                if table.closed {
                    return Err(RpcError::ChannelClosed);
                }
                let token = table.token();
                table.sync_waiters.push_back(SyncWaiter {
                    token,
                    tx: Some(tx),
                });
                token
            };
            if let Err(err) = writer.send(command, None, body) {
                self.forget_sync(token);
                return Err(err);
            }
            token
        };
        debug!(command, len = body.len(), "sync call sent");

        match rx.recv_timeout(timeout) {
            Ok(message) => Ok(message.body),
            Err(RecvTimeoutError::Timeout) => {
                self.abandon_sync(token);
                // the reply may have been delivered before the waiter was abandoned
                if let Ok(message) = rx.try_recv() {
                    return Ok(message.body);
                }
                Err(RpcError::Timeout {
                    operation: format!("call {command:#06x}"),
                    timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(RpcError::ChannelClosed),
        }
    }

    /// Send a call under a fresh transaction ID and wait for its result.
    ///
    /// The acknowledgement is consumed silently. The returned body has the
    /// echoed transaction ID stripped.
    pub fn call_async(&self, command: impl Into<u32>, body: &[u8], timeout: Duration) -> Result<Bytes> {
        let command = command.into();
        let (tx, rx) = mpsc::sync_channel(1);

        let (id, token) = {
            let mut writer = lock(&self.shared.writer);
            let (id, token) = {
                let mut table = lock(&self.shared.table);
                if table.closed {
                    return Err(RpcError::ChannelClosed);
                }
                let id = table.allocate().ok_or(RpcError::Exhausted)?;
                let token = table.token();
                table.pending.insert(
                    id,
                    PendingAsync {
                        token,
                        acknowledged: false,
                        tx,
                    },
                );
                (id, token)
            };
            if let Err(err) = writer.send(command, Some(id), body) {
                self.release(id, token);
                return Err(err);
            }
            (id, token)
        };
        debug!(command, id, len = body.len(), "async call sent");

        match rx.recv_timeout(timeout) {
            Ok(message) => {
                let (echoed, result) = strip_txid(&message.body).ok_or_else(|| {
                    RpcError::ProtocolViolation(format!(
                        "result of transaction {id} lacks the echoed id"
                    ))
                })?;
                if echoed != u32::from(id) {
                    debug!(id, echoed, "result echoes a different transaction id");
                }
                Ok(result)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.release(id, token);
                Err(RpcError::Timeout {
                    operation: format!("transaction {id} (call {command:#06x})"),
                    timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(RpcError::ChannelClosed),
        }
    }

    /// Send a synchronous call without waiting. Its reply is discarded.
    pub fn call_fire_and_forget(&self, command: impl Into<u32>, body: &[u8]) -> Result<()> {
        let command = command.into();
        let mut writer = lock(&self.shared.writer);
        let token = {
            let mut table = lock(&self.shared.table);
            if table.closed {
                return Err(RpcError::ChannelClosed);
            }
            let token = table.token();
            table.sync_waiters.push_back(SyncWaiter { token, tx: None });
            token
        };
        if let Err(err) = writer.send(command, None, body) {
            self.forget_sync(token);
            return Err(err);
        }
        debug!(command, "fire-and-forget call sent");
        Ok(())
    }

    /// Install the handler for unsolicited messages with `command`,
    /// returning the one it replaces.
    pub fn register_unsolicited_handler<F>(
        &self,
        command: impl Into<u32>,
        handler: F,
    ) -> Option<UnsolicitedHandler>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        lock(&self.shared.handlers).insert(command.into(), Arc::new(handler))
    }

    pub fn unregister_unsolicited_handler(&self, command: impl Into<u32>) -> Option<UnsolicitedHandler> {
        lock(&self.shared.handlers).remove(&command.into())
    }

    /// Wait for the reader to dispatch one more message and describe it.
    ///
    /// Replies still go to their callers; this only observes.
    pub fn pump(&self, timeout: Duration) -> Result<MessageSummary> {
        let (tx, rx) = mpsc::sync_channel(1);
        let token = {
            let mut table = lock(&self.shared.table);
            if table.closed {
                return Err(RpcError::ChannelClosed);
            }
            let token = table.token();
            table.observers.push((token, tx));
            token
        };

        match rx.recv_timeout(timeout) {
            Ok(summary) => Ok(summary),
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.shared.table)
                    .observers
                    .retain(|(t, _)| *t != token);
                Err(RpcError::Timeout {
                    operation: "pump".into(),
                    timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(RpcError::ChannelClosed),
        }
    }

    /// IDs of async calls still in flight, ascending.
    pub fn pending_transactions(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = lock(&self.shared.table).pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Synchronous replies still expected, including those whose caller
    /// has given up.
    pub fn pending_sync_calls(&self) -> usize {
        lock(&self.shared.table).sync_waiters.len()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.table).closed
    }

    /// Fail every outstanding call with `ChannelClosed` and refuse new ones.
    ///
    /// The reader thread keeps running until the underlying stream ends.
    pub fn shutdown(&self) {
        lock(&self.shared.table).close();
        info!("rpc client shut down");
    }

    fn forget_sync(&self, token: u64) {
        lock(&self.shared.table)
            .sync_waiters
            .retain(|w| w.token != token);
    }

    /// Keep the waiter's slot so its reply is still matched, but drop it.
    fn abandon_sync(&self, token: u64) {
        let mut table = lock(&self.shared.table);
        if let Some(waiter) = table.sync_waiters.iter_mut().find(|w| w.token == token) {
            waiter.tx = None;
        }
    }

    fn release(&self, id: u8, token: u64) {
        let mut table = lock(&self.shared.table);
        if table.pending.get(&id).is_some_and(|p| p.token == token) {
            table.pending.remove(&id);
        }
    }

    #[cfg(test)]
    fn waiting_pumps(&self) -> usize {
        lock(&self.shared.table).observers.len()
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("config", &self.shared.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn reader_loop<R: Read>(mut reader: MessageReader<R>, shared: &Shared, unsolicited: Sender<Message>) {
    loop {
        let message = match reader.read_message() {
            Ok(message) => message,
            Err(err @ RpcError::MalformedMessage { .. }) => {
                warn!(error = %err, "discarding malformed message");
                continue;
            }
            Err(err @ RpcError::MessageTooLarge { .. }) => {
                let dropped = reader.discard_buffered();
                warn!(error = %err, dropped, "discarding oversized message");
                continue;
            }
            Err(RpcError::ChannelClosed) => {
                info!("command channel closed");
                break;
            }
            Err(err) => {
                warn!(error = %err, "command channel read failed");
                break;
            }
        };
        dispatch(shared, message, &unsolicited);
    }
    lock(&shared.table).close();
}

fn dispatch(shared: &Shared, message: Message, unsolicited: &Sender<Message>) {
    if !message.lengths_agree() {
        warn!(
            length = message.length,
            declared = message.declared_length,
            "length mismatch, framing error?"
        );
    }

    let kind = message.classify(shared.config.ack_code_threshold);
    let summary = MessageSummary {
        kind,
        command: message.command,
        word: message.word,
        body: message.body.clone(),
    };

    let mut table = lock(&shared.table);
    match kind {
        MessageKind::Response => match table.sync_waiters.pop_front() {
            Some(SyncWaiter { tx: Some(tx), .. }) => {
                let _ = tx.try_send(message);
            }
            Some(SyncWaiter { tx: None, .. }) => {
                debug!(command = message.command, "dropping reply nobody is waiting for");
            }
            None => {
                warn!(command = message.command, "response with no call waiting");
            }
        },
        MessageKind::Transaction(id) => {
            match table.pending.get(&id).map(|p| p.acknowledged) {
                None => {
                    warn!(id, command = message.command, "reply for unknown transaction");
                }
                Some(false) => {
                    if let Some(pending) = table.pending.get_mut(&id) {
                        pending.acknowledged = true;
                    }
                    debug!(id, "transaction acknowledged");
                }
                Some(true) => {
                    if let Some(pending) = table.pending.remove(&id) {
                        let _ = pending.tx.try_send(message);
                    }
                    debug!(id, "transaction completed");
                }
            }
        }
        MessageKind::Unsolicited => {
            debug!(
                command = message.command,
                word = message.word,
                "unsolicited message"
            );
            if unsolicited.send(message).is_err() {
                warn!("unsolicited dispatcher is gone, message dropped");
            }
        }
    }

    for (_, observer) in table.observers.drain(..) {
        let _ = observer.try_send(summary.clone());
    }
}

fn dispatch_loop(shared: &Shared, messages: Receiver<Message>) {
    for message in messages {
        let handler = lock(&shared.handlers).get(&message.command).cloned();
        let Some(handler) = handler else {
            debug!(command = message.command, "no handler for unsolicited message");
            continue;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| handler(&message))).is_err() {
            warn!(command = message.command, "unsolicited handler panicked");
        }
    }
}
