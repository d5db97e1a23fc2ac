use std::sync::Arc;

use hashbrown::HashMap;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    core::{
        macro_log::LogSnapshotV1,
        registry::Finish,
        session::{Commit, Session},
    },
    error::{MacroError, OperationError},
    op::StoredEntry,
    persist::{JournalSink, PersistError},
    signature::CallArgs,
    types::{JournalSeq, TicketId},
    value::{Arguments, Value},
};

use super::events::MacroEvent;

/// Runtime tuning knobs for queueing, batching, and snapshots.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Flush the sink after every command that produced journal entries.
    pub flush_on_commit: bool,
    /// Entries buffered before the persistence worker writes a batch.
    pub batch_max_entries: usize,
    /// Longest a buffered entry waits before a batch is written.
    pub batch_max_latency_ms: u64,
    /// Capacity of the command channel.
    pub command_queue_bound: usize,
    /// Capacity of the persistence channel.
    pub persist_queue_bound: usize,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
    /// Commits between automatic snapshots; 0 disables them.
    pub snapshot_every_commits: usize,
    /// Delete journal rows covered by each snapshot once it is written.
    pub compact_after_snapshot: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_commit: true,
            batch_max_entries: 32,
            batch_max_latency_ms: 75,
            command_queue_bound: 256,
            persist_queue_bound: 64,
            event_capacity: 1024,
            snapshot_every_commits: 2000,
            compact_after_snapshot: false,
        }
    }
}

type Reply<R> = oneshot::Sender<Result<R, MacroError>>;
type Reader<T> = Box<dyn FnOnce(&Session<T>) + Send>;

/// Cloneable front end of a session owned by the coordinator task.
pub struct SessionHandle<T> {
    cmd_tx: mpsc::Sender<Command<T>>,
    events_tx: broadcast::Sender<MacroEvent>,
}

impl<T> Clone for SessionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

/// Background invocation accepted by the coordinator.
///
/// The commit happens on the coordinator once the body finishes, whether
/// or not anyone awaits [`BackgroundTicket::wait`].
pub struct BackgroundTicket<T> {
    id: TicketId,
    cmd_tx: mpsc::Sender<Command<T>>,
    done: oneshot::Receiver<Result<Commit, MacroError>>,
}

enum Command<T> {
    Call {
        path: String,
        args: CallArgs,
        resp: Reply<Commit>,
    },
    Set {
        path: String,
        value: Value,
        resp: Reply<Commit>,
    },
    Undo {
        resp: Reply<()>,
    },
    Redo {
        resp: Reply<Commit>,
    },
    Clear {
        resp: oneshot::Sender<()>,
    },
    Read {
        reader: Reader<T>,
    },
    Background {
        path: String,
        args: CallArgs,
        resp: Reply<TicketId>,
        done: Reply<Commit>,
    },
    Cancel {
        ticket: TicketId,
        resp: oneshot::Sender<bool>,
    },
    Flush {
        resp: Reply<JournalSeq>,
    },
    Checkpoint {
        resp: Reply<()>,
    },
    Shutdown {
        resp: Reply<()>,
    },
}

struct Completion<T> {
    ticket: TicketId,
    path: String,
    arguments: Arguments,
    result: Result<Finish<T>, OperationError>,
}

enum PersistMsg {
    Entries(Vec<StoredEntry>),
    Flush {
        resp: oneshot::Sender<Result<JournalSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: LogSnapshotV1,
        last_seq: JournalSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Moves `session` into a coordinator task and returns its handle.
///
/// Journaling follows the sink: with one, the session queues entries for it
/// (including the ones that rebuild its current log if it never journaled);
/// without one, nothing is queued.
///
/// Must be called from within a tokio runtime.
pub fn spawn_session<T>(
    mut session: Session<T>,
    sink: Option<Box<dyn JournalSink>>,
    config: RuntimeConfig,
) -> SessionHandle<T>
where
    T: Send + 'static,
{
    session.set_journaling(sink.is_some());
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command<T>>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<MacroEvent>(config.event_capacity.max(1));
    let (completion_tx, mut completion_rx) = mpsc::unbounded_channel::<Completion<T>>();

    let (persist_tx, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<JournalSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let mut coordinator = Coordinator {
        session,
        events_tx: events_tx.clone(),
        persist_tx,
        config,
        commits_since_snapshot: 0,
        pending: HashMap::new(),
        next_ticket: 1,
        completion_tx,
    };

    tokio::spawn(async move {
        // Journal entries queued before the session was handed over.
        coordinator.persist_pending().await;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if coordinator.handle_command(cmd).await {
                        break;
                    }
                }
                Some(completion) = completion_rx.recv() => {
                    coordinator.handle_completion(completion).await;
                }
                Some(durable) = recv_durable(&mut durable_rx) => {
                    match durable {
                        Ok(seq) => {
                            let _ = coordinator.events_tx.send(MacroEvent::DurableUpTo { seq });
                        }
                        Err(err) => tracing::error!(error = %err, "journal append failed"),
                    }
                }
            }
        }
        tracing::debug!(
            abandoned = coordinator.pending.len(),
            "session coordinator stopped"
        );
    });

    SessionHandle { cmd_tx, events_tx }
}

async fn recv_durable(
    rx: &mut Option<mpsc::UnboundedReceiver<Result<JournalSeq, PersistError>>>,
) -> Option<Result<JournalSeq, PersistError>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<T> SessionHandle<T>
where
    T: Send + 'static,
{
    /// Subscribes to runtime events. Slow receivers may observe lag.
    pub fn subscribe(&self) -> broadcast::Receiver<MacroEvent> {
        self.events_tx.subscribe()
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command<T>) -> Result<R, MacroError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| MacroError::ChannelClosed)?;
        rx.await.map_err(|_| MacroError::ChannelClosed)
    }

    /// Invokes an operation on the coordinator.
    pub async fn call(&self, path: impl Into<String>, args: CallArgs) -> Result<Commit, MacroError> {
        let path = path.into();
        self.request(|resp| Command::Call { path, args, resp }).await?
    }

    /// Assigns a field on the coordinator.
    pub async fn set(&self, path: impl Into<String>, value: impl Into<Value>) -> Result<Commit, MacroError> {
        let path = path.into();
        let value = value.into();
        self.request(|resp| Command::Set { path, value, resp }).await?
    }

    /// Undoes one step.
    pub async fn undo(&self) -> Result<(), MacroError> {
        self.request(|resp| Command::Undo { resp }).await?
    }

    /// Redoes one step.
    pub async fn redo(&self) -> Result<Commit, MacroError> {
        self.request(|resp| Command::Redo { resp }).await?
    }

    /// Empties the undo stacks.
    pub async fn clear(&self) -> Result<(), MacroError> {
        self.request(|resp| Command::Clear { resp }).await
    }

    /// Runs `f` against the session on the coordinator and returns its output.
    pub async fn read<R, F>(&self, f: F) -> Result<R, MacroError>
    where
        R: Send + 'static,
        F: FnOnce(&Session<T>) -> R + Send + 'static,
    {
        self.request(|resp| Command::Read {
            reader: Box::new(move |session: &Session<T>| {
                let _ = resp.send(f(session));
            }),
        })
        .await
    }

    /// Active macro log rendered line by line.
    pub async fn render(&self) -> Result<Vec<String>, MacroError> {
        self.read(|session| session.macro_log().render().collect()).await
    }

    /// `(done, undone)` stack lengths.
    pub async fn stack_lens(&self) -> Result<(usize, usize), MacroError> {
        self.read(|session| (session.done_len(), session.undone_len())).await
    }

    /// Reads a field.
    pub async fn get(&self, path: impl Into<String>) -> Result<Value, MacroError> {
        let path = path.into();
        self.read(move |session| session.get(&path)).await?
    }

    /// Binds `args` and runs the background body on the blocking pool.
    ///
    /// Binding errors are reported here; body and commit errors through
    /// [`BackgroundTicket::wait`].
    pub async fn call_in_background(
        &self,
        path: impl Into<String>,
        args: CallArgs,
    ) -> Result<BackgroundTicket<T>, MacroError> {
        let path = path.into();
        let (done_tx, done_rx) = oneshot::channel();
        let id = self
            .request(|resp| Command::Background {
                path,
                args,
                resp,
                done: done_tx,
            })
            .await??;
        Ok(BackgroundTicket {
            id,
            cmd_tx: self.cmd_tx.clone(),
            done: done_rx,
        })
    }

    /// Waits until every queued journal entry is durable; returns the durable seq.
    pub async fn flush(&self) -> Result<JournalSeq, MacroError> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    /// Flushes, then writes a snapshot of the log (and compacts if configured).
    pub async fn checkpoint(&self) -> Result<(), MacroError> {
        self.request(|resp| Command::Checkpoint { resp }).await?
    }

    /// Flushes outstanding entries and stops the coordinator.
    ///
    /// Later requests fail with [`MacroError::ChannelClosed`].
    pub async fn shutdown(&self) -> Result<(), MacroError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }
}

impl<T> BackgroundTicket<T> {
    /// Identifier reported in [`MacroEvent::Cancelled`].
    pub fn id(&self) -> TicketId {
        self.id
    }

    /// Cancels the invocation if it has not committed yet.
    ///
    /// Returns false when the ticket already completed.
    pub async fn cancel(&self) -> Result<bool, MacroError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Cancel {
                ticket: self.id,
                resp: tx,
            })
            .await
            .map_err(|_| MacroError::ChannelClosed)?;
        rx.await.map_err(|_| MacroError::ChannelClosed)
    }

    /// Waits for the commit, or for the error that prevented it.
    pub async fn wait(self) -> Result<Commit, MacroError> {
        self.done.await.map_err(|_| MacroError::ChannelClosed)?
    }
}

struct Coordinator<T> {
    session: Session<T>,
    events_tx: broadcast::Sender<MacroEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    config: RuntimeConfig,
    commits_since_snapshot: usize,
    pending: HashMap<TicketId, Reply<Commit>>,
    next_ticket: TicketId,
    completion_tx: mpsc::UnboundedSender<Completion<T>>,
}

impl<T> Coordinator<T>
where
    T: Send + 'static,
{
    async fn handle_command(&mut self, cmd: Command<T>) -> bool {
        match cmd {
            Command::Call { path, args, resp } => {
                let res = self.session.call(&path, args);
                self.after_commit(&res).await;
                let _ = resp.send(res);
            }
            Command::Set { path, value, resp } => {
                let res = self.session.set(&path, value);
                self.after_commit(&res).await;
                let _ = resp.send(res);
            }
            Command::Undo { resp } => {
                let res = self.session.undo();
                if res.is_ok() {
                    let cursor = self.session.macro_log().cursor();
                    let _ = self.events_tx.send(MacroEvent::Undone { cursor });
                }
                self.publish_absorbed();
                self.persist_pending().await;
                let _ = resp.send(res);
            }
            Command::Redo { resp } => {
                let res = self.session.redo();
                self.after_commit(&res).await;
                let _ = resp.send(res);
            }
            Command::Clear { resp } => {
                self.session.clear();
                let _ = self.events_tx.send(MacroEvent::Cleared);
                let _ = resp.send(());
            }
            Command::Read { reader } => reader(&self.session),
            Command::Background {
                path,
                args,
                resp,
                done,
            } => {
                let _ = resp.send(self.start_background(&path, args, done));
            }
            Command::Cancel { ticket, resp } => {
                let cancelled = match self.pending.remove(&ticket) {
                    Some(done) => {
                        tracing::debug!(ticket, "background invocation cancelled");
                        let _ = done.send(Err(MacroError::Cancelled));
                        let _ = self.events_tx.send(MacroEvent::Cancelled { ticket });
                        true
                    }
                    None => false,
                };
                let _ = resp.send(cancelled);
            }
            Command::Flush { resp } => {
                self.persist_pending().await;
                let out = match &self.persist_tx {
                    Some(tx) => {
                        let (flush_tx, flush_rx) = oneshot::channel();
                        if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                            Err(MacroError::ChannelClosed)
                        } else {
                            flush_rx
                                .await
                                .map_err(|_| MacroError::ChannelClosed)
                                .and_then(|r| r.map_err(MacroError::from))
                        }
                    }
                    None => Ok(self.session.latest_seq()),
                };
                let _ = resp.send(out);
            }
            Command::Checkpoint { resp } => {
                let out = self.checkpoint().await;
                let _ = resp.send(out);
            }
            Command::Shutdown { resp } => {
                self.persist_pending().await;
                let out = match &self.persist_tx {
                    Some(tx) => {
                        let (done_tx, done_rx) = oneshot::channel();
                        if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                            Err(MacroError::ChannelClosed)
                        } else {
                            done_rx.await.map_err(|_| MacroError::ChannelClosed)
                        }
                    }
                    None => Ok(()),
                };
                let _ = resp.send(out);
                return true;
            }
        }

        false
    }

    fn start_background(
        &mut self,
        path: &str,
        args: CallArgs,
        done: Reply<Commit>,
    ) -> Result<TicketId, MacroError> {
        let prepared = self.session.prepare_background(path, args)?;
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending.insert(ticket, done);
        tracing::debug!(ticket, path, "background invocation started");

        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let path = prepared.path().to_string();
            let arguments = prepared.arguments().clone();
            let result = tokio::task::spawn_blocking(move || prepared.run())
                .await
                .map_err(|e| OperationError::new(format!("background body did not complete: {e}")))
                .and_then(|r| r);
            let _ = completion_tx.send(Completion {
                ticket,
                path,
                arguments,
                result,
            });
        });
        Ok(ticket)
    }

    async fn handle_completion(&mut self, completion: Completion<T>) {
        let Completion {
            ticket,
            path,
            arguments,
            result,
        } = completion;

        let Some(done) = self.pending.remove(&ticket) else {
            tracing::warn!(ticket, %path, "completion of cancelled background invocation dropped");
            return;
        };

        let res = match result {
            Ok(finish) => self.session.finish_background(&path, arguments, finish),
            Err(err) => Err(MacroError::Operation(err)),
        };
        self.after_commit(&res).await;
        let _ = done.send(res);
    }

    async fn after_commit(&mut self, res: &Result<Commit, MacroError>) {
        if let Ok(commit) = res {
            self.publish_commit(*commit);
            self.commits_since_snapshot += 1;
        }
        self.publish_absorbed();
        self.persist_pending().await;
        self.maybe_auto_checkpoint().await;
    }

    fn publish_commit(&self, commit: Commit) {
        let line_at = |index: usize| {
            self.session
                .macro_log()
                .get(index)
                .map(|r| r.render_line())
                .unwrap_or_default()
        };
        let event = match commit {
            Commit::Appended { index, undoable } => MacroEvent::Committed {
                index,
                line: line_at(index),
                undoable,
            },
            Commit::Merged { index } => MacroEvent::Merged {
                index,
                line: line_at(index),
            },
            Commit::Replayed { index } => MacroEvent::Redone {
                index,
                line: line_at(index),
            },
            Commit::Absorbed => return,
        };
        let _ = self.events_tx.send(event);
    }

    fn publish_absorbed(&mut self) {
        let absorbed = self.session.take_absorbed();
        if absorbed.is_empty() {
            return;
        }
        let lines = absorbed.iter().map(|r| r.render_line()).collect();
        let _ = self.events_tx.send(MacroEvent::Absorbed { lines });
    }

    async fn persist_pending(&mut self) {
        let entries = self.session.drain_journal();
        if entries.is_empty() {
            return;
        }
        match &self.persist_tx {
            Some(tx) => {
                if tx.send(PersistMsg::Entries(entries)).await.is_err() {
                    tracing::error!("persistence worker stopped; journal entries lost");
                }
            }
            None => {
                let _ = self.events_tx.send(MacroEvent::DurableUpTo {
                    seq: self.session.latest_seq(),
                });
            }
        }
    }

    async fn checkpoint(&mut self) -> Result<(), MacroError> {
        self.persist_pending().await;
        let Some(tx) = &self.persist_tx else {
            return Ok(());
        };
        let snapshot = self.session.export_snapshot();
        let last_seq = self.session.latest_seq();
        let (cp_tx, cp_rx) = oneshot::channel();
        tx.send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: self.config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .map_err(|_| MacroError::ChannelClosed)?;
        cp_rx.await.map_err(|_| MacroError::ChannelClosed)??;
        self.commits_since_snapshot = 0;
        Ok(())
    }

    async fn maybe_auto_checkpoint(&mut self) {
        if self.config.snapshot_every_commits == 0
            || self.commits_since_snapshot < self.config.snapshot_every_commits
            || self.persist_tx.is_none()
        {
            return;
        }
        if let Err(err) = self.checkpoint().await {
            tracing::warn!(error = %err, "automatic snapshot failed");
        }
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn JournalSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<JournalSeq, PersistError>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredEntry>::new();
        let latency = Duration::from_millis(config.batch_max_latency_ms);
        let mut deadline = Instant::now() + latency;
        let mut last_durable: JournalSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Entries(entries) => {
                            buf.extend(entries);
                            if buf.len() >= config.batch_max_entries || config.flush_on_commit {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + latency;
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let flush_result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let result = if let Err(err) = flush_result {
                                Err(err)
                            } else {
                                let sink_ref = Arc::clone(&sink);
                                match tokio::task::spawn_blocking(move || {
                                    let mut sink = sink_ref.blocking_lock();
                                    sink.write_snapshot(&snapshot, last_seq)?;
                                    if compact {
                                        let removed = sink.compact_through(last_seq)?;
                                        tracing::debug!(removed, last_seq, "journal compacted");
                                    }
                                    Result::<(), PersistError>::Ok(())
                                }).await {
                                    Ok(inner) => inner,
                                    Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
                                }
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + latency;
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn JournalSink>>>,
    buf: &mut Vec<StoredEntry>,
    last_durable: &mut JournalSeq,
    durable_tx: &mpsc::UnboundedSender<Result<JournalSeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let entries = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let append_res: Result<JournalSeq, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let seq = sink.append_entries(&entries)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            let _ = durable_tx.send(Err(PersistError::Message(format!("append failed: {err}"))));
            Err(err)
        }
    }
}
