use std::sync::Arc;

use crate::{
    core::{
        macro_log::{LogSnapshotV1, MacroLog},
        registry::{BackgroundWork, Finish, Registry},
        stacks::{StackEntry, UndoStackPair},
    },
    error::{MacroError, OperationError},
    op::{JournalOp, StoredEntry, now_ms},
    record::{OperationRecord, RecordKind},
    script::{self, Script, ScriptError, ScriptLine},
    signature::{BindError, CallArgs},
    types::{JournalSeq, StackSide},
    undo::{CompensatingAction, Compensation, SetterAction},
    value::{Arguments, Value},
};

/// Limits applied by a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Frames of operation bodies and compensators allowed on the stack at once.
    pub max_nesting_depth: usize,
    /// Undo steps kept; 0 keeps all of them.
    pub max_history: usize,
    /// Queue a journal entry for every log mutation, to be taken with
    /// [`Session::drain_journal`]. Off unless a sink will consume them.
    pub journaling: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_nesting_depth: 16,
            max_history: 0,
            journaling: false,
        }
    }
}

/// How an invocation landed in the macro log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// A new record was appended.
    Appended {
        /// Log index of the record.
        index: usize,
        /// False when the commit cleared the undo history.
        undoable: bool,
    },
    /// Coalesced into the previous record.
    Merged {
        /// Log index of the replaced record.
        index: usize,
    },
    /// A redo replay was written back into the log.
    Replayed {
        /// Log index the replay was written to.
        index: usize,
    },
    /// Ran inside another operation or compensator; nothing was logged.
    Absorbed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitMode {
    Fresh,
    Redo,
    /// Re-execution of logged records: one record in, one record out.
    Playback,
}

/// Bound background invocation, ready to run off the coordinating thread.
pub struct PreparedWork<T> {
    path: String,
    arguments: Arguments,
    work: Arc<BackgroundWork<T>>,
}

impl<T> PreparedWork<T> {
    /// Registered path of the background operation.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Arguments bound on the coordinating thread.
    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// Runs the background body; the returned closure must be committed
    /// with [`Session::finish_background`].
    pub fn run(&self) -> Result<Finish<T>, OperationError> {
        (self.work.as_ref())(&self.arguments)
    }

    /// Path and arguments, for committing after [`PreparedWork::run`].
    pub fn into_parts(self) -> (String, Arguments) {
        (self.path, self.arguments)
    }
}

/// A tracked object together with its macro log and undo stacks.
///
/// Every state change made through [`Session::call`] or [`Session::set`]
/// is committed atomically: either the operation succeeds and exactly one
/// record lands in the log (and on the undo stack when it is undoable), or
/// nothing changes.
pub struct Session<T> {
    target: Arc<str>,
    state: T,
    registry: Arc<Registry<T>>,
    log: MacroLog,
    stacks: UndoStackPair<T>,
    config: SessionConfig,
    depth: usize,
    absorbed: Vec<Arc<OperationRecord>>,
    pending: Vec<StoredEntry>,
    next_seq: JournalSeq,
}

impl<T> Session<T> {
    /// Starts tracking `state` as `target`, with default limits.
    ///
    /// The log starts with the construction line, `target = TypeName()`.
    pub fn new(target: impl Into<Arc<str>>, state: T, registry: Registry<T>) -> Self {
        Self::with_config(target, state, registry, SessionConfig::default())
    }

    /// Same as [`Session::new`] with explicit limits.
    pub fn with_config(
        target: impl Into<Arc<str>>,
        state: T,
        registry: Registry<T>,
        config: SessionConfig,
    ) -> Self {
        let target = target.into();
        let init = Arc::new(OperationRecord::init(Arc::clone(&target), registry.type_name()));
        let mut session = Self {
            target,
            state,
            registry: Arc::new(registry),
            log: MacroLog::new(),
            stacks: UndoStackPair::new(),
            config,
            depth: 0,
            absorbed: Vec::new(),
            pending: Vec::new(),
            next_seq: 1,
        };
        let index = session.log.append(Arc::clone(&init));
        session.journal_put(index, true, &init);
        session
    }

    /// Rebuilds a session by replaying the active prefix of a durable log.
    ///
    /// The replayed entries are already durable, so none are queued for the
    /// journal; new entries continue at `next_seq`.
    pub fn restore(
        target: impl Into<Arc<str>>,
        state: T,
        registry: Registry<T>,
        config: SessionConfig,
        log: &MacroLog,
        next_seq: JournalSeq,
    ) -> Result<Self, MacroError> {
        let mut session = Self::with_config(target, state, registry, config);
        if log.total_len() == 0 {
            // Nothing durable yet; the construction marker still has to be written.
            return Ok(session);
        }
        let replayed = session.replay(log.iter())?;
        session.pending.clear();
        session.next_seq = next_seq.max(session.next_seq);
        tracing::debug!(replayed, next_seq = session.next_seq, "session restored from journal");
        Ok(session)
    }

    /// Name the object is addressed by in rendered lines.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The tracked object.
    pub fn state(&self) -> &T {
        &self.state
    }

    /// Untracked access to the object; changes made here are not logged.
    pub fn state_mut(&mut self) -> &mut T {
        &mut self.state
    }

    /// Everything this session can invoke or assign.
    pub fn registry(&self) -> &Registry<T> {
        &self.registry
    }

    /// Limits in effect.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Committed history.
    pub fn macro_log(&self) -> &MacroLog {
        &self.log
    }

    /// Undo and redo stacks.
    pub fn stacks(&self) -> &UndoStackPair<T> {
        &self.stacks
    }

    /// Steps available to undo.
    pub fn done_len(&self) -> usize {
        self.stacks.done_len()
    }

    /// Steps available to redo.
    pub fn undone_len(&self) -> usize {
        self.stacks.undone_len()
    }

    /// Whether [`Session::undo`] has a step to reverse.
    pub fn can_undo(&self) -> bool {
        self.stacks.done_len() > 0
    }

    /// Whether [`Session::redo`] has a step to replay.
    pub fn can_redo(&self) -> bool {
        self.stacks.undone_len() > 0
    }

    /// True while an operation body or compensator is running.
    pub fn is_nested(&self) -> bool {
        self.depth > 0
    }

    /// Invokes the operation registered at `path`.
    pub fn call(&mut self, path: &str, args: CallArgs) -> Result<Commit, MacroError> {
        self.dispatch_call(path, args, CommitMode::Fresh)
    }

    /// Assigns the field registered at `path`.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<Commit, MacroError> {
        self.assign(path, value.into(), CommitMode::Fresh)
    }

    /// Reads the field registered at `path`.
    pub fn get(&self, path: &str) -> Result<Value, MacroError> {
        let field = self
            .registry
            .field_spec(path)
            .ok_or_else(|| MacroError::UnknownOperation(path.to_string()))?;
        Ok(field.get(&self.state))
    }

    /// Writes a field without logging; this is what setter undo uses.
    pub fn apply_field(&mut self, path: &str, value: Value) -> Result<(), MacroError> {
        let registry = Arc::clone(&self.registry);
        let field = registry
            .field_spec(path)
            .ok_or_else(|| MacroError::UnknownOperation(path.to_string()))?;
        field.set(&mut self.state, value)?;
        Ok(())
    }

    /// Reverses the most recent undoable step.
    ///
    /// If the compensator fails, the step stays on the undo stack and the log
    /// cursor does not move.
    pub fn undo(&mut self) -> Result<(), MacroError> {
        if self.depth > 0 {
            return Err(MacroError::ReentrantStep);
        }
        let mut entry = self
            .stacks
            .pop_done()
            .ok_or(MacroError::EmptyStack(StackSide::Done))?;

        let result = match &mut entry.action {
            CompensatingAction::Function(func) => self.run_frame(|s| func.call(s)),
            CompensatingAction::Setter(setter) => {
                self.apply_field(setter.field(), setter.old_value().clone())
            }
        };

        if let Err(err) = result {
            tracing::warn!(line = %entry.record, error = %err, "undo failed; entry kept on done stack");
            self.stacks.restore_done(entry);
            return Err(err);
        }

        if let Some(cursor) = self.log.rewind() {
            self.journal(JournalOp::Rewind { cursor });
        }
        tracing::debug!(line = %entry.record, cursor = self.log.cursor(), "undo applied");
        self.stacks.push_undone(entry);
        Ok(())
    }

    /// Replays the most recently undone operation, producing a fresh record.
    pub fn redo(&mut self) -> Result<Commit, MacroError> {
        if self.depth > 0 {
            return Err(MacroError::ReentrantStep);
        }
        let entry = self
            .stacks
            .pop_undone()
            .ok_or(MacroError::EmptyStack(StackSide::Undone))?;

        match self.replay_record(&entry.record, CommitMode::Redo) {
            Ok(commit) => {
                tracing::debug!(line = %entry.record, ?commit, "redo applied");
                Ok(commit)
            }
            Err(err) => {
                tracing::warn!(line = %entry.record, error = %err, "redo failed; entry kept on undone stack");
                self.stacks.push_undone(entry);
                Err(err)
            }
        }
    }

    /// Empties both stacks; the macro log is untouched.
    pub fn clear(&mut self) {
        tracing::debug!(
            done = self.stacks.done_len(),
            undone = self.stacks.undone_len(),
            "undo history cleared"
        );
        self.stacks.clear();
    }

    /// Re-executes `records` in order, skipping construction markers.
    pub fn replay<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a OperationRecord>,
    ) -> Result<usize, MacroError> {
        let mut count = 0;
        for record in records {
            if record.kind == RecordKind::Init {
                continue;
            }
            if record.target != self.target {
                return Err(ScriptError::TargetMismatch {
                    expected: self.target.to_string(),
                    found: record.target.to_string(),
                }
                .into());
            }
            self.replay_record(record, CommitMode::Playback)?;
            count += 1;
        }
        Ok(count)
    }

    /// Parses and re-executes a rendered script.
    pub fn replay_script(&mut self, text: &str) -> Result<usize, MacroError> {
        let lines = script::parse_script(text)?;
        let mut count = 0;
        for line in lines {
            let target = line.target();
            if target != self.target.as_ref() {
                return Err(ScriptError::TargetMismatch {
                    expected: self.target.to_string(),
                    found: target.to_string(),
                }
                .into());
            }
            match line {
                ScriptLine::Init { .. } => continue,
                ScriptLine::Call { path, args, .. } => {
                    self.dispatch_call(&path, args, CommitMode::Playback)?;
                }
                ScriptLine::Set { path, value, .. } => {
                    self.assign(&path, value, CommitMode::Playback)?;
                }
            }
            count += 1;
        }
        Ok(count)
    }

    /// Active log rendered as a replayable script.
    pub fn script(&self) -> Script {
        self.log.script()
    }

    /// Binds a background invocation without running it.
    pub fn prepare_background(&self, path: &str, args: CallArgs) -> Result<PreparedWork<T>, MacroError> {
        let spec = self
            .registry
            .background_spec(path)
            .ok_or_else(|| MacroError::UnknownOperation(path.to_string()))?;
        let arguments = spec.signature().bind(args)?;
        Ok(PreparedWork {
            path: path.to_string(),
            arguments,
            work: spec.work(),
        })
    }

    /// Commits a background invocation whose body has completed.
    pub fn finish_background(
        &mut self,
        path: &str,
        arguments: Arguments,
        finish: Finish<T>,
    ) -> Result<Commit, MacroError> {
        self.finish_with(path, arguments, finish, CommitMode::Fresh)
    }

    /// Records committed by nested invocations since the last call.
    pub fn take_absorbed(&mut self) -> Vec<Arc<OperationRecord>> {
        std::mem::take(&mut self.absorbed)
    }

    /// Turns journal queueing on or off.
    ///
    /// Enabling it on a session that never journaled queues entries that
    /// rebuild the current log, starting at seq 1. Disabling it drops
    /// whatever is still queued.
    pub fn set_journaling(&mut self, enabled: bool) {
        if enabled == self.config.journaling {
            return;
        }
        self.config.journaling = enabled;
        if !enabled {
            self.pending.clear();
            return;
        }
        if self.next_seq == 1 {
            let records = self.log.records().to_vec();
            for (index, record) in records.iter().enumerate() {
                self.journal_put(index, true, record);
            }
            if self.log.cursor() < records.len() {
                self.journal(JournalOp::Rewind {
                    cursor: self.log.cursor(),
                });
            }
        }
    }

    /// Whether log mutations are being queued for a journal.
    pub fn is_journaling(&self) -> bool {
        self.config.journaling
    }

    /// Takes the journal entries queued since the last drain, in seq order.
    pub fn drain_journal(&mut self) -> Vec<StoredEntry> {
        std::mem::take(&mut self.pending)
    }

    /// Seq of the newest queued or drained entry; 0 before any.
    pub fn latest_seq(&self) -> JournalSeq {
        self.next_seq.saturating_sub(1)
    }

    /// Snapshot of the log covering every entry up to [`Session::latest_seq`].
    pub fn export_snapshot(&self) -> LogSnapshotV1 {
        self.log.export_snapshot(self.next_seq)
    }

    fn dispatch_call(&mut self, path: &str, args: CallArgs, mode: CommitMode) -> Result<Commit, MacroError> {
        let registry = Arc::clone(&self.registry);

        if let Some(spec) = registry.operation_spec(path) {
            let arguments = spec.signature().bind(args)?;
            let merge_key = spec.auto_call().then(|| path.to_string());
            let compensation = self.run_frame(|s| (spec.body())(s, &arguments))?;
            let record = OperationRecord::call(Arc::clone(&self.target), path, arguments);
            return self.commit(record, compensation, merge_key, mode);
        }

        if let Some(spec) = registry.background_spec(path) {
            let arguments = spec.signature().bind(args)?;
            let work = spec.work();
            let finish = (work.as_ref())(&arguments)?;
            return self.finish_with(path, arguments, finish, mode);
        }

        Err(MacroError::UnknownOperation(path.to_string()))
    }

    fn finish_with(
        &mut self,
        path: &str,
        arguments: Arguments,
        finish: Finish<T>,
        mode: CommitMode,
    ) -> Result<Commit, MacroError> {
        let compensation = self.run_frame(finish)?;
        let record = OperationRecord::call(Arc::clone(&self.target), path, arguments);
        self.commit(record, compensation, None, mode)
    }

    fn assign(&mut self, path: &str, value: Value, mode: CommitMode) -> Result<Commit, MacroError> {
        let registry = Arc::clone(&self.registry);
        let field = registry
            .field_spec(path)
            .ok_or_else(|| MacroError::UnknownOperation(path.to_string()))?;
        if !field.kind().accepts(&value) {
            return Err(BindError::TypeMismatch {
                param: path.to_string(),
                expected: field.kind(),
                found: value.kind(),
            }
            .into());
        }

        let old_value = field.get(&self.state);
        field.set(&mut self.state, value.clone())?;

        let record = OperationRecord::set(Arc::clone(&self.target), path, value.clone());
        let compensation = Compensation::Setter(SetterAction::new(path, value, old_value));
        self.commit(record, compensation, None, mode)
    }

    fn replay_record(&mut self, record: &OperationRecord, mode: CommitMode) -> Result<Commit, MacroError> {
        match record.kind {
            RecordKind::Call => self.dispatch_call(
                &record.callable_ref,
                CallArgs::from(record.arguments.clone()),
                mode,
            ),
            RecordKind::Set => {
                let value = record.set_value().cloned().unwrap_or(Value::None);
                self.assign(&record.callable_ref, value, mode)
            }
            RecordKind::Init => Err(ScriptError::MisplacedInit(record.render_line()).into()),
        }
    }

    fn run_frame<R>(
        &mut self,
        frame: impl FnOnce(&mut Self) -> Result<R, OperationError>,
    ) -> Result<R, MacroError> {
        if self.depth >= self.config.max_nesting_depth {
            return Err(MacroError::NestingTooDeep(self.config.max_nesting_depth));
        }
        if self.depth == 0 {
            self.absorbed.clear();
        }
        let absorbed_mark = self.absorbed.len();
        self.depth += 1;
        let out = frame(self);
        self.depth -= 1;
        if out.is_err() {
            // A failed frame commits nothing, so neither do the calls it made.
            self.absorbed.truncate(absorbed_mark);
        }
        Ok(out?)
    }

    fn commit(
        &mut self,
        record: OperationRecord,
        compensation: Compensation<T>,
        merge_key: Option<String>,
        mode: CommitMode,
    ) -> Result<Commit, MacroError> {
        let record = Arc::new(record);

        if self.depth > 0 {
            tracing::debug!(line = %record, depth = self.depth, "nested invocation absorbed");
            self.absorbed.push(record);
            return Ok(Commit::Absorbed);
        }

        let Some(action) = compensation.into_action() else {
            let index = self.log.append(Arc::clone(&record));
            self.journal_put(index, true, &record);
            self.stacks.clear();
            tracing::debug!(index, line = %record, "non-undoable operation committed; undo history cleared");
            return Ok(Commit::Appended {
                index,
                undoable: false,
            });
        };

        if mode == CommitMode::Redo {
            let index = self.log.put_at_cursor(Arc::clone(&record));
            self.journal_put(index, false, &record);
            self.stacks.push_redone(StackEntry {
                record,
                action,
                merge_key,
            });
            return Ok(Commit::Replayed { index });
        }

        let coalesced = if mode == CommitMode::Playback {
            Err((Arc::clone(&record), action, merge_key))
        } else {
            self.stacks.coalesce(Arc::clone(&record), action, merge_key)
        };
        match coalesced {
            Ok(()) => {
                let index = match self.log.replace_last(Arc::clone(&record)) {
                    Some(index) => index,
                    None => self.log.append(Arc::clone(&record)),
                };
                self.journal_put(index, true, &record);
                tracing::debug!(index, line = %record, "operation coalesced into previous undo step");
                Ok(Commit::Merged { index })
            }
            Err((record, action, merge_key)) => {
                let index = self.log.append(Arc::clone(&record));
                self.journal_put(index, true, &record);
                tracing::debug!(index, line = %record, "operation committed");
                self.stacks.push_fresh(StackEntry {
                    record,
                    action,
                    merge_key,
                });
                let trimmed = self.stacks.trim_history(self.config.max_history);
                if trimmed > 0 {
                    tracing::trace!(trimmed, "oldest undo steps dropped");
                }
                Ok(Commit::Appended {
                    index,
                    undoable: true,
                })
            }
        }
    }

    fn journal_put(&mut self, index: usize, truncate_tail: bool, record: &OperationRecord) {
        self.journal(JournalOp::Put {
            index,
            truncate_tail,
            record: record.clone(),
        });
    }

    fn journal(&mut self, op: JournalOp) {
        if !self.config.journaling {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(StoredEntry {
            seq,
            ts_ms: now_ms(),
            op,
        });
    }
}
