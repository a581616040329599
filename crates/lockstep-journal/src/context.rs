//! Operation execution contexts.
//!
//! Every operation runs under an [`OperationContext`]: the journal opens the
//! operation, the model closes zero or more steps through
//! [`StepContext::step`], and the journal closes the synthetic end step. The
//! context decides what a step means:
//!
//! | Context | Used by | Per step |
//! |---------|---------|----------|
//! | [`NullStepContext`] | replay | nothing |
//! | [`ComputingContext`] | leader staging | computes and records a checksum |
//! | [`ExpectedContext`] | follower staging | records the supplied checksum |
//! | [`VerifyingContext`] | leader commit | compares against recorded checksums |
//! | [`ProbeContext`] | forced checksum | computes the checksum of one step |

use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::model::{ActionResult, JournalModel, NullStepContext, Operation, StepContext};
use crate::position::JournalPosition;
use crate::serializer::{ModelSerializer, SerializationError, checksum_model};
use crate::slot::{ComputedStep, ExpectedStep, OperationKind};

/// A step context that is told where each operation begins and ends.
pub trait OperationContext<M>: StepContext<M> {
    /// An operation of `kind` starting at `start` is about to execute.
    fn begin_operation(&mut self, start: JournalPosition, kind: OperationKind);

    /// The operation finished; `model` is its final state. Implementations
    /// treat this as the synthetic end step.
    fn end_operation(&mut self, model: &M);
}

/// A context that produces one step record per executed step.
pub trait RecordingContext<M, R>: OperationContext<M> {
    /// Records produced since the last `begin_operation`, in step order.
    fn take_records(&mut self) -> Vec<R>;

    /// First serialization failure observed, if any.
    fn take_error(&mut self) -> Option<SerializationError>;
}

impl<M> OperationContext<M> for NullStepContext {
    fn begin_operation(&mut self, _start: JournalPosition, _kind: OperationKind) {}

    fn end_operation(&mut self, _model: &M) {}
}

/// Execute `operation` on `model` under `ctx`.
pub fn run_operation<M, C>(
    model: &mut M,
    start: JournalPosition,
    operation: &Operation<M::Action>,
    ctx: &mut C,
) -> ActionResult
where
    M: JournalModel,
    C: OperationContext<M>,
{
    ctx.begin_operation(start, operation.kind());
    let result = match operation {
        Operation::Tick => {
            model.tick(ctx);
            ActionResult::Success
        }
        Operation::Action(action) => model.execute_action(action, ctx),
    };
    ctx.end_operation(model);
    result
}

/// Tracks the position of the next step inside the running operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepCursor {
    start: JournalPosition,
    next: u16,
    kind: OperationKind,
}

impl StepCursor {
    pub(crate) const fn new() -> Self {
        Self {
            start: JournalPosition::EPOCH,
            next: 0,
            kind: OperationKind::Tick,
        }
    }

    pub(crate) const fn begin(&mut self, start: JournalPosition, kind: OperationKind) {
        self.start = start;
        self.next = 0;
        self.kind = kind;
    }

    /// Position of the step being closed; moves to the next one.
    pub(crate) const fn advance(&mut self) -> JournalPosition {
        let position = JournalPosition::new(self.start.tick(), self.start.operation(), self.next);
        self.next = self.next.saturating_add(1);
        position
    }

    /// Position immediately after the step at `position`. The end step is
    /// followed by the next operation rather than by another step.
    pub(crate) fn after(&self, position: JournalPosition, is_end: bool) -> JournalPosition {
        let next = if is_end {
            JournalPosition::next_action(position)
        } else {
            JournalPosition::after_step(position)
        };
        next.unwrap_or(position)
    }

    pub(crate) const fn kind(&self) -> OperationKind {
        self.kind
    }
}

/// Serializer plus a recycled scratch buffer for checksum computation.
pub struct Checksummer<'a, S> {
    serializer: &'a S,
    scratch: &'a mut Vec<u8>,
    version: u32,
}

impl<'a, S> Checksummer<'a, S> {
    /// Borrow a serializer and scratch buffer.
    pub const fn new(serializer: &'a S, scratch: &'a mut Vec<u8>, version: u32) -> Self {
        Self {
            serializer,
            scratch,
            version,
        }
    }

    /// Checksum of `model`'s serialized form.
    ///
    /// # Errors
    ///
    /// Propagates [`SerializationError`] from the serializer.
    pub fn checksum<M>(&mut self, model: &M) -> Result<u32, SerializationError>
    where
        M: JournalModel,
        S: ModelSerializer<M>,
    {
        checksum_model(self.serializer, model, self.version, self.scratch)
    }
}

/// Leader staging context: computes the checksum at every step.
///
/// With `compute` off every step is recorded with a zero checksum.
pub struct ComputingContext<'a, M, S> {
    checksummer: Checksummer<'a, S>,
    compute: bool,
    cursor: StepCursor,
    records: Vec<ComputedStep>,
    error: Option<SerializationError>,
    _model: PhantomData<fn(&M)>,
}

impl<'a, M, S> ComputingContext<'a, M, S> {
    /// Create a context around a checksummer.
    pub const fn new(checksummer: Checksummer<'a, S>, compute: bool) -> Self {
        Self {
            checksummer,
            compute,
            cursor: StepCursor::new(),
            records: Vec::new(),
            error: None,
            _model: PhantomData,
        }
    }
}

impl<M, S> ComputingContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn record(&mut self, model: &M, name: &str) {
        self.cursor.advance();
        let checksum = if self.compute {
            match self.checksummer.checksum(model) {
                Ok(checksum) => checksum,
                Err(e) => {
                    self.error.get_or_insert(e);
                    0
                }
            }
        } else {
            0
        };
        self.records.push(ComputedStep {
            name: name.to_owned(),
            checksum,
        });
    }
}

impl<M, S> StepContext<M> for ComputingContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn step(&mut self, model: &M, name: &str) {
        self.record(model, name);
    }
}

impl<M, S> OperationContext<M> for ComputingContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn begin_operation(&mut self, start: JournalPosition, kind: OperationKind) {
        self.cursor.begin(start, kind);
        self.records.clear();
    }

    fn end_operation(&mut self, model: &M) {
        let name = self.cursor.kind().end_step_name();
        self.record(model, name);
    }
}

impl<M, S> RecordingContext<M, ComputedStep> for ComputingContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn take_records(&mut self) -> Vec<ComputedStep> {
        std::mem::take(&mut self.records)
    }

    fn take_error(&mut self) -> Option<SerializationError> {
        self.error.take()
    }
}

/// Follower staging context: records the checksums the leader supplied.
///
/// Step `i` of the operation is paired with `expected[i]`; missing entries
/// are recorded as 0 ("not supplied"). When an `observer` is present the
/// actual end-of-operation checksum is recorded too.
pub struct ExpectedContext<'a, M, S> {
    expected: &'a [u32],
    observer: Option<Checksummer<'a, S>>,
    cursor: StepCursor,
    records: Vec<ExpectedStep>,
    error: Option<SerializationError>,
    _model: PhantomData<fn(&M)>,
}

impl<'a, M, S> ExpectedContext<'a, M, S> {
    /// Create a context echoing `expected`.
    pub const fn new(expected: &'a [u32], observer: Option<Checksummer<'a, S>>) -> Self {
        Self {
            expected,
            observer,
            cursor: StepCursor::new(),
            records: Vec::new(),
            error: None,
            _model: PhantomData,
        }
    }

    fn expected_at(&self, index: usize) -> u32 {
        self.expected.get(index).copied().unwrap_or(0)
    }
}

impl<M, S> StepContext<M> for ExpectedContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn step(&mut self, _model: &M, name: &str) {
        self.cursor.advance();
        let expected = self.expected_at(self.records.len());
        self.records.push(ExpectedStep {
            name: name.to_owned(),
            expected,
            observed: None,
        });
    }
}

impl<M, S> OperationContext<M> for ExpectedContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn begin_operation(&mut self, start: JournalPosition, kind: OperationKind) {
        self.cursor.begin(start, kind);
        self.records.clear();
    }

    fn end_operation(&mut self, model: &M) {
        self.cursor.advance();
        let expected = self.expected_at(self.records.len());
        let observed = match self.observer.as_mut().map(|o| o.checksum(model)) {
            Some(Ok(checksum)) => Some(checksum),
            Some(Err(e)) => {
                self.error.get_or_insert(e);
                None
            }
            None => None,
        };
        self.records.push(ExpectedStep {
            name: self.cursor.kind().end_step_name().to_owned(),
            expected,
            observed,
        });
    }
}

impl<M, S> RecordingContext<M, ExpectedStep> for ExpectedContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn take_records(&mut self) -> Vec<ExpectedStep> {
        std::mem::take(&mut self.records)
    }

    fn take_error(&mut self) -> Option<SerializationError> {
        self.error.take()
    }
}

/// A step whose recomputed checksum disagrees with the recorded one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepMismatch {
    /// Start position of the step.
    pub position: JournalPosition,
    /// Step name.
    pub name: String,
    /// Checksum recorded while staging.
    pub recorded: u32,
    /// Checksum observed on replay.
    pub actual: u32,
}

/// Leader commit context: recomputes checksums on replay and remembers the
/// first step that disagrees with what was recorded while staging.
///
/// Steps recorded with a zero checksum are not checked.
pub struct VerifyingContext<'a, M, S> {
    checksummer: Checksummer<'a, S>,
    recorded: BTreeMap<JournalPosition, u32>,
    cursor: StepCursor,
    first_mismatch: Option<StepMismatch>,
    error: Option<SerializationError>,
    _model: PhantomData<fn(&M)>,
}

impl<'a, M, S> VerifyingContext<'a, M, S> {
    /// Create a context checking against `recorded`.
    pub const fn new(checksummer: Checksummer<'a, S>, recorded: BTreeMap<JournalPosition, u32>) -> Self {
        Self {
            checksummer,
            recorded,
            cursor: StepCursor::new(),
            first_mismatch: None,
            error: None,
            _model: PhantomData,
        }
    }

    /// The first mismatch found, if any.
    pub fn into_outcome(self) -> (Option<StepMismatch>, Option<SerializationError>) {
        (self.first_mismatch, self.error)
    }
}

impl<M, S> VerifyingContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn verify(&mut self, model: &M, name: &str) {
        let position = self.cursor.advance();
        if self.first_mismatch.is_some() || self.error.is_some() {
            return;
        }
        let recorded = self.recorded.get(&position).copied().unwrap_or(0);
        if recorded == 0 {
            return;
        }
        match self.checksummer.checksum(model) {
            Ok(actual) if actual != recorded => {
                self.first_mismatch = Some(StepMismatch {
                    position,
                    name: name.to_owned(),
                    recorded,
                    actual,
                });
            }
            Ok(_) => {}
            Err(e) => self.error = Some(e),
        }
    }
}

impl<M, S> StepContext<M> for VerifyingContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn step(&mut self, model: &M, name: &str) {
        self.verify(model, name);
    }
}

impl<M, S> OperationContext<M> for VerifyingContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn begin_operation(&mut self, start: JournalPosition, kind: OperationKind) {
        self.cursor.begin(start, kind);
    }

    fn end_operation(&mut self, model: &M) {
        let name = self.cursor.kind().end_step_name();
        self.verify(model, name);
    }
}

/// Computes the checksum at the end of a single target step.
pub struct ProbeContext<'a, M, S> {
    checksummer: Checksummer<'a, S>,
    target: JournalPosition,
    cursor: StepCursor,
    result: Option<Result<u32, SerializationError>>,
    _model: PhantomData<fn(&M)>,
}

impl<'a, M, S> ProbeContext<'a, M, S> {
    /// Create a probe for the step starting at `target`.
    pub const fn new(checksummer: Checksummer<'a, S>, target: JournalPosition) -> Self {
        Self {
            checksummer,
            target,
            cursor: StepCursor::new(),
            result: None,
            _model: PhantomData,
        }
    }

    /// The probed checksum, or `None` if the target step never ran.
    pub fn into_result(self) -> Option<Result<u32, SerializationError>> {
        self.result
    }
}

impl<M, S> ProbeContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn probe(&mut self, model: &M) {
        let position = self.cursor.advance();
        if position == self.target && self.result.is_none() {
            self.result = Some(self.checksummer.checksum(model));
        }
    }
}

impl<M, S> StepContext<M> for ProbeContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn step(&mut self, model: &M, _name: &str) {
        self.probe(model);
    }
}

impl<M, S> OperationContext<M> for ProbeContext<'_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn begin_operation(&mut self, start: JournalPosition, kind: OperationKind) {
        self.cursor.begin(start, kind);
    }

    fn end_operation(&mut self, model: &M) {
        self.probe(model);
    }
}
