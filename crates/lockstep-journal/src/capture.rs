//! Double-buffered state capture for conflict search.
//!
//! While a follower replays towards a suspected divergence it needs the
//! serialized state both before and after the step under inspection. Two
//! buffers alternate roles: the "after" buffer of one step becomes the
//! "before" buffer of the next, so no step is serialized twice and no
//! allocation happens once the buffers have grown.
//!
//! A [`CaptureSession`] only exists after the "before" state was written, and
//! reading a buffer borrows the session immutably, so capturing an "after"
//! state without a "before" or reading while writing does not compile.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::context::{OperationContext, StepCursor};
use crate::model::{JournalModel, StepContext};
use crate::position::JournalPosition;
use crate::serializer::{ModelSerializer, SerializationError, SerializationFlags, checksum_bytes};
use crate::slot::OperationKind;

/// Owner of the two recycled capture buffers.
#[derive(Debug, Default)]
pub struct StateCapture {
    even: Vec<u8>,
    odd: Vec<u8>,
}

/// What a [`CaptureSession`] currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Only the state before the current step.
    Before,
    /// Before and after the current step.
    BeforeAndAfter,
}

impl StateCapture {
    /// Create an empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `model` as the first "before" state and open a session.
    ///
    /// # Errors
    ///
    /// Propagates [`SerializationError`] from the serializer.
    pub fn begin<'a, M, S>(
        &'a mut self,
        serializer: &S,
        model: &M,
        version: u32,
    ) -> Result<CaptureSession<'a>, SerializationError>
    where
        M: JournalModel,
        S: ModelSerializer<M>,
    {
        self.odd.clear();
        serializer.serialize_into(model, SerializationFlags::CHECKSUM, version, &mut self.even)?;
        Ok(CaptureSession {
            capture: self,
            before_is_odd: false,
            state: CaptureState::Before,
        })
    }
}

/// An open capture with a valid "before" buffer.
#[derive(Debug)]
pub struct CaptureSession<'a> {
    capture: &'a mut StateCapture,
    before_is_odd: bool,
    state: CaptureState,
}

impl CaptureSession<'_> {
    /// What the session holds.
    pub const fn state(&self) -> CaptureState {
        self.state
    }

    /// Serialize `model` as the state after the current step and return its
    /// checksum.
    ///
    /// # Errors
    ///
    /// Propagates [`SerializationError`] from the serializer.
    pub fn capture_after<M, S>(
        &mut self,
        serializer: &S,
        model: &M,
        version: u32,
    ) -> Result<u32, SerializationError>
    where
        M: JournalModel,
        S: ModelSerializer<M>,
    {
        let out = if self.before_is_odd {
            &mut self.capture.even
        } else {
            &mut self.capture.odd
        };
        serializer.serialize_into(model, SerializationFlags::CHECKSUM, version, out)?;
        self.state = CaptureState::BeforeAndAfter;
        Ok(checksum_bytes(out))
    }

    /// Move on to the next step: the current "after" becomes "before".
    /// Does nothing if no "after" state was captured.
    pub const fn advance(&mut self) {
        if matches!(self.state, CaptureState::BeforeAndAfter) {
            self.before_is_odd = !self.before_is_odd;
            self.state = CaptureState::Before;
        }
    }

    /// State before the current step.
    pub fn before(&self) -> &[u8] {
        if self.before_is_odd {
            &self.capture.odd
        } else {
            &self.capture.even
        }
    }

    /// State after the current step, once captured.
    pub fn after(&self) -> Option<&[u8]> {
        match self.state {
            CaptureState::Before => None,
            CaptureState::BeforeAndAfter => Some(if self.before_is_odd {
                &self.capture.even
            } else {
                &self.capture.odd
            }),
        }
    }
}

/// The first step found to disagree with the recorded expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictFinding {
    /// Start position of the diverging step.
    pub step_position: JournalPosition,
    /// Position immediately after the diverging step.
    pub position: JournalPosition,
    /// Step name.
    pub step_name: String,
    /// Expected checksum.
    pub expected: u32,
    /// Checksum observed on replay.
    pub actual: u32,
    /// Serialized state before the step.
    pub state_before: Vec<u8>,
    /// Serialized state after the step.
    pub state_after: Vec<u8>,
}

/// Replay context that checks every step against expected checksums and
/// stops recording at the first divergence.
///
/// Steps whose expected checksum is 0 were not supplied by the leader and
/// cannot be judged; they neither confirm nor refute the replay.
pub struct ConflictSearchContext<'a, 'c, M, S> {
    serializer: &'a S,
    version: u32,
    session: CaptureSession<'c>,
    expected: &'a BTreeMap<JournalPosition, u32>,
    cursor: StepCursor,
    last_verified: JournalPosition,
    finding: Option<ConflictFinding>,
    error: Option<SerializationError>,
    _model: PhantomData<fn(&M)>,
}

/// Outcome of a conflict search replay.
#[derive(Debug)]
pub struct ConflictSearchOutcome {
    /// The first divergence, if the replay reproduced one.
    pub finding: Option<ConflictFinding>,
    /// Position right after the last step verified equal with a supplied
    /// checksum, or the replay start if none was.
    pub last_verified: JournalPosition,
    /// Serialization failure that aborted the search.
    pub error: Option<SerializationError>,
}

impl<'a, 'c, M, S> ConflictSearchContext<'a, 'c, M, S> {
    /// Create a search starting at `start` with an open capture session.
    pub const fn new(
        serializer: &'a S,
        version: u32,
        session: CaptureSession<'c>,
        expected: &'a BTreeMap<JournalPosition, u32>,
        start: JournalPosition,
    ) -> Self {
        Self {
            serializer,
            version,
            session,
            expected,
            cursor: StepCursor::new(),
            last_verified: start,
            finding: None,
            error: None,
            _model: PhantomData,
        }
    }

    /// Whether the search already stopped.
    pub const fn is_done(&self) -> bool {
        self.finding.is_some() || self.error.is_some()
    }

    /// Finish the search.
    pub fn into_outcome(self) -> ConflictSearchOutcome {
        ConflictSearchOutcome {
            finding: self.finding,
            last_verified: self.last_verified,
            error: self.error,
        }
    }
}

impl<M, S> ConflictSearchContext<'_, '_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn inspect(&mut self, model: &M, name: &str, is_end: bool) {
        let position = self.cursor.advance();
        if self.is_done() {
            return;
        }
        let actual = match self.session.capture_after(self.serializer, model, self.version) {
            Ok(actual) => actual,
            Err(e) => {
                self.error = Some(e);
                return;
            }
        };
        let expected = self.expected.get(&position).copied().unwrap_or(0);
        let after = self.cursor.after(position, is_end);
        if expected != 0 && expected != actual {
            self.finding = Some(ConflictFinding {
                step_position: position,
                position: after,
                step_name: name.to_owned(),
                expected,
                actual,
                state_before: self.session.before().to_vec(),
                state_after: self.session.after().map(<[u8]>::to_vec).unwrap_or_default(),
            });
            return;
        }
        if expected != 0 {
            self.last_verified = after;
        }
        self.session.advance();
    }
}

impl<M, S> StepContext<M> for ConflictSearchContext<'_, '_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn step(&mut self, model: &M, name: &str) {
        self.inspect(model, name, false);
    }
}

impl<M, S> OperationContext<M> for ConflictSearchContext<'_, '_, M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    fn begin_operation(&mut self, start: JournalPosition, kind: OperationKind) {
        self.cursor.begin(start, kind);
    }

    fn end_operation(&mut self, model: &M) {
        let name = self.cursor.kind().end_step_name();
        self.inspect(model, name, true);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{ActionResult, SideEffects};

    #[derive(Debug)]
    struct Counter(u8);

    impl JournalModel for Counter {
        type Action = u8;
        type RuntimeData = ();
        type Context = ();

        fn tick(&mut self, _ctx: &mut dyn StepContext<Self>) {
            self.0 = self.0.wrapping_add(1);
        }

        fn execute_action(&mut self, action: &u8, _ctx: &mut dyn StepContext<Self>) -> ActionResult {
            self.0 = *action;
            ActionResult::Success
        }

        fn dry_run_action(&self, _action: &u8) -> ActionResult {
            ActionResult::Success
        }

        fn resolution_context(&self) {}

        fn attach_context(&mut self, _context: &()) {}

        fn runtime_data(&self) {}

        fn attach_runtime_data(&mut self, _data: &(), _side_effects: SideEffects) {}
    }

    struct ByteSerializer;

    impl ModelSerializer<Counter> for ByteSerializer {
        fn serialize_into(
            &self,
            model: &Counter,
            _flags: SerializationFlags,
            _version: u32,
            out: &mut Vec<u8>,
        ) -> Result<(), SerializationError> {
            out.clear();
            out.push(model.0);
            Ok(())
        }

        fn deserialize(&self, bytes: &[u8], _context: &(), _version: u32) -> Result<Counter, SerializationError> {
            bytes.first().map(|b| Counter(*b)).ok_or(SerializationError::Decode {
                message: "empty".to_owned(),
            })
        }
    }

    #[test]
    fn buffers_alternate_between_steps() {
        let mut capture = StateCapture::new();
        let mut session = capture.begin(&ByteSerializer, &Counter(1), 1).unwrap();
        assert_eq!(session.state(), CaptureState::Before);
        assert_eq!(session.before(), &[1]);
        assert!(session.after().is_none());

        session.capture_after(&ByteSerializer, &Counter(2), 1).unwrap();
        assert_eq!(session.after(), Some(&[2][..]));

        session.advance();
        assert_eq!(session.before(), &[2]);
        session.capture_after(&ByteSerializer, &Counter(3), 1).unwrap();
        assert_eq!(session.before(), &[2]);
        assert_eq!(session.after(), Some(&[3][..]));
    }

    #[test]
    fn advance_without_after_keeps_before() {
        let mut capture = StateCapture::new();
        let mut session = capture.begin(&ByteSerializer, &Counter(7), 1).unwrap();
        session.advance();
        assert_eq!(session.before(), &[7]);
        assert_eq!(session.state(), CaptureState::Before);
    }

    #[test]
    fn search_stops_at_first_supplied_mismatch() {
        let start = JournalPosition::before_tick(1);
        let mut expected = BTreeMap::new();
        expected.insert(start, checksum_bytes(&[9]));

        let mut capture = StateCapture::new();
        let mut model = Counter(0);
        let session = capture.begin(&ByteSerializer, &model, 1).unwrap();
        let mut ctx = ConflictSearchContext::new(&ByteSerializer, 1, session, &expected, start);
        crate::context::run_operation(&mut model, start, &crate::model::Operation::Tick, &mut ctx);
        let outcome = ctx.into_outcome();

        let finding = outcome.finding.unwrap();
        assert_eq!(finding.step_position, start);
        assert_eq!(finding.position, JournalPosition::after_tick(1));
        assert_eq!(finding.state_before, vec![0]);
        assert_eq!(finding.state_after, vec![1]);
        assert_eq!(outcome.last_verified, start);
    }
}
