//! A tiny deterministic model for unit tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::listener::JournalListener;
use crate::model::{ActionResult, JournalModel, SideEffects, StepContext};
use crate::position::JournalPosition;
use crate::serializer::{JsonSerializer, checksum_model};
use crate::slot::TimelineSlot;

thread_local! {
    static UNSTABLE_RUNS: Cell<i64> = const { Cell::new(0) };
}

/// Records every applied addition while side effects are enabled.
pub type EffectLog = Rc<RefCell<Vec<i64>>>;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Tally {
    pub value: i64,
    pub ticks: u32,
    #[serde(skip)]
    pub log: Option<EffectLog>,
    #[serde(skip)]
    pub effects: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyAction {
    Add(i64),
    /// Adds `amount` `parts` times, closing a step after each part.
    Spread { parts: u8, amount: i64 },
    /// Adds 1 and closes a step, `steps` times.
    Flood(u32),
    /// Adds how often it has run on this thread, so a replay never
    /// reproduces the staged result.
    Unstable,
    Forbidden,
}

impl Tally {
    fn emit(&self, amount: i64) {
        if self.effects
            && let Some(log) = &self.log
        {
            log.borrow_mut().push(amount);
        }
    }
}

impl JournalModel for Tally {
    type Action = TallyAction;
    type RuntimeData = Option<EffectLog>;
    type Context = ();

    fn tick(&mut self, ctx: &mut dyn StepContext<Self>) {
        self.ticks = self.ticks.wrapping_add(1);
        ctx.step(self, "advance");
        self.value = self.value.wrapping_add(1);
    }

    fn execute_action(&mut self, action: &TallyAction, ctx: &mut dyn StepContext<Self>) -> ActionResult {
        match action {
            TallyAction::Add(amount) => {
                self.value = self.value.wrapping_add(*amount);
                self.emit(*amount);
                ActionResult::Success
            }
            TallyAction::Spread { parts, amount } => {
                for _ in 0..*parts {
                    self.value = self.value.wrapping_add(*amount);
                    ctx.step(self, "part");
                }
                ActionResult::Success
            }
            TallyAction::Flood(steps) => {
                for _ in 0..*steps {
                    self.value = self.value.wrapping_add(1);
                    ctx.step(self, "flood");
                }
                ActionResult::Success
            }
            TallyAction::Unstable => {
                ctx.step(self, "steady");
                let runs = UNSTABLE_RUNS.with(|runs| {
                    let next = runs.get().wrapping_add(1);
                    runs.set(next);
                    next
                });
                self.value = self.value.wrapping_add(runs);
                ctx.step(self, "drift");
                ActionResult::Success
            }
            TallyAction::Forbidden => ActionResult::Rejected("forbidden".to_owned()),
        }
    }

    fn dry_run_action(&self, action: &TallyAction) -> ActionResult {
        match action {
            TallyAction::Forbidden => ActionResult::Rejected("forbidden".to_owned()),
            TallyAction::Add(_) | TallyAction::Spread { .. } | TallyAction::Flood(_) | TallyAction::Unstable => {
                ActionResult::Success
            }
        }
    }

    fn resolution_context(&self) {}

    fn attach_context(&mut self, _context: &()) {}

    fn runtime_data(&self) -> Option<EffectLog> {
        self.log.clone()
    }

    fn attach_runtime_data(&mut self, data: &Option<EffectLog>, side_effects: SideEffects) {
        self.log.clone_from(data);
        self.effects = side_effects == SideEffects::Enabled;
    }
}

/// Checksum of a tally as the journal would compute it.
#[allow(clippy::unwrap_used)]
pub fn tally_checksum(model: &Tally) -> u32 {
    checksum_model(&JsonSerializer, model, 1, &mut Vec::new()).unwrap()
}

/// Hook names recorded by [`Recorder`]s, shared between them.
pub type HookLog = Rc<RefCell<Vec<String>>>;

/// Listener that appends `"<tag>:<hook>"` for every hook it receives.
pub struct Recorder {
    tag: &'static str,
    log: HookLog,
}

impl Recorder {
    pub fn new(tag: &'static str, log: &HookLog) -> Self {
        Self {
            tag,
            log: Rc::clone(log),
        }
    }

    fn record(&self, hook: &str) {
        self.log.borrow_mut().push(format!("{}:{hook}", self.tag));
    }
}

impl JournalListener<Tally> for Recorder {
    fn before_setup(&mut self, _position: JournalPosition) {
        self.record("before_setup");
    }

    fn after_setup(&mut self, _position: JournalPosition, _model: &Tally) {
        self.record("after_setup");
    }

    fn before_tick(&mut self, _start: JournalPosition, _model: &Tally) {
        self.record("before_tick");
    }

    fn after_tick(&mut self, _slot: &TimelineSlot, _model: &Tally) {
        self.record("after_tick");
    }

    fn before_action(&mut self, _start: JournalPosition, _action: &TallyAction, _model: &Tally) {
        self.record("before_action");
    }

    fn after_action(&mut self, _slot: &TimelineSlot, _action: &TallyAction, _result: &ActionResult, _model: &Tally) {
        self.record("after_action");
    }

    fn before_commit(&mut self, _target: JournalPosition) {
        self.record("before_commit");
    }

    fn after_commit(&mut self, _checkpoint: JournalPosition) {
        self.record("after_commit");
    }

    fn before_rollback(&mut self, _target: JournalPosition) {
        self.record("before_rollback");
    }

    fn after_rollback(&mut self, _position: JournalPosition, _model: &Tally) {
        self.record("after_rollback");
    }

    fn before_history_modification(&mut self) {
        self.record("before_history_modification");
    }

    fn after_history_modification(&mut self, _model: &Tally) {
        self.record("after_history_modification");
    }

    fn begin_unsynchronized_actions(&mut self, _model: &Tally) {
        self.record("begin_unsynchronized_actions");
    }

    fn end_unsynchronized_actions(&mut self, _model: &Tally) {
        self.record("end_unsynchronized_actions");
    }
}
