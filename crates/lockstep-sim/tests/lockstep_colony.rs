//! End-to-end tests: a colony driven through a leader and a follower
//! journal.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use std::sync::Arc;

use lockstep_journal::model::NullStepContext;
use lockstep_journal::{
    ActionResult, CommitResult, Follower, JournalConfig, JournalModel, JournalPosition, JsonSerializer, Leader,
    Operation,
};
use lockstep_sim::colony::Stock;
use lockstep_sim::{
    Agent, AgentId, Colony, ColonyAction, ColonyRules, EventSink, Location, LocationId, Resource, spawn_colony,
};
use proptest::prelude::*;

type ColonyLeader = Leader<Colony, JsonSerializer>;
type ColonyFollower = Follower<Colony, JsonSerializer>;
type Script = Vec<(Operation<ColonyAction>, Vec<u32>)>;

fn agent(id: u32, location: u32, energy: u32, inventory: Stock) -> Agent {
    Agent {
        id: AgentId(id),
        location: LocationId(location),
        energy,
        hunger: 0,
        alive: true,
        inventory,
        structures_built: 0,
    }
}

fn location(id: u32, name: &str) -> Location {
    Location {
        id: LocationId(id),
        name: name.to_owned(),
        stockpile: Resource::ALL.into_iter().map(|resource| (resource, 20)).collect(),
        structures: 0,
    }
}

fn colony() -> Colony {
    let builder_kit = Stock::from([(Resource::Wood, 10), (Resource::Stone, 6)]);
    Colony::from_parts(
        Arc::new(ColonyRules::default()),
        2024,
        [
            agent(0, 0, 90, builder_kit),
            agent(1, 0, 70, Stock::new()),
            agent(2, 1, 60, Stock::new()),
        ],
        [location(0, "Riverbank"), location(1, "Quarry")],
    )
}

fn first_tick() -> Vec<ColonyAction> {
    vec![
        ColonyAction::Gather {
            agent: AgentId(0),
            resource: Resource::Food,
        },
        ColonyAction::Build { agent: AgentId(0) },
        ColonyAction::Rest { agent: AgentId(1) },
    ]
}

fn second_tick() -> Vec<ColonyAction> {
    vec![
        ColonyAction::Move {
            agent: AgentId(2),
            to: LocationId(0),
        },
        ColonyAction::Transfer {
            from: AgentId(0),
            to: AgentId(1),
            resource: Resource::Wood,
            quantity: 2,
        },
    ]
}

fn leader(model: Colony) -> ColonyLeader {
    let mut leader = Leader::new(JsonSerializer, JournalConfig::default());
    leader.setup(model, JournalPosition::EPOCH, true).unwrap();
    leader
}

fn follower(model: Colony, checkpointing: bool) -> ColonyFollower {
    let mut follower = Follower::new(JsonSerializer, JournalConfig::default());
    follower.setup(model, JournalPosition::EPOCH, checkpointing).unwrap();
    follower
}

/// Stage one tick followed by `actions` and return what a follower needs
/// to replay them.
fn lead_tick(leader: &mut ColonyLeader, actions: &[ColonyAction]) -> Script {
    let mut script = Vec::new();
    let tick = leader.stage_tick().unwrap();
    script.push((Operation::Tick, leader.operation_checksums(&tick).unwrap()));
    for action in actions {
        let outcome = leader.stage_action(action.clone()).unwrap();
        assert_eq!(outcome.result, ActionResult::Success, "{action:?}");
        let slot = outcome.slot.unwrap();
        script.push((
            Operation::Action(action.clone()),
            leader.operation_checksums(&slot).unwrap(),
        ));
    }
    script
}

fn follow(follower: &mut ColonyFollower, script: &Script) {
    for (operation, checksums) in script {
        match operation {
            Operation::Tick => {
                follower.stage_tick(checksums).unwrap();
            }
            Operation::Action(action) => {
                follower.stage_action(action.clone(), checksums).unwrap();
            }
        }
    }
}

fn state(model: &Colony) -> String {
    serde_json::to_string(model).unwrap()
}

#[test]
fn build_spans_five_steps() {
    let mut leader = leader(colony());
    let script = lead_tick(&mut leader, &first_tick());
    assert_eq!(script[0].1.len(), 3);
    assert_eq!(script[2].1.len(), 5);
    let names: Vec<String> = leader
        .step_checksums(JournalPosition::before_action(0, 2).unwrap())
        .unwrap()
        .into_iter()
        .take(5)
        .map(|step| step.name)
        .collect();
    assert_eq!(
        names,
        ["clear site", "lay foundation", "raise frame", "roof", "end of action"]
    );
}

#[test]
fn leaders_with_equal_colonies_record_equal_checksums() {
    let mut a = leader(colony());
    let mut b = leader(colony());
    let script_a = [lead_tick(&mut a, &first_tick()), lead_tick(&mut a, &second_tick())].concat();
    let script_b = [lead_tick(&mut b, &first_tick()), lead_tick(&mut b, &second_tick())].concat();
    assert_eq!(script_a, script_b);
    assert!(script_a.iter().flat_map(|(_, sums)| sums).all(|sum| *sum != 0));
    assert_eq!(state(a.staged_model().unwrap()), state(b.staged_model().unwrap()));
}

#[test]
fn refused_action_stages_nothing() {
    let mut leader = leader(colony());
    leader.stage_tick().unwrap();
    let outcome = leader.stage_action(ColonyAction::Build { agent: AgentId(1) }).unwrap();
    assert_eq!(
        outcome.result,
        ActionResult::Rejected("insufficient_inventory".to_owned())
    );
    assert!(outcome.slot.is_none());
    assert_eq!(leader.timeline().unwrap().operations().len(), 1);
}

#[test]
fn follower_matching_leader_commits_ok() {
    let mut leader = leader(colony());
    let mut follower = follower(colony(), true);
    let script = [
        lead_tick(&mut leader, &first_tick()),
        lead_tick(&mut leader, &second_tick()),
    ]
    .concat();
    follow(&mut follower, &script);

    let target = JournalPosition::after_action(1, 2).unwrap();
    assert_eq!(follower.commit(target).unwrap(), CommitResult::Ok);
    leader.commit(target).unwrap();
    assert_eq!(
        state(follower.staged_model().unwrap()),
        state(leader.staged_model().unwrap())
    );
    assert_eq!(
        follower.timeline().unwrap().checkpoint().unwrap().checksum(),
        leader.timeline().unwrap().checkpoint().unwrap().checksum()
    );
}

#[test]
fn forged_build_checksum_is_pinpointed_to_its_step() {
    let mut leader = leader(colony());
    let mut follower = follower(colony(), true);
    let mut script = lead_tick(&mut leader, &first_tick());
    script[2].1[2] ^= 0xDEAD;
    follow(&mut follower, &script);
    let target = JournalPosition::after_action(0, 2).unwrap();

    let found = follower.find_commit_conflict(target).unwrap().unwrap();
    assert_eq!(found.step_position, JournalPosition::new(0, 2, 2));

    let result = follower.commit(target).unwrap();
    let conflict = result.conflict().unwrap();
    assert!(conflict.localized);
    assert_eq!(conflict.step_position, JournalPosition::new(0, 2, 2));
    assert_eq!(conflict.position, JournalPosition::new(0, 2, 3));
    assert_eq!(conflict.step_name, "raise frame");
    assert_eq!(conflict.action, Some(ColonyAction::Build { agent: AgentId(0) }));
    assert_eq!(conflict.suspect_start, JournalPosition::new(0, 2, 2));
    assert!(conflict.state_before.is_some());
    assert!(conflict.state_after.is_some());
}

#[test]
fn follower_without_checkpoint_suspects_whole_batch() {
    let mut leader = leader(colony());
    let mut follower = follower(colony(), false);
    let mut script = lead_tick(&mut leader, &first_tick());
    let last = script.len() - 1;
    let final_step = script[last].1.len() - 1;
    script[last].1[final_step] ^= 1;
    follow(&mut follower, &script);

    let result = follower.commit(JournalPosition::after_action(0, 3).unwrap()).unwrap();
    let conflict = result.conflict().unwrap();
    assert!(!conflict.localized);
    assert_eq!(conflict.suspect_start, JournalPosition::EPOCH);
    assert_eq!(conflict.suspect_operations.len(), 4);
}

#[test]
fn runtime_only_edit_does_not_diverge() {
    let mut leader = leader(colony());
    let mut follower = follower(colony(), true);
    let script = lead_tick(&mut leader, &first_tick());
    follow(&mut follower, &script);
    follower
        .execute_unsynchronized(|colony| colony.attach_sink(EventSink::new()))
        .unwrap();
    let target = JournalPosition::after_action(0, 3).unwrap();
    assert_eq!(follower.commit(target).unwrap(), CommitResult::Ok);
}

#[test]
fn unsynchronized_follower_edit_is_checkpoint_drift() {
    let mut leader = leader(colony());
    let mut follower = follower(colony(), true);
    let script = lead_tick(&mut leader, &first_tick());
    follow(&mut follower, &script);
    follower
        .execute_unsynchronized(|colony| {
            colony.execute_action(&ColonyAction::Rest { agent: AgentId(2) }, &mut NullStepContext)
        })
        .unwrap();

    let target = JournalPosition::after_action(0, 3).unwrap();
    let result = follower.commit(target).unwrap();
    assert!(matches!(result, CommitResult::CheckpointDrift(_)));
    assert_eq!(follower.timeline().unwrap().checkpoint_position(), target);
}

#[test]
fn snapshot_commit_matches_replayed_commit() {
    let mut replayed = leader(colony());
    let mut snapshotted = leader(colony());
    lead_tick(&mut replayed, &first_tick());
    lead_tick(&mut snapshotted, &first_tick());
    snapshotted.capture_snapshot().unwrap();

    let target = JournalPosition::after_action(0, 3).unwrap();
    replayed.commit(target).unwrap();
    snapshotted.commit(target).unwrap();

    let a = replayed.timeline().unwrap().checkpoint().unwrap().checksum();
    let b = snapshotted.timeline().unwrap().checkpoint().unwrap().checksum();
    assert_ne!(a, 0);
    assert_eq!(a, b);
    assert_eq!(
        state(&replayed.checkpoint_model_copy().unwrap()),
        state(&snapshotted.checkpoint_model_copy().unwrap())
    );
}

#[test]
fn rollback_then_restage_reproduces_checksums() {
    let mut leader = leader(colony());
    lead_tick(&mut leader, &first_tick());
    let checkpoint = JournalPosition::after_action(0, 3).unwrap();
    leader.commit(checkpoint).unwrap();
    let committed = state(leader.staged_model().unwrap());

    let first = lead_tick(&mut leader, &second_tick());
    leader.rollback(checkpoint).unwrap();
    assert_eq!(leader.timeline().unwrap().staged_position(), checkpoint);
    assert!(leader.timeline().unwrap().operations().is_empty());
    assert_eq!(state(leader.staged_model().unwrap()), committed);

    let second = lead_tick(&mut leader, &second_tick());
    assert_eq!(first, second);
}

#[test]
fn snapshots_outside_the_open_window_are_pruned() {
    let mut leader = leader(colony());
    lead_tick(&mut leader, &first_tick());
    leader.capture_snapshot().unwrap();
    lead_tick(&mut leader, &second_tick());
    leader.capture_snapshot().unwrap();
    assert_eq!(leader.timeline().unwrap().snapshot_positions().count(), 2);

    let checkpoint = JournalPosition::after_action(0, 3).unwrap();
    leader.commit(checkpoint).unwrap();
    assert_eq!(leader.timeline().unwrap().snapshot_positions().count(), 1);

    leader.rollback(checkpoint).unwrap();
    assert_eq!(leader.timeline().unwrap().snapshot_positions().count(), 0);
}

#[test]
fn replay_does_not_repeat_side_effects() {
    let sink = EventSink::new();
    let mut model = colony();
    model.attach_sink(sink.clone());
    let mut leader = leader(model);

    lead_tick(&mut leader, &first_tick());
    assert_eq!(sink.len(), 3);
    let checkpoint = JournalPosition::after_action(0, 3).unwrap();
    leader.commit(checkpoint).unwrap();
    assert_eq!(sink.len(), 3);

    lead_tick(&mut leader, &second_tick());
    assert_eq!(sink.len(), 5);
    leader.rollback(checkpoint).unwrap();
    assert_eq!(sink.len(), 5);

    lead_tick(&mut leader, &second_tick());
    assert_eq!(sink.len(), 7);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn spawned_colonies_replay_identically(seed in any::<u64>(), ticks in 1_u32..5) {
        let mut a = leader(spawn_colony(ColonyRules::default(), seed, 4).unwrap());
        let mut b = leader(spawn_colony(ColonyRules::default(), seed, 4).unwrap());
        for _ in 0..ticks {
            for journal in [&mut a, &mut b] {
                journal.stage_tick().unwrap();
                journal.stage_action(ColonyAction::Gather { agent: AgentId(0), resource: Resource::Food }).unwrap();
                journal.stage_action(ColonyAction::Rest { agent: AgentId(1) }).unwrap();
            }
        }
        prop_assert_eq!(
            a.step_checksums(JournalPosition::EPOCH).unwrap(),
            b.step_checksums(JournalPosition::EPOCH).unwrap()
        );
        let staged = a.timeline().unwrap().staged();
        for resource in Resource::ALL {
            prop_assert!(staged.conserves(resource), "{resource:?} leaked");
        }
    }
}
