//! The colony: a small deterministic survival model.
//!
//! Agents live at locations, gather from regenerating stockpiles, trade,
//! rest, move and build. Every source of randomness is drawn from the
//! [`SplitMix64`] stored inside the colony, so two colonies with equal
//! state that apply equal operations stay equal.

use std::collections::BTreeMap;
use std::sync::Arc;

use lockstep_journal::{ActionResult, JournalModel, SideEffects, StepContext};
use serde::{Deserialize, Serialize};

use crate::action::{ColonyAction, reason};
use crate::events::{ColonyEvent, EventSink};
use crate::ids::{AgentId, LocationId};
use crate::ledger::{Flow, ResourceLedger};
use crate::resource::Resource;
use crate::rng::SplitMix64;
use crate::rules::ColonyRules;

/// Hunger never exceeds this value.
pub const MAX_HUNGER: u32 = 100;

/// Resource counts keyed by resource.
pub type Stock = BTreeMap<Resource, u32>;

/// A colonist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Identifier.
    pub id: AgentId,
    /// Where the agent currently is.
    pub location: LocationId,
    /// Remaining energy; the agent is exhausted at 0.
    pub energy: u32,
    /// Hunger in `0..=MAX_HUNGER`.
    pub hunger: u32,
    /// Whether the agent can still act.
    pub alive: bool,
    /// Carried resources.
    pub inventory: Stock,
    /// Structures this agent completed.
    pub structures_built: u32,
}

impl Agent {
    /// Units of `resource` carried.
    pub fn held(&self, resource: Resource) -> u32 {
        held(&self.inventory, resource)
    }
}

/// A place with a shared stockpile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Identifier.
    pub id: LocationId,
    /// Display name.
    pub name: String,
    /// Resources available for gathering.
    pub stockpile: Stock,
    /// Completed structures.
    pub structures: u32,
}

/// Colony state.
#[derive(Debug, Serialize, Deserialize)]
pub struct Colony {
    tick: u64,
    rng: SplitMix64,
    agents: BTreeMap<AgentId, Agent>,
    locations: BTreeMap<LocationId, Location>,
    ledger: ResourceLedger,
    #[serde(skip)]
    rules: Arc<ColonyRules>,
    #[serde(skip)]
    sink: Option<EventSink>,
    #[serde(skip)]
    effects: bool,
}

impl Colony {
    /// Assemble a colony from spawned parts.
    pub fn from_parts(
        rules: Arc<ColonyRules>,
        seed: u64,
        agents: impl IntoIterator<Item = Agent>,
        locations: impl IntoIterator<Item = Location>,
    ) -> Self {
        let mut colony = Self {
            tick: 0,
            rng: SplitMix64::new(seed),
            agents: agents.into_iter().map(|agent| (agent.id, agent)).collect(),
            locations: locations
                .into_iter()
                .map(|location| (location.id, location))
                .collect(),
            ledger: ResourceLedger::default(),
            rules,
            sink: None,
            effects: false,
        };
        colony.ledger =
            ResourceLedger::open(Resource::ALL.map(|resource| (resource, colony.total(resource))));
        colony
    }

    /// Ticks executed so far.
    pub const fn tick_count(&self) -> u64 {
        self.tick
    }

    /// The rules this colony runs under.
    pub fn rules(&self) -> &ColonyRules {
        &self.rules
    }

    /// All agents by id.
    pub const fn agents(&self) -> &BTreeMap<AgentId, Agent> {
        &self.agents
    }

    /// One agent.
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// All locations by id.
    pub const fn locations(&self) -> &BTreeMap<LocationId, Location> {
        &self.locations
    }

    /// One location.
    pub fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(&id)
    }

    /// The resource flow ledger.
    pub const fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Whether the units of `resource` held across the colony match the
    /// flows recorded in the ledger.
    pub fn conserves(&self, resource: Resource) -> bool {
        self.total(resource) == self.ledger.flows(resource).expected_balance()
    }

    /// Agents that can still act.
    pub fn living_agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values().filter(|agent| agent.alive)
    }

    /// Total units of `resource` across stockpiles and inventories.
    pub fn total(&self, resource: Resource) -> u64 {
        let stocked: u64 = self
            .locations
            .values()
            .map(|location| u64::from(held(&location.stockpile, resource)))
            .sum();
        let carried: u64 = self
            .agents
            .values()
            .map(|agent| u64::from(agent.held(resource)))
            .sum();
        stocked.saturating_add(carried)
    }

    /// Install an event sink with side effects enabled.
    pub fn attach_sink(&mut self, sink: EventSink) {
        self.sink = Some(sink);
        self.effects = true;
    }

    /// Check an action against the current state.
    ///
    /// # Errors
    ///
    /// Returns one of the [`reason`] codes.
    pub fn validate(&self, action: &ColonyAction) -> Result<(), &'static str> {
        let actor = self.living(action.actor())?;
        let rules = &*self.rules;
        match action {
            ColonyAction::Gather { resource, .. } => {
                require(actor.energy >= rules.gather_cost, reason::INSUFFICIENT_ENERGY)?;
                let location = self
                    .locations
                    .get(&actor.location)
                    .ok_or(reason::UNKNOWN_LOCATION)?;
                require(held(&location.stockpile, *resource) > 0, reason::INSUFFICIENT_STOCK)
            }
            ColonyAction::Transfer {
                from,
                to,
                resource,
                quantity,
            } => {
                require(from != to, reason::SELF_TRANSFER)?;
                require(*quantity > 0, reason::ZERO_QUANTITY)?;
                let receiver = self.living(*to)?;
                require(receiver.location == actor.location, reason::NOT_CO_LOCATED)?;
                require(actor.held(*resource) >= *quantity, reason::INSUFFICIENT_INVENTORY)
            }
            ColonyAction::Rest { .. } => Ok(()),
            ColonyAction::Move { to, .. } => {
                require(self.locations.contains_key(to), reason::UNKNOWN_LOCATION)?;
                require(actor.location != *to, reason::ALREADY_THERE)?;
                require(actor.energy >= rules.move_cost, reason::INSUFFICIENT_ENERGY)
            }
            ColonyAction::Build { .. } => {
                require(self.locations.contains_key(&actor.location), reason::UNKNOWN_LOCATION)?;
                require(actor.energy >= rules.build_energy, reason::INSUFFICIENT_ENERGY)?;
                require(
                    actor.held(Resource::Wood) >= rules.build_wood
                        && actor.held(Resource::Stone) >= rules.build_stone,
                    reason::INSUFFICIENT_INVENTORY,
                )
            }
        }
    }

    fn living(&self, id: AgentId) -> Result<&Agent, &'static str> {
        let agent = self.agents.get(&id).ok_or(reason::UNKNOWN_AGENT)?;
        require(agent.alive, reason::AGENT_EXHAUSTED)?;
        Ok(agent)
    }

    fn emit(&self, event: ColonyEvent) {
        if self.effects
            && let Some(sink) = &self.sink
        {
            sink.push(event);
        }
    }

    fn regenerate(&mut self) {
        let bound = self.rules.regen_max.saturating_add(1);
        let cap = self.rules.stockpile_cap;
        for location in self.locations.values_mut() {
            for resource in Resource::ALL {
                let growth = self.rng.next_below(bound);
                let units = location.stockpile.entry(resource).or_insert(0);
                let grown = units.saturating_add(growth).min(cap);
                self.ledger.record(resource, Flow::Regenerated, grown.saturating_sub(*units));
                *units = grown;
            }
        }
    }

    fn apply_vitals(&mut self) {
        let rules = Arc::clone(&self.rules);
        let mut events = Vec::new();
        for agent in self.agents.values_mut().filter(|agent| agent.alive) {
            agent.hunger = agent.hunger.saturating_add(rules.hunger_rate).min(MAX_HUNGER);
            if agent.hunger >= rules.eat_threshold && take(&mut agent.inventory, Resource::Food, 1) {
                agent.hunger = agent.hunger.saturating_sub(rules.food_value);
                self.ledger.record(Resource::Food, Flow::Eaten, 1);
                events.push(ColonyEvent::Ate { agent: agent.id });
            }
            if agent.hunger >= rules.starvation_threshold {
                agent.energy = agent.energy.saturating_sub(rules.starvation_damage);
            }
            if agent.energy == 0 {
                agent.alive = false;
                events.push(ColonyEvent::Exhausted { agent: agent.id });
            }
        }
        for event in events {
            self.emit(event);
        }
    }

    fn gather(&mut self, id: AgentId, resource: Resource) {
        let yield_bound = self.rules.gather_yield.max(1);
        let cost = self.rules.gather_cost;
        let draw = self.rng.next_below(yield_bound).saturating_add(1);
        let Some(agent) = self.agents.get_mut(&id) else {
            return;
        };
        let Some(location) = self.locations.get_mut(&agent.location) else {
            return;
        };
        let quantity = draw.min(held(&location.stockpile, resource));
        take(&mut location.stockpile, resource, quantity);
        give(&mut agent.inventory, resource, quantity);
        agent.energy = agent.energy.saturating_sub(cost);
        self.ledger.record(resource, Flow::Gathered, quantity);
        self.emit(ColonyEvent::Gathered {
            agent: id,
            resource,
            quantity,
        });
    }

    fn transfer(&mut self, from: AgentId, to: AgentId, resource: Resource, quantity: u32) {
        let taken = self
            .agents
            .get_mut(&from)
            .is_some_and(|giver| take(&mut giver.inventory, resource, quantity));
        if !taken {
            return;
        }
        if let Some(receiver) = self.agents.get_mut(&to) {
            give(&mut receiver.inventory, resource, quantity);
        }
        self.ledger.record(resource, Flow::Transferred, quantity);
        self.emit(ColonyEvent::Transferred {
            from,
            to,
            resource,
            quantity,
        });
    }

    fn rest(&mut self, id: AgentId) {
        let gain = self.rules.rest_gain;
        let max = self.rules.max_energy;
        let Some(agent) = self.agents.get_mut(&id) else {
            return;
        };
        agent.energy = agent.energy.saturating_add(gain).min(max);
        let energy = agent.energy;
        self.emit(ColonyEvent::Rested { agent: id, energy });
    }

    fn relocate(&mut self, id: AgentId, to: LocationId) {
        let cost = self.rules.move_cost;
        let Some(agent) = self.agents.get_mut(&id) else {
            return;
        };
        agent.location = to;
        agent.energy = agent.energy.saturating_sub(cost);
        self.emit(ColonyEvent::Moved { agent: id, to });
    }

    fn build(&mut self, id: AgentId, ctx: &mut dyn StepContext<Self>) {
        let rules = Arc::clone(&self.rules);

        self.with_agent(id, |agent| {
            agent.energy = agent.energy.saturating_sub(rules.build_energy);
        });
        ctx.step(self, "clear site");

        let laid = self.with_agent(id, |agent| {
            take(&mut agent.inventory, Resource::Stone, rules.build_stone)
        });
        if laid == Some(true) {
            self.ledger.record(Resource::Stone, Flow::Built, rules.build_stone);
        }
        ctx.step(self, "lay foundation");

        let framed = self.with_agent(id, |agent| {
            take(&mut agent.inventory, Resource::Wood, rules.build_wood)
        });
        if framed == Some(true) {
            self.ledger.record(Resource::Wood, Flow::Built, rules.build_wood);
        }
        ctx.step(self, "raise frame");

        let site = self.with_agent(id, |agent| {
            agent.structures_built = agent.structures_built.saturating_add(1);
            agent.location
        });
        if let Some(location_id) = site {
            if let Some(location) = self.locations.get_mut(&location_id) {
                location.structures = location.structures.saturating_add(1);
            }
            self.emit(ColonyEvent::Built {
                agent: id,
                location: location_id,
            });
        }
        ctx.step(self, "roof");
    }

    fn with_agent<T>(&mut self, id: AgentId, apply: impl FnOnce(&mut Agent) -> T) -> Option<T> {
        self.agents.get_mut(&id).map(apply)
    }
}

impl JournalModel for Colony {
    type Action = ColonyAction;
    type RuntimeData = Option<EventSink>;
    type Context = Arc<ColonyRules>;

    fn tick(&mut self, ctx: &mut dyn StepContext<Self>) {
        self.tick = self.tick.saturating_add(1);
        self.regenerate();
        ctx.step(self, "regenerate");
        self.apply_vitals();
        ctx.step(self, "vitals");
    }

    fn execute_action(&mut self, action: &ColonyAction, ctx: &mut dyn StepContext<Self>) -> ActionResult {
        if let Err(code) = self.validate(action) {
            return ActionResult::Rejected(code.to_owned());
        }
        match action {
            ColonyAction::Gather { agent, resource } => self.gather(*agent, *resource),
            ColonyAction::Transfer {
                from,
                to,
                resource,
                quantity,
            } => self.transfer(*from, *to, *resource, *quantity),
            ColonyAction::Rest { agent } => self.rest(*agent),
            ColonyAction::Move { agent, to } => self.relocate(*agent, *to),
            ColonyAction::Build { agent } => self.build(*agent, ctx),
        }
        ActionResult::Success
    }

    fn dry_run_action(&self, action: &ColonyAction) -> ActionResult {
        match self.validate(action) {
            Ok(()) => ActionResult::Success,
            Err(code) => ActionResult::Rejected(code.to_owned()),
        }
    }

    fn resolution_context(&self) -> Arc<ColonyRules> {
        Arc::clone(&self.rules)
    }

    fn attach_context(&mut self, context: &Arc<ColonyRules>) {
        self.rules = Arc::clone(context);
    }

    fn runtime_data(&self) -> Option<EventSink> {
        self.sink.clone()
    }

    fn attach_runtime_data(&mut self, data: &Option<EventSink>, side_effects: SideEffects) {
        self.sink.clone_from(data);
        self.effects = side_effects == SideEffects::Enabled;
    }
}

const fn require(condition: bool, code: &'static str) -> Result<(), &'static str> {
    if condition { Ok(()) } else { Err(code) }
}

fn held(stock: &Stock, resource: Resource) -> u32 {
    stock.get(&resource).copied().unwrap_or(0)
}

fn give(stock: &mut Stock, resource: Resource, quantity: u32) {
    let units = stock.entry(resource).or_insert(0);
    *units = units.saturating_add(quantity);
}

/// Remove `quantity` units; leaves the stock untouched and returns `false`
/// if fewer are available.
fn take(stock: &mut Stock, resource: Resource, quantity: u32) -> bool {
    match stock.get_mut(&resource) {
        Some(units) if *units >= quantity => {
            *units = units.saturating_sub(quantity);
            true
        }
        _ => quantity == 0,
    }
}
