//! Core types for the swarm engagement simulation.
//!
//! A [`SwarmWorld`] owns a population of drone and target agents on an
//! unbounded 2D plane, advances them one discrete tick at a time, and tracks
//! population counters until the engagement resolves. Drones flock toward
//! defended targets under boids-style steering, fire once when in weapon
//! range, then retreat; targets are stationary turrets that track and shoot
//! back.

use ordered_float::OrderedFloat;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::{Key, KeyData, SlotMap, new_key_type};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};
use swarmsim_index::{IndexError, NeighborhoodIndex, UniformGridIndex};
use thiserror::Error;

new_key_type! {
    /// Stable handle for agents backed by a generational slot map.
    pub struct AgentId;
}

const FULL_TURN: f32 = std::f32::consts::TAU;
const HALF_TURN: f32 = std::f32::consts::PI;

/// Angular slack within which a turret considers itself on-bearing.
const AIM_TOLERANCE: f32 = 1e-2;

/// Floor applied to edge-distance denominators so the push-back stays finite
/// on (or past) the boundary.
const EDGE_EPSILON: f32 = 1e-3;

fn wrap_signed_angle(mut angle: f32) -> f32 {
    if angle.is_nan() {
        return 0.0;
    }
    while angle <= -HALF_TURN {
        angle += FULL_TURN;
    }
    while angle > HALF_TURN {
        angle -= FULL_TURN;
    }
    angle
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Plain 2D vector used for positions, velocities, and steering.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing along `angle` (radians).
    #[must_use]
    pub fn from_angle(angle: f32) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    /// Squared Euclidean length.
    #[must_use]
    pub fn length_sq(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (other - self).length()
    }

    /// Angle of the vector in radians, measured from the positive x axis.
    #[must_use]
    pub fn angle(self) -> f32 {
        self.y.atan2(self.x)
    }

    /// Rescale to exactly `max` when the length exceeds it, preserving
    /// direction. Shorter vectors pass through unchanged.
    #[must_use]
    pub fn clamp_length(self, max: f32) -> Self {
        let len = self.length();
        if len > max && len > 0.0 {
            self * (max / len)
        } else {
            self
        }
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl From<Vec2> for (f32, f32) {
    fn from(v: Vec2) -> Self {
        (v.x, v.y)
    }
}

/// Drone combat lifecycle. A drone spends its single shot transitioning from
/// [`DroneState::Flocking`] to [`DroneState::Retreating`]; retreated drones
/// keep flying but no longer fire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DroneState {
    #[default]
    Flocking,
    Retreating,
}

/// Target lifecycle. Dead targets stay in the world but take no further
/// actions and are ineligible for acquisition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TargetState {
    #[default]
    Alive,
    Dead,
}

/// Weights applied to the five steering contributions when composing drone
/// acceleration. All weights must be non-negative with a positive sum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SteeringWeights {
    pub alignment: f32,
    pub cohesion: f32,
    pub separation: f32,
    pub edge_avoidance: f32,
    pub target_seeking: f32,
}

impl Default for SteeringWeights {
    fn default() -> Self {
        Self {
            alignment: 1.0,
            cohesion: 1.0,
            separation: 1.0,
            edge_avoidance: 1.0,
            target_seeking: 1.0,
        }
    }
}

impl SteeringWeights {
    /// Sum of all five weights.
    #[must_use]
    pub fn sum(&self) -> f32 {
        self.alignment + self.cohesion + self.separation + self.edge_avoidance + self.target_seeking
    }

    fn validate(&self) -> Result<(), WorldError> {
        let entries = [
            self.alignment,
            self.cohesion,
            self.separation,
            self.edge_avoidance,
            self.target_seeking,
        ];
        if entries.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(WorldError::InvalidConfig(
                "steering weights must be non-negative and finite",
            ));
        }
        if self.sum() <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "steering weights must not all be zero",
            ));
        }
        Ok(())
    }

    /// Compose the five steering contributions into one acceleration vector
    /// as a weighted *average*: the weighted sum divided by the weight sum,
    /// so the result's magnitude does not scale with the number of active
    /// contributions.
    #[must_use]
    pub fn combine(
        &self,
        alignment: Vec2,
        cohesion: Vec2,
        separation: Vec2,
        edge_avoidance: Vec2,
        target_seeking: Vec2,
    ) -> Vec2 {
        let total = alignment * self.alignment
            + cohesion * self.cohesion
            + separation * self.separation
            + edge_avoidance * self.edge_avoidance
            + target_seeking * self.target_seeking;
        total * (1.0 / self.sum())
    }
}

/// The boids trio computed in one pass over drone neighbors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlockSteering {
    pub alignment: Vec2,
    pub cohesion: Vec2,
    pub separation: Vec2,
}

/// Kinematic and combat state of one drone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DroneBody {
    pub velocity: Vec2,
    pub acceleration: Vec2,
    pub state: DroneState,
    pub weights: SteeringWeights,
}

/// State of one stationary turret target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TargetBody {
    /// Turret bearing, radians from the positive x axis.
    pub heading: f32,
    pub state: TargetState,
    /// Seconds remaining before the turret may fire again.
    pub time_until_fire: f32,
}

/// Tagged per-kind agent state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum AgentBody {
    Drone(DroneBody),
    Target(TargetBody),
}

/// One simulation entity: a shared position plus kind-specific state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub position: Vec2,
    pub body: AgentBody,
}

impl Agent {
    /// Borrow the drone state when this agent is a drone.
    #[must_use]
    pub fn as_drone(&self) -> Option<&DroneBody> {
        match &self.body {
            AgentBody::Drone(drone) => Some(drone),
            AgentBody::Target(_) => None,
        }
    }

    /// Borrow the target state when this agent is a target.
    #[must_use]
    pub fn as_target(&self) -> Option<&TargetBody> {
        match &self.body {
            AgentBody::Target(target) => Some(target),
            AgentBody::Drone(_) => None,
        }
    }
}

/// Errors that can occur when constructing world state.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Spatial index rejected its configuration.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Static configuration for a swarm engagement.
///
/// Loading and outer validation belong to the caller; `SwarmWorld::new`
/// re-checks only the invariants this crate depends on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmConfig {
    /// Width of the engagement domain in meters.
    pub domain_width: f32,
    /// Height of the engagement domain in meters.
    pub domain_height: f32,
    /// Number of drones spawned at construction.
    pub num_drones: u32,
    /// Number of targets spawned at construction.
    pub num_targets: u32,
    /// Drone vision radius in meters.
    pub drone_vis_radius: f32,
    /// Drone weapon radius in meters.
    pub drone_weapon_radius: f32,
    /// Probability in [0, 1] that a committed drone shot destroys its target.
    pub drone_accuracy: f32,
    /// Drone velocity cap, meters per second.
    pub drone_max_velocity: f32,
    /// Drone acceleration cap, meters per second squared.
    pub drone_max_acceleration: f32,
    /// Target vision radius in meters.
    pub target_vis_radius: f32,
    /// Target weapon range in meters.
    pub target_weapon_range: f32,
    /// Seconds between target shots.
    pub target_fire_cooldown: f32,
    /// Maximum turret turn rate, radians per second.
    pub target_turn_rate: f32,
    /// Procurement cost of one drone, USD.
    pub drone_cost: f64,
    /// Value of one destroyed target, USD.
    pub target_value: f64,
    /// Duration of one simulation tick in seconds.
    pub dt: f32,
    /// Steering weights copied onto each drone at spawn.
    pub steering_weights: SteeringWeights,
    /// Cell size for the uniform grid neighborhood index.
    pub cell_size: f32,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
    /// Optional RNG seed for reproducible engagements.
    pub rng_seed: Option<u64>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            domain_width: 1_000.0,
            domain_height: 1_000.0,
            num_drones: 70,
            num_targets: 3,
            drone_vis_radius: 500.0,
            drone_weapon_radius: 100.0,
            drone_accuracy: 0.9,
            drone_max_velocity: 27.0,
            drone_max_acceleration: 20.0,
            target_vis_radius: 1_000.0,
            target_weapon_range: 400.0,
            target_fire_cooldown: 2.0,
            target_turn_rate: 45.0,
            drone_cost: 5_000.0,
            target_value: 1e6,
            dt: 1.0,
            steering_weights: SteeringWeights::default(),
            cell_size: 100.0,
            history_capacity: 256,
            rng_seed: None,
        }
    }
}

impl SwarmConfig {
    fn validate(&self) -> Result<(), WorldError> {
        if !(self.domain_width > 0.0) || !(self.domain_height > 0.0) {
            return Err(WorldError::InvalidConfig(
                "domain dimensions must be positive",
            ));
        }
        if !(self.dt > 0.0) || !self.dt.is_finite() {
            return Err(WorldError::InvalidConfig("dt must be positive and finite"));
        }
        if !(self.drone_vis_radius > 0.0)
            || !(self.drone_weapon_radius > 0.0)
            || !(self.target_vis_radius > 0.0)
            || !(self.target_weapon_range > 0.0)
        {
            return Err(WorldError::InvalidConfig(
                "vision and weapon radii must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.drone_accuracy) {
            return Err(WorldError::InvalidConfig(
                "drone_accuracy must lie in [0, 1]",
            ));
        }
        if !(self.drone_max_velocity > 0.0) || !(self.drone_max_acceleration > 0.0) {
            return Err(WorldError::InvalidConfig(
                "velocity and acceleration caps must be positive",
            ));
        }
        if self.target_fire_cooldown < 0.0 || !(self.target_turn_rate > 0.0) {
            return Err(WorldError::InvalidConfig(
                "cooldown must be non-negative and turn rate positive",
            ));
        }
        if self.drone_cost < 0.0 || self.target_value < 0.0 {
            return Err(WorldError::InvalidConfig("costs must be non-negative"));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        self.steering_weights.validate()
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Population counters for the engagement, mutated only through the named
/// record operations so the invariants stay auditable in one place.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Population {
    spawned_drones: u32,
    spawned_targets: u32,
    drones: u32,
    armed_drones: u32,
    targets: u32,
    current_id: i64,
}

impl Population {
    /// Live drones, regardless of combat state.
    #[must_use]
    pub const fn drones(&self) -> u32 {
        self.drones
    }

    /// Live drones still in the flocking (armed) state.
    #[must_use]
    pub const fn armed_drones(&self) -> u32 {
        self.armed_drones
    }

    /// Targets not yet destroyed.
    #[must_use]
    pub const fn targets(&self) -> u32 {
        self.targets
    }

    /// Drones spawned over the lifetime of the world.
    #[must_use]
    pub const fn spawned_drones(&self) -> u32 {
        self.spawned_drones
    }

    /// Targets spawned over the lifetime of the world.
    #[must_use]
    pub const fn spawned_targets(&self) -> u32 {
        self.spawned_targets
    }

    /// Running identifier counter: incremented per spawn, decremented per
    /// drone death.
    #[must_use]
    pub const fn current_id(&self) -> i64 {
        self.current_id
    }

    fn record_drone_spawn(&mut self) {
        self.spawned_drones += 1;
        self.drones += 1;
        self.armed_drones += 1;
    }

    fn record_target_spawn(&mut self) {
        self.spawned_targets += 1;
        self.targets += 1;
    }

    fn issue_id(&mut self) {
        self.current_id += 1;
    }

    fn retire_id(&mut self) {
        self.current_id -= 1;
    }

    fn record_drone_death(&mut self, was_armed: bool) {
        self.drones = self.drones.saturating_sub(1);
        if was_armed {
            self.armed_drones = self.armed_drones.saturating_sub(1);
        }
    }

    fn record_disarm(&mut self) {
        self.armed_drones = self.armed_drones.saturating_sub(1);
    }

    fn record_target_death(&mut self) {
        self.targets = self.targets.saturating_sub(1);
    }
}

/// Per-tick population snapshot retained in the world history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: Tick,
    pub drones: u32,
    pub armed_drones: u32,
    pub targets: u32,
}

/// Result of running an engagement to completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngagementOutcome {
    /// Tick at which the run stopped.
    pub ticks: u64,
    pub drones_remaining: u32,
    pub armed_remaining: u32,
    pub targets_remaining: u32,
    pub drones_lost: u32,
    pub targets_destroyed: u32,
    /// `targets_destroyed * target_value - drones_lost * drone_cost`.
    pub utility: f64,
}

/// Aggregate world state: agents, scheduler, spatial index, and counters.
pub struct SwarmWorld {
    config: SwarmConfig,
    tick: Tick,
    rng: SmallRng,
    agents: SlotMap<AgentId, Agent>,
    /// Activation order. Agents act in spawn order each tick; removal takes
    /// an agent out of dispatch immediately.
    schedule: Vec<AgentId>,
    index: UniformGridIndex,
    population: Population,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for SwarmWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwarmWorld")
            .field("tick", &self.tick)
            .field("drones", &self.population.drones())
            .field("armed_drones", &self.population.armed_drones())
            .field("targets", &self.population.targets())
            .finish()
    }
}

impl SwarmWorld {
    /// Instantiate a world and spawn the configured initial population:
    /// drones in a band across the upper half of the domain, targets evenly
    /// spaced along a line near the bottom.
    pub fn new(config: SwarmConfig) -> Result<Self, WorldError> {
        let mut world = Self::empty(config)?;
        world.seed_agents();
        Ok(world)
    }

    /// Instantiate a world with validated configuration but no agents.
    /// Useful for constructing exact scenarios.
    pub fn empty(config: SwarmConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let index = UniformGridIndex::new(config.cell_size)?;
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            agents: SlotMap::with_key(),
            schedule: Vec::new(),
            index,
            population: Population::default(),
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    fn seed_agents(&mut self) {
        let width = self.config.domain_width;
        let height = self.config.domain_height;
        for _ in 0..self.config.num_drones {
            let x = self.rng.random_range(width * 0.3..width * 0.7);
            let y = self.rng.random_range(height * 0.625..height * 0.875);
            self.spawn_drone(Vec2::new(x, y));
        }
        let num_targets = self.config.num_targets;
        let margin = width / (num_targets + 1) as f32;
        for i in 0..num_targets {
            let x = margin * (i + 1) as f32;
            self.spawn_target(Vec2::new(x, height * 0.1));
        }
    }

    #[inline]
    fn raw_key(id: AgentId) -> u64 {
        id.data().as_ffi()
    }

    #[inline]
    fn id_from_raw(raw: u64) -> AgentId {
        AgentId::from(KeyData::from_ffi(raw))
    }

    fn insert_agent(&mut self, position: Vec2, body: AgentBody) -> AgentId {
        let id = self.agents.insert(Agent { position, body });
        self.index.insert(Self::raw_key(id), position.into());
        self.schedule.push(id);
        self.population.issue_id();
        id
    }

    /// Spawn a drone at `position` with a random initial heading in (-π, 0)
    /// (facing down toward the target line), scaled by the velocity and
    /// acceleration caps.
    pub fn spawn_drone(&mut self, position: Vec2) -> AgentId {
        let heading = self.rng.random_range(-HALF_TURN..0.0);
        let direction = Vec2::from_angle(heading);
        let body = DroneBody {
            velocity: direction * self.config.drone_max_velocity,
            acceleration: direction * self.config.drone_max_acceleration,
            state: DroneState::Flocking,
            weights: self.config.steering_weights,
        };
        let id = self.insert_agent(position, AgentBody::Drone(body));
        self.population.record_drone_spawn();
        id
    }

    /// Spawn a target turret at `position` with a random initial bearing.
    pub fn spawn_target(&mut self, position: Vec2) -> AgentId {
        let heading = self.rng.random_range(0.0..FULL_TURN);
        let body = TargetBody {
            heading,
            state: TargetState::Alive,
            time_until_fire: self.config.target_fire_cooldown,
        };
        let id = self.insert_agent(position, AgentBody::Target(body));
        self.population.record_target_spawn();
        id
    }

    /// Execute one simulation tick: every scheduled agent acts once, in
    /// spawn order. Agents removed earlier in the same tick are skipped.
    pub fn step(&mut self) -> TickSummary {
        let order = self.schedule.clone();
        for id in order {
            let Some(agent) = self.agents.get(id) else {
                continue;
            };
            match agent.body {
                AgentBody::Drone(_) => self.drone_step(id),
                AgentBody::Target(_) => self.target_step(id),
            }
        }
        self.tick = self.tick.next();
        let summary = TickSummary {
            tick: self.tick,
            drones: self.population.drones(),
            armed_drones: self.population.armed_drones(),
            targets: self.population.targets(),
        };
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary.clone());
        summary
    }

    /// Whether the engagement has resolved: every drone destroyed, every
    /// target destroyed, or every surviving drone out of ammunition.
    #[must_use]
    pub fn is_engagement_over(&self) -> bool {
        self.population.drones() == 0
            || self.population.targets() == 0
            || self.population.armed_drones() == 0
    }

    /// Step until the engagement resolves or `max_ticks` elapses, then
    /// report losses and net utility.
    pub fn run_to_completion(&mut self, max_ticks: u64) -> EngagementOutcome {
        while !self.is_engagement_over() && self.tick.0 < max_ticks {
            self.step();
        }
        let population = &self.population;
        EngagementOutcome {
            ticks: self.tick.0,
            drones_remaining: population.drones(),
            armed_remaining: population.armed_drones(),
            targets_remaining: population.targets(),
            drones_lost: population.spawned_drones() - population.drones(),
            targets_destroyed: population.spawned_targets() - population.targets(),
            utility: self.utility(),
        }
    }

    /// Net engagement value so far: destroyed targets credited at
    /// `target_value`, lost drones debited at `drone_cost`.
    #[must_use]
    pub fn utility(&self) -> f64 {
        let population = &self.population;
        let targets_destroyed = f64::from(population.spawned_targets() - population.targets());
        let drones_lost = f64::from(population.spawned_drones() - population.drones());
        targets_destroyed * self.config.target_value - drones_lost * self.config.drone_cost
    }

    // ---- drone behavior ---------------------------------------------------

    /// Per-tick drone behavior, in the four-phase order the trajectory model
    /// depends on:
    ///
    /// 1. move on the *previous* tick's velocity,
    /// 2. recompute acceleration from current steering,
    /// 3. integrate velocity,
    /// 4. resolve combat.
    ///
    /// Position deliberately lags the freshly integrated velocity by one
    /// tick; reordering the phases changes every trajectory.
    pub fn drone_step(&mut self, id: AgentId) {
        self.drone_update_position(id);
        self.drone_update_acceleration(id);
        self.drone_update_velocity(id);
        self.drone_fire(id);
    }

    /// Advance position by `velocity * dt` through the world's move
    /// operation, which keeps the spatial index current. Position itself is
    /// never capped.
    pub fn drone_update_position(&mut self, id: AgentId) {
        let Some(agent) = self.agents.get(id) else {
            return;
        };
        let AgentBody::Drone(drone) = &agent.body else {
            return;
        };
        let next = agent.position + drone.velocity * self.config.dt;
        self.move_agent(id, next);
    }

    /// Recompute acceleration as the weighted average of the five steering
    /// contributions, capped at `drone_max_acceleration` with direction
    /// preserved.
    pub fn drone_update_acceleration(&mut self, id: AgentId) {
        let flock = self.flocking_steering(id);
        let edge_avoidance = self.edge_avoidance_steering(id);
        let target_seeking = self.target_seeking_steering(id);
        let max_acceleration = self.config.drone_max_acceleration;
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        let AgentBody::Drone(drone) = &mut agent.body else {
            return;
        };
        let combined = drone.weights.combine(
            flock.alignment,
            flock.cohesion,
            flock.separation,
            edge_avoidance,
            target_seeking,
        );
        drone.acceleration = combined.clamp_length(max_acceleration);
    }

    /// First-order Euler step: `velocity += acceleration * dt`, capped at
    /// `drone_max_velocity` with direction preserved.
    pub fn drone_update_velocity(&mut self, id: AgentId) {
        let dt = self.config.dt;
        let max_velocity = self.config.drone_max_velocity;
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        let AgentBody::Drone(drone) = &mut agent.body else {
            return;
        };
        drone.velocity = (drone.velocity + drone.acceleration * dt).clamp_length(max_velocity);
    }

    /// Attempt to fire at the nearest eligible target.
    ///
    /// No-op when the drone is retreating, when no eligible target is
    /// visible, or when the nearest target sits outside the weapon radius;
    /// an out-of-range pass costs nothing. Once a target is in range the
    /// shot is committed unconditionally: the target resolves a hit at the
    /// drone's accuracy, the drone transitions to retreating, and the armed
    /// counter drops by one.
    pub fn drone_fire(&mut self, id: AgentId) {
        let Some(agent) = self.agents.get(id) else {
            return;
        };
        let AgentBody::Drone(drone) = &agent.body else {
            return;
        };
        if drone.state == DroneState::Retreating {
            return;
        }
        let origin = agent.position;
        let Some(target_id) = self.nearest_target(id) else {
            return;
        };
        let Some(target) = self.agents.get(target_id) else {
            return;
        };
        if origin.distance(target.position) > self.config.drone_weapon_radius {
            return;
        }
        let accuracy = self.config.drone_accuracy;
        self.resolve_target_hit(target_id, accuracy);
        if let Some(agent) = self.agents.get_mut(id)
            && let AgentBody::Drone(drone) = &mut agent.body
        {
            drone.state = DroneState::Retreating;
        }
        self.population.record_disarm();
    }

    /// Nearest living target within the drone's vision radius, or `None`.
    /// Drones and dead targets are ineligible; ties keep the first
    /// candidate encountered.
    #[must_use]
    pub fn nearest_target(&self, id: AgentId) -> Option<AgentId> {
        let agent = self.agents.get(id)?;
        let origin = agent.position;
        let mut best: Option<(AgentId, OrderedFloat<f32>)> = None;
        self.index.neighbors_within(
            origin.into(),
            self.config.drone_vis_radius,
            Some(Self::raw_key(id)),
            &mut |raw, dist_sq| {
                let other_id = Self::id_from_raw(raw);
                let Some(other) = self.agents.get(other_id) else {
                    return;
                };
                let AgentBody::Target(target) = &other.body else {
                    return;
                };
                if target.state == TargetState::Dead {
                    return;
                }
                match best {
                    Some((_, nearest)) if dist_sq >= nearest => {}
                    _ => best = Some((other_id, dist_sq)),
                }
            },
        );
        best.map(|(target_id, _)| target_id)
    }

    /// Resolve a shot against `target_id` with the shooter's hit
    /// `probability`. The draw comes from the world RNG; a hit transitions
    /// the target to dead and decrements the target counter.
    pub fn resolve_target_hit(&mut self, target_id: AgentId, probability: f32) {
        let draw: f32 = self.rng.random();
        if draw >= probability {
            return;
        }
        if let Some(agent) = self.agents.get_mut(target_id)
            && let AgentBody::Target(target) = &mut agent.body
            && target.state == TargetState::Alive
        {
            target.state = TargetState::Dead;
            self.population.record_target_death();
        }
    }

    /// Remove a drone from the world: arena, spatial index, and scheduler,
    /// so it receives no further ticks. Decrements the drone counter, the
    /// armed counter when the drone was still flocking, and the running id
    /// counter. Must be called at most once per drone; the scheduler
    /// guarantees this by dropping removed agents from dispatch.
    pub fn kill_drone(&mut self, id: AgentId) {
        let Some(agent) = self.agents.get(id) else {
            return;
        };
        let AgentBody::Drone(drone) = &agent.body else {
            return;
        };
        let was_armed = drone.state == DroneState::Flocking;
        let position = agent.position;
        self.index.remove(Self::raw_key(id), position.into());
        self.agents.remove(id);
        self.schedule.retain(|scheduled| *scheduled != id);
        self.population.record_drone_death(was_armed);
        self.population.retire_id();
    }

    fn move_agent(&mut self, id: AgentId, next: Vec2) {
        if let Some(agent) = self.agents.get_mut(id) {
            let previous = agent.position;
            agent.position = next;
            self.index
                .relocate(Self::raw_key(id), previous.into(), next.into());
        }
    }

    // ---- steering ----------------------------------------------------------

    /// Alignment, cohesion, and separation from one pass over drone
    /// neighbors within the vision radius. All three are zero when no drone
    /// neighbor is visible or the summed neighbor velocity vanishes.
    fn flocking_steering(&self, id: AgentId) -> FlockSteering {
        let Some(agent) = self.agents.get(id) else {
            return FlockSteering::default();
        };
        let AgentBody::Drone(drone) = &agent.body else {
            return FlockSteering::default();
        };
        let origin = agent.position;
        let max_velocity = self.config.drone_max_velocity;

        let mut neighbor_count = 0usize;
        let mut velocity_sum = Vec2::ZERO;
        let mut center_of_mass = Vec2::ZERO;
        let mut away_sum = Vec2::ZERO;
        self.index.neighbors_within(
            origin.into(),
            self.config.drone_vis_radius,
            Some(Self::raw_key(id)),
            &mut |raw, dist_sq| {
                let Some(other) = self.agents.get(Self::id_from_raw(raw)) else {
                    return;
                };
                let AgentBody::Drone(other_drone) = &other.body else {
                    return;
                };
                velocity_sum += other_drone.velocity;
                center_of_mass += other.position;
                let distance = dist_sq.into_inner().sqrt();
                if distance > 0.0 {
                    away_sum += (origin - other.position) * (1.0 / distance);
                }
                neighbor_count += 1;
            },
        );

        if neighbor_count == 0 || velocity_sum.length() == 0.0 {
            return FlockSteering::default();
        }
        let inv_count = 1.0 / neighbor_count as f32;

        let mean_velocity = velocity_sum * inv_count;
        let alignment = mean_velocity * (max_velocity / mean_velocity.length()) - drone.velocity;

        let mut com_direction = center_of_mass * inv_count - origin;
        let com_distance = com_direction.length();
        if com_distance > 0.0 {
            com_direction = com_direction * (max_velocity / com_distance);
        }
        let cohesion = com_direction - drone.velocity;

        let mut away = away_sum * inv_count;
        let away_length = away.length();
        if away_length > 0.0 {
            away = away * (max_velocity / away_length);
        }
        let separation = away - drone.velocity;

        FlockSteering {
            alignment,
            cohesion,
            separation,
        }
    }

    /// Inverse-distance push away from domain edges, active inside a 7.5%
    /// margin when the edge is also within vision range. Averaged over
    /// influencing edges and scaled to the velocity cap.
    fn edge_avoidance_steering(&self, id: AgentId) -> Vec2 {
        let Some(agent) = self.agents.get(id) else {
            return Vec2::ZERO;
        };
        let AgentBody::Drone(drone) = &agent.body else {
            return Vec2::ZERO;
        };
        let width = self.config.domain_width;
        let height = self.config.domain_height;
        let vis = self.config.drone_vis_radius;
        let margin_x = width * 0.075;
        let margin_y = height * 0.075;
        let Vec2 { x, y } = agent.position;

        let mut desired = Vec2::ZERO;
        let mut influences = 0u32;
        if x < vis && x < margin_x {
            desired.x += 1.0 / x.max(EDGE_EPSILON);
            influences += 1;
        }
        if x > width - vis && x > width - margin_x {
            desired.x -= 1.0 / (width - x).max(EDGE_EPSILON);
            influences += 1;
        }
        if y < vis && y < margin_y {
            desired.y += 1.0 / y.max(EDGE_EPSILON);
            influences += 1;
        }
        if y > height - vis && y > height - margin_y {
            desired.y -= 1.0 / (height - y).max(EDGE_EPSILON);
            influences += 1;
        }
        if influences == 0 {
            return Vec2::ZERO;
        }
        desired = desired * (1.0 / influences as f32);
        let length = desired.length();
        if length == 0.0 {
            return Vec2::ZERO;
        }
        desired * (self.config.drone_max_velocity / length) - drone.velocity
    }

    /// Steer toward the nearest living target at the velocity cap; zero when
    /// nothing is in sight.
    fn target_seeking_steering(&self, id: AgentId) -> Vec2 {
        let Some(target_id) = self.nearest_target(id) else {
            return Vec2::ZERO;
        };
        let Some(agent) = self.agents.get(id) else {
            return Vec2::ZERO;
        };
        let AgentBody::Drone(drone) = &agent.body else {
            return Vec2::ZERO;
        };
        let Some(target) = self.agents.get(target_id) else {
            return Vec2::ZERO;
        };
        let direction = target.position - agent.position;
        let distance = direction.length();
        if distance == 0.0 {
            return Vec2::ZERO;
        }
        direction * (self.config.drone_max_velocity / distance) - drone.velocity
    }

    // ---- target behavior ---------------------------------------------------

    fn target_step(&mut self, id: AgentId) {
        let Some(agent) = self.agents.get(id) else {
            return;
        };
        let AgentBody::Target(target) = &agent.body else {
            return;
        };
        if target.state == TargetState::Dead {
            return;
        }
        self.target_move(id);
        self.target_fire(id);
    }

    /// Rotate the turret toward the nearest drone, limited to
    /// `target_turn_rate * dt` per tick. Snaps onto the bearing when the
    /// remaining angle is reachable within one tick.
    fn target_move(&mut self, id: AgentId) {
        let Some(drone_id) = self.nearest_drone(id) else {
            return;
        };
        let Some(drone_position) = self.agents.get(drone_id).map(|drone| drone.position) else {
            return;
        };
        let max_turn = self.config.target_turn_rate * self.config.dt;
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        let AgentBody::Target(target) = &mut agent.body else {
            return;
        };
        let bearing = (drone_position - agent.position).angle();
        let delta = wrap_signed_angle(bearing - target.heading);
        target.heading = if delta.abs() <= max_turn {
            bearing
        } else {
            target.heading + max_turn.copysign(delta)
        };
    }

    /// Fire at the nearest drone when the cooldown has elapsed, the drone is
    /// within weapon range, and the turret is on bearing. A hit kills the
    /// drone outright.
    fn target_fire(&mut self, id: AgentId) {
        let dt = self.config.dt;
        {
            let Some(agent) = self.agents.get_mut(id) else {
                return;
            };
            let AgentBody::Target(target) = &mut agent.body else {
                return;
            };
            if target.time_until_fire > 0.0 {
                target.time_until_fire -= dt;
                return;
            }
        }
        let Some(drone_id) = self.nearest_drone(id) else {
            return;
        };
        let (origin, heading) = {
            let Some(agent) = self.agents.get(id) else {
                return;
            };
            let AgentBody::Target(target) = &agent.body else {
                return;
            };
            (agent.position, target.heading)
        };
        let Some(drone_position) = self.agents.get(drone_id).map(|drone| drone.position) else {
            return;
        };
        let offset = drone_position - origin;
        if offset.length() > self.config.target_weapon_range {
            return;
        }
        if wrap_signed_angle(offset.angle() - heading).abs() > AIM_TOLERANCE {
            return;
        }
        self.kill_drone(drone_id);
        if let Some(agent) = self.agents.get_mut(id)
            && let AgentBody::Target(target) = &mut agent.body
        {
            target.time_until_fire = self.config.target_fire_cooldown;
        }
    }

    /// Nearest drone (any combat state) within the target's vision radius.
    fn nearest_drone(&self, id: AgentId) -> Option<AgentId> {
        let agent = self.agents.get(id)?;
        let origin = agent.position;
        let mut best: Option<(AgentId, OrderedFloat<f32>)> = None;
        self.index.neighbors_within(
            origin.into(),
            self.config.target_vis_radius,
            Some(Self::raw_key(id)),
            &mut |raw, dist_sq| {
                let other_id = Self::id_from_raw(raw);
                let Some(other) = self.agents.get(other_id) else {
                    return;
                };
                if !matches!(other.body, AgentBody::Drone(_)) {
                    return;
                }
                match best {
                    Some((_, nearest)) if dist_sq >= nearest => {}
                    _ => best = Some((other_id, dist_sq)),
                }
            },
        );
        best.map(|(drone_id, _)| drone_id)
    }

    // ---- accessors and scenario mutators ------------------------------------

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Population counters.
    #[must_use]
    pub const fn population(&self) -> &Population {
        &self.population
    }

    /// Borrow an agent by handle.
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    /// Iterate live agents in activation order.
    pub fn agents(&self) -> impl Iterator<Item = (AgentId, &Agent)> {
        self.schedule
            .iter()
            .filter_map(|id| self.agents.get(*id).map(|agent| (*id, agent)))
    }

    /// Number of live agents of both kinds.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Iterate over retained tick summaries.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Overwrite a drone's velocity and acceleration. Returns `false` when
    /// `id` does not refer to a live drone.
    pub fn set_drone_kinematics(&mut self, id: AgentId, velocity: Vec2, acceleration: Vec2) -> bool {
        if let Some(agent) = self.agents.get_mut(id)
            && let AgentBody::Drone(drone) = &mut agent.body
        {
            drone.velocity = velocity;
            drone.acceleration = acceleration;
            true
        } else {
            false
        }
    }

    /// Replace a drone's steering weights for tuning experiments. Returns
    /// `false` when `id` does not refer to a live drone.
    pub fn set_drone_weights(&mut self, id: AgentId, weights: SteeringWeights) -> bool {
        if weights.validate().is_err() {
            return false;
        }
        if let Some(agent) = self.agents.get_mut(id)
            && let AgentBody::Drone(drone) = &mut agent.body
        {
            drone.weights = weights;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> SwarmConfig {
        SwarmConfig {
            num_drones: 0,
            num_targets: 0,
            rng_seed: Some(42),
            ..SwarmConfig::default()
        }
    }

    fn world_with(config: SwarmConfig) -> SwarmWorld {
        SwarmWorld::empty(config).expect("world")
    }

    fn still_drone(world: &mut SwarmWorld, position: Vec2) -> AgentId {
        let id = world.spawn_drone(position);
        assert!(world.set_drone_kinematics(id, Vec2::ZERO, Vec2::ZERO));
        id
    }

    #[test]
    fn vec2_clamp_length_preserves_direction() {
        let v = Vec2::new(6.0, 8.0); // length 10
        let clamped = v.clamp_length(4.0);
        assert!((clamped.length() - 4.0).abs() < 1e-5);
        assert!((clamped.x / clamped.y - v.x / v.y).abs() < 1e-5);
        // within the cap: unchanged
        assert_eq!(Vec2::new(1.0, 0.0).clamp_length(5.0), Vec2::new(1.0, 0.0));
        assert_eq!(Vec2::ZERO.clamp_length(3.0), Vec2::ZERO);
    }

    #[test]
    fn weights_combine_is_a_weighted_average() {
        let weights = SteeringWeights::default();
        let contribution = Vec2::new(5.0, 0.0);
        let combined = weights.combine(
            contribution,
            contribution,
            contribution,
            contribution,
            contribution,
        );
        // five equal inputs averaged by five equal weights
        assert!((combined.x - 5.0).abs() < 1e-5);
        assert!((combined.y).abs() < 1e-5);

        let skewed = SteeringWeights {
            alignment: 3.0,
            cohesion: 1.0,
            separation: 0.0,
            edge_avoidance: 0.0,
            target_seeking: 0.0,
        };
        let combined = skewed.combine(
            Vec2::new(4.0, 0.0),
            Vec2::new(0.0, 8.0),
            Vec2::ZERO,
            Vec2::ZERO,
            Vec2::ZERO,
        );
        assert!((combined.x - 3.0).abs() < 1e-5);
        assert!((combined.y - 2.0).abs() < 1e-5);
    }

    #[test]
    fn config_validation_rejects_bad_bundles() {
        let mut config = SwarmConfig::default();
        config.dt = 0.0;
        assert!(SwarmWorld::empty(config).is_err());

        let mut config = SwarmConfig::default();
        config.drone_accuracy = 1.5;
        assert!(SwarmWorld::empty(config).is_err());

        let mut config = SwarmConfig::default();
        config.steering_weights.cohesion = -0.5;
        assert!(SwarmWorld::empty(config).is_err());

        let mut config = SwarmConfig::default();
        config.steering_weights = SteeringWeights {
            alignment: 0.0,
            cohesion: 0.0,
            separation: 0.0,
            edge_avoidance: 0.0,
            target_seeking: 0.0,
        };
        assert!(SwarmWorld::empty(config).is_err());

        assert!(SwarmWorld::empty(SwarmConfig::default()).is_ok());
    }

    #[test]
    fn new_world_spawns_configured_population() {
        let config = SwarmConfig {
            num_drones: 5,
            num_targets: 2,
            rng_seed: Some(7),
            ..SwarmConfig::default()
        };
        let world = SwarmWorld::new(config).expect("world");
        assert_eq!(world.population().drones(), 5);
        assert_eq!(world.population().armed_drones(), 5);
        assert_eq!(world.population().targets(), 2);
        assert_eq!(world.population().current_id(), 7);
        assert_eq!(world.agent_count(), 7);

        for (_, agent) in world.agents() {
            if let Some(drone) = agent.as_drone() {
                assert_eq!(drone.state, DroneState::Flocking);
                let speed = drone.velocity.length();
                assert!((speed - world.config().drone_max_velocity).abs() < 1e-3);
                let accel = drone.acceleration.length();
                assert!((accel - world.config().drone_max_acceleration).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn update_velocity_leaves_capped_velocity_unchanged() {
        let config = SwarmConfig {
            drone_max_velocity: 5.0,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let id = world.spawn_drone(Vec2::new(500.0, 500.0));
        world.set_drone_kinematics(id, Vec2::new(1.0, 0.0), Vec2::ZERO);

        world.drone_update_velocity(id);

        let drone = world.agent(id).unwrap().as_drone().unwrap();
        assert_eq!(drone.velocity, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn update_velocity_caps_at_max_velocity() {
        let config = SwarmConfig {
            drone_max_velocity: 5.0,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let id = world.spawn_drone(Vec2::new(500.0, 500.0));
        world.set_drone_kinematics(id, Vec2::new(4.0, 0.0), Vec2::new(10.0, 0.0));

        world.drone_update_velocity(id);

        let drone = world.agent(id).unwrap().as_drone().unwrap();
        assert!((drone.velocity.length() - 5.0).abs() < 1e-5);
        assert!(drone.velocity.x > 0.0 && drone.velocity.y == 0.0);
    }

    #[test]
    fn update_position_moves_by_velocity_times_dt() {
        let config = SwarmConfig {
            dt: 2.0,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let id = world.spawn_drone(Vec2::new(100.0, 100.0));
        world.set_drone_kinematics(id, Vec2::new(3.0, -1.0), Vec2::ZERO);

        world.drone_update_position(id);

        assert_eq!(world.agent(id).unwrap().position, Vec2::new(106.0, 98.0));
    }

    #[test]
    fn acceleration_is_capped_with_direction_preserved() {
        // A lone drone far from any target steers only through target
        // seeking; place one target straight ahead so the weighted average
        // exceeds the cap.
        let config = SwarmConfig {
            drone_max_acceleration: 4.0,
            steering_weights: SteeringWeights {
                alignment: 0.0,
                cohesion: 0.0,
                separation: 0.0,
                edge_avoidance: 0.0,
                target_seeking: 1.0,
            },
            ..quiet_config()
        };
        let mut world = world_with(config);
        let id = still_drone(&mut world, Vec2::new(500.0, 500.0));
        world.spawn_target(Vec2::new(700.0, 500.0));

        world.drone_update_acceleration(id);

        let drone = world.agent(id).unwrap().as_drone().unwrap();
        assert!((drone.acceleration.length() - 4.0).abs() < 1e-4);
        assert!(drone.acceleration.x > 0.0);
        assert!(drone.acceleration.y.abs() < 1e-4);
    }

    #[test]
    fn acceleration_below_cap_matches_weighted_average() {
        // Desired velocity toward the target is max_velocity = 2.0; the
        // weighted average over five unit weights is 0.4, under the cap.
        let config = SwarmConfig {
            drone_max_velocity: 2.0,
            drone_max_acceleration: 20.0,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let id = still_drone(&mut world, Vec2::new(500.0, 500.0));
        world.spawn_target(Vec2::new(600.0, 500.0));

        world.drone_update_acceleration(id);

        let drone = world.agent(id).unwrap().as_drone().unwrap();
        assert!((drone.acceleration.x - 0.4).abs() < 1e-5);
        assert!(drone.acceleration.y.abs() < 1e-5);
    }

    #[test]
    fn nearest_target_picks_minimum_distance() {
        let mut world = world_with(quiet_config());
        let id = still_drone(&mut world, Vec2::new(500.0, 500.0));
        let far = world.spawn_target(Vec2::new(505.0, 500.0));
        let near = world.spawn_target(Vec2::new(503.0, 500.0));

        assert_eq!(world.nearest_target(id), Some(near));
        assert_ne!(world.nearest_target(id), Some(far));
    }

    #[test]
    fn nearest_target_skips_drones_and_dead_targets() {
        let mut world = world_with(quiet_config());
        let id = still_drone(&mut world, Vec2::new(500.0, 500.0));
        still_drone(&mut world, Vec2::new(501.0, 500.0));
        let dead = world.spawn_target(Vec2::new(502.0, 500.0));
        let alive = world.spawn_target(Vec2::new(550.0, 500.0));
        world.resolve_target_hit(dead, 1.0);

        assert_eq!(world.nearest_target(id), Some(alive));

        world.resolve_target_hit(alive, 1.0);
        assert_eq!(world.nearest_target(id), None);
    }

    #[test]
    fn nearest_target_respects_vision_radius() {
        let config = SwarmConfig {
            drone_vis_radius: 50.0,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let id = still_drone(&mut world, Vec2::new(500.0, 500.0));
        world.spawn_target(Vec2::new(600.0, 500.0)); // 100 m away, out of sight

        assert_eq!(world.nearest_target(id), None);
    }

    #[test]
    fn fire_is_noop_without_eligible_target() {
        let mut world = world_with(quiet_config());
        let id = still_drone(&mut world, Vec2::new(500.0, 500.0));

        world.drone_fire(id);

        let drone = world.agent(id).unwrap().as_drone().unwrap();
        assert_eq!(drone.state, DroneState::Flocking);
        assert_eq!(world.population().armed_drones(), 1);
    }

    #[test]
    fn fire_is_noop_when_target_out_of_weapon_range() {
        let config = SwarmConfig {
            drone_weapon_radius: 100.0,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let id = still_drone(&mut world, Vec2::new(500.0, 500.0));
        world.spawn_target(Vec2::new(650.0, 500.0)); // visible but out of range

        world.drone_fire(id);

        let drone = world.agent(id).unwrap().as_drone().unwrap();
        assert_eq!(drone.state, DroneState::Flocking);
        assert_eq!(world.population().armed_drones(), 1);
        assert_eq!(world.population().targets(), 1);
    }

    #[test]
    fn fire_in_range_disarms_shooter_exactly_once() {
        let config = SwarmConfig {
            drone_accuracy: 1.0,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let id = still_drone(&mut world, Vec2::new(500.0, 500.0));
        let target = world.spawn_target(Vec2::new(550.0, 500.0));

        world.drone_fire(id);

        let drone = world.agent(id).unwrap().as_drone().unwrap();
        assert_eq!(drone.state, DroneState::Retreating);
        assert_eq!(world.population().armed_drones(), 0);
        assert_eq!(world.population().targets(), 0);
        assert_eq!(
            world.agent(target).unwrap().as_target().unwrap().state,
            TargetState::Dead
        );

        // a retreating drone never fires again, counters stay put
        world.spawn_target(Vec2::new(510.0, 500.0));
        world.drone_fire(id);
        assert_eq!(world.population().armed_drones(), 0);
        assert_eq!(world.population().targets(), 1);
    }

    #[test]
    fn fire_with_zero_accuracy_spends_the_shot_without_a_kill() {
        let config = SwarmConfig {
            drone_accuracy: 0.0,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let id = still_drone(&mut world, Vec2::new(500.0, 500.0));
        world.spawn_target(Vec2::new(550.0, 500.0));

        world.drone_fire(id);

        let drone = world.agent(id).unwrap().as_drone().unwrap();
        assert_eq!(drone.state, DroneState::Retreating);
        assert_eq!(world.population().targets(), 1);
    }

    #[test]
    fn kill_drone_updates_counters_by_combat_state() {
        let config = SwarmConfig {
            drone_accuracy: 1.0,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let armed = still_drone(&mut world, Vec2::new(100.0, 100.0));
        let spent = still_drone(&mut world, Vec2::new(500.0, 500.0));
        world.spawn_target(Vec2::new(540.0, 500.0));
        world.drone_fire(spent); // spent is now retreating
        let id_before = world.population().current_id();

        world.kill_drone(armed);
        assert_eq!(world.population().drones(), 1);
        assert_eq!(world.population().armed_drones(), 0);

        world.kill_drone(spent);
        assert_eq!(world.population().drones(), 0);
        assert_eq!(world.population().armed_drones(), 0);
        assert_eq!(world.population().current_id(), id_before - 2);
        assert!(world.agent(armed).is_none());
        assert!(world.agent(spent).is_none());
    }

    #[test]
    fn step_moves_on_previous_velocity_before_integration() {
        // The four-phase order means position advances on the velocity held
        // at tick start, even though acceleration changes velocity within
        // the same tick.
        let mut world = world_with(quiet_config());
        let id = world.spawn_drone(Vec2::new(500.0, 500.0));
        world.set_drone_kinematics(id, Vec2::new(10.0, 0.0), Vec2::ZERO);
        world.spawn_target(Vec2::new(500.0, 900.0)); // pulls velocity toward +y

        world.step();

        let agent = world.agent(id).unwrap();
        assert_eq!(agent.position, Vec2::new(510.0, 500.0));
        let drone = agent.as_drone().unwrap();
        assert!(drone.velocity.y > 0.0, "steering must have refreshed velocity");
    }

    #[test]
    fn step_caps_remain_after_every_tick() {
        let config = SwarmConfig {
            num_drones: 12,
            num_targets: 2,
            rng_seed: Some(99),
            ..SwarmConfig::default()
        };
        let mut world = SwarmWorld::new(config).expect("world");
        for _ in 0..20 {
            world.step();
            for (_, agent) in world.agents() {
                if let Some(drone) = agent.as_drone() {
                    assert!(drone.velocity.length() <= world.config().drone_max_velocity + 1e-3);
                    assert!(
                        drone.acceleration.length()
                            <= world.config().drone_max_acceleration + 1e-3
                    );
                }
            }
        }
    }

    #[test]
    fn step_records_bounded_history() {
        let config = SwarmConfig {
            history_capacity: 4,
            ..quiet_config()
        };
        let mut world = world_with(config);
        still_drone(&mut world, Vec2::new(500.0, 500.0));
        for _ in 0..10 {
            world.step();
        }
        let history: Vec<_> = world.history().collect();
        assert_eq!(history.len(), 4);
        assert_eq!(history.last().unwrap().tick, Tick(10));
        assert_eq!(history.last().unwrap().drones, 1);
    }

    #[test]
    fn edge_avoidance_pushes_back_inside_margin() {
        let mut world = world_with(quiet_config());
        let id = still_drone(&mut world, Vec2::new(50.0, 500.0)); // inside left margin (75 m)
        let steering = world.edge_avoidance_steering(id);
        assert!(steering.x > 0.0);

        let interior = still_drone(&mut world, Vec2::new(500.0, 500.0));
        assert_eq!(world.edge_avoidance_steering(interior), Vec2::ZERO);
    }

    #[test]
    fn flocking_is_zero_without_drone_neighbors() {
        let mut world = world_with(quiet_config());
        let id = still_drone(&mut world, Vec2::new(500.0, 500.0));
        world.spawn_target(Vec2::new(520.0, 500.0)); // targets are not flockmates
        assert_eq!(world.flocking_steering(id), FlockSteering::default());
    }

    #[test]
    fn flocking_aligns_and_separates() {
        let mut world = world_with(quiet_config());
        let id = still_drone(&mut world, Vec2::new(500.0, 500.0));
        let neighbor = world.spawn_drone(Vec2::new(510.0, 500.0));
        world.set_drone_kinematics(neighbor, Vec2::new(0.0, 5.0), Vec2::ZERO);

        let flock = world.flocking_steering(id);
        // alignment steers toward the neighbor's +y velocity
        assert!(flock.alignment.y > 0.0);
        // cohesion pulls toward the neighbor on +x
        assert!(flock.cohesion.x > 0.0);
        // separation pushes away on -x
        assert!(flock.separation.x < 0.0);
    }

    #[test]
    fn turret_turn_is_rate_limited() {
        let config = SwarmConfig {
            target_turn_rate: 0.1,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let target = world.spawn_target(Vec2::new(500.0, 500.0));
        if let Some(agent) = world.agents.get_mut(target)
            && let AgentBody::Target(body) = &mut agent.body
        {
            body.heading = 0.0;
        }
        still_drone(&mut world, Vec2::new(500.0, 600.0)); // bearing π/2

        world.target_move(target);
        let heading = world.agent(target).unwrap().as_target().unwrap().heading;
        assert!((heading - 0.1).abs() < 1e-5);

        // close enough to snap once the remaining angle fits in one tick
        for _ in 0..20 {
            world.target_move(target);
        }
        let heading = world.agent(target).unwrap().as_target().unwrap().heading;
        assert!((heading - std::f32::consts::FRAC_PI_2).abs() < 1e-4);
    }

    #[test]
    fn turret_fire_respects_cooldown_range_and_bearing() {
        let config = SwarmConfig {
            target_fire_cooldown: 2.0,
            target_weapon_range: 400.0,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let target = world.spawn_target(Vec2::new(500.0, 500.0));
        let drone = still_drone(&mut world, Vec2::new(500.0, 600.0));
        if let Some(agent) = world.agents.get_mut(target)
            && let AgentBody::Target(body) = &mut agent.body
        {
            body.heading = std::f32::consts::FRAC_PI_2; // on bearing
        }

        // cooldown burns down for two ticks without a shot
        world.target_fire(target);
        world.target_fire(target);
        assert_eq!(world.population().drones(), 1);

        // third call fires and kills
        world.target_fire(target);
        assert_eq!(world.population().drones(), 0);
        assert!(world.agent(drone).is_none());
        let body = world.agent(target).unwrap().as_target().unwrap();
        assert_eq!(body.time_until_fire, 2.0);
    }

    #[test]
    fn turret_holds_fire_when_off_bearing() {
        let config = SwarmConfig {
            target_fire_cooldown: 0.0,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let target = world.spawn_target(Vec2::new(500.0, 500.0));
        still_drone(&mut world, Vec2::new(500.0, 600.0)); // bearing π/2
        if let Some(agent) = world.agents.get_mut(target)
            && let AgentBody::Target(body) = &mut agent.body
        {
            body.heading = 0.0; // pointed 90° away
            body.time_until_fire = 0.0;
        }

        world.target_fire(target);
        assert_eq!(world.population().drones(), 1);
    }

    #[test]
    fn engagement_over_predicate_covers_all_exits() {
        let mut world = world_with(quiet_config());
        assert!(world.is_engagement_over()); // nothing alive

        let drone = still_drone(&mut world, Vec2::new(100.0, 100.0));
        world.spawn_target(Vec2::new(150.0, 100.0));
        assert!(!world.is_engagement_over());

        world.kill_drone(drone);
        assert!(world.is_engagement_over());
    }

    #[test]
    fn utility_accounts_for_losses_and_kills() {
        let config = SwarmConfig {
            drone_accuracy: 1.0,
            drone_cost: 5_000.0,
            target_value: 1e6,
            ..quiet_config()
        };
        let mut world = world_with(config);
        let shooter = still_drone(&mut world, Vec2::new(500.0, 500.0));
        let casualty = still_drone(&mut world, Vec2::new(100.0, 100.0));
        world.spawn_target(Vec2::new(550.0, 500.0));

        world.drone_fire(shooter);
        world.kill_drone(casualty);

        assert!((world.utility() - (1e6 - 5_000.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn wrap_signed_angle_stays_in_half_turn() {
        assert!((wrap_signed_angle(3.0 * HALF_TURN) - HALF_TURN).abs() < 1e-5);
        assert!((wrap_signed_angle(-3.0 * HALF_TURN) - HALF_TURN).abs() < 1e-5);
        assert_eq!(wrap_signed_angle(0.5), 0.5);
        assert_eq!(wrap_signed_angle(f32::NAN), 0.0);
    }
}
