//! Curvature-constrained RRT search between two waypoints.
//!
//! The search grows a tree from the start pose with goal- and history-biased
//! sampling. With curvature constraints on, every extension is a chain of
//! fixed-length steps that never turns harder than the vehicle can; with them
//! off, extensions are straight steps from the nearest node.

use crate::config::PlannerConfig;
use crate::error::{Result, SdaError};
use crate::geometry::{Geofence, Point3, Segment};
use crate::models::LegBaton;
use crate::obstacle_model::ObstacleModel;
use crate::prune;
use crate::steering::{signed_turn, Steering};
use crate::tree::{NodeId, RrtNode, Tree};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Grid cell edge, in step lengths, for the neighbour index.
const GRID_CELL_STEPS: f64 = 4.0;
/// Half-width of the sampling square when no geofence bounds the search.
const FREE_SAMPLE_HALF_WIDTH_M: f64 = 10_000.0;
/// Time charged per edge when the vehicle reports no ground speed.
const STALLED_EDGE_TIME_S: f64 = 100_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub iterations: usize,
    pub nodes: usize,
    pub elapsed_ms: u64,
}

/// Tree grown by one search and the goal node, if it was reached.
#[derive(Debug, Clone)]
pub struct Growth {
    pub tree: Tree,
    pub goal: Option<NodeId>,
    pub stats: SearchStats,
}

/// Accepted detour for one leg and the state the vehicle arrives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegPlan {
    /// Waypoints strictly between the leg's start and goal.
    pub detour: Vec<Point3>,
    /// The previous detour was still clear and is returned unchanged.
    pub reused_previous: bool,
    pub arrival: LegBaton,
    pub stats: SearchStats,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LegOutcome {
    Found(LegPlan),
    TimedOut(SearchStats),
}

#[derive(Debug)]
struct Extension {
    parent: NodeId,
    chain: Vec<RrtNode>,
    pin: bool,
}

impl Extension {
    fn single(parent: NodeId, node: RrtNode) -> Self {
        Self {
            parent,
            chain: vec![node],
            pin: false,
        }
    }

    fn empty(parent: NodeId) -> Self {
        Self {
            parent,
            chain: Vec::new(),
            pin: false,
        }
    }
}

pub struct RrtPlanner {
    config: PlannerConfig,
    steering: Steering,
    model: ObstacleModel,
    fence: Option<Geofence>,
    rng: StdRng,
}

impl RrtPlanner {
    pub fn new(config: PlannerConfig, model: ObstacleModel) -> Result<Self> {
        config.validate()?;
        let steering = Steering::new(config.step_m, config.min_turn_radius_m)?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let fence = model.snapshot().geofence.clone();
        Ok(Self {
            config,
            steering,
            model,
            fence,
            rng,
        })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn steering(&self) -> &Steering {
        &self.steering
    }

    pub fn model(&self) -> &ObstacleModel {
        &self.model
    }

    /// Plans one leg, reusing `previous` when it still flies clear.
    ///
    /// A search that runs out of time is an ordinary outcome, not an error.
    pub fn plan_leg(
        &mut self,
        start: Point3,
        goal: Point3,
        previous: &[Point3],
        baton: LegBaton,
    ) -> Result<LegOutcome> {
        if !previous.is_empty() {
            let mut waypoints = Vec::with_capacity(previous.len() + 2);
            waypoints.push(start);
            waypoints.extend_from_slice(previous);
            waypoints.push(goal);
            if let Some(arrival) = self.simulate(&waypoints, baton) {
                tracing::debug!(
                    "Previous detour of {} waypoints still clear",
                    previous.len()
                );
                return Ok(LegOutcome::Found(LegPlan {
                    detour: previous.to_vec(),
                    reused_previous: true,
                    arrival,
                    stats: SearchStats::default(),
                }));
            }
        }

        let growth = self.grow(start, goal, previous, baton);
        let Some(goal_id) = growth.goal else {
            tracing::warn!(
                "No path to ({:.1}, {:.1}, {:.1}) after {} iterations ({} nodes, {} ms)",
                goal.x,
                goal.y,
                goal.z,
                growth.stats.iterations,
                growth.stats.nodes,
                growth.stats.elapsed_ms
            );
            growth.tree.trace_dump("search tree at timeout");
            return Ok(LegOutcome::TimedOut(growth.stats));
        };

        let branch = growth.tree.branch(goal_id);
        let pruned = prune::prune_branch(self, &growth.tree, &branch)?;
        tracing::debug!(
            "Pruned branch of {} nodes to {} detour waypoints ({} tree nodes, {} ms)",
            branch.len(),
            pruned.detour.len(),
            growth.stats.nodes,
            growth.stats.elapsed_ms
        );

        Ok(LegOutcome::Found(LegPlan {
            detour: pruned.detour,
            reused_previous: false,
            arrival: pruned.arrival,
            stats: growth.stats,
        }))
    }

    /// Grows a tree from `start` until it reaches `goal` or the timeout expires.
    pub fn grow(&mut self, start: Point3, goal: Point3, previous: &[Point3], baton: LegBaton) -> Growth {
        let started = Instant::now();
        let timeout = self.config.timeout();
        let mut tree = Tree::new(
            RrtNode::new(start, baton.heading, baton.time_s),
            self.config.step_m * GRID_CELL_STEPS,
        );
        let search_line = Segment::new(start, goal);
        let mut last = tree.root();
        let mut first = true;
        let mut iterations = 0usize;
        let mut goal_id = None;

        while started.elapsed() < timeout {
            iterations += 1;
            let extension = match self.extend(&tree, last, &goal, previous, first, &search_line) {
                Ok(extension) => extension,
                Err(err) => {
                    tracing::trace!("Extension rejected: {}", err);
                    first = false;
                    continue;
                }
            };
            first = false;

            if extension.pin {
                tree.pin(extension.parent);
            }
            last = tree.attach_chain(extension.parent, extension.chain);

            let tail = tree.node(last);
            if tail.position.distance(&goal) < self.config.step_m {
                let goal_node = RrtNode::new(goal, tail.heading, self.arrival_time(tail, &goal));
                if !self.edge_collides(tail, &goal_node) {
                    goal_id = Some(tree.attach(last, goal_node));
                    break;
                }
            }
        }

        let stats = SearchStats {
            iterations,
            nodes: tree.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        Growth {
            tree,
            goal: goal_id,
            stats,
        }
    }

    fn extend(
        &mut self,
        tree: &Tree,
        last: NodeId,
        goal: &Point3,
        previous: &[Point3],
        first: bool,
        search_line: &Segment,
    ) -> Result<Extension> {
        let draw: f64 = self.rng.random();
        let last_node = tree.node(last);
        let tolerance = self.config.heading_tolerance_rad();

        if draw >= self.config.goal_bias && !first {
            let straight = self.straight_step(last_node);
            if !self.edge_collides(last_node, &straight) {
                return Ok(Extension::single(last, straight));
            }
        }

        let target = if draw < self.config.goal_bias || first {
            if !self.config.constrain {
                let direct = self.step_towards(last_node, goal);
                if !self.edge_collides(last_node, &direct) {
                    return Ok(Extension::single(last, direct));
                }
            }
            *goal
        } else if !previous.is_empty() && draw < self.config.goal_bias + self.config.history_bias {
            previous[self.rng.random_range(0..previous.len())]
        } else {
            self.sample_target(search_line)
        };

        let last_angled = last_node.is_angled_towards(&target, tolerance);

        if self.config.constrain && !last_angled {
            let candidates = std::iter::once(last).chain(
                tree.nearest(&target, self.config.nearest_k)
                    .into_iter()
                    .filter(|id| *id != last),
            );
            for candidate in candidates {
                if let Some(chain) = self.steer_towards(tree.node(candidate), &target) {
                    return Ok(Extension {
                        parent: candidate,
                        chain,
                        pin: true,
                    });
                }
            }
            return Err(SdaError::ConstraintViolation);
        }

        if last_angled {
            return Ok(Extension::empty(last));
        }

        let mut target = target;
        for _ in 0..self.config.max_resample_attempts {
            let nearest = tree
                .nearest(&target, 1)
                .first()
                .copied()
                .unwrap_or_else(|| tree.root());
            let from = tree.node(nearest);
            let step = self.step_towards(from, &target);
            if !self.edge_collides(from, &step) {
                return Ok(Extension::single(nearest, step));
            }
            target = self.sample_target(search_line);
        }
        Err(SdaError::ConstraintViolation)
    }

    /// Chain of curvature-limited steps from `from` until it points at `target`
    /// or is within one step of it. `None` if a step collides or the turn never
    /// lines up.
    pub fn steer_towards(&self, from: &RrtNode, target: &Point3) -> Option<Vec<RrtNode>> {
        let tolerance = self.config.heading_tolerance_rad();
        let step = self.config.step_m;
        let arrived =
            |node: &RrtNode| node.is_angled_towards(target, tolerance) || node.position.distance(target) < step;

        let mut chain: Vec<RrtNode> = Vec::new();
        let mut current = RrtNode::new(from.position, from.heading, from.time_s);
        for _ in 0..self.config.max_turn_iterations {
            if arrived(&current) {
                return Some(chain);
            }
            let toward = (*target - current.position).unit();
            let theta = signed_turn(&current.heading, &toward);
            let (position, heading) =
                self.steering
                    .turn(current.position, current.heading, theta, toward.z);
            let mut next = RrtNode::new(position, heading, self.arrival_time(&current, &position));
            if next.is_angled_towards(target, tolerance) {
                next.heading = (*target - position).unit();
            }
            if self.edge_collides(&current, &next) {
                return None;
            }
            chain.push(next.clone());
            current = next;
        }
        arrived(&current).then_some(chain)
    }

    /// Flies `waypoints` in order from `baton`, returning the arrival state at
    /// the last one, or `None` if any part of the flight collides.
    pub fn simulate(&self, waypoints: &[Point3], baton: LegBaton) -> Option<LegBaton> {
        let (first, rest) = waypoints.split_first()?;
        let mut current = RrtNode::new(*first, baton.heading, baton.time_s);

        for waypoint in rest {
            let approach = if self.config.constrain {
                let chain = self.steer_towards(&current, waypoint)?;
                chain.into_iter().last().unwrap_or(current)
            } else {
                let heading = (*waypoint - current.position).unit();
                RrtNode::new(current.position, heading, current.time_s)
            };
            let arrival = RrtNode::new(
                *waypoint,
                approach.heading,
                self.arrival_time(&approach, waypoint),
            );
            if self.edge_collides(&approach, &arrival) {
                return None;
            }
            current = arrival;
        }

        Some(LegBaton {
            heading: current.heading,
            time_s: current.time_s,
        })
    }

    /// Whether the straight edge from `from` to `to` passes through a blocked
    /// point, sampled every collision increment with interpolated time.
    pub fn edge_collides(&self, from: &RrtNode, to: &RrtNode) -> bool {
        let threshold = self.config.collision_threshold;
        if self.model.is_blocked(&to.position, to.time_s, threshold) {
            return true;
        }

        let length = from.distance(to);
        let increment = self.config.collision_increment_m;
        let direction = (to.position - from.position).unit();
        let mut travelled = increment;
        while travelled < length {
            let fraction = travelled / length;
            let point = from.position + direction * travelled;
            let time = from.time_s + fraction * (to.time_s - from.time_s);
            if self.model.is_blocked(&point, time, threshold) {
                return true;
            }
            travelled += increment;
        }
        false
    }

    pub(crate) fn arrival_time(&self, from: &RrtNode, to: &Point3) -> f64 {
        if self.config.speed_mps > 0.0 {
            from.time_s + from.position.distance(to) / self.config.speed_mps
        } else {
            from.time_s + STALLED_EDGE_TIME_S
        }
    }

    fn straight_step(&self, from: &RrtNode) -> RrtNode {
        let position = from.position + from.heading * self.config.step_m;
        RrtNode::new(position, from.heading, self.arrival_time(from, &position))
    }

    fn step_towards(&self, from: &RrtNode, target: &Point3) -> RrtNode {
        let direction = (*target - from.position).unit();
        if direction == Point3::ZERO {
            return self.straight_step(from);
        }
        let position = from.position + direction * self.config.step_m;
        RrtNode::new(position, direction, self.arrival_time(from, &position))
    }

    /// Uniform point inside the fence, at the altitude of the nearest point on
    /// the search line.
    fn sample_target(&mut self, search_line: &Segment) -> Point3 {
        let planar = self
            .fence
            .as_ref()
            .and_then(|fence| fence.sample_point(&mut self.rng))
            .unwrap_or_else(|| {
                let center = search_line.start;
                Point3::planar(
                    center.x
                        + self
                            .rng
                            .random_range(-FREE_SAMPLE_HALF_WIDTH_M..FREE_SAMPLE_HALF_WIDTH_M),
                    center.y
                        + self
                            .rng
                            .random_range(-FREE_SAMPLE_HALF_WIDTH_M..FREE_SAMPLE_HALF_WIDTH_M),
                )
            });
        planar.with_z(search_line.projection(&planar).z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Obstacle;
    use crate::obstacle_model::{ModelPolicy, ObstacleSnapshot};

    fn planner(constrain: bool, obstacles: Vec<Obstacle>) -> RrtPlanner {
        let config = PlannerConfig {
            constrain,
            min_turn_radius_m: 10.0,
            speed_mps: 10.0,
            seed: Some(11),
            ..PlannerConfig::default()
        };
        let model = ObstacleModel::new(
            ModelPolicy::Static,
            ObstacleSnapshot::new(obstacles, Some(Geofence::rectangle(0.0, 0.0, 400.0, 400.0).unwrap())),
        );
        RrtPlanner::new(config, model).unwrap()
    }

    fn east() -> LegBaton {
        LegBaton {
            heading: Point3::new(1.0, 0.0, 0.0),
            time_s: 0.0,
        }
    }

    #[test]
    fn edge_through_obstacle_collides() {
        let planner = planner(false, vec![Obstacle::stationary(50.0, 50.0, 5.0, 100.0)]);
        let from = RrtNode::new(Point3::new(30.0, 50.0, 20.0), Point3::new(1.0, 0.0, 0.0), 0.0);
        let through = RrtNode::new(Point3::new(70.0, 50.0, 20.0), Point3::new(1.0, 0.0, 0.0), 4.0);
        let beside = RrtNode::new(Point3::new(70.0, 80.0, 20.0), Point3::new(1.0, 0.0, 0.0), 4.0);
        assert!(planner.edge_collides(&from, &through));
        assert!(!planner.edge_collides(&from, &beside));
    }

    #[test]
    fn edge_leaving_the_fence_collides() {
        let planner = planner(false, Vec::new());
        let from = RrtNode::new(Point3::new(390.0, 50.0, 20.0), Point3::new(1.0, 0.0, 0.0), 0.0);
        let out = RrtNode::new(Point3::new(410.0, 50.0, 20.0), Point3::new(1.0, 0.0, 0.0), 2.0);
        assert!(planner.edge_collides(&from, &out));
    }

    #[test]
    fn steering_chain_turns_within_limits_and_lines_up() {
        let planner = planner(true, Vec::new());
        let from = RrtNode::new(Point3::new(100.0, 100.0, 50.0), Point3::new(1.0, 0.0, 0.0), 0.0);
        let target = Point3::new(100.0, 300.0, 80.0);
        let chain = planner.steer_towards(&from, &target).unwrap();
        assert!(!chain.is_empty());

        let limit = planner.steering().max_turn_angle() + 1e-9;
        let mut previous = from.clone();
        for node in &chain {
            assert!((node.distance(&previous) - 5.0).abs() < 1e-9);
            let edge = node.position - previous.position;
            let turn = signed_turn(&previous.heading, &edge).abs();
            assert!(turn <= limit, "turned {} past limit {}", turn, limit);
            assert!(node.time_s > previous.time_s);
            previous = node.clone();
        }
        let tail = chain.last().unwrap();
        assert!(tail.is_angled_towards(&target, 4f64.to_radians()));
    }

    #[test]
    fn steering_chain_into_obstacle_is_rejected() {
        // A wall-sized obstacle just to the left of a hard left turn.
        let planner = planner(true, vec![Obstacle::stationary(105.0, 115.0, 12.0, 200.0)]);
        let from = RrtNode::new(Point3::new(100.0, 100.0, 50.0), Point3::new(1.0, 0.0, 0.0), 0.0);
        assert!(planner.steer_towards(&from, &Point3::new(100.0, 300.0, 50.0)).is_none());
    }

    #[test]
    fn straight_simulation_reports_arrival_heading_and_time() {
        let planner = planner(false, Vec::new());
        let arrival = planner
            .simulate(
                &[
                    Point3::new(10.0, 10.0, 10.0),
                    Point3::new(110.0, 10.0, 10.0),
                    Point3::new(110.0, 60.0, 10.0),
                ],
                east(),
            )
            .unwrap();
        assert!((arrival.time_s - 15.0).abs() < 1e-9);
        assert!((arrival.heading.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn simulation_through_obstacle_fails() {
        let planner = planner(false, vec![Obstacle::stationary(60.0, 10.0, 10.0, 100.0)]);
        assert!(planner
            .simulate(&[Point3::new(10.0, 10.0, 10.0), Point3::new(110.0, 10.0, 10.0)], east())
            .is_none());
    }

    #[test]
    fn clear_previous_detour_is_reused() {
        let mut planner = planner(false, vec![Obstacle::stationary(150.0, 100.0, 20.0, 200.0)]);
        let previous = vec![Point3::new(150.0, 140.0, 85.0)];
        let outcome = planner
            .plan_leg(
                Point3::new(100.0, 100.0, 80.0),
                Point3::new(300.0, 100.0, 90.0),
                &previous,
                east(),
            )
            .unwrap();
        let LegOutcome::Found(plan) = outcome else {
            panic!("expected the previous detour to be reused");
        };
        assert!(plan.reused_previous);
        assert_eq!(plan.detour, previous);
    }

    #[test]
    fn unobstructed_leg_needs_no_detour() {
        let mut planner = planner(false, Vec::new());
        let outcome = planner
            .plan_leg(
                Point3::new(10.0, 10.0, 50.0),
                Point3::new(200.0, 10.0, 50.0),
                &[],
                east(),
            )
            .unwrap();
        let LegOutcome::Found(plan) = outcome else {
            panic!("open airspace should always be solvable");
        };
        assert!(plan.detour.is_empty());
        assert!(!plan.reused_previous);
    }

    #[test]
    fn goal_inside_obstacle_times_out() {
        let mut planner = planner(false, vec![Obstacle::stationary(200.0, 10.0, 15.0, 200.0)]);
        planner.config.timeout_s = 0.2;
        let outcome = planner
            .plan_leg(
                Point3::new(10.0, 10.0, 50.0),
                Point3::new(200.0, 10.0, 50.0),
                &[],
                east(),
            )
            .unwrap();
        assert!(matches!(outcome, LegOutcome::TimedOut(stats) if stats.iterations > 0));
    }
}
