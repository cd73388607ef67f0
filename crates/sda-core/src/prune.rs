//! Reduces a found branch to the fewest waypoints that still fly clear.

use crate::error::{Result, SdaError};
use crate::geometry::Point3;
use crate::models::LegBaton;
use crate::rrt::RrtPlanner;
use crate::tree::{NodeId, RrtNode, Tree};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct PrunedPath {
    /// Waypoints strictly between the branch's root and goal.
    pub detour: Vec<Point3>,
    pub arrival: LegBaton,
}

/// Prunes `branch` (root first, goal last) in the planner's steering regime.
pub fn prune_branch(planner: &RrtPlanner, tree: &Tree, branch: &[NodeId]) -> Result<PrunedPath> {
    if planner.config().constrain {
        prune_constrained(planner, tree, branch)
    } else {
        Ok(prune_unconstrained(planner, tree, branch))
    }
}

/// Walks back from the goal, jumping each time to the earliest ancestor with
/// a clear straight line to the current node.
pub fn prune_unconstrained(planner: &RrtPlanner, tree: &Tree, branch: &[NodeId]) -> PrunedPath {
    let nodes: Vec<&RrtNode> = branch.iter().map(|id| tree.node(*id)).collect();
    let Some(last) = nodes.len().checked_sub(1) else {
        return PrunedPath {
            detour: Vec::new(),
            arrival: LegBaton {
                heading: Point3::ZERO,
                time_s: 0.0,
            },
        };
    };

    let mut kept = vec![last];
    let mut current = last;
    while current > 0 {
        let earliest = (0..current)
            .find(|&i| !planner.edge_collides(nodes[i], nodes[current]))
            .unwrap_or(current - 1);
        kept.push(earliest);
        current = earliest;
    }
    kept.reverse();

    let mut flown = RrtNode::new(nodes[0].position, nodes[0].heading, nodes[0].time_s);
    for &i in &kept[1..] {
        let position = nodes[i].position;
        let heading = (position - flown.position).unit();
        let time_s = planner.arrival_time(&flown, &position);
        flown = RrtNode::new(position, heading, time_s);
    }

    let detour = if kept.len() > 2 {
        kept[1..kept.len() - 1]
            .iter()
            .map(|&i| nodes[i].position)
            .collect()
    } else {
        Vec::new()
    };
    PrunedPath {
        detour,
        arrival: LegBaton {
            heading: flown.heading,
            time_s: flown.time_s,
        },
    }
}

/// Tries subsets of the branch's pinned nodes, smallest first, re-flying
/// start → subset → goal under the curvature limit. The first subset that
/// flies clear wins.
pub fn prune_constrained(planner: &RrtPlanner, tree: &Tree, branch: &[NodeId]) -> Result<PrunedPath> {
    let (Some(&root_id), Some(&goal_id)) = (branch.first(), branch.last()) else {
        return Err(SdaError::PruningInvariantViolation {
            pinned: 0,
            branch_len: 0,
        });
    };
    let root = tree.node(root_id);
    let goal = tree.node(goal_id).position;
    let baton = LegBaton {
        heading: root.heading,
        time_s: root.time_s,
    };
    let pinned: Vec<Point3> = branch
        .iter()
        .skip(1)
        .take(branch.len().saturating_sub(2))
        .map(|id| tree.node(*id))
        .filter(|node| node.pinned)
        .map(|node| node.position)
        .collect();

    for size in 0..=pinned.len() {
        for subset in Combinations::new(pinned.len(), size) {
            let mut waypoints = Vec::with_capacity(size + 2);
            waypoints.push(root.position);
            waypoints.extend(subset.iter().map(|&i| pinned[i]));
            waypoints.push(goal);
            if let Some(arrival) = planner.simulate(&waypoints, baton) {
                waypoints.pop();
                waypoints.remove(0);
                return Ok(PrunedPath {
                    detour: waypoints,
                    arrival,
                });
            }
        }
    }

    log_failed_branch(tree, branch);
    Err(SdaError::PruningInvariantViolation {
        pinned: pinned.len(),
        branch_len: branch.len(),
    })
}

fn log_failed_branch(tree: &Tree, branch: &[NodeId]) {
    #[derive(Serialize)]
    struct BranchDump<'a> {
        nodes: Vec<&'a RrtNode>,
    }

    let dump = BranchDump {
        nodes: branch.iter().map(|id| tree.node(*id)).collect(),
    };
    match serde_json::to_string(&dump) {
        Ok(json) => tracing::error!(
            "No pinned subset of a {}-node branch re-flies clear: {}",
            branch.len(),
            json
        ),
        Err(err) => tracing::error!(
            "No pinned subset of a {}-node branch re-flies clear (dump failed: {})",
            branch.len(),
            err
        ),
    }
}

/// Index combinations of `size` out of `n`, in lexicographic order.
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Combinations {
    fn new(n: usize, size: usize) -> Self {
        Self {
            n,
            indices: (0..size).collect(),
            done: size > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        let current = self.indices.clone();

        let size = self.indices.len();
        let mut i = size;
        loop {
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
            if self.indices[i] < self.n - size + i {
                self.indices[i] += 1;
                for j in i + 1..size {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                break;
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerConfig;
    use crate::geometry::Geofence;
    use crate::models::Obstacle;
    use crate::obstacle_model::{ModelPolicy, ObstacleModel, ObstacleSnapshot};

    fn planner(constrain: bool, obstacles: Vec<Obstacle>) -> RrtPlanner {
        let config = PlannerConfig {
            constrain,
            min_turn_radius_m: 10.0,
            speed_mps: 10.0,
            seed: Some(3),
            ..PlannerConfig::default()
        };
        let snapshot = ObstacleSnapshot::new(
            obstacles,
            Some(Geofence::rectangle(0.0, 0.0, 400.0, 400.0).unwrap()),
        );
        RrtPlanner::new(config, ObstacleModel::new(ModelPolicy::Static, snapshot)).unwrap()
    }

    fn chain_tree(points: &[Point3]) -> (Tree, Vec<NodeId>) {
        let east = Point3::new(1.0, 0.0, 0.0);
        let mut tree = Tree::new(RrtNode::new(points[0], east, 0.0), 20.0);
        let mut branch = vec![tree.root()];
        for point in &points[1..] {
            let parent = *branch.last().unwrap();
            branch.push(tree.attach(parent, RrtNode::new(*point, east, 0.0)));
        }
        (tree, branch)
    }

    #[test]
    fn collinear_branch_collapses_to_its_endpoints() {
        let planner = planner(false, Vec::new());
        let (tree, branch) = chain_tree(&[
            Point3::new(10.0, 50.0, 30.0),
            Point3::new(20.0, 50.0, 30.0),
            Point3::new(30.0, 50.0, 30.0),
            Point3::new(40.0, 50.0, 30.0),
        ]);
        let pruned = prune_branch(&planner, &tree, &branch).unwrap();
        assert!(pruned.detour.is_empty());
        assert!((pruned.arrival.time_s - 3.0).abs() < 1e-9);
    }

    #[test]
    fn unconstrained_pruning_keeps_the_corner_around_an_obstacle() {
        let planner = planner(false, vec![Obstacle::stationary(100.0, 100.0, 20.0, 200.0)]);
        let points = [
            Point3::new(50.0, 100.0, 50.0),
            Point3::new(50.0, 130.0, 50.0),
            Point3::new(80.0, 140.0, 50.0),
            Point3::new(120.0, 140.0, 50.0),
            Point3::new(150.0, 130.0, 50.0),
            Point3::new(150.0, 100.0, 50.0),
        ];
        let (tree, branch) = chain_tree(&points);
        let pruned = prune_unconstrained(&planner, &tree, &branch);
        assert!(pruned.detour.len() < points.len() - 2);
        assert!(!pruned.detour.is_empty());

        let mut flown = vec![points[0]];
        flown.extend(pruned.detour.iter().copied());
        flown.push(points[5]);
        let baton = LegBaton {
            heading: Point3::new(1.0, 0.0, 0.0),
            time_s: 0.0,
        };
        assert!(planner.simulate(&flown, baton).is_some());
    }

    #[test]
    fn constrained_pruning_prefers_the_empty_subset_when_clear() {
        let planner = planner(true, Vec::new());
        let east = Point3::new(1.0, 0.0, 0.0);
        let mut tree = Tree::new(RrtNode::new(Point3::new(10.0, 50.0, 30.0), east, 0.0), 20.0);
        let a = tree.attach(tree.root(), RrtNode::new(Point3::new(15.0, 50.0, 30.0), east, 0.5));
        tree.pin(a);
        let b = tree.attach(a, RrtNode::new(Point3::new(60.0, 50.0, 30.0), east, 5.0));
        let branch = vec![tree.root(), a, b];

        let pruned = prune_constrained(&planner, &tree, &branch).unwrap();
        assert!(pruned.detour.is_empty());
    }

    #[test]
    fn constrained_pruning_without_any_clear_subset_is_fatal() {
        let planner = planner(true, vec![Obstacle::stationary(60.0, 50.0, 10.0, 200.0)]);
        let east = Point3::new(1.0, 0.0, 0.0);
        let mut tree = Tree::new(RrtNode::new(Point3::new(10.0, 50.0, 30.0), east, 0.0), 20.0);
        let a = tree.attach(tree.root(), RrtNode::new(Point3::new(30.0, 50.0, 30.0), east, 2.0));
        tree.pin(a);
        let b = tree.attach(a, RrtNode::new(Point3::new(100.0, 50.0, 30.0), east, 9.0));
        let branch = vec![tree.root(), a, b];

        let err = prune_constrained(&planner, &tree, &branch).unwrap_err();
        assert_eq!(
            err,
            SdaError::PruningInvariantViolation {
                pinned: 1,
                branch_len: 3
            }
        );
    }

    #[test]
    fn combinations_enumerate_in_lexicographic_order() {
        let all: Vec<Vec<usize>> = Combinations::new(4, 2).collect();
        assert_eq!(
            all,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(Combinations::new(3, 0).collect::<Vec<_>>(), vec![Vec::<usize>::new()]);
        assert_eq!(Combinations::new(2, 3).count(), 0);
    }
}
