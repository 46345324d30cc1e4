//! Randomized kd-forest for approximate nearest-neighbour search over
//! descriptors.
//!
//! Each tree splits on the mean of a dimension drawn at random from the few
//! highest-variance ones, so the trees partition the space differently.
//! Queries descend every tree once, queue the branches they skipped by their
//! distance to the splitting plane, then keep visiting the closest queued
//! branch until `checks` points have been compared.

use crate::surf::{Descriptor, DESCRIPTOR_LEN};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

const LEAF_SIZE: usize = 8;
const RAND_DIMS: usize = 5;
const FOREST_SEED: u64 = 0x6b64;

#[derive(Debug, Clone)]
enum Node {
    Leaf(Vec<usize>),
    Split {
        dim: usize,
        value: f32,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
pub struct KdForest {
    points: Vec<Descriptor>,
    nodes: Vec<Node>,
    roots: Vec<usize>,
}

/// Nearest indexed point to a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    pub index: usize,
    /// Euclidean distance.
    pub distance: f32,
}

#[derive(Debug, Clone, Copy)]
struct Branch {
    bound: f32,
    node: usize,
}

impl PartialEq for Branch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Branch {}

impl PartialOrd for Branch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Branch {
    // Reversed so the max-heap pops the closest branch first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .bound
            .total_cmp(&self.bound)
            .then_with(|| other.node.cmp(&self.node))
    }
}

fn dist2(a: &Descriptor, b: &Descriptor) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

struct Search<'a> {
    forest: &'a KdForest,
    query: &'a Descriptor,
    heap: BinaryHeap<Branch>,
    checked: Vec<bool>,
    checks: usize,
    best: Option<(usize, f32)>,
}

impl Search<'_> {
    fn best_d2(&self) -> f32 {
        self.best.map_or(f32::INFINITY, |(_, d)| d)
    }

    fn descend(&mut self, mut node: usize) {
        let forest = self.forest;
        loop {
            match &forest.nodes[node] {
                Node::Split {
                    dim,
                    value,
                    left,
                    right,
                } => {
                    let diff = self.query[*dim] - value;
                    let (near, far) = if self.query[*dim] < *value {
                        (*left, *right)
                    } else {
                        (*right, *left)
                    };
                    self.heap.push(Branch {
                        bound: diff * diff,
                        node: far,
                    });
                    node = near;
                }
                Node::Leaf(members) => {
                    for &i in members {
                        if self.checked[i] {
                            continue;
                        }
                        self.checked[i] = true;
                        self.checks += 1;
                        let d = dist2(self.query, &forest.points[i]);
                        if d < self.best_d2() {
                            self.best = Some((i, d));
                        }
                    }
                    return;
                }
            }
        }
    }
}

impl KdForest {
    pub fn build(points: Vec<Descriptor>, trees: usize) -> Self {
        let mut forest = Self {
            points,
            nodes: Vec::new(),
            roots: Vec::new(),
        };
        if forest.points.is_empty() {
            return forest;
        }
        let mut rng = StdRng::seed_from_u64(FOREST_SEED);
        for _ in 0..trees.max(1) {
            let all: Vec<usize> = (0..forest.points.len()).collect();
            let root = forest.build_node(all, &mut rng);
            forest.roots.push(root);
        }
        forest
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn build_node(&mut self, members: Vec<usize>, rng: &mut StdRng) -> usize {
        if members.len() <= LEAF_SIZE {
            return self.push(Node::Leaf(members));
        }
        let Some((dim, value)) = self.choose_split(&members, rng) else {
            // All members identical
            return self.push(Node::Leaf(members));
        };
        let (left, right): (Vec<usize>, Vec<usize>) =
            members.iter().copied().partition(|&i| self.points[i][dim] < value);
        if left.is_empty() || right.is_empty() {
            return self.push(Node::Leaf(members));
        }
        let left = self.build_node(left, rng);
        let right = self.build_node(right, rng);
        self.push(Node::Split {
            dim,
            value,
            left,
            right,
        })
    }

    fn choose_split(&self, members: &[usize], rng: &mut StdRng) -> Option<(usize, f32)> {
        let n = members.len() as f64;
        let mut mean = [0.0f64; DESCRIPTOR_LEN];
        for &i in members {
            for (m, &v) in mean.iter_mut().zip(&self.points[i]) {
                *m += v as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);
        let mut var = [0.0f64; DESCRIPTOR_LEN];
        for &i in members {
            for ((s, &v), m) in var.iter_mut().zip(&self.points[i]).zip(&mean) {
                *s += (v as f64 - m).powi(2);
            }
        }

        let mut dims: Vec<usize> = (0..DESCRIPTOR_LEN).filter(|&d| var[d] > 0.0).collect();
        if dims.is_empty() {
            return None;
        }
        dims.sort_by(|&a, &b| var[b].total_cmp(&var[a]));
        dims.truncate(RAND_DIMS);
        let dim = dims[rng.gen_range(0..dims.len())];
        Some((dim, mean[dim] as f32))
    }

    /// Approximate nearest neighbour. The first leaf of every tree is always
    /// compared in full; queued branches are then visited until `checks`
    /// points have been compared.
    pub fn nearest(&self, query: &Descriptor, checks: usize) -> Option<Neighbour> {
        if self.is_empty() {
            return None;
        }
        let mut search = Search {
            forest: self,
            query,
            heap: BinaryHeap::new(),
            checked: vec![false; self.points.len()],
            checks: 0,
            best: None,
        };
        for &root in &self.roots {
            search.descend(root);
        }
        while search.checks < checks {
            let Some(branch) = search.heap.pop() else {
                break;
            };
            if branch.bound >= search.best_d2() {
                continue;
            }
            search.descend(branch.node);
        }
        search.best.map(|(index, d2)| Neighbour {
            index,
            distance: d2.sqrt(),
        })
    }
}
