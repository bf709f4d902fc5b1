use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use cl_graph::graph::{ConvParams, Graph, SliceRange, Value};
use cl_graph::shape;
use cl_graph::shape::Size;

use crate::init::{GlorotUniform, Initializer};
use crate::layers::Layers;

/// A node of a random DAG, with the indices of its direct predecessors and successors in increasing order.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Vertex {
    pub preds: Vec<usize>,
    pub succs: Vec<usize>,
}

/// Generate a Watts-Strogatz small world graph and orient its edges from low to high index.
///
/// Every node starts out connected to its `k / 2` neighbours on each side of a ring.
/// Then for each node `i` the edges to its `k / 2` clockwise neighbours are rewired with probability `p`
/// to a uniformly chosen node not yet adjacent to `i`.
pub fn random_graph(n: usize, k: usize, p: f64, rng: &mut impl Rng) -> Vec<Vertex> {
    assert!(n > 0, "Graph must have at least one node");
    assert!((0.0..=1.0).contains(&p), "Rewire probability must be in [0, 1], got {}", p);
    let mut adj = vec![vec![false; n]; n];
    for (i, row) in adj.iter_mut().enumerate() {
        row[i] = true;
    }

    let half = k / 2;
    for i in 0..n {
        for offset in 1..=half {
            for j in [(i + offset) % n, (i + n - offset % n) % n] {
                if j != i {
                    adj[i][j] = true;
                    adj[j][i] = true;
                }
            }
        }
    }

    for i in 0..n {
        for j in 0..half {
            let current = (i + j + 1) % n;
            if !rng.gen_bool(p) {
                continue;
            }

            let unoccupied = (0..n).filter(|&x| !adj[i][x]).collect::<Vec<_>>();
            let Some(&rewired) = unoccupied.choose(&mut *rng) else {
                continue;
            };

            adj[i][current] = false;
            adj[current][i] = false;
            adj[i][rewired] = true;
            adj[rewired][i] = true;
        }
    }

    let mut vertices = vec![Vertex::default(); n];
    for u in 0..n {
        for v in u + 1..n {
            if adj[u][v] {
                vertices[u].succs.push(v);
                vertices[v].preds.push(u);
            }
        }
    }
    vertices
}

#[derive(Debug, Clone)]
pub struct RandWireSettings {
    /// The channel count of the first cell, later cells double it.
    pub channels: usize,
    pub nodes: usize,
    pub k: usize,
    pub p: f64,
    pub num_classes: usize,
    pub batch: Size,
    pub seed: u64,
}

impl Default for RandWireSettings {
    fn default() -> Self {
        RandWireSettings {
            channels: 78,
            nodes: 32,
            k: 4,
            p: 0.75,
            num_classes: 1000,
            batch: Size::fixed(1),
            seed: 0,
        }
    }
}

/// Builds a randomly wired ImageNet network, with a fresh random graph for each of its three cells.
#[derive(Debug)]
pub struct RandWireBuilder {
    settings: RandWireSettings,
}

pub const RANDWIRE_NAME: &str = "randwire";

impl RandWireBuilder {
    pub fn new(settings: RandWireSettings) -> Self {
        RandWireBuilder { settings }
    }

    pub fn settings(&self) -> &RandWireSettings {
        &self.settings
    }

    pub fn build(&self) -> Graph {
        self.build_with(GlorotUniform::new(self.settings.seed))
    }

    pub fn build_with(&self, init: impl Initializer + 'static) -> Graph {
        let settings = &self.settings;
        let channels = settings.channels;

        let mut rng = SmallRng::seed_from_u64(settings.seed);
        let mut net = Layers::new(init);

        let input = net.graph.input(shape![settings.batch, 3, 224, 224]);
        let x = net.conv(input, channels / 2, (3, 3), ConvParams::same(2));
        let x = net.batch_norm(x);
        let x = net.graph.relu(x);
        let x = net.conv(x, channels, (3, 3), ConvParams::same(2));
        let mut x = net.batch_norm(x);

        for (i, filters) in [channels, 2 * channels, 4 * channels].into_iter().enumerate() {
            let vertices = random_graph(settings.nodes, settings.k, settings.p, &mut rng);
            x = random_cell(&mut net, x, filters, &vertices);
            net.graph.set_debug_id(x, format!("cell{}", i));
            tracing::debug!("cell {}: {}", i, net.graph[x].shape);
        }

        let x = net.conv(x, 1280, (1, 1), ConvParams::same(1));
        let x = net.batch_norm(x);
        let output = net.pool_and_dense(x, settings.num_classes);
        net.graph.output(output);

        let graph = net.into_graph();
        tracing::info!("built {}: {}", RANDWIRE_NAME, graph.summary());
        graph
    }
}

/// Build one cell from a random DAG. Source nodes read the cell input with stride 2,
/// the cell output is the mean of the sink nodes.
fn random_cell(net: &mut Layers, x: Value, filters: usize, vertices: &[Vertex]) -> Value {
    let mut outputs: Vec<Value> = Vec::with_capacity(vertices.len());
    let mut sinks = vec![];

    for vertex in vertices {
        let y = if vertex.preds.is_empty() {
            node_op(net, &[x], filters, 2)
        } else {
            let inputs = vertex.preds.iter().map(|&j| outputs[j]).collect::<Vec<_>>();
            node_op(net, &inputs, filters, 1)
        };

        outputs.push(y);
        if vertex.succs.is_empty() {
            sinks.push(y);
        }
    }

    let sum = sinks
        .iter()
        .copied()
        .reduce(|left, right| net.graph.add(left, right))
        .expect("a DAG always has a sink");
    let factor = net.graph.scalar(1.0 / sinks.len() as f32);
    net.graph.mul(sum, factor)
}

/// Aggregate the inputs with sigmoid weights, then relu, separable conv and batch norm.
fn node_op(net: &mut Layers, inputs: &[Value], filters: usize, stride: usize) -> Value {
    let x = match *inputs {
        [single] => single,
        _ => {
            // the aggregation weights start out zero
            let weights = net.graph.constant(shape![inputs.len()], vec![0.0; inputs.len()]);
            let weights = net.graph.sigmoid(weights);

            let mut total = None;
            for (i, &input) in inputs.iter().enumerate() {
                let weight = net.graph.slice(weights, 0, SliceRange::single(i));
                let term = net.graph.mul(input, weight);
                total = Some(match total {
                    None => term,
                    Some(total) => net.graph.add(total, term),
                });
            }
            total.expect("at least two inputs")
        }
    };

    let x = net.graph.relu(x);
    let x = net.separable_conv(x, filters, 3, ConvParams::same(stride));
    net.batch_norm(x)
}
