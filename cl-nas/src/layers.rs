use cl_graph::graph::{ConvParams, Graph, Value};
use cl_graph::shape;

use crate::init::Initializer;

/// The batch norm epsilon of every layer.
pub const BN_EPS: f32 = 1e-3;

/// Builds layers on top of a [Graph], drawing fresh weights from an [Initializer].
///
/// All layers are NCHW and the convolutions are bias-free, the following batch norm provides the bias.
#[derive(Debug)]
pub struct Layers {
    pub graph: Graph,
    init: Box<dyn Initializer>,
}

impl Layers {
    pub fn new(init: impl Initializer + 'static) -> Self {
        Layers {
            graph: Graph::new(),
            init: Box::new(init),
        }
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn channels(&self, x: Value) -> usize {
        self.graph[x].shape.channels()
    }

    pub fn spatial(&self, x: Value) -> (usize, usize) {
        self.graph[x].shape.spatial()
    }

    /// A (grouped) 2D convolution with a `kernel_h x kernel_w` kernel and `filters` output channels.
    #[must_use]
    pub fn conv(&mut self, x: Value, filters: usize, kernel: (usize, usize), params: ConvParams) -> Value {
        let (kernel_h, kernel_w) = kernel;
        let in_channels = self.channels(x) / params.groups;

        let receptive = kernel_h * kernel_w;
        let data = self.init.fill(
            in_channels * receptive,
            filters * receptive,
            filters * in_channels * receptive,
        );
        let filter = self.graph.constant(shape![filters, in_channels, kernel_h, kernel_w], data);

        self.graph.conv(x, filter, None, params)
    }

    /// A depthwise convolution followed by a pointwise one.
    /// Stride and dilation apply to the depthwise part.
    #[must_use]
    pub fn separable_conv(&mut self, x: Value, filters: usize, kernel: usize, params: ConvParams) -> Value {
        let channels = self.channels(x);
        let depthwise = self.conv(x, channels, (kernel, kernel), params.with_groups(channels));
        self.conv(depthwise, filters, (1, 1), ConvParams::same(1))
    }

    /// Inference-mode batch norm with freshly initialized statistics.
    #[must_use]
    pub fn batch_norm(&mut self, x: Value) -> Value {
        let channels = self.channels(x);
        let ones = self.graph.constant(shape![channels], vec![1.0; channels]);
        let zeros = self.graph.constant(shape![channels], vec![0.0; channels]);
        self.graph.batch_norm(x, ones, zeros, zeros, ones, BN_EPS)
    }

    /// Relu, global average pooling and a dense classifier, the common head of all networks.
    #[must_use]
    pub fn classifier(&mut self, x: Value, num_classes: usize) -> Value {
        let x = self.graph.relu(x);
        self.pool_and_dense(x, num_classes)
    }

    /// Global average pooling followed by a dense layer.
    #[must_use]
    pub fn pool_and_dense(&mut self, x: Value, num_classes: usize) -> Value {
        let x = self.graph.global_avg_pool(x);
        let features = self.graph[x].shape.unwrap_2()[1].unwrap_fixed("dense input features");

        let data = self.init.fill(features, num_classes, features * num_classes);
        let weight = self.graph.constant(shape![features, num_classes], data);

        // the dense bias starts out zero
        self.graph.linear(x, weight, None)
    }
}
