use std::collections::HashMap;

use ndarray::{Array1, Array4, ArrayView1, ArrayView4, Axis};
use tracing::trace;

use crate::graph::{ConvDetails, ConvParams, Graph, Operation, PaddingMode, Value};
use crate::optimizer::OptimizerSettings;
use crate::shape;

/// Either the rebuilt value, or the old value that has to be rebuilt first.
type Rebuilt<T> = Result<T, Value>;

/// Copies a graph into a new one value by value, replacing fusable patterns on the way.
#[derive(Debug)]
pub struct Optimizer<'a> {
    settings: OptimizerSettings,
    old: &'a Graph,
    new: Graph,
    mapping: HashMap<Value, Value>,
    fused_bn: usize,
}

impl<'a> Optimizer<'a> {
    pub fn new(settings: OptimizerSettings, old: &'a Graph) -> Self {
        Optimizer {
            settings,
            old,
            new: Graph::new(),
            mapping: HashMap::new(),
            fused_bn: 0,
        }
    }

    /// The optimized graph and the number of batchnorms that were fused away.
    pub fn finish(self) -> (Graph, usize) {
        (self.new, self.fused_bn)
    }

    pub fn copy_input(&mut self, old: Value) {
        let info = &self.old[old];
        let new = self.new.input(info.shape.clone());
        self.new.set_debug_id(new, info.debug_id.clone());
        self.map(old, new);
    }

    pub fn copy_output(&mut self, old: Value) {
        let new = self.rebuild(old);
        self.new.output(new);
    }

    /// Rebuild `root` and everything it depends on.
    ///
    /// Deep networks would overflow the call stack, so the pending values are kept on the heap instead.
    fn rebuild(&mut self, root: Value) -> Value {
        let mut pending = vec![root];

        while let Some(&old) = pending.last() {
            if self.mapping.contains_key(&old) {
                pending.pop();
                continue;
            }

            match self.rebuild_single(old) {
                Ok(new) => {
                    self.map(old, new);
                    pending.pop();
                }
                Err(missing) => pending.push(missing),
            }
        }

        self.mapping[&root]
    }

    fn get(&self, old: Value) -> Rebuilt<Value> {
        self.mapping.get(&old).copied().ok_or(old)
    }

    fn map(&mut self, old: Value, new: Value) {
        assert_eq!(self.old[old].shape, self.new[new].shape, "Optimizer changed the shape of {:?}", old);
        let prev = self.mapping.insert(old, new);
        assert!(prev.is_none(), "{:?} was rebuilt twice", old);
    }

    fn rebuild_single(&mut self, old: Value) -> Rebuilt<Value> {
        let old_graph = self.old;
        let info = &old_graph[old];

        let new = match self.try_fuse(old)? {
            Some(fused) => fused,
            None => {
                for input in info.operation.inputs() {
                    self.get(input)?;
                }
                let mapping = &self.mapping;
                let operation = info.operation.clone_map_inputs(|input| mapping[&input]);
                self.new.push(info.shape.clone(), operation)
            }
        };

        self.new.set_debug_id(new, info.debug_id.clone());
        Ok(new)
    }

    fn try_fuse(&mut self, old: Value) -> Rebuilt<Option<Value>> {
        if self.settings.fuse_bn_into_conv {
            if let Some(fused) = self.try_fuse_bn_into_conv(old)? {
                self.fused_bn += 1;
                return Ok(Some(fused));
            }
        }
        Ok(None)
    }

    /// `bn(conv(x, w, b))` with constant operands becomes `conv(x, w * f, (b - mean) * f + beta)`
    /// with `f = scale / sqrt(var + eps)` per output channel.
    fn try_fuse_bn_into_conv(&mut self, bn: Value) -> Rebuilt<Option<Value>> {
        let graph = self.old;

        let &Operation::BatchNorm {
            input: conv,
            scale,
            bias: beta,
            mean,
            variance,
            eps,
        } = &graph[bn].operation
        else {
            return Ok(None);
        };
        let &Operation::Conv {
            input,
            filter,
            bias,
            details,
        } = &graph[conv].operation
        else {
            return Ok(None);
        };

        // the conv result itself must not be needed anywhere else
        if !graph.is_hidden_with_uses(conv, 1) {
            return Ok(None);
        }

        let constants = [filter, scale, beta, mean, variance].map(|v| graph.as_const(v));
        let [Some(filter), Some(scale), Some(beta), Some(mean), Some(variance)] = constants else {
            return Ok(None);
        };
        let bias = match bias {
            None => Array1::zeros(details.output_channels),
            Some(bias) => match graph.as_const(bias) {
                Some(bias) => ArrayView1::from(bias).to_owned(),
                None => return Ok(None),
            },
        };

        let eps = eps.into_inner();
        let factor = ArrayView1::from(scale).to_owned() / ArrayView1::from(variance).mapv(|v| (v + eps).sqrt());
        let new_bias = (bias - ArrayView1::from(mean)) * &factor + ArrayView1::from(beta);
        let new_filter = scale_output_channels(&details, filter, &factor);

        let new_input = self.get(input)?;
        trace!("Fusing batchnorm {:?} into conv {:?}", bn, conv);

        let [k, c, kh, kw] = details.kernel_shape();
        let new_filter = self.new.constant(shape![k, c, kh, kw], new_filter.into_raw_vec());
        let new_bias = self.new.constant(shape![k], new_bias.to_vec());
        let params = ConvParams {
            stride: (details.stride_y, details.stride_x),
            dilation: (details.dilation_y, details.dilation_x),
            groups: details.groups,
            padding: PaddingMode::Explicit(details.padding),
        };
        Ok(Some(self.new.conv(new_input, new_filter, Some(new_bias), params)))
    }
}

fn scale_output_channels(details: &ConvDetails, filter: &[f32], factor: &Array1<f32>) -> Array4<f32> {
    let mut filter = ArrayView4::from_shape(details.kernel_shape(), filter)
        .expect("constant size matches filter shape")
        .to_owned();
    for (mut channel, &f) in filter.axis_iter_mut(Axis(0)).zip(factor) {
        channel *= f;
    }
    filter
}
