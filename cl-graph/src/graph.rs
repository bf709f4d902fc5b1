use std::cmp::max;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::ops::{Deref, Index};

use decorum::cmp::FloatEq;
use decorum::Total;
use itertools::{zip_eq, Itertools};
use rand::random;

use crate::shape;
use crate::shape::{Shape, Size};

/// The core graph datastructure.
///
/// This is a Directed Acyclic Graph (DAG) with values and their creating operations as nodes,
/// and input operands as edges. The data structure is append-only, values cannot be removed
/// and so will never become invalid.
///
/// Pushing an operation that already exists with the same shape and operands returns the existing value,
/// so building the same weightless computation twice does not grow the graph.
///
/// This type implements `Index<Value>` trait, so you can use `graph[value]` to get information about the given value.
///
/// ```
/// # use cl_graph::graph::*;
/// # use cl_graph::shape;
/// # use cl_graph::shape::*;
/// let mut graph = Graph::new();
///
/// let x = graph.input(shape![Size::BATCH, 4, 8, 8]);
/// let w = graph.constant(shape![8, 4, 3, 3], vec![0.5; 8 * 4 * 3 * 3]);
///
/// let y = graph.conv(x, w, None, ConvParams::same(1));
/// let y = graph.relu(y);
/// graph.output(y);
///
/// assert_eq!(graph[y].shape, shape![Size::BATCH, 8, 8, 8]);
/// ```
#[derive(Clone)]
pub struct Graph {
    owner: u32,
    values: Vec<ValueInfo>,
    created: Vec<Value>,
    inputs: Vec<Value>,
    outputs: Vec<Value>,
}

/// A value in a [Graph].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Value {
    index: usize,
    owner: u32,
}

/// Information about a [Value], most importantly its shape and creating operation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ValueInfo {
    pub shape: Shape,
    pub operation: Operation,
    pub debug_id: String,
    uses: usize,
}

/// Wrapper type that prevents the Debug output from getting too large.
#[derive(Clone)]
pub struct ConstantData(pub Vec<f32>);

/// The set of operations needed to express convolutional cell networks.
/// All spatial operations work on `NCHW` values.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Operation {
    /// A runtime-variable input.
    Input { index: usize },
    /// A constant build into the network.
    Constant { data: ConstantData },

    /// View a value as a different shape.
    View { input: Value },
    /// Slice along the given `axis` with range `start..end`.
    Slice {
        input: Value,
        axis: usize,
        range: SliceRange,
    },
    /// Zero-pad every axis with `(before, after)` elements.
    Pad { input: Value, pads: Vec<(usize, usize)> },
    /// Concatenate values along an axis.
    Concat { inputs: Vec<Value>, axis: usize },

    /// 2D convolution, optionally grouped, dilated and with a per-channel bias.
    Conv {
        input: Value,
        filter: Value,
        bias: Option<Value>,
        details: ConvDetails,
    },
    /// 2D max or average pooling. Average pooling does not count padded elements.
    Pool {
        input: Value,
        op: PoolOp,
        details: PoolDetails,
    },
    /// Matrix multiply of two rank 2 operands.
    MatMul { left: Value, right: Value },

    /// Elementwise unary operation.
    Unary { input: Value, op: UnaryOp },
    /// Elementwise binary operation with numpy-style broadcasting.
    Binary { left: Value, right: Value, op: BinaryOp },

    /// Inference-mode batch normalization over axis 1.
    BatchNorm {
        input: Value,
        scale: Value,
        bias: Value,
        mean: Value,
        variance: Value,
        eps: Total<f32>,
    },

    /// Reduce along the given `axes` using `op`. The `axes` are removed from the shape.
    Reduce {
        input: Value,
        axes: Vec<usize>,
        op: ReduceOp,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SliceRange {
    pub start: usize,
    pub end: usize,
    pub step: usize,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UnaryOp {
    Relu,
    Sigmoid,
    Abs,
    Neg,
    Exp,
    Sqrt,
    Tanh,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PoolOp {
    Max,
    Avg,
}

/// Explicit padding on each side of the two spatial axes.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Padding2d {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

/// How the spatial padding of a convolution or pooling window is chosen.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PaddingMode {
    /// Output size is `ceil(input / stride)`, extra padding goes to the bottom and right.
    Same,
    /// No padding at all.
    Valid,
    Explicit(Padding2d),
}

/// Hyperparameters of a convolution, everything except the operand shapes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ConvParams {
    pub stride: (usize, usize),
    pub dilation: (usize, usize),
    pub groups: usize,
    pub padding: PaddingMode,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ConvDetails {
    pub batch_size: Size,

    pub input_channels: usize,
    pub output_channels: usize,
    pub groups: usize,

    pub input_h: usize,
    pub input_w: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_y: usize,
    pub stride_x: usize,
    pub dilation_y: usize,
    pub dilation_x: usize,
    pub padding: Padding2d,
    pub output_h: usize,
    pub output_w: usize,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PoolDetails {
    pub batch_size: Size,
    pub channels: usize,

    pub input_h: usize,
    pub input_w: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_y: usize,
    pub stride_x: usize,
    pub padding: Padding2d,
    pub output_h: usize,
    pub output_w: usize,
}

impl Operation {
    pub fn inputs(&self) -> Vec<Value> {
        match self {
            Operation::Input { index: _ } => vec![],
            Operation::Constant { data: _ } => vec![],
            &Operation::View { input } => vec![input],
            &Operation::Slice { input, .. } => vec![input],
            &Operation::Pad { input, pads: _ } => vec![input],
            Operation::Concat { inputs, axis: _ } => inputs.clone(),
            &Operation::Conv {
                input,
                filter,
                bias,
                details: _,
            } => {
                let mut result = vec![input, filter];
                result.extend(bias);
                result
            }
            &Operation::Pool { input, .. } => vec![input],
            &Operation::MatMul { left, right } => vec![left, right],
            &Operation::Unary { input, op: _ } => vec![input],
            &Operation::Binary { left, right, op: _ } => vec![left, right],
            &Operation::BatchNorm {
                input,
                scale,
                bias,
                mean,
                variance,
                eps: _,
            } => vec![input, scale, bias, mean, variance],
            &Operation::Reduce { input, .. } => vec![input],
        }
    }

    pub(crate) fn clone_map_inputs(&self, mut f: impl FnMut(Value) -> Value) -> Operation {
        match self {
            &Operation::Input { index } => Operation::Input { index },
            Operation::Constant { data } => Operation::Constant { data: data.clone() },
            &Operation::View { input } => Operation::View { input: f(input) },
            &Operation::Slice { input, axis, range } => Operation::Slice {
                input: f(input),
                axis,
                range,
            },
            Operation::Pad { input, pads } => Operation::Pad {
                input: f(*input),
                pads: pads.clone(),
            },
            Operation::Concat { inputs, axis } => Operation::Concat {
                inputs: inputs.iter().copied().map(&mut f).collect(),
                axis: *axis,
            },
            &Operation::Conv {
                input,
                filter,
                bias,
                details,
            } => Operation::Conv {
                input: f(input),
                filter: f(filter),
                bias: bias.map(&mut f),
                details,
            },
            &Operation::Pool { input, op, details } => Operation::Pool {
                input: f(input),
                op,
                details,
            },
            &Operation::MatMul { left, right } => Operation::MatMul {
                left: f(left),
                right: f(right),
            },
            &Operation::Unary { input, op } => Operation::Unary { input: f(input), op },
            &Operation::Binary { left, right, op } => Operation::Binary {
                left: f(left),
                right: f(right),
                op,
            },
            &Operation::BatchNorm {
                input,
                scale,
                bias,
                mean,
                variance,
                eps,
            } => Operation::BatchNorm {
                input: f(input),
                scale: f(scale),
                bias: f(bias),
                mean: f(mean),
                variance: f(variance),
                eps,
            },
            Operation::Reduce { input, axes, op } => Operation::Reduce {
                input: f(*input),
                axes: axes.clone(),
                op: *op,
            },
        }
    }

    /// A short name for the kind of operation, used in summaries and debug ids.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Input { .. } => "Input",
            Operation::Constant { .. } => "Constant",
            Operation::View { .. } => "View",
            Operation::Slice { .. } => "Slice",
            Operation::Pad { .. } => "Pad",
            Operation::Concat { .. } => "Concat",
            Operation::Conv { .. } => "Conv",
            Operation::Pool { op: PoolOp::Max, .. } => "MaxPool",
            Operation::Pool { op: PoolOp::Avg, .. } => "AvgPool",
            Operation::MatMul { .. } => "MatMul",
            Operation::Unary { .. } => "Unary",
            Operation::Binary { .. } => "Binary",
            Operation::BatchNorm { .. } => "BatchNorm",
            Operation::Reduce { .. } => "Reduce",
        }
    }
}

impl Padding2d {
    pub const ZERO: Padding2d = Padding2d {
        top: 0,
        bottom: 0,
        left: 0,
        right: 0,
    };

    pub fn symmetric(y: usize, x: usize) -> Self {
        Padding2d {
            top: y,
            bottom: y,
            left: x,
            right: x,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Padding2d::ZERO
    }

    /// Resolve a [PaddingMode] for a window on an input with the given spatial size.
    pub fn resolve(
        mode: PaddingMode,
        input: (usize, usize),
        kernel: (usize, usize),
        stride: (usize, usize),
        dilation: (usize, usize),
    ) -> Padding2d {
        match mode {
            PaddingMode::Valid => Padding2d::ZERO,
            PaddingMode::Explicit(padding) => padding,
            PaddingMode::Same => {
                let (top, bottom) = same_padding(input.0, kernel.0, stride.0, dilation.0);
                let (left, right) = same_padding(input.1, kernel.1, stride.1, dilation.1);
                Padding2d {
                    top,
                    bottom,
                    left,
                    right,
                }
            }
        }
    }
}

/// The `(before, after)` padding that makes a window produce `ceil(input / stride)` outputs,
/// with the odd element going after.
pub fn same_padding(input: usize, kernel: usize, stride: usize, dilation: usize) -> (usize, usize) {
    let output = (input + stride - 1) / stride;
    let dilated_kernel = (kernel - 1) * dilation + 1;
    let total = ((output - 1) * stride + dilated_kernel).saturating_sub(input);
    let before = total / 2;
    (before, total - before)
}

fn window_output_size(input: usize, pad: usize, kernel: usize, stride: usize, dilation: usize) -> usize {
    let padded = input + pad;
    let dilated_kernel = (kernel - 1) * dilation + 1;
    assert!(
        padded >= dilated_kernel,
        "Kernel {} (dilation {}) must fit inside padded input {}",
        kernel,
        dilation,
        padded
    );
    (padded - dilated_kernel) / stride + 1
}

impl ConvParams {
    /// Stride `stride` on both axes with [PaddingMode::Same].
    pub fn same(stride: usize) -> Self {
        ConvParams {
            stride: (stride, stride),
            dilation: (1, 1),
            groups: 1,
            padding: PaddingMode::Same,
        }
    }

    pub fn valid(stride: usize) -> Self {
        ConvParams {
            padding: PaddingMode::Valid,
            ..ConvParams::same(stride)
        }
    }

    pub fn with_stride(self, stride_y: usize, stride_x: usize) -> Self {
        ConvParams {
            stride: (stride_y, stride_x),
            ..self
        }
    }

    pub fn with_dilation(self, dilation: usize) -> Self {
        ConvParams {
            dilation: (dilation, dilation),
            ..self
        }
    }

    pub fn with_groups(self, groups: usize) -> Self {
        ConvParams { groups, ..self }
    }
}

impl ConvDetails {
    pub fn input_shape(&self) -> Shape {
        shape![self.batch_size, self.input_channels, self.input_h, self.input_w]
    }

    pub fn output_shape(&self) -> Shape {
        shape![self.batch_size, self.output_channels, self.output_h, self.output_w]
    }

    pub fn kernel_shape(&self) -> [usize; 4] {
        [
            self.output_channels,
            self.input_channels / self.groups,
            self.kernel_h,
            self.kernel_w,
        ]
    }

    pub fn is_depthwise(&self) -> bool {
        self.groups > 1 && self.groups == self.input_channels
    }

    pub fn has_stride(&self) -> bool {
        self.stride_y != 1 || self.stride_x != 1
    }
}

impl PoolDetails {
    pub fn output_shape(&self) -> Shape {
        shape![self.batch_size, self.channels, self.output_h, self.output_w]
    }
}

impl Index<Value> for Graph {
    type Output = ValueInfo;

    #[track_caller]
    fn index(&self, value: Value) -> &ValueInfo {
        self.assert_owns(value);
        &self.values[value.index]
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            owner: random(),
            values: vec![],
            created: vec![],
            inputs: vec![],
            outputs: vec![],
        }
    }

    #[track_caller]
    fn assert_owns(&self, value: Value) {
        assert!(
            value.owner == self.owner && value.index < self.values.len(),
            "{:#?} is not part of this graph",
            value
        );
    }

    fn value_at(&self, index: usize) -> Value {
        Value {
            index,
            owner: self.owner,
        }
    }

    /// All values in creation order. Operands are always created before the values that use them,
    /// so this is also a topological order.
    pub fn values(&self) -> impl Iterator<Item = Value> {
        let owner = self.owner;
        (0..self.values.len()).map(move |index| Value { index, owner })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn inputs(&self) -> &[Value] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Value] {
        &self.outputs
    }

    pub fn input_shapes(&self) -> Vec<Shape> {
        self.shapes_of(&self.inputs)
    }

    pub fn output_shapes(&self) -> Vec<Shape> {
        self.shapes_of(&self.outputs)
    }

    fn shapes_of(&self, values: &[Value]) -> Vec<Shape> {
        values.iter().map(|&v| self[v].shape.clone()).collect()
    }

    /// Whether `value` is neither a graph input nor a graph output.
    pub fn is_hidden(&self, value: Value) -> bool {
        self.assert_owns(value);
        !(self.inputs.contains(&value) || self.outputs.contains(&value))
    }

    pub fn is_hidden_with_uses(&self, value: Value, uses: usize) -> bool {
        self.is_hidden(value) && self.non_output_uses(value) == uses
    }

    /// How many times `value` is an operand of another value. Being a graph output does not count.
    pub fn non_output_uses(&self, value: Value) -> usize {
        self[value].uses
    }

    /// The data of `value` if it is a constant, possibly behind views.
    pub fn as_const(&self, value: Value) -> Option<&[f32]> {
        match &self[value].operation {
            &Operation::View { input } => self.as_const(input),
            Operation::Constant { data } => Some(data),
            _ => None,
        }
    }

    /// The element of `value` if it is a constant where all elements are equal.
    pub fn as_single_const(&self, value: Value) -> Option<f32> {
        let (&first, rest) = self.as_const(value)?.split_first()?;
        rest.iter().all(|x| x.float_eq(&first)).then_some(first)
    }

    pub fn is_const_filled_with(&self, value: Value, f: f32) -> bool {
        matches!(self.as_single_const(value), Some(x) if x.float_eq(&f))
    }

    /// The values created since the previous call.
    pub fn take_new_values(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.created)
    }

    /// Add a value, or return the existing one if there is already a value with the same shape and operation.
    #[must_use]
    pub(crate) fn push(&mut self, shape: Shape, operation: Operation) -> Value {
        if let Some(index) = self
            .values
            .iter()
            .position(|info| info.operation == operation && info.shape == shape)
        {
            return self.value_at(index);
        }

        for input in operation.inputs() {
            self.assert_owns(input);
            self.values[input.index].uses += 1;
        }

        let value = self.value_at(self.values.len());
        self.values.push(ValueInfo {
            shape,
            operation,
            debug_id: String::new(),
            uses: 0,
        });
        self.created.push(value);
        value
    }

    /// There is no `IndexMut`, the debug id is the only mutable part of a value.
    pub fn set_debug_id(&mut self, value: Value, id: String) {
        self.assert_owns(value);
        self.values[value.index].debug_id = id;
    }

    #[must_use]
    pub fn input(&mut self, shape: Shape) -> Value {
        let value = self.push(
            shape,
            Operation::Input {
                index: self.inputs.len(),
            },
        );
        self.inputs.push(value);
        value
    }

    #[must_use]
    pub fn constant(&mut self, shape: Shape, data: Vec<f32>) -> Value {
        let size = shape.unwrap_fixed("Constant shape").size();
        assert_eq!(
            size,
            data.len(),
            "Constant of shape {} needs {} elements, got {}",
            shape,
            size,
            data.len()
        );
        self.push(
            shape,
            Operation::Constant {
                data: ConstantData(data),
            },
        )
    }

    #[must_use]
    pub fn scalar(&mut self, value: f32) -> Value {
        self.constant(Shape::SCALAR, vec![value])
    }

    /// Reinterpret `input` with a different shape of the same size. Chains of views collapse into one.
    #[must_use]
    pub fn view(&mut self, input: Value, shape: Shape) -> Value {
        let input_shape = &self[input].shape;
        if *input_shape == shape {
            return input;
        }
        assert_eq!(
            input_shape.size(),
            shape.size(),
            "Cannot view {} as {}, the sizes differ",
            input_shape,
            shape
        );

        let source = match self[input].operation {
            Operation::View { input: inner } => inner,
            _ => input,
        };
        if self[source].shape == shape {
            return source;
        }
        self.push(shape, Operation::View { input: source })
    }

    /// Merge the axes from `start_axis` onwards into a single axis.
    #[must_use]
    pub fn flatten(&mut self, input: Value, start_axis: usize) -> Value {
        let (kept, merged) = self[input].shape.split(start_axis);
        let shape = kept.concat(&shape![merged.size()]);
        self.view(input, shape)
    }

    #[must_use]
    pub fn slice(&mut self, input: Value, axis: usize, range: SliceRange) -> Value {
        let input_shape = &self[input].shape;
        input_shape.assert_has_axis(axis);

        let len = input_shape[axis].unwrap_fixed("Sliced axis");
        range.assert_in_bounds(len);
        if range == SliceRange::simple(0, len) {
            return input;
        }

        let shape = input_shape.replace(axis, shape![range.len()]);
        self.push(shape, Operation::Slice { input, axis, range })
    }

    /// Zero-pad `input`, `pads` contains the `(before, after)` amounts for every axis.
    #[must_use]
    pub fn pad(&mut self, input: Value, pads: Vec<(usize, usize)>) -> Value {
        let input_shape = &self[input].shape;
        assert_eq!(
            input_shape.rank(),
            pads.len(),
            "Padding {:?} must cover every axis of {}",
            pads,
            input_shape
        );

        if pads.iter().all(|&(a, b)| a == 0 && b == 0) {
            return input;
        }

        let dims = zip_eq(&input_shape.dims, &pads)
            .map(|(&d, &(before, after))| {
                if before == 0 && after == 0 {
                    d
                } else {
                    Size::fixed(d.unwrap_fixed("Padded axis length") + before + after)
                }
            })
            .collect_vec();

        self.push(Shape::new(dims), Operation::Pad { input, pads })
    }

    /// Concatenate `inputs` along `axis`.
    #[must_use]
    pub fn concat(&mut self, inputs: Vec<Value>, axis: usize) -> Value {
        assert!(!inputs.is_empty(), "Cannot concatenate zero values");

        if inputs.len() == 1 {
            self[inputs[0]].shape.assert_has_axis(axis);
            return inputs[0];
        }

        let base_shape = self[inputs[0]].shape.replace(axis, shape![0]);

        let size_along_axis = inputs
            .iter()
            .map(|&v| {
                assert_eq!(
                    self[v].shape.replace(axis, shape![0]),
                    base_shape,
                    "All concatenated values must match base shape on non-concatenated axes"
                );
                self[v].shape.dims[axis]
            })
            .sum::<Option<Size>>()
            .unwrap_or_else(|| {
                let input_shapes = inputs.iter().map(|&v| &self[v].shape).collect_vec();
                panic!("Could not add all concatenation sizes: {:?}", input_shapes);
            });

        let result_shape = base_shape.replace(axis, shape![size_along_axis]);
        self.push(result_shape, Operation::Concat { inputs, axis })
    }

    /// Apply a 2D convolution.
    ///
    /// The filter has shape `[Co, Ci / groups, Kh, Kw]`, the optional bias has shape `[Co]`.
    #[must_use]
    pub fn conv(&mut self, input: Value, filter: Value, bias: Option<Value>, params: ConvParams) -> Value {
        let [batch_size, in_c, in_h, in_w] = self[input].shape.unwrap_4();
        let [out_c, in_c_group, k_h, k_w] = self[filter].shape.unwrap_4();

        let input_channels = in_c.unwrap_fixed("Conv input channels");
        let input_h = in_h.unwrap_fixed("Conv input height");
        let input_w = in_w.unwrap_fixed("Conv input width");
        let output_channels = out_c.unwrap_fixed("Conv output channels");
        let in_c_group = in_c_group.unwrap_fixed("Filter input channels");
        let kernel_h = k_h.unwrap_fixed("Conv kernel height");
        let kernel_w = k_w.unwrap_fixed("Conv kernel width");

        let ConvParams {
            stride: (stride_y, stride_x),
            dilation: (dilation_y, dilation_x),
            groups,
            padding,
        } = params;

        assert!(groups > 0, "Groups must be positive");
        assert_eq!(
            input_channels % groups,
            0,
            "Input channels {} must be divisible by groups {}",
            input_channels,
            groups
        );
        assert_eq!(
            output_channels % groups,
            0,
            "Output channels {} must be divisible by groups {}",
            output_channels,
            groups
        );
        assert_eq!(input_channels / groups, in_c_group, "Input channel mismatch");

        if let Some(bias) = bias {
            assert_eq!(
                self[bias].shape,
                shape![output_channels],
                "Conv bias must have shape [{}]",
                output_channels
            );
        }

        let padding = Padding2d::resolve(
            padding,
            (input_h, input_w),
            (kernel_h, kernel_w),
            (stride_y, stride_x),
            (dilation_y, dilation_x),
        );

        let output_h = window_output_size(input_h, padding.top + padding.bottom, kernel_h, stride_y, dilation_y);
        let output_w = window_output_size(input_w, padding.left + padding.right, kernel_w, stride_x, dilation_x);

        let details = ConvDetails {
            batch_size,
            input_channels,
            output_channels,
            groups,
            input_h,
            input_w,
            kernel_h,
            kernel_w,
            stride_y,
            stride_x,
            dilation_y,
            dilation_x,
            padding,
            output_h,
            output_w,
        };

        self.push(
            details.output_shape(),
            Operation::Conv {
                input,
                filter,
                bias,
                details,
            },
        )
    }

    /// Apply 2D max or average pooling.
    #[must_use]
    pub fn pool(
        &mut self,
        input: Value,
        op: PoolOp,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: PaddingMode,
    ) -> Value {
        let [batch_size, c, h, w] = self[input].shape.unwrap_4();
        let channels = c.unwrap_fixed("Pool channels");
        let input_h = h.unwrap_fixed("Pool input height");
        let input_w = w.unwrap_fixed("Pool input width");
        let (kernel_h, kernel_w) = kernel;
        let (stride_y, stride_x) = stride;

        let padding = Padding2d::resolve(padding, (input_h, input_w), kernel, stride, (1, 1));
        assert!(
            padding.top < kernel_h && padding.bottom < kernel_h && padding.left < kernel_w && padding.right < kernel_w,
            "Pool padding {:?} must be smaller than the kernel {:?}",
            padding,
            kernel
        );

        let output_h = window_output_size(input_h, padding.top + padding.bottom, kernel_h, stride_y, 1);
        let output_w = window_output_size(input_w, padding.left + padding.right, kernel_w, stride_x, 1);

        let details = PoolDetails {
            batch_size,
            channels,
            input_h,
            input_w,
            kernel_h,
            kernel_w,
            stride_y,
            stride_x,
            padding,
            output_h,
            output_w,
        };

        self.push(details.output_shape(), Operation::Pool { input, op, details })
    }

    /// Matrix multiply, operands have shapes `[n, p]` and `[p, m]` and the result has shape `[n, m]`.
    #[must_use]
    pub fn mat_mul(&mut self, left: Value, right: Value) -> Value {
        let [n, p0] = self[left].shape.unwrap_2();
        let [p1, m] = self[right].shape.unwrap_2();
        assert_eq!(
            p0, p1,
            "Inner matmul dimension must match, got shapes {} and {}",
            self[left].shape, self[right].shape
        );

        self.push(shape![n, m], Operation::MatMul { left, right })
    }

    /// Apply a dense layer.
    /// Input shape `[b, Ci]` and weight shape `[Ci, Co]` result in an output with shape `[b, Co]`.
    #[must_use]
    pub fn linear(&mut self, input: Value, weight: Value, bias: Option<Value>) -> Value {
        let result = self.mat_mul(input, weight);
        match bias {
            Some(bias) => self.add(result, bias),
            None => result,
        }
    }

    /// Inference-mode batch normalization along axis 1.
    /// All parameters have shape `[C]`.
    #[must_use]
    pub fn batch_norm(
        &mut self,
        input: Value,
        scale: Value,
        bias: Value,
        mean: Value,
        variance: Value,
        eps: f32,
    ) -> Value {
        let input_shape = self[input].shape.clone();
        assert!(input_shape.rank() >= 2, "BatchNorm input must have at least rank 2");

        let param_shape = shape![input_shape[1]];
        for param in [scale, bias, mean, variance] {
            assert_eq!(
                self[param].shape, param_shape,
                "BatchNorm parameters must have shape {}",
                param_shape
            );
        }

        self.push(
            input_shape,
            Operation::BatchNorm {
                input,
                scale,
                bias,
                mean,
                variance,
                eps: Total::from(eps),
            },
        )
    }

    /// Reduce `input` along the given `axes`.
    /// The result shape is the same as the input shape but without the reduces axes.
    #[must_use]
    pub fn reduce(&mut self, input: Value, axes: Vec<usize>, op: ReduceOp) -> Value {
        if axes.is_empty() {
            return input;
        }

        let input_shape = &self[input].shape;
        let new_shape = input_shape.replace_all(&axes, shape![]);
        self.push(new_shape, Operation::Reduce { input, axes, op })
    }

    /// Average over the spatial axes of an `NCHW` value, the result has shape `[N, C]`.
    #[must_use]
    pub fn global_avg_pool(&mut self, input: Value) -> Value {
        let _ = self[input].shape.unwrap_4();
        self.reduce(input, vec![2, 3], ReduceOp::Mean)
    }

    #[must_use]
    pub fn relu(&mut self, input: Value) -> Value {
        self.unary(UnaryOp::Relu, input)
    }

    #[must_use]
    pub fn sigmoid(&mut self, input: Value) -> Value {
        self.unary(UnaryOp::Sigmoid, input)
    }

    #[must_use]
    pub fn unary(&mut self, op: UnaryOp, input: Value) -> Value {
        self.push(self[input].shape.clone(), Operation::Unary { op, input })
    }

    #[must_use]
    pub fn add(&mut self, left: Value, right: Value) -> Value {
        self.binary(BinaryOp::Add, left, right)
    }

    #[must_use]
    pub fn sub(&mut self, left: Value, right: Value) -> Value {
        self.binary(BinaryOp::Sub, left, right)
    }

    #[must_use]
    pub fn mul(&mut self, left: Value, right: Value) -> Value {
        self.binary(BinaryOp::Mul, left, right)
    }

    /// Compute elementwise binary operation, broadcasting both operands towards a common shape.
    #[must_use]
    pub fn binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Value {
        let result_shape = broadcast_shape_symmetric(&self[left].shape, &self[right].shape);

        let skip = match op {
            BinaryOp::Sub | BinaryOp::Add => self.is_const_filled_with(right, 0.0),
            BinaryOp::Mul | BinaryOp::Div => self.is_const_filled_with(right, 1.0),
            BinaryOp::Min => self.is_const_filled_with(right, f32::INFINITY),
            BinaryOp::Max => self.is_const_filled_with(right, f32::NEG_INFINITY),
        };
        if skip && result_shape == self[left].shape {
            return left;
        }

        self.push(result_shape, Operation::Binary { left, right, op })
    }

    /// Mark `value` as an output, the same value can be an output more than once.
    pub fn output(&mut self, value: Value) {
        self.assert_owns(value);
        self.outputs.push(value);
    }

    /// Count the values per operation kind and the number of constant parameters.
    pub fn summary(&self) -> GraphSummary {
        let mut op_counts = BTreeMap::new();
        let mut param_count = 0;

        for value in self.values() {
            let info = &self[value];
            if let Operation::Constant { data } = &info.operation {
                param_count += data.len();
            }
            *op_counts.entry(info.operation.kind()).or_insert(0) += 1;
        }

        GraphSummary {
            value_count: self.values.len(),
            op_counts,
            param_count,
        }
    }
}

/// Statistics about a graph, see [Graph::summary].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GraphSummary {
    pub value_count: usize,
    pub op_counts: BTreeMap<&'static str, usize>,
    pub param_count: usize,
}

impl Display for GraphSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} values, {} parameters", self.value_count, self.param_count)?;
        for (kind, count) in &self.op_counts {
            writeln!(f, "  {:>10}: {}", kind, count)?;
        }
        Ok(())
    }
}

#[track_caller]
pub fn broadcast_shape_symmetric(left: &Shape, right: &Shape) -> Shape {
    match try_broadcast_shape_symmetric(left, right) {
        Some(shape) => shape,
        None => panic!("Cannot broadcast shapes {} and {}", left, right),
    }
}

/// The shape both operands broadcast to, or `None` if some axis has two different sizes, neither of them one.
pub fn try_broadcast_shape_symmetric(left: &Shape, right: &Shape) -> Option<Shape> {
    let rank = max(left.rank(), right.rank());

    // pad with leading 1 axes
    let left = Shape::ones(rank - left.rank()).concat(left);
    let right = Shape::ones(rank - right.rank()).concat(right);

    let result = zip_eq(&left.dims, &right.dims)
        .map(|(&l, &r)| match (l, r) {
            (Size::ONE, other) | (other, Size::ONE) => Some(other),
            (any, other) if any == other => Some(any),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;

    Some(Shape::new(result))
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Debug for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("inputs", &self.input_shapes())
            .field("outputs", &self.output_shapes())
            .field("values", &self.values.len())
            .finish_non_exhaustive()
    }
}

impl Display for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph(inputs={:?}, outputs={:?}) {{", self.inputs, self.outputs)?;
        for value in self.values() {
            let info = &self[value];
            write!(f, "  {:?}: {} = {:?}", value, info.shape, info.operation)?;
            if !info.debug_id.is_empty() {
                write!(f, " ({})", info.debug_id)?;
            }
            writeln!(f)?;
        }
        writeln!(f, "}}")
    }
}

impl Debug for ConstantData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.len() <= 16 {
            write!(f, "{:?}", self.0)
        } else {
            write!(f, "[..; {}]", self.0.len())
        }
    }
}

impl PartialEq for ConstantData {
    fn eq(&self, other: &Self) -> bool {
        self.0.float_eq(&other.0)
    }
}

impl Eq for ConstantData {}

impl Deref for ConstantData {
    type Target = Vec<f32>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Value {
    pub fn index(self) -> usize {
        self.index
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            write!(f, "Value({} of graph {:08x})", self.index, self.owner)
        } else {
            write!(f, "Value({})", self.index)
        }
    }
}

impl SliceRange {
    #[track_caller]
    pub fn new(start: usize, end: usize, step: usize) -> Self {
        assert!(
            start <= end && step != 0 && (end - start) % step == 0,
            "Invalid slice range {}:{}:{}",
            start,
            end,
            step
        );
        SliceRange { start, end, step }
    }

    pub fn simple(start: usize, end: usize) -> Self {
        SliceRange::new(start, end, 1)
    }

    pub fn single(index: usize) -> Self {
        SliceRange::simple(index, index + 1)
    }

    /// The number of selected elements.
    pub fn len(self) -> usize {
        (self.end - self.start) / self.step
    }

    pub fn is_empty(self) -> bool {
        self.start == self.end
    }

    #[track_caller]
    pub fn assert_in_bounds(self, size: usize) {
        // the last selected index is `end - step`
        let last_ok = self.is_empty() || self.end - self.step < size;
        assert!(last_ok, "Slice range {} out of bounds for axis of length {}", self, size);
    }
}

impl From<std::ops::Range<usize>> for SliceRange {
    fn from(range: std::ops::Range<usize>) -> Self {
        SliceRange::simple(range.start, range.end)
    }
}

impl Display for SliceRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start, self.end)?;
        if self.step != 1 {
            write!(f, ":{}", self.step)?;
        }
        Ok(())
    }
}

impl UnaryOp {
    pub fn map(self, x: f32) -> f32 {
        match self {
            UnaryOp::Relu => x.max(0.0),
            UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Neg => -x,
            UnaryOp::Exp => x.exp(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Tanh => x.tanh(),
        }
    }
}

impl BinaryOp {
    pub fn map(self, left: f32, right: f32) -> f32 {
        match self {
            BinaryOp::Add => left + right,
            BinaryOp::Sub => left - right,
            BinaryOp::Mul => left * right,
            BinaryOp::Div => left / right,
            BinaryOp::Min => f32::min(left, right),
            BinaryOp::Max => f32::max(left, right),
        }
    }
}
