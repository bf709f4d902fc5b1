use std::fmt::{Debug, Display, Formatter};
use std::ops::{Add, Div, Index, Mul};

use itertools::Itertools;

/// Build a [Shape] from a list of dimensions, each either a `usize` or a [Size].
///
/// ```
/// # use cl_graph::shape;
/// # use cl_graph::shape::Size;
/// let shape = shape![Size::BATCH, 3, 32, 32];
/// assert_eq!(shape.to_string(), "(B x 3 x 32 x 32)");
/// ```
#[macro_export]
macro_rules! shape {
    [$($dim:expr),* $(,)?] => {
        $crate::shape::Shape::new(vec![$($crate::shape::Size::from($dim)),*])
    };
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Shape {
    pub dims: Vec<Size>,
}

/// A single dimension `factor * B^batch_pow`, where `B` is the batch size.
///
/// Zero is always stored with `batch_pow == 0`, so equality is structural.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Size {
    factor: usize,
    batch_pow: u32,
}

/// A shape where the batch size is already known.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ConcreteShape {
    pub dims: Vec<usize>,
}

impl Size {
    pub const ZERO: Size = Size::new(0, 0);
    pub const ONE: Size = Size::fixed(1);
    pub const BATCH: Size = Size::new(1, 1);

    pub const fn new(batch_pow: u32, factor: usize) -> Size {
        let batch_pow = if factor == 0 { 0 } else { batch_pow };
        Size { factor, batch_pow }
    }

    pub const fn fixed(factor: usize) -> Size {
        Size { factor, batch_pow: 0 }
    }

    pub fn batch_exp(self) -> u32 {
        self.batch_pow
    }

    pub fn fixed_factor(self) -> usize {
        self.factor
    }

    pub fn is_fixed(self) -> bool {
        self.batch_pow == 0
    }

    pub fn eval(self, batch: usize) -> usize {
        self.factor * batch.pow(self.batch_pow)
    }

    pub fn try_unwrap_fixed(self) -> Option<usize> {
        self.is_fixed().then_some(self.factor)
    }

    #[track_caller]
    pub fn unwrap_fixed(self, what: &str) -> usize {
        match self.try_unwrap_fixed() {
            Some(size) => size,
            None => panic!("{} must be fixed, got {}", what, self),
        }
    }
}

impl From<usize> for Size {
    fn from(factor: usize) -> Self {
        Size::fixed(factor)
    }
}

impl Shape {
    pub const SCALAR: Shape = Shape { dims: vec![] };

    pub fn new(dims: Vec<Size>) -> Shape {
        Shape { dims }
    }

    pub fn fixed(dims: &[usize]) -> Shape {
        Shape::new(dims.iter().map(|&d| Size::fixed(d)).collect())
    }

    pub fn ones(rank: usize) -> Shape {
        Shape::new(vec![Size::ONE; rank])
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// The total number of elements.
    pub fn size(&self) -> Size {
        self.dims.iter().copied().product()
    }

    pub fn has_batch(&self) -> bool {
        !self.dims.iter().all(|d| d.is_fixed())
    }

    #[track_caller]
    pub fn assert_has_axis(&self, axis: usize) {
        assert!(axis < self.rank(), "Axis {} out of bounds for shape {}", axis, self);
    }

    pub fn as_fixed(&self) -> Option<ConcreteShape> {
        let dims = self.dims.iter().map(|d| d.try_unwrap_fixed()).collect::<Option<Vec<_>>>()?;
        Some(ConcreteShape::new(dims))
    }

    #[track_caller]
    pub fn unwrap_fixed(&self, what: &str) -> ConcreteShape {
        match self.as_fixed() {
            Some(shape) => shape,
            None => panic!("{} must have a fixed shape, got {}", what, self),
        }
    }

    pub fn eval(&self, batch: usize) -> ConcreteShape {
        ConcreteShape::new(self.dims.iter().map(|d| d.eval(batch)).collect())
    }

    #[track_caller]
    fn unwrap_rank<const N: usize>(&self) -> [Size; N] {
        match <[Size; N]>::try_from(self.dims.as_slice()) {
            Ok(dims) => dims,
            Err(_) => panic!("Expected shape of rank {}, got {}", N, self),
        }
    }

    #[track_caller]
    pub fn unwrap_2(&self) -> [Size; 2] {
        self.unwrap_rank()
    }

    #[track_caller]
    pub fn unwrap_3(&self) -> [Size; 3] {
        self.unwrap_rank()
    }

    #[track_caller]
    pub fn unwrap_4(&self) -> [Size; 4] {
        self.unwrap_rank()
    }

    /// `C` of an `NCHW` shape.
    #[track_caller]
    pub fn channels(&self) -> usize {
        self.unwrap_4()[1].unwrap_fixed("Channel count")
    }

    /// `(H, W)` of an `NCHW` shape.
    #[track_caller]
    pub fn spatial(&self) -> (usize, usize) {
        let [_, _, h, w] = self.unwrap_4();
        (h.unwrap_fixed("Height"), w.unwrap_fixed("Width"))
    }

    /// Append the dimensions of `other`.
    pub fn concat(mut self, other: &Shape) -> Shape {
        self.dims.extend(other.dims.iter().copied());
        self
    }

    /// Replace the single dimension at `axis` with all dimensions of `replacement`.
    pub fn replace(&self, axis: usize, replacement: Shape) -> Shape {
        self.replace_all(&[axis], replacement)
    }

    /// Replace each of `axes` with all dimensions of `replacement`.
    pub fn replace_all(&self, axes: &[usize], replacement: Shape) -> Shape {
        assert!(axes.iter().all_unique(), "Duplicate axes in {:?}", axes);
        axes.iter().for_each(|&axis| self.assert_has_axis(axis));

        let dims = self
            .dims
            .iter()
            .enumerate()
            .flat_map(|(i, &d)| {
                if axes.contains(&i) {
                    replacement.dims.clone()
                } else {
                    vec![d]
                }
            })
            .collect();
        Shape::new(dims)
    }

    #[track_caller]
    pub fn insert(&self, axis: usize, size: Size) -> Shape {
        assert!(axis <= self.rank(), "Cannot insert axis {} into shape {}", axis, self);
        let mut result = self.clone();
        result.dims.insert(axis, size);
        result
    }

    /// Split into the dimensions before `index` and the ones starting at it.
    #[track_caller]
    pub fn split(&self, index: usize) -> (Shape, Shape) {
        assert!(index <= self.rank(), "Cannot split shape {} at {}", self, index);
        let (head, tail) = self.dims.split_at(index);
        (Shape::new(head.to_vec()), Shape::new(tail.to_vec()))
    }
}

impl ConcreteShape {
    pub fn new(dims: Vec<usize>) -> Self {
        ConcreteShape { dims }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    #[track_caller]
    pub fn unwrap_4(&self) -> [usize; 4] {
        match <[usize; 4]>::try_from(self.dims.as_slice()) {
            Ok(dims) => dims,
            Err(_) => panic!("Expected shape of rank 4, got {}", self),
        }
    }
}

/// Only defined when both sides have the same batch power, or one of them is zero.
impl Add for Size {
    type Output = Option<Size>;

    fn add(self, rhs: Size) -> Option<Size> {
        match (self, rhs) {
            (Size::ZERO, other) | (other, Size::ZERO) => Some(other),
            (a, b) if a.batch_pow == b.batch_pow => Some(Size::new(a.batch_pow, a.factor + b.factor)),
            _ => None,
        }
    }
}

impl Mul for Size {
    type Output = Size;

    fn mul(self, rhs: Size) -> Size {
        Size::new(self.batch_pow + rhs.batch_pow, self.factor * rhs.factor)
    }
}

/// Only defined when the result is again of the form `factor * B^batch_pow`.
impl Div for Size {
    type Output = Option<Size>;

    fn div(self, rhs: Size) -> Option<Size> {
        let batch_pow = self.batch_pow.checked_sub(rhs.batch_pow)?;
        if rhs.factor == 0 || self.factor % rhs.factor != 0 {
            return None;
        }
        Some(Size::new(batch_pow, self.factor / rhs.factor))
    }
}

impl std::iter::Sum<Size> for Option<Size> {
    fn sum<I: Iterator<Item = Size>>(iter: I) -> Self {
        let mut total = Size::ZERO;
        for size in iter {
            total = (total + size)?;
        }
        Some(total)
    }
}

impl std::iter::Product for Size {
    fn product<I: Iterator<Item = Size>>(iter: I) -> Self {
        iter.fold(Size::ONE, Mul::mul)
    }
}

impl Index<usize> for Shape {
    type Output = Size;

    #[track_caller]
    fn index(&self, axis: usize) -> &Size {
        self.assert_has_axis(axis);
        &self.dims[axis]
    }
}

impl Display for Size {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.batch_pow == 0 {
            return write!(f, "{}", self.factor);
        }
        if self.factor != 1 {
            write!(f, "{}", self.factor)?;
        }
        match self.batch_pow {
            1 => write!(f, "B"),
            pow => write!(f, "B^{}", pow),
        }
    }
}

impl Debug for Size {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Size({})", self)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.dims.iter().join(" x "))
    }
}

impl Debug for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Shape{}", self)
    }
}

impl Display for ConcreteShape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.dims.iter().join(" x "))
    }
}
