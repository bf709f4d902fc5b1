use std::collections::HashMap;

use itertools::Itertools;

use crate::graph::Value;
use crate::onnx::proto::attribute_proto::AttributeType;
use crate::onnx::proto::{AttributeProto, TensorProto};
use crate::onnx::result::{Node, OnnxError, OnnxResult};
use crate::onnx::typed_value::OnnxValue;

/// The operands of a single onnx node.
/// Every operand can only be taken once, so leftover operands can be detected afterwards.
#[derive(Debug)]
pub struct Inputs<'a> {
    node: Node<&'a str>,
    inner: Vec<Storage<&'a OnnxValue>>,
}

#[derive(Debug)]
enum Storage<T> {
    Missing,
    Used,
    Present(T),
}

impl<'a> Inputs<'a> {
    pub fn from(node: Node<&'a str>, inputs: &'a [String], nodes: &'a HashMap<&str, OnnxValue>) -> OnnxResult<Self> {
        let inner = inputs
            .iter()
            .enumerate()
            .map(|(i, name)| {
                // an empty name means the input is missing (which is only allowed for optional inputs)
                if name.is_empty() {
                    Ok(Storage::Missing)
                } else {
                    let value = nodes
                        .get(name.as_str())
                        .ok_or_else(|| OnnxError::InputNodeDoesNotExist(node.to_owned(), i, name.clone()))?;
                    Ok(Storage::Present(value))
                }
            })
            .collect::<OnnxResult<Vec<_>>>()?;

        Ok(Inputs { node, inner })
    }

    pub fn required(&mut self, index: usize) -> OnnxResult<&'a OnnxValue> {
        self.optional(index)?
            .ok_or_else(|| OnnxError::MissingInput(self.node.to_owned(), index, self.inner.len()))
    }

    /// Take a required operand that must be a float tensor.
    pub fn value(&mut self, index: usize) -> OnnxResult<Value> {
        self.required(index)?
            .unwrap_value()
            .ok_or_else(|| OnnxError::ExpectedFloatOperand(self.node.to_owned(), index))
    }

    pub fn optional(&mut self, index: usize) -> OnnxResult<Option<&'a OnnxValue>> {
        match self.take(index) {
            Storage::Present(value) => Ok(Some(value)),
            Storage::Missing => Ok(None),
            Storage::Used => Err(OnnxError::InputAlreadyUsed(self.node.to_owned(), index)),
        }
    }

    pub fn optional_value(&mut self, index: usize) -> OnnxResult<Option<Value>> {
        match self.optional(index)? {
            None => Ok(None),
            Some(value) => value
                .unwrap_value()
                .map(Some)
                .ok_or_else(|| OnnxError::ExpectedFloatOperand(self.node.to_owned(), index)),
        }
    }

    pub fn take_all_variadic(&mut self) -> OnnxResult<Vec<&'a OnnxValue>> {
        (0..self.inner.len()).map(|i| self.required(i)).collect()
    }

    pub fn leftover(&self) -> Vec<usize> {
        self.inner
            .iter()
            .positions(|x| matches!(x, Storage::Present(_)))
            .collect()
    }

    fn take(&mut self, index: usize) -> Storage<&'a OnnxValue> {
        match self.inner.get(index) {
            None | Some(Storage::Missing) => Storage::Missing,
            Some(Storage::Used) => Storage::Used,
            Some(&Storage::Present(value)) => {
                self.inner[index] = Storage::Used;
                Storage::Present(value)
            }
        }
    }
}

/// The attributes of a single onnx node, taken out one by one like [Inputs].
#[derive(Debug)]
pub struct Attributes<'a> {
    node: Node<&'a str>,
    inner: HashMap<&'a str, &'a AttributeProto>,
}

impl<'a> Attributes<'a> {
    pub fn from(node: Node<&'a str>, attrs: &'a [AttributeProto]) -> Self {
        let inner = attrs.iter().map(|a| (a.name.as_str(), a)).collect();
        Attributes { node, inner }
    }

    pub fn maybe_take(&mut self, key: &str, ty: AttributeType) -> OnnxResult<Option<&'a AttributeProto>> {
        match self.inner.remove(key) {
            None => Ok(None),
            Some(attribute) => {
                let actual = attribute.r#type();
                if actual == ty {
                    Ok(Some(attribute))
                } else {
                    Err(OnnxError::UnexpectedAttributeType(
                        self.node.to_owned(),
                        key.to_owned(),
                        ty,
                        actual,
                    ))
                }
            }
        }
    }

    pub fn take(&mut self, key: &str, ty: AttributeType) -> OnnxResult<&'a AttributeProto> {
        self.maybe_take(key, ty)?.ok_or_else(|| {
            let available = self.inner.keys().map(|&k| k.to_owned()).sorted().collect_vec();
            OnnxError::MissingAttribute(self.node.to_owned(), key.to_owned(), ty, available)
        })
    }

    pub fn maybe_take_string(&mut self, key: &str) -> OnnxResult<Option<&'a str>> {
        let node = self.node;
        self.maybe_take(key, AttributeType::String)?
            .map(|a| {
                std::str::from_utf8(&a.s)
                    .map_err(|e| OnnxError::InvalidOperationArgs(node.to_owned(), format!("attribute {}: {}", key, e)))
            })
            .transpose()
    }

    pub fn maybe_take_int(&mut self, key: &str) -> OnnxResult<Option<i64>> {
        Ok(self.maybe_take(key, AttributeType::Int)?.map(|a| a.i))
    }

    pub fn take_int(&mut self, key: &str) -> OnnxResult<i64> {
        Ok(self.take(key, AttributeType::Int)?.i)
    }

    pub fn maybe_take_bool(&mut self, key: &str) -> OnnxResult<Option<bool>> {
        match self.maybe_take_int(key)? {
            None => Ok(None),
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            Some(i) => Err(OnnxError::InvalidAttributeBool(self.node.to_owned(), key.to_owned(), i)),
        }
    }

    pub fn maybe_take_ints(&mut self, key: &str) -> OnnxResult<Option<&'a [i64]>> {
        Ok(self.maybe_take(key, AttributeType::Ints)?.map(|a| &*a.ints))
    }

    pub fn take_ints(&mut self, key: &str) -> OnnxResult<&'a [i64]> {
        Ok(&self.take(key, AttributeType::Ints)?.ints)
    }

    pub fn maybe_take_float(&mut self, key: &str) -> OnnxResult<Option<f32>> {
        Ok(self.maybe_take(key, AttributeType::Float)?.map(|a| a.f))
    }

    pub fn take_tensor(&mut self, key: &str) -> OnnxResult<&'a TensorProto> {
        let attribute = self.take(key, AttributeType::Tensor)?;
        attribute.t.as_ref().ok_or(OnnxError::MissingProtoField("attribute.t"))
    }

    pub fn leftover(&self) -> Vec<String> {
        self.inner.keys().map(|&s| s.to_owned()).sorted().collect()
    }
}
