//! Named traversal of module parameters.
//!
//! Burn identifies parameters by [`ParamId`](burn::module::ParamId) only; checkpoints and layer
//! freezing address them by dotted path instead (`pre.weight`, `kps.0.bias`, ...). Modules that
//! take part in either implement [`NamedParams`] and report each parameter under its path.

use burn::module::Param;
use burn::nn::conv::Conv2d;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Read-only callback invoked once per named parameter.
pub trait ParamVisitor<B: Backend> {
    fn visit<const D: usize>(&mut self, name: &str, param: &Param<Tensor<B, D>>);
}

/// Callback that may replace a named parameter.
pub trait ParamMapper<B: Backend> {
    fn map<const D: usize>(&mut self, name: &str, param: Param<Tensor<B, D>>)
        -> Param<Tensor<B, D>>;
}

pub trait NamedParams<B: Backend>: Sized {
    fn visit_params<V: ParamVisitor<B>>(&self, prefix: &str, visitor: &mut V);

    fn map_params<M: ParamMapper<B>>(self, prefix: &str, mapper: &mut M) -> Self;
}

/// Join a parent path and a child attribute with `.`; an empty parent yields the child.
pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

impl<B: Backend> NamedParams<B> for Conv2d<B> {
    fn visit_params<V: ParamVisitor<B>>(&self, prefix: &str, visitor: &mut V) {
        visitor.visit(&join(prefix, "weight"), &self.weight);
        if let Some(bias) = &self.bias {
            visitor.visit(&join(prefix, "bias"), bias);
        }
    }

    fn map_params<M: ParamMapper<B>>(mut self, prefix: &str, mapper: &mut M) -> Self {
        self.weight = mapper.map(&join(prefix, "weight"), self.weight);
        self.bias = self
            .bias
            .map(|bias| mapper.map(&join(prefix, "bias"), bias));
        self
    }
}

impl<B: Backend, T: NamedParams<B>> NamedParams<B> for Vec<T> {
    fn visit_params<V: ParamVisitor<B>>(&self, prefix: &str, visitor: &mut V) {
        for (idx, item) in self.iter().enumerate() {
            item.visit_params(&join(prefix, &idx.to_string()), visitor);
        }
    }

    fn map_params<M: ParamMapper<B>>(self, prefix: &str, mapper: &mut M) -> Self {
        self.into_iter()
            .enumerate()
            .map(|(idx, item)| item.map_params(&join(prefix, &idx.to_string()), mapper))
            .collect()
    }
}

/// Collects `(name, shape)` for every parameter in traversal order.
#[derive(Debug, Default)]
pub struct ParamShapes {
    pub entries: Vec<(String, Vec<usize>)>,
}

impl<B: Backend> ParamVisitor<B> for ParamShapes {
    fn visit<const D: usize>(&mut self, name: &str, param: &Param<Tensor<B, D>>) {
        self.entries.push((name.to_string(), param.val().dims().to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_skips_empty_prefix() {
        assert_eq!(join("", "weight"), "weight");
        assert_eq!(join("module.model", "pre"), "module.model.pre");
    }
}
