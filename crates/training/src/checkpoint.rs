//! Named-parameter checkpoints: safetensors files, key migration, and load planning.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Param;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use models::{NamedParams, ParamMapper, ParamShapes, ParamVisitor};
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use tracing::{debug, info};

use crate::error::{NnetError, NnetResult};

/// Prefix that lifts model-level keys to network level (data-parallel wrapper, then `model`).
pub const NETWORK_PREFIX: &str = "module.model.";
const FORMAT_KEY: &str = "format";
const FORMAT: &str = "nnet";

/// Flattened parameter values with their shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ParamTensor {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

pub type StateDict = BTreeMap<String, ParamTensor>;

pub fn add_prefix(dict: StateDict, prefix: &str) -> StateDict {
    dict.into_iter()
        .map(|(key, tensor)| (format!("{prefix}{key}"), tensor))
        .collect()
}

/// Removes `prefix` from keys that carry it; other keys pass through unchanged.
pub fn strip_prefix(dict: StateDict, prefix: &str) -> StateDict {
    dict.into_iter()
        .map(|(key, tensor)| match key.strip_prefix(prefix) {
            Some(rest) => (rest.to_string(), tensor),
            None => (key, tensor),
        })
        .collect()
}

pub fn exclude_matching(dict: StateDict, pattern: &str) -> StateDict {
    dict.into_iter()
        .filter(|(key, _)| !key.contains(pattern))
        .collect()
}

/// Model-level pretrained weights to network-level keys, minus anything matching `exclude`.
pub fn crop_pretrained(dict: StateDict, exclude: &str) -> StateDict {
    add_prefix(exclude_matching(dict, exclude), NETWORK_PREFIX)
}

/// Checks that `dict` can be loaded into parameters with the `expected` names and shapes.
///
/// Strict loads require the key sets to match exactly. Every key present on both sides must
/// agree on shape regardless of mode.
pub fn check_load(
    expected: &[(String, Vec<usize>)],
    dict: &StateDict,
    strict: bool,
) -> NnetResult<()> {
    if strict {
        let names: BTreeSet<&str> = expected.iter().map(|(name, _)| name.as_str()).collect();
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !dict.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        let unexpected: Vec<String> = dict
            .keys()
            .filter(|key| !names.contains(key.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(NnetError::KeyMismatch {
                missing,
                unexpected,
            });
        }
    }
    for (name, shape) in expected {
        if let Some(tensor) = dict.get(name) {
            if &tensor.shape != shape || tensor.values.len() != tensor.numel() {
                return Err(NnetError::ShapeMismatch {
                    name: name.clone(),
                    expected: shape.clone(),
                    found: tensor.shape.clone(),
                });
            }
        }
    }
    Ok(())
}

/// `template` with its `{}` placeholder replaced by `iteration`.
pub fn snapshot_path(template: &str, iteration: u64) -> PathBuf {
    PathBuf::from(template.replace("{}", &iteration.to_string()))
}

pub fn save_state_dict(path: &Path, dict: &StateDict) -> NnetResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| NnetError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let format_err = |msg: String| NnetError::Format {
        path: path.to_path_buf(),
        msg,
    };

    let bytes: Vec<(&str, &[usize], Vec<u8>)> = dict
        .iter()
        .map(|(name, tensor)| {
            let raw = tensor.values.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.as_str(), tensor.shape.as_slice(), raw)
        })
        .collect();
    let views = bytes
        .iter()
        .map(|(name, shape, raw)| {
            TensorView::new(Dtype::F32, shape.to_vec(), raw)
                .map(|view| (*name, view))
                .map_err(|e| format_err(format!("tensor `{name}`: {e}")))
        })
        .collect::<NnetResult<Vec<_>>>()?;

    let metadata = HashMap::from([(FORMAT_KEY.to_string(), FORMAT.to_string())]);
    let encoded = safetensors::serialize(views, Some(metadata))
        .map_err(|e| format_err(format!("serialization failed: {e}")))?;
    fs::write(path, encoded).map_err(|source| NnetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), tensors = dict.len(), "wrote checkpoint");
    Ok(())
}

pub fn load_state_dict(path: &Path) -> NnetResult<StateDict> {
    let raw = fs::read(path).map_err(|source| NnetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let format_err = |msg: String| NnetError::Format {
        path: path.to_path_buf(),
        msg,
    };
    let tensors = SafeTensors::deserialize(&raw)
        .map_err(|e| format_err(format!("not a safetensors file: {e}")))?;

    let mut dict = StateDict::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(format_err(format!(
                "tensor `{name}` has dtype {:?}, expected F32",
                view.dtype()
            )));
        }
        let values = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        dict.insert(
            name,
            ParamTensor {
                shape: view.shape().to_vec(),
                values,
            },
        );
    }
    debug!(path = %path.display(), tensors = dict.len(), "read checkpoint");
    Ok(dict)
}

/// Names and shapes of every parameter under `prefix`.
pub fn param_shapes<B: Backend, M: NamedParams<B>>(
    module: &M,
    prefix: &str,
) -> Vec<(String, Vec<usize>)> {
    let mut shapes = ParamShapes::default();
    module.visit_params(prefix, &mut shapes);
    shapes.entries
}

struct Reader {
    dict: StateDict,
    error: Option<NnetError>,
}

impl<B: Backend> ParamVisitor<B> for Reader {
    fn visit<const D: usize>(&mut self, name: &str, param: &Param<Tensor<B, D>>) {
        if self.error.is_some() {
            return;
        }
        let tensor = param.val();
        let shape = tensor.dims().to_vec();
        match tensor.into_data().convert::<f32>().to_vec::<f32>() {
            Ok(values) => {
                self.dict
                    .insert(name.to_string(), ParamTensor { shape, values });
            }
            Err(e) => {
                self.error = Some(NnetError::Data {
                    name: name.to_string(),
                    msg: format!("{e:?}"),
                })
            }
        }
    }
}

/// Snapshot of every parameter of `module`, keyed under `prefix`.
pub fn read_params<B: Backend, M: NamedParams<B>>(
    module: &M,
    prefix: &str,
) -> NnetResult<StateDict> {
    let mut reader = Reader {
        dict: StateDict::new(),
        error: None,
    };
    module.visit_params(prefix, &mut reader);
    match reader.error {
        Some(err) => Err(err),
        None => Ok(reader.dict),
    }
}

struct Writer<'a> {
    dict: &'a StateDict,
    loaded: usize,
}

impl<B: Backend> ParamMapper<B> for Writer<'_> {
    fn map<const D: usize>(
        &mut self,
        name: &str,
        param: Param<Tensor<B, D>>,
    ) -> Param<Tensor<B, D>> {
        let Some(source) = self.dict.get(name) else {
            return param;
        };
        let current = param.val();
        let require_grad = current.is_require_grad();
        let data = TensorData::new(source.values.clone(), source.shape.clone());
        let tensor =
            Tensor::<B, D>::from_data(data, &current.device()).set_require_grad(require_grad);
        self.loaded += 1;
        Param::initialized(param.id, tensor)
    }
}

/// Copies matching entries of `dict` into `module`, keeping each parameter's id and gradient flag.
///
/// The whole dictionary is checked before any parameter is touched; see [`check_load`].
pub fn write_params<B: Backend, M: NamedParams<B>>(
    module: M,
    prefix: &str,
    dict: &StateDict,
    strict: bool,
) -> NnetResult<M> {
    check_load(&param_shapes(&module, prefix), dict, strict)?;
    let mut writer = Writer { dict, loaded: 0 };
    let module = module.map_params(prefix, &mut writer);
    info!(loaded = writer.loaded, available = dict.len(), strict, "loaded parameters");
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(shape: &[usize]) -> ParamTensor {
        let numel = shape.iter().product();
        ParamTensor {
            shape: shape.to_vec(),
            values: (0..numel).map(|v| v as f32).collect(),
        }
    }

    fn sample() -> StateDict {
        StateDict::from([
            ("module.pre.weight".to_string(), tensor(&[2, 3])),
            ("module.tl_heats.weight".to_string(), tensor(&[1, 2])),
            ("module.tl_tags.bias".to_string(), tensor(&[1])),
        ])
    }

    #[test]
    fn crop_drops_heads_and_lifts_keys() {
        let cropped = crop_pretrained(sample(), "heats");
        let keys: Vec<_> = cropped.keys().cloned().collect();
        assert_eq!(
            keys,
            vec!["module.model.module.pre.weight", "module.model.module.tl_tags.bias"]
        );
    }

    #[test]
    fn strip_prefix_inverts_add_prefix() {
        let dict = sample();
        let lifted = add_prefix(dict.clone(), NETWORK_PREFIX);
        assert_eq!(strip_prefix(lifted, NETWORK_PREFIX), dict);
    }

    #[test]
    fn strict_load_reports_missing_and_unexpected() {
        let expected = vec![
            ("module.pre.weight".to_string(), vec![2, 3]),
            ("module.kps.0.weight".to_string(), vec![4]),
        ];
        match check_load(&expected, &sample(), true) {
            Err(NnetError::KeyMismatch { missing, unexpected }) => {
                assert_eq!(missing, vec!["module.kps.0.weight"]);
                assert_eq!(unexpected.len(), 2);
            }
            other => panic!("expected key mismatch, got {other:?}"),
        }
        assert!(check_load(&expected, &sample(), false).is_ok());
    }

    #[test]
    fn shape_mismatch_fails_in_both_modes() {
        let expected = vec![("module.pre.weight".to_string(), vec![3, 2])];
        for strict in [true, false] {
            let dict = exclude_matching(exclude_matching(sample(), "heats"), "tags");
            assert!(matches!(
                check_load(&expected, &dict, strict),
                Err(NnetError::ShapeMismatch { .. })
            ));
        }
    }

    #[test]
    fn snapshot_template_takes_iteration() {
        assert_eq!(
            snapshot_path("cache/nnet/CenterNet-52/CenterNet-52_{}.safetensors", 500),
            PathBuf::from("cache/nnet/CenterNet-52/CenterNet-52_500.safetensors")
        );
    }

    #[test]
    fn safetensors_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/snap_1.safetensors");
        save_state_dict(&path, &sample()).unwrap();
        assert_eq!(load_state_dict(&path).unwrap(), sample());
    }

    #[test]
    fn garbage_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.safetensors");
        fs::write(&path, b"not a checkpoint").unwrap();
        assert!(matches!(
            load_state_dict(&path),
            Err(NnetError::Format { .. })
        ));
    }
}
