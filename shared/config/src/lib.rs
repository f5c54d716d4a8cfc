use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Dotted key path the trainer reads the pretrained checkpoint from.
pub const PRETRAIN_MODEL_KEY: &str = "options.Training.pretrain_model_load_path";

const UPDATED_SUFFIX: &str = "_updated.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config {0} doesn't have a valid utf-8 file name")]
    InvalidFileName(PathBuf),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Load the user config, point the trainer at `model_checkpoint` unless the
/// user already set a checkpoint, and write the result next to the current
/// working directory as `<file_name>_updated.yaml`.
///
/// The input file is never modified, and no key other than
/// [`PRETRAIN_MODEL_KEY`] is inspected.
pub fn materialize(
    user_config_path: &Path,
    model_checkpoint: &Path,
) -> Result<PathBuf, ConfigError> {
    materialize_in(user_config_path, model_checkpoint, Path::new("."))
}

/// Same as [`materialize`], with an explicit output directory.
pub fn materialize_in(
    user_config_path: &Path,
    model_checkpoint: &Path,
    out_dir: &Path,
) -> Result<PathBuf, ConfigError> {
    let raw = std::fs::read_to_string(user_config_path).map_err(|source| ConfigError::Read {
        path: user_config_path.to_path_buf(),
        source,
    })?;
    let mut conf: Value = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: user_config_path.to_path_buf(),
        source,
    })?;

    match select(&conf, PRETRAIN_MODEL_KEY) {
        Some(existing) if !is_unset(existing) => {
            debug!(
                key = PRETRAIN_MODEL_KEY,
                "Checkpoint path already set by user, leaving it untouched"
            );
        }
        _ => {
            upsert(
                &mut conf,
                PRETRAIN_MODEL_KEY,
                Value::from(model_checkpoint.to_string_lossy().into_owned()),
            );
            debug!(
                key = PRETRAIN_MODEL_KEY,
                checkpoint = %model_checkpoint.display(),
                "Applied downloaded checkpoint path to config"
            );
        }
    }

    let basename = user_config_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ConfigError::InvalidFileName(user_config_path.to_path_buf()))?;
    let updated_path = out_dir.join(format!("{basename}{UPDATED_SUFFIX}"));
    let serialized = serde_yaml::to_string(&conf)?;
    std::fs::write(&updated_path, serialized).map_err(|source| ConfigError::Write {
        path: updated_path.clone(),
        source,
    })?;
    Ok(updated_path)
}

/// Walk a dotted key path through nested mappings.
pub fn select<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for key in path.split('.') {
        node = node.get(key)?;
    }
    Some(node)
}

/// Set a dotted key path, force-creating intermediate mappings. A non-mapping
/// value sitting where an intermediate level is needed gets replaced.
pub fn upsert(root: &mut Value, path: &str, value: Value) {
    if root.as_mapping().is_none() {
        *root = Value::Mapping(Mapping::new());
    }
    if let Some(map) = root.as_mapping_mut() {
        let keys: Vec<&str> = path.split('.').collect();
        upsert_into(map, &keys, value);
    }
}

fn upsert_into(map: &mut Mapping, keys: &[&str], value: Value) {
    match keys {
        [] => {}
        [last] => {
            map.insert(Value::from(*last), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry(Value::from(*head))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            if entry.as_mapping().is_none() {
                *entry = Value::Mapping(Mapping::new());
            }
            if let Some(child) = entry.as_mapping_mut() {
                upsert_into(child, rest, value);
            }
        }
    }
}

// OmegaConf-style falsy check: null and empty string both count as unset.
fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).expect("write config");
        path
    }

    fn load(path: &Path) -> Value {
        serde_yaml::from_str(&std::fs::read_to_string(path).expect("read output"))
            .expect("parse output")
    }

    #[test]
    fn sets_checkpoint_when_branch_exists_but_key_is_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_config(dir.path(), "finetune.yaml", "options:\n  Training: {}\n");

        let out = materialize_in(&input, Path::new("/cache/model.ckpt"), dir.path())
            .expect("materialize");
        let conf = load(&out);
        assert_eq!(
            select(&conf, PRETRAIN_MODEL_KEY),
            Some(&Value::from("/cache/model.ckpt"))
        );
    }

    #[test]
    fn creates_missing_intermediate_mappings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_config(dir.path(), "bare.yaml", "network:\n  hidden_dim: 256\n");

        let out = materialize_in(&input, Path::new("/cache/model.ckpt"), dir.path())
            .expect("materialize");
        let conf = load(&out);
        assert_eq!(
            select(&conf, PRETRAIN_MODEL_KEY),
            Some(&Value::from("/cache/model.ckpt"))
        );
        // Siblings pass through untouched.
        assert_eq!(select(&conf, "network.hidden_dim"), Some(&Value::from(256)));
    }

    #[test]
    fn preserves_a_user_supplied_checkpoint_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_config(
            dir.path(),
            "custom.yaml",
            "options:\n  Training:\n    pretrain_model_load_path: /my/own.ckpt\n",
        );

        let out = materialize_in(&input, Path::new("/cache/model.ckpt"), dir.path())
            .expect("materialize");
        let conf = load(&out);
        assert_eq!(
            select(&conf, PRETRAIN_MODEL_KEY),
            Some(&Value::from("/my/own.ckpt"))
        );
    }

    #[test]
    fn empty_string_counts_as_unset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_config(
            dir.path(),
            "empty.yaml",
            "options:\n  Training:\n    pretrain_model_load_path: \"\"\n",
        );

        let out = materialize_in(&input, Path::new("/cache/model.ckpt"), dir.path())
            .expect("materialize");
        let conf = load(&out);
        assert_eq!(
            select(&conf, PRETRAIN_MODEL_KEY),
            Some(&Value::from("/cache/model.ckpt"))
        );
    }

    #[test]
    fn output_name_keeps_the_full_input_file_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_config(dir.path(), "finetune-example.yaml", "options: {}\n");

        let out = materialize_in(&input, Path::new("/cache/model.ckpt"), dir.path())
            .expect("materialize");
        assert_eq!(
            out.file_name().and_then(|n| n.to_str()),
            Some("finetune-example.yaml_updated.yaml")
        );
        // The input itself stays untouched.
        assert_eq!(
            std::fs::read_to_string(&input).expect("reread input"),
            "options: {}\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_file_name_is_rejected() {
        use std::os::unix::ffi::OsStringExt;

        let dir = tempfile::tempdir().expect("tempdir");
        // "fo\x80.yaml" — valid OS path, no UTF-8 representation.
        let name = std::ffi::OsString::from_vec(b"fo\x80.yaml".to_vec());
        let input = dir.path().join(name);
        std::fs::write(&input, "options: {}\n").expect("write config");

        let err = materialize_in(&input, Path::new("/cache/model.ckpt"), dir.path())
            .expect_err("non-utf8 file name must be rejected");
        assert!(matches!(err, ConfigError::InvalidFileName(_)));
    }

    #[test]
    fn upsert_replaces_a_scalar_sitting_on_the_path() {
        let mut conf: Value = serde_yaml::from_str("options: 3\n").expect("parse");
        upsert(&mut conf, "options.Training.x", Value::from(1));
        assert_eq!(select(&conf, "options.Training.x"), Some(&Value::from(1)));
    }
}
