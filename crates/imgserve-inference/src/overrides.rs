//! Dot-path patching of YAML configuration trees
//!
//! Paths address nested mappings with `.` and sequence elements with `[N]`,
//! e.g. `Infer.transforms.[2].CropImage.size`. Values arrive as strings and
//! are converted to the type of the value they replace; new keys get a type
//! inferred from the literal.

use imgserve_core::{Error, Result};
use serde_yaml::{Mapping, Value};
use std::str::FromStr;
use tracing::debug;

/// A `PATH:VALUE` override
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub path: Vec<String>,
    pub value: String,
}

impl Override {
    pub fn new(path: &str, value: impl Into<String>) -> Self {
        Self {
            path: split_path(path),
            value: value.into(),
        }
    }
}

impl FromStr for Override {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (path, value) = s.split_once(':').ok_or_else(|| {
            Error::config(format!("expected PATH:VALUE for override, got: {}", s))
        })?;
        if path.is_empty() {
            return Err(Error::config(format!("empty path in override: {}", s)));
        }
        Ok(Self::new(path, value))
    }
}

/// Split a dot-notation path
pub fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

fn index_segment(segment: &str) -> Option<usize> {
    segment
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .and_then(|s| s.parse().ok())
}

fn child_mut<'a>(current: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match current {
        Value::Mapping(map) => map.get_mut(segment),
        Value::Sequence(seq) => index_segment(segment).and_then(|i| seq.get_mut(i)),
        _ => None,
    }
}

fn parse_bool(s: &str) -> bool {
    s.eq_ignore_ascii_case("true")
}

/// Infer a scalar from its literal form: bool, integer, float, then string
pub fn infer_scalar(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") {
        Value::Bool(parse_bool(raw))
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Number(i.into())
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Number(f.into())
    } else {
        Value::String(raw.to_string())
    }
}

fn convert_like(existing: &Value, raw: &str) -> Result<Value> {
    let invalid = |kind: &str| Error::config(format!("cannot convert '{}' to {}", raw, kind));

    let value = match existing {
        Value::Bool(_) => Value::Bool(parse_bool(raw)),
        Value::Number(n) if n.is_i64() || n.is_u64() => {
            Value::Number(raw.parse::<i64>().map_err(|_| invalid("an integer"))?.into())
        }
        Value::Number(_) => Value::Number(raw.parse::<f64>().map_err(|_| invalid("a float"))?.into()),
        Value::Sequence(items) => {
            let parts = raw.split(',').map(str::trim);
            let converted = match items.first() {
                Some(first @ (Value::Bool(_) | Value::Number(_))) => parts
                    .map(|p| convert_like(first, p))
                    .collect::<Result<Vec<_>>>()?,
                _ => parts.map(|p| Value::String(p.to_string())).collect(),
            };
            Value::Sequence(converted)
        }
        Value::Null => infer_scalar(raw),
        _ => Value::String(raw.to_string()),
    };
    Ok(value)
}

/// Set the value at `path`, creating the final key if it is missing
pub fn set_value(root: &mut Value, path: &[String], raw: &str) -> Result<()> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| Error::config("empty override path"))?;

    let mut current = root;
    for segment in parents {
        current = child_mut(current, segment).ok_or_else(|| {
            Error::config(format!("failed to locate path in config: {}", path.join(".")))
        })?;
    }

    if let Some(existing) = child_mut(current, last) {
        *existing = convert_like(existing, raw)?;
        return Ok(());
    }

    match current {
        Value::Mapping(map) => {
            debug!("Adding option: {}", path.join("."));
            map.insert(Value::String(last.clone()), infer_scalar(raw));
            Ok(())
        }
        Value::Null => {
            let mut map = Mapping::new();
            map.insert(Value::String(last.clone()), infer_scalar(raw));
            *current = Value::Mapping(map);
            Ok(())
        }
        _ => Err(Error::config(format!(
            "failed to locate path in config: {}",
            path.join(".")
        ))),
    }
}

/// Remove the value at `path`
pub fn remove_value(root: &mut Value, path: &[String]) -> Result<()> {
    let not_found = || {
        Error::config(format!(
            "failed to locate path in config, cannot remove: {}",
            path.join(".")
        ))
    };
    let (last, parents) = path.split_last().ok_or_else(not_found)?;

    let mut current = root;
    for segment in parents {
        current = child_mut(current, segment).ok_or_else(not_found)?;
    }

    let removed = match current {
        Value::Mapping(map) => map.remove(last.as_str()).is_some(),
        Value::Sequence(seq) => match index_segment(last) {
            Some(i) if i < seq.len() => {
                seq.remove(i);
                true
            }
            _ => false,
        },
        _ => false,
    };

    if removed {
        Ok(())
    } else {
        Err(not_found())
    }
}

/// Append `name` to `Infer.transforms` unless a transform of that name is present.
///
/// Returns whether the list was changed. Trees without `Infer.transforms`
/// are left alone.
pub fn ensure_transform(root: &mut Value, name: &str) -> bool {
    let Some(Value::Sequence(transforms)) = root
        .get_mut("Infer")
        .and_then(|infer| infer.get_mut("transforms"))
    else {
        return false;
    };

    let present = transforms
        .iter()
        .any(|t| t.as_mapping().is_some_and(|m| m.contains_key(name)) || t.as_str() == Some(name));
    if present {
        return false;
    }

    let mut entry = Mapping::new();
    entry.insert(Value::String(name.to_string()), Value::Mapping(Mapping::new()));
    transforms.push(Value::Mapping(entry));
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Value {
        serde_yaml::from_str(
            r#"
Global:
  epochs: 120
  use_visualdl: False
  learning_rate: 0.1
  output_dir: ./output/
Arch:
  name: ResNet50
  class_num: 1000
Infer:
  transforms:
    - DecodeImage:
        to_rgb: True
    - CropImage:
        size: 224
  PostProcess:
    topk: 5
    mean: [0.485, 0.456, 0.406]
    tags: [a, b]
"#,
        )
        .unwrap()
    }

    fn get<'a>(root: &'a Value, path: &str) -> &'a Value {
        let mut current = root;
        for segment in split_path(path) {
            current = match index_segment(&segment) {
                Some(i) => &current[i],
                None => &current[segment.as_str()],
            };
        }
        current
    }

    #[test]
    fn test_parse_override() {
        let o: Override = "Global.device:gpu:1".parse().unwrap();
        assert_eq!(o.path, vec!["Global", "device"]);
        assert_eq!(o.value, "gpu:1");

        assert!("no-separator".parse::<Override>().is_err());
        assert!(":value".parse::<Override>().is_err());
    }

    #[test]
    fn test_set_keeps_existing_types() {
        let mut root = tree();

        set_value(&mut root, &split_path("Global.epochs"), "10").unwrap();
        set_value(&mut root, &split_path("Global.use_visualdl"), "TRUE").unwrap();
        set_value(&mut root, &split_path("Global.learning_rate"), "0.01").unwrap();
        set_value(&mut root, &split_path("Arch.name"), "MobileNetV3").unwrap();

        assert_eq!(get(&root, "Global.epochs"), &Value::from(10));
        assert_eq!(get(&root, "Global.use_visualdl"), &Value::Bool(true));
        assert_eq!(get(&root, "Global.learning_rate"), &Value::from(0.01));
        assert_eq!(get(&root, "Arch.name"), &Value::from("MobileNetV3"));
    }

    #[test]
    fn test_set_list_by_element_type() {
        let mut root = tree();

        set_value(&mut root, &split_path("Infer.PostProcess.mean"), "0.5,0.5,0.5").unwrap();
        set_value(&mut root, &split_path("Infer.PostProcess.tags"), "x,y").unwrap();

        assert_eq!(
            get(&root, "Infer.PostProcess.mean"),
            &Value::Sequence(vec![0.5.into(), 0.5.into(), 0.5.into()])
        );
        assert_eq!(
            get(&root, "Infer.PostProcess.tags"),
            &Value::Sequence(vec!["x".into(), "y".into()])
        );
    }

    #[test]
    fn test_set_through_list_index() {
        let mut root = tree();
        set_value(&mut root, &split_path("Infer.transforms.[1].CropImage.size"), "256").unwrap();
        assert_eq!(get(&root, "Infer.transforms.[1].CropImage.size"), &Value::from(256));
    }

    #[test]
    fn test_set_adds_missing_key_with_inferred_type() {
        let mut root = tree();

        set_value(&mut root, &split_path("Infer.batch_size"), "8").unwrap();
        set_value(&mut root, &split_path("Infer.PostProcess.class_id_map_file"), "labels.txt").unwrap();
        set_value(&mut root, &split_path("Global.pretrained"), "false").unwrap();

        assert_eq!(get(&root, "Infer.batch_size"), &Value::from(8));
        assert_eq!(
            get(&root, "Infer.PostProcess.class_id_map_file"),
            &Value::from("labels.txt")
        );
        assert_eq!(get(&root, "Global.pretrained"), &Value::Bool(false));
    }

    #[test]
    fn test_set_missing_parent_fails() {
        let mut root = tree();
        let result = set_value(&mut root, &split_path("DataLoader.Train.dataset.name"), "x");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_set_bad_integer_fails() {
        let mut root = tree();
        assert!(set_value(&mut root, &split_path("Arch.class_num"), "many").is_err());
    }

    #[test]
    fn test_remove_value() {
        let mut root = tree();

        remove_value(&mut root, &split_path("Global.output_dir")).unwrap();
        remove_value(&mut root, &split_path("Infer.transforms.[0]")).unwrap();

        assert!(root["Global"].get("output_dir").is_none());
        assert_eq!(root["Infer"]["transforms"].as_sequence().unwrap().len(), 1);
        assert!(remove_value(&mut root, &split_path("Global.output_dir")).is_err());
    }

    #[test]
    fn test_ensure_transform() {
        let mut root = tree();

        assert!(ensure_transform(&mut root, "ToCHWImage"));
        assert!(!ensure_transform(&mut root, "ToCHWImage"));
        assert!(!ensure_transform(&mut root, "DecodeImage"));
        assert_eq!(root["Infer"]["transforms"].as_sequence().unwrap().len(), 3);

        let mut no_infer: Value = serde_yaml::from_str("Global: {}").unwrap();
        assert!(!ensure_transform(&mut no_infer, "ToCHWImage"));
    }
}
