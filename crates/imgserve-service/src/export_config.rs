//! Export an inference config template with values patched in

use crate::cli::ExportConfigArgs;
use anyhow::{bail, Context, Result};
use imgserve_inference::overrides::{ensure_transform, remove_value, set_value, split_path};
use serde_yaml::Value;
use tracing::info;

/// Load `args.input`, apply the requested changes, write `args.output`
pub fn export(args: &ExportConfigArgs) -> Result<()> {
    if !args.input.is_file() {
        bail!("Config file not found: {}", args.input.display());
    }

    info!("Loading config from: {}", args.input.display());
    let content = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let mut config: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", args.input.display()))?;

    apply(&mut config, args)?;

    info!("Saving config to: {}", args.output.display());
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&args.output, serde_yaml::to_string(&config)?)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    Ok(())
}

fn apply(config: &mut Value, args: &ExportConfigArgs) -> Result<()> {
    if let Some(label_map) = &args.label_map {
        set_value(
            config,
            &split_path("Infer.PostProcess.class_id_map_file"),
            &label_map.to_string_lossy(),
        )?;
    }

    if !args.no_force_chw && ensure_transform(config, "ToCHWImage") {
        info!("Appended ToCHWImage to Infer.transforms");
    }

    // Zero classes means "not given"
    if let Some(num_classes) = args.num_classes.filter(|n| *n > 0) {
        set_value(config, &split_path("Arch.class_num"), &num_classes.to_string())?;
    }

    for o in &args.additional {
        set_value(config, &o.path, &o.value)?;
    }

    for path in &args.remove {
        remove_value(config, &split_path(path))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    const TEMPLATE: &str = r#"
Global:
  epochs: 120
  output_dir: ./output/
Arch:
  name: ResNet50
  class_num: 1000
Infer:
  batch_size: 10
  transforms:
    - DecodeImage:
        to_rgb: True
    - NormalizeImage:
        scale: 1.0/255.0
  PostProcess:
    name: Topk
"#;

    fn args(input: &Path, output: PathBuf) -> ExportConfigArgs {
        ExportConfigArgs {
            input: input.to_path_buf(),
            output,
            label_map: None,
            num_classes: None,
            additional: Vec::new(),
            remove: Vec::new(),
            no_force_chw: false,
            verbose: false,
        }
    }

    fn read(path: &Path) -> Value {
        serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_export_applies_changes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("template.yaml");
        std::fs::write(&input, TEMPLATE).unwrap();
        let output = dir.path().join("nested").join("exported.yaml");

        let mut args = args(&input, output.clone());
        args.label_map = Some(PathBuf::from("/data/labels.txt"));
        args.num_classes = Some(5);
        args.additional = vec!["Infer.batch_size:2".parse().unwrap()];
        args.remove = vec!["Global.output_dir".to_string()];

        export(&args).unwrap();
        let config = read(&output);

        assert_eq!(config["Arch"]["class_num"], Value::from(5));
        assert_eq!(config["Infer"]["batch_size"], Value::from(2));
        assert_eq!(
            config["Infer"]["PostProcess"]["class_id_map_file"],
            Value::from("/data/labels.txt")
        );
        assert!(config["Global"].get("output_dir").is_none());

        let transforms = config["Infer"]["transforms"].as_sequence().unwrap();
        assert_eq!(transforms.len(), 3);
        assert!(transforms[2].get("ToCHWImage").is_some());
    }

    #[test]
    fn test_no_force_chw() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("template.yaml");
        std::fs::write(&input, TEMPLATE).unwrap();
        let output = dir.path().join("exported.yaml");

        let mut args = args(&input, output.clone());
        args.no_force_chw = true;
        args.num_classes = Some(0);

        export(&args).unwrap();
        let config = read(&output);

        assert_eq!(config["Infer"]["transforms"].as_sequence().unwrap().len(), 2);
        assert_eq!(config["Arch"]["class_num"], Value::from(1000));
    }

    #[test]
    fn test_missing_input_and_bad_paths() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("exported.yaml");
        assert!(export(&args(&dir.path().join("missing.yaml"), output.clone())).is_err());

        let input = dir.path().join("template.yaml");
        std::fs::write(&input, TEMPLATE).unwrap();
        let mut bad_remove = args(&input, output.clone());
        bad_remove.remove = vec!["Global.nope".to_string()];
        assert!(export(&bad_remove).is_err());
        assert!(!output.exists());
    }
}
