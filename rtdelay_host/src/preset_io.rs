use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use rtdelay_shared::DelayPreset;

pub fn load_preset_file(path: &Path) -> Result<DelayPreset, anyhow::Error> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read preset {}", path.display()))?;
    let preset: DelayPreset = serde_json::from_str(&content)
        .with_context(|| format!("Invalid preset {}", path.display()))?;
    log::debug!(
        "Loaded preset {}: {} FF taps, {} FB taps",
        path.display(),
        preset.feedforward.len(),
        preset.feedback.len()
    );
    Ok(preset)
}

pub fn save_preset_file(preset: &DelayPreset, path: &Path) -> Result<(), anyhow::Error> {
    let json = serde_json::to_string_pretty(preset)?;
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create preset {}", path.display()))?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtdelay_shared::TapParams;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slapback.json");
        let preset = DelayPreset {
            dry_amp: 0.8,
            output_amp: 0.9,
            feedforward: vec![TapParams::new(4410, 0.5)],
            feedback: vec![TapParams::new(8820, -0.3), TapParams::new(0, 0.0)],
        };

        save_preset_file(&preset, &path).unwrap();
        assert_eq!(load_preset_file(&path).unwrap(), preset);
    }

    #[test]
    fn test_partial_preset_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "dry_amp": 0.5, "feedforward": [{ "delay": 10, "amp": 0.25 }] }"#).unwrap();

        let preset = load_preset_file(&path).unwrap();
        assert_eq!(preset.dry_amp, 0.5);
        assert_eq!(preset.output_amp, 1.0);
        assert!(preset.feedback.is_empty());
    }

    #[test]
    fn test_malformed_preset_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_preset_file(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
