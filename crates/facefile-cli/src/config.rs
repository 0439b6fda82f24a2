use anyhow::{bail, Context, Result};
use facefile_core::compress::CompressionSettings;
use facefile_core::embedder::{EmbeddingVerifier, FaceEmbedder, DEFAULT_VERIFY_THRESHOLD};
use facefile_core::matcher::DEFAULT_MATCH_THRESHOLD;
use facefile_core::{CaptureSettings, CommandVerifier, Verifier};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Which verification backend compares faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierBackend {
    /// Local ONNX embedding model.
    Onnx,
    /// External program printing a JSON verdict.
    Command,
}

impl std::str::FromStr for VerifierBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "command" => Ok(Self::Command),
            other => Err(format!("unknown verifier backend: {other}")),
        }
    }
}

/// Runtime configuration: defaults, then the TOML file, then `FACEFILE_*`
/// environment variables. CLI flags are applied by the caller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the `user_<n>` directory tree.
    pub gallery_root: PathBuf,
    /// Where probes are staged while being matched.
    pub staging_dir: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Frames discarded after streaming starts.
    pub warmup_frames: usize,
    /// Matcher distance cutoff (strict).
    pub match_threshold: f32,
    pub compression: CompressionSettings,
    pub compress_new_identity: bool,
    pub verifier: VerifierBackend,
    /// ONNX embedding model for the `onnx` backend.
    pub model_path: PathBuf,
    /// Cosine distance at or below which the `onnx` backend verifies a pair.
    pub verify_threshold: f32,
    /// Program for the `command` backend.
    pub verifier_command: Option<String>,
    pub verifier_args: Vec<String>,
    /// Model name passed to the `command` backend.
    pub verifier_model: String,
    pub enforce_detection: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            gallery_root: data_dir.join("gallery"),
            staging_dir: std::env::temp_dir(),
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            warmup_frames: 4,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            compression: CompressionSettings::default(),
            compress_new_identity: false,
            verifier: VerifierBackend::Onnx,
            model_path: data_dir.join("models/facenet512.onnx"),
            verify_threshold: DEFAULT_VERIFY_THRESHOLD,
            verifier_command: None,
            verifier_args: Vec::new(),
            verifier_model: "Facenet512".to_string(),
            enforce_detection: false,
        }
    }
}

/// On-disk layout of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    gallery: Option<PathBuf>,
    staging_dir: Option<PathBuf>,
    match_threshold: Option<f32>,
    compress_new_identity: Option<bool>,
    camera: CameraSection,
    compression: CompressionSection,
    verifier: VerifierSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CameraSection {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    warmup_frames: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CompressionSection {
    target_size_kb: Option<usize>,
    start_quality: Option<u8>,
    quality_step: Option<u8>,
    min_quality: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct VerifierSection {
    backend: Option<VerifierBackend>,
    model_path: Option<PathBuf>,
    verify_threshold: Option<f32>,
    command: Option<String>,
    args: Option<Vec<String>>,
    model: Option<String>,
    enforce_detection: Option<bool>,
}

impl Config {
    /// Load configuration. An explicit `path` must exist; otherwise the
    /// default `config.toml` is read only if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Some(default_config_path()).filter(|p| p.is_file()),
        };
        if let Some(file) = file {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading config {}", file.display()))?;
            config
                .apply_toml(&text)
                .with_context(|| format!("parsing config {}", file.display()))?;
            tracing::debug!(path = %file.display(), "config file loaded");
        }

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_toml(&mut self, text: &str) -> Result<()> {
        let file: FileConfig = toml::from_str(text)?;

        set(&mut self.gallery_root, file.gallery);
        set(&mut self.staging_dir, file.staging_dir);
        set(&mut self.match_threshold, file.match_threshold);
        set(&mut self.compress_new_identity, file.compress_new_identity);

        set(&mut self.camera_device, file.camera.device);
        set(&mut self.frame_width, file.camera.width);
        set(&mut self.frame_height, file.camera.height);
        set(&mut self.warmup_frames, file.camera.warmup_frames);

        if let Some(kb) = file.compression.target_size_kb {
            self.compression.target_bytes = kb.saturating_mul(1024);
        }
        set(&mut self.compression.start_quality, file.compression.start_quality);
        set(&mut self.compression.quality_step, file.compression.quality_step);
        set(&mut self.compression.min_quality, file.compression.min_quality);

        set(&mut self.verifier, file.verifier.backend);
        set(&mut self.model_path, file.verifier.model_path);
        set(&mut self.verify_threshold, file.verifier.verify_threshold);
        if file.verifier.command.is_some() {
            self.verifier_command = file.verifier.command;
        }
        set(&mut self.verifier_args, file.verifier.args);
        set(&mut self.verifier_model, file.verifier.model);
        set(&mut self.enforce_detection, file.verifier.enforce_detection);
        Ok(())
    }

    /// Override from `FACEFILE_*` variables. Unparseable values are ignored
    /// with a warning.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FACEFILE_GALLERY") {
            self.gallery_root = PathBuf::from(v);
        }
        if let Some(v) = var("FACEFILE_STAGING_DIR") {
            self.staging_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEFILE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        env_parse(&var, "FACEFILE_FRAME_WIDTH", &mut self.frame_width);
        env_parse(&var, "FACEFILE_FRAME_HEIGHT", &mut self.frame_height);
        env_parse(&var, "FACEFILE_WARMUP_FRAMES", &mut self.warmup_frames);
        env_parse(&var, "FACEFILE_MATCH_THRESHOLD", &mut self.match_threshold);

        let mut target_kb = self.compression.target_bytes / 1024;
        env_parse(&var, "FACEFILE_TARGET_SIZE_KB", &mut target_kb);
        self.compression.target_bytes = target_kb.saturating_mul(1024);
        env_parse(&var, "FACEFILE_MIN_QUALITY", &mut self.compression.min_quality);

        if let Some(v) = var("FACEFILE_COMPRESS_NEW_IDENTITY") {
            self.compress_new_identity = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        env_parse(&var, "FACEFILE_VERIFIER", &mut self.verifier);
        if let Some(v) = var("FACEFILE_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        env_parse(&var, "FACEFILE_VERIFY_THRESHOLD", &mut self.verify_threshold);
        if let Some(v) = var("FACEFILE_VERIFIER_COMMAND") {
            self.verifier_command = Some(v);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.match_threshold.is_nan() || self.match_threshold <= 0.0 {
            bail!("match_threshold must be positive, got {}", self.match_threshold);
        }
        let c = &self.compression;
        if c.min_quality == 0 || c.min_quality > 100 || c.start_quality > 100 {
            bail!("JPEG qualities must be within 1..=100");
        }
        if c.quality_step == 0 {
            bail!("quality_step must be at least 1");
        }
        if self.verifier == VerifierBackend::Command && self.verifier_command.is_none() {
            bail!("verifier backend `command` needs verifier.command");
        }
        Ok(())
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            match_threshold: self.match_threshold,
            compression: self.compression,
            compress_new_identity: self.compress_new_identity,
            staging_dir: self.staging_dir.clone(),
        }
    }

    /// Construct the configured verification backend.
    pub fn build_verifier(&self) -> Result<Box<dyn Verifier>> {
        match self.verifier {
            VerifierBackend::Onnx => {
                let model = self.model_path.to_string_lossy();
                let embedder = FaceEmbedder::load(&model)
                    .with_context(|| format!("loading embedding model {model}"))?;
                Ok(Box::new(EmbeddingVerifier::new(embedder, self.verify_threshold)))
            }
            VerifierBackend::Command => {
                let program = self
                    .verifier_command
                    .clone()
                    .context("verifier backend `command` needs verifier.command")?;
                Ok(Box::new(CommandVerifier::new(
                    program,
                    self.verifier_args.clone(),
                    self.verifier_model.clone(),
                    self.enforce_detection,
                )))
            }
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn env_parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = var(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment value"),
        }
    }
}

fn home_relative(xdg_var: &str, fallback: &str) -> PathBuf {
    std::env::var(xdg_var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(fallback)
        })
        .join("facefile")
}

fn data_dir() -> PathBuf {
    home_relative("XDG_DATA_HOME", ".local/share")
}

fn default_config_path() -> PathBuf {
    home_relative("XDG_CONFIG_HOME", ".config").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.match_threshold, 0.3);
        assert_eq!(c.compression.target_bytes, 200 * 1024);
        assert_eq!(c.compression.start_quality, 90);
        assert_eq!(c.compression.quality_step, 5);
        assert_eq!(c.compression.min_quality, 10);
        assert_eq!(c.verifier, VerifierBackend::Onnx);
        assert!(!c.compress_new_identity);
        assert!(c.gallery_root.ends_with("facefile/gallery"));
        c.validate().unwrap();
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut c = Config::default();
        c.apply_toml(
            r#"
            gallery = "/srv/faces"
            match_threshold = 0.25
            compress_new_identity = true

            [camera]
            device = "/dev/video2"
            warmup_frames = 0

            [compression]
            target_size_kb = 100

            [verifier]
            backend = "command"
            command = "deepface-verify"
            args = ["{probe}", "{reference}"]
            "#,
        )
        .unwrap();

        assert_eq!(c.gallery_root, PathBuf::from("/srv/faces"));
        assert_eq!(c.match_threshold, 0.25);
        assert!(c.compress_new_identity);
        assert_eq!(c.camera_device, "/dev/video2");
        assert_eq!(c.warmup_frames, 0);
        assert_eq!(c.frame_width, 640);
        assert_eq!(c.compression.target_bytes, 100 * 1024);
        assert_eq!(c.compression.start_quality, 90);
        assert_eq!(c.verifier, VerifierBackend::Command);
        assert_eq!(c.verifier_command.as_deref(), Some("deepface-verify"));
        assert_eq!(c.verifier_args.len(), 2);
        c.validate().unwrap();
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        let mut c = Config::default();
        assert!(c.apply_toml("treshold = 0.3").is_err());
        assert!(c.apply_toml("[camera]\nfps = 30").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut c = Config::default();
        c.apply_toml("match_threshold = 0.25\n[camera]\ndevice = \"/dev/video2\"")
            .unwrap();
        c.apply_env(env(&[
            ("FACEFILE_MATCH_THRESHOLD", "0.4"),
            ("FACEFILE_GALLERY", "/tmp/g"),
            ("FACEFILE_TARGET_SIZE_KB", "50"),
            ("FACEFILE_COMPRESS_NEW_IDENTITY", "1"),
            ("FACEFILE_VERIFIER", "Command"),
        ]));

        assert_eq!(c.match_threshold, 0.4);
        assert_eq!(c.gallery_root, PathBuf::from("/tmp/g"));
        assert_eq!(c.compression.target_bytes, 50 * 1024);
        assert!(c.compress_new_identity);
        assert_eq!(c.verifier, VerifierBackend::Command);
        assert_eq!(c.camera_device, "/dev/video2");
    }

    #[test]
    fn test_huge_target_size_saturates() {
        let mut c = Config::default();
        c.apply_toml("[compression]\ntarget_size_kb = 9223372036854775807")
            .unwrap();
        assert_eq!(c.compression.target_bytes, usize::MAX);

        let mut c = Config::default();
        let kb = usize::MAX.to_string();
        c.apply_env(env(&[("FACEFILE_TARGET_SIZE_KB", kb.as_str())]));
        assert_eq!(c.compression.target_bytes, usize::MAX);
    }

    #[test]
    fn test_env_ignores_garbage() {
        let mut c = Config::default();
        c.apply_env(env(&[
            ("FACEFILE_MATCH_THRESHOLD", "close"),
            ("FACEFILE_WARMUP_FRAMES", "-3"),
        ]));
        assert_eq!(c.match_threshold, 0.3);
        assert_eq!(c.warmup_frames, 4);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut c = Config::default();
        c.match_threshold = 0.0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.compression.quality_step = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.verifier = VerifierBackend::Command;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        assert!(Config::load(Some(Path::new("/nonexistent/facefile.toml"))).is_err());
    }

    #[test]
    fn test_build_command_verifier() {
        let mut c = Config::default();
        c.verifier = VerifierBackend::Command;
        c.verifier_command = Some("true".into());
        assert!(c.build_verifier().is_ok());
    }
}
