use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MAX_UPLOAD_MB: usize = 16;
pub const CANVAS_W: u32 = 500;
pub const CANVAS_H: u32 = 653;
/// 36 x 47 mm at this density is the default canvas. Not enforced anywhere.
pub const PPI: f64 = 351.5;
pub const PREVIEW_MAX: u32 = 800;
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasCfg { pub width: u32, pub height: u32 }

impl Default for CanvasCfg {
    fn default() -> Self { Self { width: CANVAS_W, height: CANVAS_H } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewCfg { pub max_side: u32, pub jpeg_quality: u8 }

impl Default for PreviewCfg {
    fn default() -> Self { Self { max_side: PREVIEW_MAX, jpeg_quality: 75 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputCfg {
    pub jpeg_quality: u8,
    pub download_name: String,
    /// Upper bound for either requested canvas side.
    pub max_side: u32,
}

impl Default for OutputCfg {
    fn default() -> Self {
        Self { jpeg_quality: 95, download_name: "passport_photo.jpg".into(), max_side: 4096 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionCfg { pub max_age_secs: u64, pub sweep_every_secs: u64 }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceCfg {
    pub bind: String,
    pub upload_dir: PathBuf,
    pub static_dir: PathBuf,
    pub index_file: PathBuf,
    pub max_upload_bytes: usize,
    pub allowed_extensions: Vec<String>,
    pub canvas: CanvasCfg,
    pub preview: PreviewCfg,
    pub output: OutputCfg,
    /// None keeps every upload; cleanup is then someone else's job.
    pub retention: Option<RetentionCfg>,
}

impl Default for ServiceCfg {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".into(),
            upload_dir: PathBuf::from("uploads"),
            static_dir: PathBuf::from("static"),
            index_file: PathBuf::from("templates/index.html"),
            max_upload_bytes: MAX_UPLOAD_MB * 1024 * 1024,
            allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            canvas: CanvasCfg::default(),
            preview: PreviewCfg::default(),
            output: OutputCfg::default(),
            retention: None,
        }
    }
}

impl ServiceCfg {
    /// Read a YAML file; keys it leaves out keep their defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let txt = tokio::fs::read_to_string(path)
            .await
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&txt)
    }

    pub fn from_yaml(txt: &str) -> Result<Self> {
        serde_yaml::from_str(txt).context("Failed to parse config YAML")
    }

    /// Apply `PHOTO_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|k| std::env::var(k).ok())
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = get("PHOTO_BIND") { self.bind = v; }
        if let Some(v) = get("PHOTO_UPLOAD_DIR") { self.upload_dir = v.into(); }
        if let Some(v) = get("PHOTO_STATIC_DIR") { self.static_dir = v.into(); }
        if let Some(v) = get("PHOTO_INDEX_FILE") { self.index_file = v.into(); }
        if let Some(v) = get("PHOTO_MAX_UPLOAD_MB") {
            let mb: usize = v.parse().context("PHOTO_MAX_UPLOAD_MB must be an integer")?;
            self.max_upload_bytes = mb * 1024 * 1024;
        }
        if let Some(v) = get("PHOTO_RETENTION_SECS") {
            let secs: u64 = v.parse().context("PHOTO_RETENTION_SECS must be an integer")?;
            let sweep_every_secs = self.retention.as_ref().map(|r| r.sweep_every_secs).unwrap_or(3600);
            self.retention = Some(RetentionCfg { max_age_secs: secs, sweep_every_secs });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            bail!("max_upload_bytes must be greater than 0");
        }
        if self.allowed_extensions.is_empty() {
            bail!("allowed_extensions cannot be empty");
        }
        let CanvasCfg { width, height } = self.canvas;
        if width == 0 || height == 0 {
            bail!("canvas must be at least 1x1, got {width}x{height}");
        }
        if width > self.output.max_side || height > self.output.max_side {
            bail!("canvas {width}x{height} exceeds output.max_side {}", self.output.max_side);
        }
        for (name, q) in [("preview.jpeg_quality", self.preview.jpeg_quality), ("output.jpeg_quality", self.output.jpeg_quality)] {
            if !(1..=100).contains(&q) {
                bail!("{name} must be within 1..=100, got {q}");
            }
        }
        if self.preview.max_side == 0 {
            bail!("preview.max_side must be greater than 0");
        }
        if let Some(r) = &self.retention {
            if r.max_age_secs == 0 {
                bail!("retention.max_age_secs must be greater than 0");
            }
            if r.sweep_every_secs == 0 {
                bail!("retention.sweep_every_secs must be greater than 0");
            }
        }
        Ok(())
    }
}
