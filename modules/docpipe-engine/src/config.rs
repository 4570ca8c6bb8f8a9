// The rich pipeline configuration. This is both the in-process shape handed
// to the engine and the "rich form" wire shape: a descriptor whose top level
// carries `format_options` or `accelerator_options` deserializes straight
// into this model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const GRANITE_REPO_ID: &str = "ibm-granite/granite-vision-3.1-2b-preview";
pub const SMOLVLM_REPO_ID: &str = "HuggingFaceTB/SmolVLM-256M-Instruct";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub format_options: BTreeMap<InputFormat, FormatOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator_options: Option<AcceleratorOptions>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut format_options = BTreeMap::new();
        format_options.insert(
            InputFormat::Pdf,
            FormatOption {
                pipeline_options: Some(PdfPipelineOptions::default()),
            },
        );
        Self {
            format_options,
            accelerator_options: None,
        }
    }
}

impl PipelineConfig {
    /// The PDF pipeline options, if the PDF format is enabled.
    pub fn pdf_options(&self) -> Option<&PdfPipelineOptions> {
        self.format_options
            .get(&InputFormat::Pdf)
            .and_then(|f| f.pipeline_options.as_ref())
    }

    pub fn pdf_options_mut(&mut self) -> &mut PdfPipelineOptions {
        self.format_options
            .entry(InputFormat::Pdf)
            .or_default()
            .pipeline_options
            .get_or_insert_with(PdfPipelineOptions::default)
    }

    pub fn supports(&self, format: InputFormat) -> bool {
        self.format_options.contains_key(&format)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Pdf,
    Docx,
    Image,
    Html,
    Pptx,
    Audio,
}

impl InputFormat {
    /// Parse a user-supplied format name, accepting the common aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" | "doc" => Some(Self::Docx),
            "image" | "png" | "jpg" | "jpeg" => Some(Self::Image),
            "html" | "htm" => Some(Self::Html),
            "pptx" | "ppt" => Some(Self::Pptx),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Image => "image",
            Self::Html => "html",
            Self::Pptx => "pptx",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-format configuration. Only the PDF pipeline carries options today;
/// other formats are enabled by their presence in the map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOption {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_options: Option<PdfPipelineOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfPipelineOptions {
    // Core
    pub create_legacy_output: bool,
    /// Per-document deadline in seconds, enforced by the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_timeout: Option<f64>,
    pub enable_remote_services: bool,
    pub allow_external_plugins: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_path: Option<String>,
    pub force_backend_text: bool,
    pub generate_parsed_pages: bool,

    // Images
    pub images_scale: f64,
    pub generate_picture_images: bool,
    pub generate_page_images: bool,
    pub generate_table_images: bool,

    // OCR
    pub do_ocr: bool,
    pub ocr_options: OcrOptions,

    // Tables
    pub do_table_structure: bool,
    pub table_structure_options: TableStructureOptions,

    // Enrichment
    pub do_code_enrichment: bool,
    pub do_formula_enrichment: bool,
    pub do_picture_classification: bool,

    // Vision
    pub do_picture_description: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture_description_options: Option<PictureDescriptionOptions>,
}

impl Default for PdfPipelineOptions {
    fn default() -> Self {
        Self {
            create_legacy_output: false,
            document_timeout: None,
            enable_remote_services: false,
            allow_external_plugins: false,
            artifacts_path: None,
            force_backend_text: false,
            generate_parsed_pages: false,
            images_scale: 1.0,
            generate_picture_images: true,
            generate_page_images: false,
            generate_table_images: false,
            do_ocr: true,
            ocr_options: OcrOptions::default(),
            do_table_structure: true,
            table_structure_options: TableStructureOptions::default(),
            do_code_enrichment: false,
            do_formula_enrichment: false,
            do_picture_classification: false,
            do_picture_description: false,
            picture_description_options: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrOptions {
    pub languages: Vec<String>,
    pub force_full_page_ocr: bool,
    /// Skip bitmaps smaller than this fraction of the page area.
    pub bitmap_area_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_gpu: Option<bool>,
    pub confidence_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_storage_directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recog_network: Option<String>,
    pub download_enabled: bool,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            languages: vec!["en".to_string()],
            force_full_page_ocr: false,
            bitmap_area_threshold: 0.05,
            use_gpu: None,
            confidence_threshold: 0.5,
            model_storage_directory: None,
            recog_network: None,
            download_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableStructureOptions {
    pub do_cell_matching: bool,
    pub mode: TableMode,
}

impl Default for TableStructureOptions {
    fn default() -> Self {
        Self {
            do_cell_matching: true,
            mode: TableMode::Accurate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableMode {
    Fast,
    Accurate,
}

impl TableMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "accurate" => Some(Self::Accurate),
            _ => None,
        }
    }
}

/// Which vision model annotates pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VlmModel {
    Granite,
    SmolVlm,
}

impl VlmModel {
    pub fn repo_id(&self) -> &'static str {
        match self {
            Self::Granite => GRANITE_REPO_ID,
            Self::SmolVlm => SMOLVLM_REPO_ID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PictureDescriptionOptions {
    pub repo_id: String,
    /// Replaces the model's default prompt when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub batch_size: u32,
    pub picture_area_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<serde_json::Value>,
}

impl Default for PictureDescriptionOptions {
    fn default() -> Self {
        Self {
            repo_id: GRANITE_REPO_ID.to_string(),
            prompt: None,
            batch_size: 8,
            picture_area_threshold: 0.05,
            generation_config: None,
        }
    }
}

impl PictureDescriptionOptions {
    pub fn for_model(model: VlmModel) -> Self {
        Self {
            repo_id: model.repo_id().to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorOptions {
    pub device: AcceleratorDevice,
    pub num_threads: u32,
    pub cuda_use_flash_attention2: bool,
}

impl Default for AcceleratorOptions {
    fn default() -> Self {
        Self {
            device: AcceleratorDevice::Auto,
            num_threads: 4,
            cuda_use_flash_attention2: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorDevice {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Mps,
}

impl AcceleratorDevice {
    /// Accepts `gpu` as an alias for `cuda`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "cpu" => Some(Self::Cpu),
            "cuda" | "gpu" => Some(Self::Cuda),
            "mps" => Some(Self::Mps),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_config_enables_pdf() {
        let config = PipelineConfig::default();
        assert!(config.supports(InputFormat::Pdf));
        let pdf = config.pdf_options().unwrap();
        assert!(pdf.do_ocr);
        assert!(pdf.do_table_structure);
        assert!(!pdf.do_picture_description);
    }

    #[test]
    fn rich_config_round_trips() {
        let mut config = PipelineConfig::default();
        config.pdf_options_mut().do_ocr = false;
        config.pdf_options_mut().document_timeout = Some(30.0);
        config.accelerator_options = Some(AcceleratorOptions {
            device: AcceleratorDevice::Cuda,
            num_threads: 8,
            cuda_use_flash_attention2: true,
        });
        let value = serde_json::to_value(&config).unwrap();
        let back: PipelineConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn rich_wire_form_deserializes() {
        let value = json!({
            "format_options": {
                "pdf": { "pipeline_options": { "do_ocr": false, "do_code_enrichment": true } },
                "docx": {}
            },
            "accelerator_options": { "device": "cpu", "num_threads": 2 }
        });
        let config: PipelineConfig = serde_json::from_value(value).unwrap();
        assert!(config.supports(InputFormat::Docx));
        let pdf = config.pdf_options().unwrap();
        assert!(!pdf.do_ocr);
        assert!(pdf.do_code_enrichment);
        let accel = config.accelerator_options.unwrap();
        assert_eq!(accel.device, AcceleratorDevice::Cpu);
        assert_eq!(accel.num_threads, 2);
    }

    #[test]
    fn input_format_aliases() {
        assert_eq!(InputFormat::parse("PDF"), Some(InputFormat::Pdf));
        assert_eq!(InputFormat::parse("doc"), Some(InputFormat::Docx));
        assert_eq!(InputFormat::parse("jpeg"), Some(InputFormat::Image));
        assert_eq!(InputFormat::parse("htm"), Some(InputFormat::Html));
        assert_eq!(InputFormat::parse("ppt"), Some(InputFormat::Pptx));
        assert_eq!(InputFormat::parse("mp3"), None);
    }

    #[test]
    fn accelerator_device_gpu_alias() {
        assert_eq!(AcceleratorDevice::parse("gpu"), Some(AcceleratorDevice::Cuda));
        assert_eq!(AcceleratorDevice::parse("tpu"), None);
    }

    #[test]
    fn vlm_repo_ids() {
        assert_eq!(VlmModel::Granite.repo_id(), GRANITE_REPO_ID);
        assert_eq!(VlmModel::SmolVlm.repo_id(), SMOLVLM_REPO_ID);
    }
}
