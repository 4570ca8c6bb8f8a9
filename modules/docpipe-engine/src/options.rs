// The options descriptor arrives as free-form JSON and is routed into one of
// two disjoint shapes before any mapping happens: a flat "simple" form using
// a fixed key vocabulary, or the nested "rich" form that already matches
// [`PipelineConfig`](crate::PipelineConfig).

use serde_json::{Map, Value};

/// Keys recognized by the simple form. Anything else in a simple descriptor
/// is ignored with a warning.
pub const SIMPLE_KEYS: &[&str] = &[
    // Core
    "create_legacy_output",
    "document_timeout",
    "enable_remote_services",
    "allow_external_plugins",
    "artifacts_path",
    "force_backend_text",
    "generate_parsed_pages",
    // Images
    "generate_picture_images",
    "generate_page_images",
    "generate_table_images",
    "images_scale",
    // Vision
    "do_picture_description",
    "vlm_model",
    "custom_prompt",
    "vlm_prompt",
    "vlm_batch_size",
    "vlm_picture_area_threshold",
    "vlm_generation_config",
    // Enrichment
    "do_picture_classification",
    "do_code_enrichment",
    "do_formula_enrichment",
    "do_table_structure",
    // OCR
    "do_ocr",
    "ocr_languages",
    "force_full_page_ocr",
    "ocr_bitmap_area_threshold",
    "ocr_use_gpu",
    "ocr_confidence_threshold",
    "ocr_model_storage_directory",
    "ocr_recog_network",
    "ocr_download_enabled",
    // Tables
    "table_do_cell_matching",
    "table_mode",
    // Compute
    "accelerator_device",
    "num_threads",
    "cuda_use_flash_attention2",
    // Formats
    "input_formats",
];

/// Keys that mark the rich form.
pub const RICH_KEYS: &[&str] = &["format_options", "accelerator_options"];

/// The options descriptor, tagged by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvertOptions {
    Simple(Map<String, Value>),
    Rich(Value),
}

impl ConvertOptions {
    /// Classify a descriptor: simple iff it carries at least one simple-form
    /// key and no rich-form key; everything else (including non-objects,
    /// which fail the rich parse later) is rich.
    pub fn classify(value: &Value) -> Self {
        if let Value::Object(map) = value {
            let has_simple = map.keys().any(|k| SIMPLE_KEYS.contains(&k.as_str()));
            let has_rich = map.keys().any(|k| RICH_KEYS.contains(&k.as_str()));
            if has_simple && !has_rich {
                return ConvertOptions::Simple(map.clone());
            }
        }
        ConvertOptions::Rich(value.clone())
    }
}
