// Maps the JSON-safe option surface onto the rich pipeline configuration.
//
// Simple-form mapping is deliberately forgiving: unknown keys and malformed
// scalars are skipped with a warning, never aborting the request. How a
// malformed RICH descriptor is handled depends on the normalizer mode.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use docpipe_common::NormalizerMode;

use crate::config::{
    AcceleratorDevice, AcceleratorOptions, FormatOption, InputFormat, PdfPipelineOptions,
    PictureDescriptionOptions, PipelineConfig, TableMode, VlmModel,
};
use crate::options::{ConvertOptions, SIMPLE_KEYS};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("invalid options descriptor: {0}")]
    InvalidRich(String),
}

/// Turn an optional options descriptor into a pipeline configuration.
///
/// Deterministic: the same descriptor always yields the same configuration.
pub fn normalize(
    options: Option<&Value>,
    mode: NormalizerMode,
) -> Result<PipelineConfig, NormalizeError> {
    let value = match options {
        None | Some(Value::Null) => return Ok(PipelineConfig::default()),
        Some(v) => v,
    };
    match ConvertOptions::classify(value) {
        ConvertOptions::Simple(map) => Ok(map_simple(&map)),
        ConvertOptions::Rich(rich) => match serde_json::from_value::<PipelineConfig>(rich) {
            Ok(config) => Ok(config),
            Err(err) => match mode {
                NormalizerMode::Permissive => {
                    warn!(error = %err, "Malformed rich options descriptor, using defaults");
                    Ok(PipelineConfig::default())
                }
                NormalizerMode::Strict => Err(NormalizeError::InvalidRich(err.to_string())),
            },
        },
    }
}

fn map_simple(map: &Map<String, Value>) -> PipelineConfig {
    for key in map.keys() {
        if !SIMPLE_KEYS.contains(&key.as_str()) {
            warn!(key = %key, "Ignoring unknown option");
        }
    }

    let mut pdf = PdfPipelineOptions::default();

    // Core
    if let Some(v) = get_bool(map, "create_legacy_output") {
        pdf.create_legacy_output = v;
    }
    if let Some(v) = get_f64(map, "document_timeout") {
        pdf.document_timeout = Some(v);
    }
    if let Some(v) = get_bool(map, "enable_remote_services") {
        pdf.enable_remote_services = v;
    }
    if let Some(v) = get_bool(map, "allow_external_plugins") {
        pdf.allow_external_plugins = v;
    }
    if let Some(v) = get_string(map, "artifacts_path") {
        pdf.artifacts_path = Some(v);
    }
    if let Some(v) = get_bool(map, "force_backend_text") {
        pdf.force_backend_text = v;
    }
    if let Some(v) = get_bool(map, "generate_parsed_pages") {
        pdf.generate_parsed_pages = v;
    }

    // Images
    if let Some(v) = get_bool(map, "generate_picture_images") {
        pdf.generate_picture_images = v;
    }
    if let Some(v) = get_bool(map, "generate_page_images") {
        pdf.generate_page_images = v;
    }
    if let Some(v) = get_bool(map, "generate_table_images") {
        pdf.generate_table_images = v;
    }
    if let Some(v) = get_f64(map, "images_scale") {
        pdf.images_scale = v;
    }

    // Vision
    if get_bool(map, "do_picture_description") == Some(true) {
        pdf.do_picture_description = true;
        if get_f64(map, "images_scale").is_none() {
            pdf.images_scale = 2.0;
        }
        let model = match get_string(map, "vlm_model") {
            None => VlmModel::Granite,
            Some(name) => match name.to_lowercase().as_str() {
                "granite" => VlmModel::Granite,
                "smolvlm" | "smoldocling" => VlmModel::SmolVlm,
                other => {
                    warn!(vlm_model = other, "Unknown vision model, defaulting to granite");
                    VlmModel::Granite
                }
            },
        };
        let mut vlm = PictureDescriptionOptions::for_model(model);
        vlm.prompt = get_string(map, "custom_prompt").or_else(|| get_string(map, "vlm_prompt"));
        if let Some(v) = get_u32(map, "vlm_batch_size") {
            vlm.batch_size = v;
        }
        if let Some(v) = get_f64(map, "vlm_picture_area_threshold") {
            vlm.picture_area_threshold = v;
        }
        if let Some(v) = map.get("vlm_generation_config") {
            if !v.is_null() {
                vlm.generation_config = Some(v.clone());
            }
        }
        pdf.picture_description_options = Some(vlm);
    }

    // Enrichment
    if let Some(v) = get_bool(map, "do_picture_classification") {
        pdf.do_picture_classification = v;
    }
    if let Some(v) = get_bool(map, "do_code_enrichment") {
        pdf.do_code_enrichment = v;
    }
    if let Some(v) = get_bool(map, "do_formula_enrichment") {
        pdf.do_formula_enrichment = v;
    }

    // OCR
    if let Some(v) = get_bool(map, "do_ocr") {
        pdf.do_ocr = v;
    }
    if let Some(langs) = get_string_list(map, "ocr_languages") {
        pdf.ocr_options.languages = langs;
    }
    if let Some(v) = get_bool(map, "force_full_page_ocr") {
        pdf.ocr_options.force_full_page_ocr = v;
    }
    if let Some(v) = get_f64(map, "ocr_bitmap_area_threshold") {
        pdf.ocr_options.bitmap_area_threshold = v;
    }
    if let Some(v) = get_bool(map, "ocr_use_gpu") {
        pdf.ocr_options.use_gpu = Some(v);
    }
    if let Some(v) = get_f64(map, "ocr_confidence_threshold") {
        pdf.ocr_options.confidence_threshold = v;
    }
    if let Some(v) = get_string(map, "ocr_model_storage_directory") {
        pdf.ocr_options.model_storage_directory = Some(v);
    }
    if let Some(v) = get_string(map, "ocr_recog_network") {
        pdf.ocr_options.recog_network = Some(v);
    }
    if let Some(v) = get_bool(map, "ocr_download_enabled") {
        pdf.ocr_options.download_enabled = v;
    }

    // Tables
    if let Some(v) = get_bool(map, "do_table_structure") {
        pdf.do_table_structure = v;
    }
    if let Some(v) = get_bool(map, "table_do_cell_matching") {
        pdf.table_structure_options.do_cell_matching = v;
    }
    if let Some(name) = get_string(map, "table_mode") {
        match TableMode::parse(&name) {
            Some(mode) => pdf.table_structure_options.mode = mode,
            None => warn!(table_mode = %name, "Unknown table mode, keeping default"),
        }
    }

    // Compute
    let accelerator_options = if ["accelerator_device", "num_threads", "cuda_use_flash_attention2"]
        .iter()
        .any(|k| map.contains_key(*k))
    {
        let mut accel = AcceleratorOptions::default();
        if let Some(name) = get_string(map, "accelerator_device") {
            match AcceleratorDevice::parse(&name) {
                Some(device) => accel.device = device,
                None => warn!(accelerator_device = %name, "Unknown accelerator device, using auto"),
            }
        }
        if let Some(n) = get_u32(map, "num_threads") {
            accel.num_threads = n;
        }
        if let Some(v) = get_bool(map, "cuda_use_flash_attention2") {
            accel.cuda_use_flash_attention2 = v;
        }
        Some(accel)
    } else {
        None
    };

    let mut config = PipelineConfig {
        format_options: Default::default(),
        accelerator_options,
    };
    config.format_options.insert(
        InputFormat::Pdf,
        FormatOption {
            pipeline_options: Some(pdf),
        },
    );

    // Formats beyond PDF are enabled by presence.
    if let Some(formats) = get_string_list(map, "input_formats") {
        for name in formats {
            match InputFormat::parse(&name) {
                Some(InputFormat::Pdf) => {}
                Some(format) => {
                    config.format_options.entry(format).or_default();
                }
                None => warn!(input_format = %name, "Unknown input format, skipping"),
            }
        }
    }

    config
}

// Typed getters. `None` means absent, JSON null, or malformed (with a
// warning); the caller keeps its default in all three cases.

fn get_bool(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Null => None,
        other => {
            warn!(key, value = %other, "Expected a boolean, skipping");
            None
        }
    }
}

fn get_f64(map: &Map<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.parse::<f64>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(key, value = %s, "Expected a number, skipping");
                None
            }
        },
        Value::Null => None,
        other => {
            warn!(key, value = %other, "Expected a number, skipping");
            None
        }
    }
}

fn get_u32(map: &Map<String, Value>, key: &str) -> Option<u32> {
    match map.get(key)? {
        Value::Number(n) => match n.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(v) => Some(v),
            None => {
                warn!(key, value = %n, "Expected a small unsigned integer, skipping");
                None
            }
        },
        Value::String(s) => match s.parse::<u32>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(key, value = %s, "Expected an integer, skipping");
                None
            }
        },
        Value::Null => None,
        other => {
            warn!(key, value = %other, "Expected an integer, skipping");
            None
        }
    }
}

fn get_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => {
            warn!(key, value = %other, "Expected a string, skipping");
            None
        }
    }
}

/// A string coerces to a one-element list.
fn get_string_list(map: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    match map.get(key)? {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    other => warn!(key, value = %other, "Expected a string entry, skipping"),
                }
            }
            Some(out)
        }
        Value::Null => None,
        other => {
            warn!(key, value = %other, "Expected a string or list, skipping");
            None
        }
    }
}
