// The conversion-engine seam. Engines are compute-bound and synchronous;
// callers isolate them on a blocking executor so worker loops stay
// responsive.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{InputFormat, PipelineConfig};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("parse failure: {0}")]
    Parse(String),

    #[error("document processing exceeded {0:.1}s")]
    Timeout(f64),

    #[error("conversion failed: {0}")]
    Failed(String),
}

/// One conversion job.
pub struct EngineRequest {
    pub payload: Vec<u8>,
    /// File extension hint derived from the object key.
    pub extension: String,
    pub config: PipelineConfig,
}

/// What the engine extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub text: String,
    pub markdown: String,
    pub structured_data: Option<serde_json::Value>,
    pub pages: u32,
    pub format: String,
}

pub trait DocumentEngine: Send + Sync {
    fn convert(&self, request: &EngineRequest) -> Result<Conversion, EngineError>;
}

/// Minimal built-in engine backing the worker binary.
///
/// Validates PDF headers, counts pages, and pulls literal text runs out of
/// uncompressed content streams. Real converters (OCR, table structure,
/// vision models) are external collaborators implementing [`DocumentEngine`];
/// this one keeps the service runnable without them.
#[derive(Debug, Default)]
pub struct PdfTextEngine;

impl DocumentEngine for PdfTextEngine {
    fn convert(&self, request: &EngineRequest) -> Result<Conversion, EngineError> {
        let started = Instant::now();
        let format = InputFormat::parse(&request.extension).unwrap_or(InputFormat::Pdf);
        if !request.config.supports(format) {
            return Err(EngineError::Failed(format!(
                "input format {format} is not enabled in the pipeline configuration"
            )));
        }

        let conversion = match format {
            InputFormat::Pdf => {
                if !request.payload.starts_with(b"%PDF-") {
                    return Err(EngineError::Parse(
                        "missing %PDF header, not a PDF document".to_string(),
                    ));
                }
                let text = extract_pdf_text(&request.payload);
                Conversion {
                    markdown: text.clone(),
                    text,
                    structured_data: None,
                    pages: count_pdf_pages(&request.payload),
                    format: format.as_str().to_string(),
                }
            }
            // Text-ish formats pass through as UTF-8.
            _ => {
                let text = String::from_utf8_lossy(&request.payload).into_owned();
                Conversion {
                    markdown: text.clone(),
                    text,
                    structured_data: None,
                    pages: 1,
                    format: format.as_str().to_string(),
                }
            }
        };

        if let Some(timeout) = request
            .config
            .pdf_options()
            .and_then(|pdf| pdf.document_timeout)
        {
            if started.elapsed() > Duration::from_secs_f64(timeout) {
                return Err(EngineError::Timeout(timeout));
            }
        }

        Ok(conversion)
    }
}

fn find(data: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| position + from)
}

/// Count `/Type /Page` dictionary entries, excluding `/Pages` nodes.
fn count_pdf_pages(data: &[u8]) -> u32 {
    let mut pages = 0u32;
    let mut index = 0;
    while let Some(at) = find(data, index, b"/Type") {
        let mut cursor = at + b"/Type".len();
        while data.get(cursor).is_some_and(|b| b.is_ascii_whitespace()) {
            cursor += 1;
        }
        if data[cursor..].starts_with(b"/Page")
            && !data[cursor + b"/Page".len()..]
                .first()
                .is_some_and(|b| b.is_ascii_alphanumeric())
        {
            pages += 1;
        }
        index = at + 1;
    }
    pages.max(1)
}

/// Collect literal strings that feed the `Tj`/`TJ`/`'` text-showing
/// operators. Only sees uncompressed content streams, which is all this
/// engine promises.
fn extract_pdf_text(data: &[u8]) -> String {
    let mut runs: Vec<String> = Vec::new();
    let mut index = 0;
    while index < data.len() {
        match data[index] {
            // TJ array: literals interleaved with spacing adjustments, all
            // part of one text run.
            b'[' => {
                let (literals, after) = read_array_literals(data, index);
                if followed_by_show_operator(data, after) && !literals.is_empty() {
                    runs.push(literals.concat());
                }
                index = after;
            }
            b'(' => match read_literal(data, index) {
                Some((literal, after)) => {
                    if followed_by_show_operator(data, after) && !literal.is_empty() {
                        runs.push(literal);
                    }
                    index = after;
                }
                None => index += 1,
            },
            _ => index += 1,
        }
    }
    runs.join("\n")
}

/// Gather every literal inside a `[...]` array. Returns the literals and
/// the index just past the closing bracket.
fn read_array_literals(data: &[u8], start: usize) -> (Vec<String>, usize) {
    let mut literals = Vec::new();
    let mut index = start + 1;
    while index < data.len() {
        match data[index] {
            b']' => return (literals, index + 1),
            b'(' => match read_literal(data, index) {
                Some((literal, after)) => {
                    if !literal.is_empty() {
                        literals.push(literal);
                    }
                    index = after;
                }
                None => return (literals, data.len()),
            },
            _ => index += 1,
        }
    }
    (literals, index)
}

/// Parse a `(...)` literal starting at `start`, honoring backslash escapes
/// and nested parentheses. Returns the decoded text and the index just past
/// the closing parenthesis.
fn read_literal(data: &[u8], start: usize) -> Option<(String, usize)> {
    let mut out = Vec::new();
    let mut depth = 1usize;
    let mut index = start + 1;
    while index < data.len() {
        match data[index] {
            b'\\' => {
                let escaped = *data.get(index + 1)?;
                match escaped {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    other => out.push(other),
                }
                index += 2;
            }
            b'(' => {
                depth += 1;
                out.push(b'(');
                index += 1;
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((String::from_utf8_lossy(&out).into_owned(), index + 1));
                }
                out.push(b')');
                index += 1;
            }
            byte => {
                out.push(byte);
                index += 1;
            }
        }
    }
    None
}

fn followed_by_show_operator(data: &[u8], mut index: usize) -> bool {
    while index < data.len() && data[index].is_ascii_whitespace() {
        index += 1;
    }
    match data.get(index) {
        Some(b'T') => matches!(data.get(index + 1), Some(b'j') | Some(b'J')),
        Some(b'\'') | Some(b'"') => true,
        _ => false,
    }
}
