pub mod config;
pub mod engine;
pub mod normalize;
pub mod options;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{
    AcceleratorDevice, AcceleratorOptions, FormatOption, InputFormat, OcrOptions,
    PdfPipelineOptions, PictureDescriptionOptions, PipelineConfig, TableMode,
    TableStructureOptions, VlmModel,
};
pub use engine::{Conversion, DocumentEngine, EngineError, EngineRequest, PdfTextEngine};
pub use normalize::{normalize, NormalizeError};
pub use options::ConvertOptions;
