//! Remote provider wire contracts and HTTP client.

pub mod client;
pub mod types;

pub use client::{ApiClient, DEFAULT_BASE_URL, MAX_DOWNLOAD_BYTES, USER_AGENT};
pub use types::{
    Annotation, ApiResponse, ContentBlock, FileObject, JsonSchemaFormat, OutputItem,
    ReasoningOptions, ResponsesRequest, TextFormat, ToolCallOutput, VectorStoreObject,
    VectorStoreStatus,
};
