pub mod chat;
pub mod http_embedder;
pub mod http_ocr;
pub mod tesseract;

pub use chat::ChatCompletionClient;
pub use http_embedder::HttpEmbedder;
pub use http_ocr::HttpOcrEngine;
pub use tesseract::TesseractOcr;

use crate::error::CapabilityError;
use url::Url;

/// Resolves `path` below `base`, keeping any path prefix such as `/v1`.
pub(crate) fn endpoint_url(base: &str, path: &str) -> Result<Url, CapabilityError> {
    let mut url = Url::parse(base.trim())
        .map_err(|error| CapabilityError::Unavailable(format!("invalid endpoint {base}: {error}")))?;
    if !url.path().ends_with('/') {
        let with_slash = format!("{}/", url.path());
        url.set_path(&with_slash);
    }
    url.join(path)
        .map_err(|error| CapabilityError::Unavailable(format!("invalid endpoint {base}: {error}")))
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
