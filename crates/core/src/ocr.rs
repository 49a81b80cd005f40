use crate::config::OcrConfig;
use crate::error::CapabilityError;
use crate::models::{ClassifiedContent, ClassifiedFragment, ImageData, ImageFormat};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, format: ImageFormat) -> bool;

    async fn recognize(&self, image: &ImageData) -> Result<String, CapabilityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NotADiagram,
    NoImage,
    TooSmall,
    TooLarge,
    CaptionSufficient,
    UnsupportedFormat,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Disabled => "ocr disabled",
            Self::NotADiagram => "not a diagram",
            Self::NoImage => "no embedded image",
            Self::TooSmall => "image below minimum size",
            Self::TooLarge => "image above byte limit",
            Self::CaptionSufficient => "caption already descriptive",
            Self::UnsupportedFormat => "image format not supported by engine",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrOutcome {
    Recognized(String),
    Empty,
    Skipped(SkipReason),
    Unavailable(String),
    TimedOut,
}

impl OcrOutcome {
    /// Outcomes worth recording as a warning on the run.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::TimedOut)
    }
}

/// Gatekeeper in front of an optional OCR engine. Every call is bounded by
/// `OcrConfig::timeout` and every failure becomes an explicit outcome.
#[derive(Clone)]
pub struct OcrAdapter {
    engine: Option<Arc<dyn OcrEngine>>,
    config: OcrConfig,
}

impl OcrAdapter {
    pub fn new(engine: Option<Arc<dyn OcrEngine>>, config: OcrConfig) -> Self {
        Self { engine, config }
    }

    pub fn disabled() -> Self {
        Self {
            engine: None,
            config: OcrConfig {
                enabled: false,
                ..OcrConfig::default()
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.engine.is_some()
    }

    pub fn prefilter<'a>(&self, fragment: &'a ClassifiedFragment) -> Result<&'a ImageData, SkipReason> {
        let engine = match (&self.engine, self.config.enabled) {
            (Some(engine), true) => engine,
            _ => return Err(SkipReason::Disabled),
        };
        let ClassifiedContent::Diagram { caption, image, .. } = &fragment.content else {
            return Err(SkipReason::NotADiagram);
        };
        let image = image.as_ref().ok_or(SkipReason::NoImage)?;

        if image.width < self.config.min_width || image.height < self.config.min_height {
            return Err(SkipReason::TooSmall);
        }
        if image.bytes.len() > self.config.max_image_bytes {
            return Err(SkipReason::TooLarge);
        }
        let caption_chars = caption.as_deref().map_or(0, |caption| caption.trim().chars().count());
        if caption_chars >= self.config.caption_sufficient_chars {
            return Err(SkipReason::CaptionSufficient);
        }
        if !engine.supports(image.format) {
            return Err(SkipReason::UnsupportedFormat);
        }
        Ok(image)
    }

    pub async fn extract_text(&self, fragment: &ClassifiedFragment) -> OcrOutcome {
        let image = match self.prefilter(fragment) {
            Ok(image) => image,
            Err(reason) => {
                debug!(source = %fragment.source_id, ordinal = fragment.ordinal, %reason, "ocr skipped");
                return OcrOutcome::Skipped(reason);
            }
        };
        let Some(engine) = &self.engine else {
            return OcrOutcome::Skipped(SkipReason::Disabled);
        };

        match tokio::time::timeout(self.config.timeout, engine.recognize(image)).await {
            Err(_) => {
                warn!(source = %fragment.source_id, engine = engine.name(), "ocr timed out");
                OcrOutcome::TimedOut
            }
            Ok(Err(error)) => {
                warn!(source = %fragment.source_id, engine = engine.name(), %error, "ocr failed");
                OcrOutcome::Unavailable(error.to_string())
            }
            Ok(Ok(text)) => {
                let text = text.trim();
                if text.chars().count() < self.config.min_text_chars {
                    OcrOutcome::Empty
                } else {
                    OcrOutcome::Recognized(text.to_string())
                }
            }
        }
    }

    /// Runs OCR and stores recognized text on the diagram.
    pub async fn enrich(&self, fragment: &mut ClassifiedFragment) -> OcrOutcome {
        let outcome = self.extract_text(fragment).await;
        if let (OcrOutcome::Recognized(text), ClassifiedContent::Diagram { ocr_text, .. }) =
            (&outcome, &mut fragment.content)
        {
            *ocr_text = text.clone();
        }
        outcome
    }
}
