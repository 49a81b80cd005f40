use crate::error::CapabilityError;
use crate::models::{ImageData, ImageFormat};
use crate::ocr::OcrEngine;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Local `tesseract` binary, fed through stdin. Page segmentation mode 6
/// treats the figure as one uniform block of text.
pub struct TesseractOcr {
    binary: PathBuf,
    languages: Vec<String>,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            languages: vec!["eng".to_string()],
        }
    }
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, languages: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            languages,
        }
    }

    fn arguments(&self) -> Vec<String> {
        let mut arguments = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            "6".to_string(),
        ];
        if !self.languages.is_empty() {
            arguments.push("-l".to_string());
            arguments.push(self.languages.join("+"));
        }
        arguments
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn supports(&self, format: ImageFormat) -> bool {
        matches!(format, ImageFormat::Jpeg | ImageFormat::Png)
    }

    async fn recognize(&self, image: &ImageData) -> Result<String, CapabilityError> {
        let mut child = Command::new(&self.binary)
            .args(self.arguments())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| {
                CapabilityError::Unavailable(format!("{}: {error}", self.binary.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&image.bytes).await.map_err(|error| {
                CapabilityError::Unavailable(format!("writing image to tesseract: {error}"))
            })?;
        }

        let output = child.wait_with_output().await.map_err(|error| {
            CapabilityError::Unavailable(format!("waiting for tesseract: {error}"))
        })?;

        if !output.status.success() {
            return Err(CapabilityError::BadResponse {
                backend: "tesseract".to_string(),
                details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_join_languages() {
        let engine = TesseractOcr::new("tesseract", vec!["eng".to_string(), "fra".to_string()]);
        assert_eq!(
            engine.arguments(),
            vec!["stdin", "stdout", "--psm", "6", "-l", "eng+fra"]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let engine = TesseractOcr::new("/nonexistent/tesseract-binary", Vec::new());
        let image = ImageData {
            bytes: vec![1, 2, 3],
            width: 200,
            height: 200,
            format: ImageFormat::Png,
        };
        assert!(matches!(
            engine.recognize(&image).await,
            Err(CapabilityError::Unavailable(_))
        ));
    }
}
