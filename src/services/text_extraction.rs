use anyhow::anyhow;
use std::io::Cursor;

use crate::error::PipelineError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";

/// Capability: document bytes plus MIME type in, plain text out. The pipeline
/// only depends on this seam, so tests can swap in canned text.
pub trait TextExtract: Send + Sync {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, PipelineError>;
}

/// Production extractor: pdf-extract for PDFs, tesseract for images.
pub struct DocumentExtractor {
    ocr_language: String,
}

impl DocumentExtractor {
    pub fn new(ocr_language: impl Into<String>) -> Self {
        DocumentExtractor {
            ocr_language: ocr_language.into(),
        }
    }

    fn extract_from_pdf(&self, bytes: &[u8]) -> Result<String, PipelineError> {
        pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| PipelineError::ExtractionFailed(anyhow!("PDF text: {e}")))
    }

    fn extract_via_ocr(&self, bytes: &[u8]) -> Result<String, PipelineError> {
        // Re-encode to PNG first; OCR results on arbitrary JPEG encodings are
        // noticeably worse.
        let image = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::ExtractionFailed(anyhow!("Image decode: {e}")))?;
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| PipelineError::ExtractionFailed(anyhow!("PNG encode: {e}")))?;

        let text = tesseract::Tesseract::new(None, Some(&self.ocr_language))
            .map_err(|e| PipelineError::ExtractionFailed(anyhow!("Tesseract init: {e}")))?
            .set_image_from_mem(&png)
            .map_err(|e| PipelineError::ExtractionFailed(anyhow!("Tesseract image: {e}")))?
            .recognize()
            .map_err(|e| PipelineError::ExtractionFailed(anyhow!("Tesseract recognize: {e}")))?
            .get_text()
            .map_err(|e| PipelineError::ExtractionFailed(anyhow!("OCR text: {e}")))?;
        Ok(text)
    }
}

impl TextExtract for DocumentExtractor {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, PipelineError> {
        let text = match mime_type {
            MIME_PDF => self.extract_from_pdf(bytes)?,
            MIME_JPEG | MIME_PNG => self.extract_via_ocr(bytes)?,
            other => return Err(PipelineError::UnsupportedFormat(other.to_string())),
        };

        if text.trim().is_empty() {
            return Err(PipelineError::NoExtractableText);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mime_type_is_rejected() {
        let extractor = DocumentExtractor::new("eng");
        let err = extractor.extract(b"data", "text/plain").unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn garbage_image_bytes_fail_extraction() {
        let extractor = DocumentExtractor::new("eng");
        let err = extractor.extract(b"not an image", MIME_PNG).unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionFailed(_)));
    }
}
