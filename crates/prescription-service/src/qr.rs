//! Scannable code generation

use base64::{engine::general_purpose::STANDARD, Engine as _};
use pharmachain_common::{Error, Result};
use qrcode::render::svg;
use qrcode::QrCode;
use serde::Serialize;

/// A generated code and the URL it encodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannableCode {
    pub url: String,
    pub data_uri: String,
}

/// Renders QR codes that link to a prescription's public page
#[derive(Debug, Clone)]
pub struct QrCodeGenerator {
    base_url: String,
}

impl QrCodeGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Public URL of a prescription
    pub fn url_for(&self, uid: &str) -> String {
        format!("{}/prescription/{}", self.base_url, uid)
    }

    /// Render the code for a prescription as an SVG data URI
    pub fn generate(&self, uid: &str) -> Result<ScannableCode> {
        if uid.is_empty() {
            return Err(Error::invalid_input("uid must not be empty"));
        }

        let url = self.url_for(uid);
        let code = QrCode::new(url.as_bytes())
            .map_err(|e| Error::CodeGeneration(format!("{}: {}", url, e)))?;

        let image = code
            .render::<svg::Color>()
            .min_dimensions(200, 200)
            .build();

        Ok(ScannableCode {
            data_uri: format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)),
            url,
        })
    }
}
