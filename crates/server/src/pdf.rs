//! Quote document rendering.
//!
//! The HTML comes from an embedded `tera` template. When `wkhtmltopdf` is
//! enabled and found on `PATH` the HTML is converted to PDF; otherwise the HTML
//! itself is returned so the browser can print it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{error, info, warn};
use uuid::Uuid;

use devis_core::document::QuoteDocument;

const QUOTE_TEMPLATE: &str = "quote.html.tera";

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("template error: {0}")]
    Template(#[from] tera::Error),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct DocumentRenderer {
    tera: Tera,
    wkhtmltopdf_path: Option<PathBuf>,
}

impl DocumentRenderer {
    /// Loads the embedded template and, when `convert_to_pdf` is set, looks up
    /// `wkhtmltopdf`.
    pub fn new(convert_to_pdf: bool) -> Result<Self, DocumentError> {
        let mut renderer = Self::html_only()?;
        if !convert_to_pdf {
            return Ok(renderer);
        }

        match which::which("wkhtmltopdf") {
            Ok(path) => {
                info!(
                    event_name = "document.renderer.converter_found",
                    path = %path.display(),
                    "wkhtmltopdf found"
                );
                renderer.wkhtmltopdf_path = Some(path);
            }
            Err(_) => warn!(
                event_name = "document.renderer.converter_missing",
                "wkhtmltopdf not found in PATH; quote documents will be served as printable HTML"
            ),
        }
        Ok(renderer)
    }

    pub fn html_only() -> Result<Self, DocumentError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![".html.tera", ".html"]);
        tera.add_raw_template(
            QUOTE_TEMPLATE,
            include_str!("../../../templates/quotes/quote.html.tera"),
        )?;
        Ok(Self { tera, wkhtmltopdf_path: None })
    }

    pub fn converts_to_pdf(&self) -> bool {
        self.wkhtmltopdf_path.is_some()
    }

    pub fn render_html(&self, document: &QuoteDocument) -> Result<String, DocumentError> {
        let mut context = Context::new();
        context.insert("quote", document);
        Ok(self.tera.render(QUOTE_TEMPLATE, &context)?)
    }

    /// PDF bytes when conversion is available and succeeds, HTML otherwise.
    pub async fn render(&self, document: &QuoteDocument) -> Result<RenderedDocument, DocumentError> {
        let html = self.render_html(document)?;

        let Some(wkhtmltopdf) = self.wkhtmltopdf_path.as_deref() else {
            return Ok(RenderedDocument::Html(html));
        };

        match convert_html_to_pdf(&html, wkhtmltopdf).await {
            Ok(bytes) => Ok(RenderedDocument::Pdf(bytes)),
            Err(error) => {
                warn!(
                    event_name = "document.renderer.conversion_failed",
                    quote_number = %document.number,
                    error = %error,
                    "PDF conversion failed, falling back to HTML"
                );
                Ok(RenderedDocument::Html(html))
            }
        }
    }
}

async fn convert_html_to_pdf(html: &str, wkhtmltopdf: &Path) -> Result<Vec<u8>, DocumentError> {
    let scratch = std::env::temp_dir();
    let stem = Uuid::new_v4().simple().to_string();
    let html_path = scratch.join(format!("devis_{stem}.html"));
    let pdf_path = scratch.join(format!("devis_{stem}.pdf"));

    tokio::fs::write(&html_path, html).await?;

    let output = Command::new(wkhtmltopdf)
        .args(["--page-size", "A4", "--encoding", "utf-8", "--quiet"])
        .args(["--margin-top", "10mm", "--margin-bottom", "10mm"])
        .args(["--margin-left", "10mm", "--margin-right", "10mm"])
        .arg(&html_path)
        .arg(&pdf_path)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    let result = match output {
        Ok(output) if output.status.success() => tokio::fs::read(&pdf_path).await.map_err(Into::into),
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            error!(event_name = "document.renderer.wkhtmltopdf_failed", stderr = %stderr, "wkhtmltopdf failed");
            Err(DocumentError::Conversion(stderr))
        }
        Err(error) => Err(error.into()),
    };

    let _ = tokio::fs::remove_file(&html_path).await;
    let _ = tokio::fs::remove_file(&pdf_path).await;
    result
}

pub enum RenderedDocument {
    Pdf(Vec<u8>),
    Html(String),
}

impl RenderedDocument {
    /// PDFs are served as attachments named `file_name`; HTML is served inline.
    pub fn into_response(self, file_name: &str) -> Response {
        match self {
            Self::Pdf(bytes) => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/pdf".to_string()),
                    (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
                ],
                bytes,
            )
                .into_response(),
            Self::Html(html) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8".to_string())],
                html,
            )
                .into_response(),
        }
    }
}
