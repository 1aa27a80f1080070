//! Markdown to PDF rendering through sanitized HTML and an external converter.

use std::{
    collections::HashSet,
    io::{ErrorKind, Write},
    path::PathBuf,
    process::Stdio,
    time::Instant,
};

use ammonia::Builder as AmmoniaBuilder;
use async_trait::async_trait;
use comrak::{
    Arena, format_html,
    options::{ListStyleType, Options},
    parse_document,
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::application::collaborators::{CollaboratorError, DocumentRenderer};

pub const DEFAULT_PDF_CLI_PATH: &str = "wkhtmltopdf";

const DEFAULT_STYLESHEET: &str = "\
body { font-family: serif; font-size: 12pt; line-height: 1.5; margin: 2cm; }
h1, h2, h3 { font-family: sans-serif; }
pre, code { font-family: monospace; font-size: 10pt; }
pre { background: #f4f4f4; padding: 0.5em; white-space: pre-wrap; }
table { border-collapse: collapse; }
th, td { border: 1px solid #999; padding: 0.25em 0.5em; }
";

#[derive(Debug, Error)]
pub enum PdfRenderError {
    #[error("failed to format markdown: {0}")]
    Markdown(String),
    #[error("failed to write temporary file: {0}")]
    Io(std::io::Error),
    #[error("PDF converter unavailable: {0}")]
    NotFound(std::io::Error),
    #[error("PDF converter failed (exit {exit_code:?}): {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("PDF converter produced no output")]
    EmptyOutput,
    #[error("failed to read rendered PDF: {0}")]
    Read(std::io::Error),
}

impl From<PdfRenderError> for CollaboratorError {
    fn from(err: PdfRenderError) -> Self {
        CollaboratorError::render(err.to_string())
    }
}

/// Renders markdown to HTML with `comrak`, sanitizes it with `ammonia`, and
/// converts the resulting page with an HTML-to-PDF command line tool invoked
/// as `<cli> <input.html> <output.pdf>`.
#[derive(Debug, Clone)]
pub struct HtmlPdfRenderer {
    cli_path: PathBuf,
    stylesheet: String,
}

impl HtmlPdfRenderer {
    pub fn new(cli_path: PathBuf, stylesheet: Option<String>) -> Self {
        Self {
            cli_path,
            stylesheet: stylesheet.unwrap_or_else(|| DEFAULT_STYLESHEET.to_string()),
        }
    }

    /// The complete HTML page handed to the converter.
    pub fn render_page(&self, markdown: &str) -> Result<String, PdfRenderError> {
        let body = markdown_to_safe_html(markdown)?;
        Ok(format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n{}</style>\n</head>\n<body>\n{}</body>\n</html>\n",
            self.stylesheet, body
        ))
    }

    async fn convert(&self, html: &str) -> Result<Vec<u8>, PdfRenderError> {
        let started_at = Instant::now();

        let mut input_file = tempfile::Builder::new()
            .suffix(".html")
            .tempfile()
            .map_err(PdfRenderError::Io)?;
        input_file
            .write_all(html.as_bytes())
            .map_err(PdfRenderError::Io)?;
        input_file.flush().map_err(PdfRenderError::Io)?;

        let output_file: NamedTempFile = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile()
            .map_err(PdfRenderError::Io)?;

        let output = Command::new(&self.cli_path)
            .arg(input_file.path())
            .arg(output_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| {
                warn!(
                    target = "infra::render",
                    op = "pdf::convert",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn_cli",
                    error = %err,
                    "Failed to spawn PDF converter"
                );
                if err.kind() == ErrorKind::NotFound {
                    PdfRenderError::NotFound(err)
                } else {
                    PdfRenderError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "infra::render",
                op = "pdf::convert",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "pdf_cli",
                stderr = %stderr,
                "PDF converter failed"
            );
            return Err(PdfRenderError::Cli { exit_code, stderr });
        }

        let pdf = tokio::fs::read(output_file.path())
            .await
            .map_err(PdfRenderError::Read)?;
        if pdf.is_empty() {
            return Err(PdfRenderError::EmptyOutput);
        }

        info!(
            target = "infra::render",
            op = "pdf::convert",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            html_bytes = html.len(),
            pdf_bytes = pdf.len(),
            "Document rendered"
        );
        Ok(pdf)
    }
}

#[async_trait]
impl DocumentRenderer for HtmlPdfRenderer {
    async fn render(&self, markdown: &str) -> Result<Vec<u8>, CollaboratorError> {
        let page = self.render_page(markdown)?;
        Ok(self.convert(&page).await?)
    }
}

fn markdown_to_safe_html(markdown: &str) -> Result<String, PdfRenderError> {
    let options = markdown_options();
    let arena = Arena::new();
    let root = parse_document(&arena, markdown, &options);

    let mut html = String::new();
    format_html(root, &options, &mut html)
        .map_err(|err| PdfRenderError::Markdown(err.to_string()))?;

    Ok(sanitizer().clean(&html).to_string())
}

fn markdown_options() -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.superscript = true;
    ext.subscript = true;
    ext.footnotes = true;
    ext.description_lists = true;

    let render = &mut options.render;
    render.github_pre_lang = true;
    render.list_style = ListStyleType::Dash;
    render.r#unsafe = false;

    options
}

fn sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = HashSet::from([
        "a",
        "blockquote",
        "br",
        "code",
        "dd",
        "del",
        "div",
        "dl",
        "dt",
        "em",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "hr",
        "img",
        "input",
        "li",
        "ol",
        "p",
        "pre",
        "section",
        "span",
        "strong",
        "sub",
        "sup",
        "table",
        "tbody",
        "td",
        "th",
        "thead",
        "tr",
        "ul",
    ]);
    builder.tags(tags);

    builder.add_generic_attributes(&["id", "data-footnotes", "data-footnote-ref"]);
    builder.add_tag_attributes("img", &["alt", "title", "width", "height"]);
    builder.add_tag_attributes("input", &["type", "checked", "disabled"]);
    builder.add_tag_attributes("code", &["class"]);
    builder.add_tag_attributes("pre", &["lang"]);
    builder.add_tag_attributes("th", &["align"]);
    builder.add_tag_attributes("td", &["align"]);
    builder
}
