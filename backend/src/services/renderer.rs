//! Document rendering
//!
//! [`DocumentRenderer`] turns a typed [`RenderPayload`] into a file named by the
//! artifact namer. [`PdfRenderer`] writes plain PDF 1.4 text pages: a company
//! header, the document heading, one line per item and the totals.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shared::ArtifactKind;

use crate::config::CompanyConfig;
use crate::error::{AppError, AppResult};

/// Page geometry in PDF points
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageSize {
    A4,
    /// 7 x 4 cm label
    Label7x4,
    /// 7 x 5 cm label
    Label7x5,
}

impl PageSize {
    pub fn for_eticket(size: &str) -> AppResult<Self> {
        match size {
            "7x4" => Ok(PageSize::Label7x4),
            "7x5" => Ok(PageSize::Label7x5),
            other => Err(AppError::InvalidPayload(format!("unknown eticket size: {}", other))),
        }
    }

    fn dimensions(&self) -> (f32, f32) {
        match self {
            PageSize::A4 => (595.0, 842.0),
            PageSize::Label7x4 => (198.4, 113.4),
            PageSize::Label7x5 => (198.4, 141.7),
        }
    }

    fn font_size(&self) -> f32 {
        match self {
            PageSize::A4 => 10.0,
            _ => 6.5,
        }
    }

    fn margin(&self) -> f32 {
        match self {
            PageSize::A4 => 40.0,
            _ => 8.0,
        }
    }

    fn leading(&self) -> f32 {
        self.font_size() * 1.4
    }

    fn lines_per_page(&self) -> usize {
        let (_, height) = self.dimensions();
        (((height - 2.0 * self.margin()) / self.leading()).floor() as usize).max(1)
    }
}

/// Everything a renderer needs to lay out one document
#[derive(Debug, Clone)]
pub struct RenderPayload {
    pub kind: ArtifactKind,
    pub page: PageSize,
    pub title: String,
    /// Label/value pairs printed under the title (number, date, parties)
    pub header: Vec<(String, String)>,
    pub lines: Vec<String>,
    pub totals: Vec<(String, String)>,
    /// Company header lines are skipped on labels
    pub with_company_header: bool,
}

impl RenderPayload {
    pub fn document(kind: ArtifactKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            page: PageSize::A4,
            title: title.into(),
            header: Vec::new(),
            lines: Vec::new(),
            totals: Vec::new(),
            with_company_header: true,
        }
    }

    pub fn field(mut self, label: &str, value: impl ToString) -> Self {
        self.header.push((label.to_string(), value.to_string()));
        self
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn total(mut self, label: &str, value: impl ToString) -> Self {
        self.totals.push((label.to_string(), value.to_string()));
        self
    }
}

/// Renders payloads to files under a per-kind directory
pub trait DocumentRenderer: Send + Sync {
    /// Write `payload` as `file_name` and return its path
    fn render(&self, payload: &RenderPayload, file_name: &str) -> AppResult<PathBuf>;

    /// Where an artifact of `kind` named `file_name` lives
    fn path_of(&self, kind: ArtifactKind, file_name: &str) -> PathBuf;
}

/// Render on the blocking pool; renderers write files synchronously
pub async fn render_blocking(
    renderer: Arc<dyn DocumentRenderer>,
    payload: RenderPayload,
    file_name: String,
) -> AppResult<PathBuf> {
    tokio::task::spawn_blocking(move || renderer.render(&payload, &file_name))
        .await
        .map_err(|e| AppError::Render(e.to_string()))?
}

/// Plain-text PDF renderer
#[derive(Debug, Clone)]
pub struct PdfRenderer {
    pdf_dir: PathBuf,
    company: CompanyConfig,
}

impl PdfRenderer {
    pub fn new(pdf_dir: &Path, company: CompanyConfig) -> Self {
        Self {
            pdf_dir: pdf_dir.to_path_buf(),
            company,
        }
    }

    fn text_lines(&self, payload: &RenderPayload) -> Vec<String> {
        let mut out = Vec::new();
        if payload.with_company_header {
            let c = &self.company;
            for line in [&c.name, &c.address, &c.phone, &c.slogan] {
                if !line.is_empty() {
                    out.push(line.clone());
                }
            }
            if !c.pharmacist.is_empty() {
                out.push(format!(
                    "Pharmacist: {} ({})",
                    c.pharmacist, c.pharmacist_license_number
                ));
            }
            out.push(String::new());
        }
        out.push(payload.title.clone());
        for (label, value) in &payload.header {
            out.push(format!("{}: {}", label, value));
        }
        if !payload.lines.is_empty() {
            out.push(String::new());
            out.extend(payload.lines.iter().cloned());
        }
        if !payload.totals.is_empty() {
            out.push(String::new());
            for (label, value) in &payload.totals {
                out.push(format!("{}: {}", label, value));
            }
        }
        out
    }
}

impl DocumentRenderer for PdfRenderer {
    fn render(&self, payload: &RenderPayload, file_name: &str) -> AppResult<PathBuf> {
        let dir = self.pdf_dir.join(payload.kind.directory());
        create_artifact_dir(&dir).map_err(|e| AppError::Render(e.to_string()))?;

        let bytes = build_pdf(&self.text_lines(payload), payload.page);
        let path = dir.join(file_name);
        std::fs::write(&path, bytes).map_err(|e| AppError::Render(e.to_string()))?;

        tracing::debug!("rendered {}", path.display());
        Ok(path)
    }

    fn path_of(&self, kind: ArtifactKind, file_name: &str) -> PathBuf {
        self.pdf_dir.join(kind.directory()).join(file_name)
    }
}

#[cfg(unix)]
fn create_artifact_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o744)
        .create(dir)
}

#[cfg(not(unix))]
fn create_artifact_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

/// Escape a line for a PDF string literal; non-ASCII becomes `?`
fn pdf_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

/// Lay `lines` out top to bottom with Helvetica, paginating as needed
fn build_pdf(lines: &[String], page: PageSize) -> Vec<u8> {
    let (width, height) = page.dimensions();
    let per_page = page.lines_per_page();
    let chunks: Vec<&[String]> = if lines.is_empty() {
        vec![&[]]
    } else {
        lines.chunks(per_page).collect()
    };

    // 1 catalog, 2 pages, 3 font, then a page/content pair per page
    let page_ids: Vec<usize> = (0..chunks.len()).map(|i| 4 + i * 2).collect();
    let mut objects: Vec<String> = Vec::new();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        page_ids
            .iter()
            .map(|id| format!("{} 0 R", id))
            .collect::<Vec<_>>()
            .join(" "),
        chunks.len()
    ));
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());

    for (chunk, page_id) in chunks.iter().zip(&page_ids) {
        let mut stream = String::new();
        let _ = write!(
            stream,
            "BT /F1 {:.1} Tf {:.1} TL {:.1} {:.1} Td",
            page.font_size(),
            page.leading(),
            page.margin(),
            height - page.margin() - page.font_size()
        );
        for line in chunk.iter() {
            let _ = write!(stream, " ({}) Tj T*", pdf_escape(line));
        }
        stream.push_str(" ET");

        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.1} {:.1}] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            width,
            height,
            page_id + 1
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            stream.len(),
            stream
        ));
    }

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        let _ = write!(out, "{} 0 obj\n{}\nendobj\n", i + 1, body);
    }
    let xref_at = out.len();
    let _ = write!(out, "xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        let _ = write!(out, "{:010} 00000 n \n", offset);
    }
    let _ = write!(
        out,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_at
    );
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(pdf_escape("a(b)c\\"), "a\\(b\\)c\\\\");
        assert_eq!(pdf_escape("obé"), "ob?");
    }

    #[test]
    fn test_pdf_structure() {
        let bytes = build_pdf(&["hello".to_string()], PageSize::A4);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.contains("(hello) Tj"));
        assert!(text.trim_end().ends_with("%%EOF"));
        assert!(text.contains("/Count 1"));
    }

    #[test]
    fn test_long_documents_paginate() {
        let lines: Vec<String> = (0..200).map(|i| format!("line {}", i)).collect();
        let text = String::from_utf8(build_pdf(&lines, PageSize::A4)).unwrap();
        let expected = 200usize.div_ceil(PageSize::A4.lines_per_page());
        assert!(expected > 1);
        assert!(text.contains(&format!("/Count {}", expected)));
    }

    #[test]
    fn test_eticket_sizes() {
        assert_eq!(PageSize::for_eticket("7x4").unwrap(), PageSize::Label7x4);
        assert_eq!(PageSize::for_eticket("7x5").unwrap(), PageSize::Label7x5);
        assert!(PageSize::for_eticket("9x9").is_err());
    }

    #[test]
    fn test_render_writes_into_kind_directory() {
        let root = std::env::temp_dir().join(format!("pdf-{}", shared::random_alphanumeric(8)));
        let renderer = PdfRenderer::new(&root, CompanyConfig::default());
        let payload = RenderPayload::document(ArtifactKind::Production, "Production")
            .field("Number", 3)
            .line("TONIC 20 BOT")
            .total("Total Cost", "150.00");

        let path = renderer.render(&payload, "prod-aaaaaaaa-bbbbbbbb.pdf").unwrap();
        assert_eq!(
            path,
            renderer.path_of(ArtifactKind::Production, "prod-aaaaaaaa-bbbbbbbb.pdf")
        );
        assert!(std::fs::read(&path).unwrap().starts_with(b"%PDF-1.4"));
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_render_blocking_reports_render_errors() {
        let root = std::env::temp_dir().join(format!("pdf-{}", shared::random_alphanumeric(8)));
        std::fs::write(&root, b"not a directory").unwrap();
        let renderer: Arc<dyn DocumentRenderer> =
            Arc::new(PdfRenderer::new(&root, CompanyConfig::default()));
        let payload = RenderPayload::document(ArtifactKind::Invoice, "Invoice").field("Number", 1);

        let err = render_blocking(renderer, payload, "i-aaaaaaaa-bbbbbbbb.pdf".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Render(_)));
        let _ = std::fs::remove_file(root);
    }
}
