mod error;

pub use error::{Error, Result};

use std::{
	io::{Cursor, Read},
	panic::{self, AssertUnwindSafe},
	path::Path,
};

use serde::{Deserialize, Serialize};

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const DOCX_BODY_PART: &str = "word/document.xml";

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
	Pdf,
	Docx,
	Text,
	Markdown,
}
impl DocumentKind {
	pub fn as_str(self) -> &'static str {
		match self {
			DocumentKind::Pdf => "pdf",
			DocumentKind::Docx => "docx",
			DocumentKind::Text => "text",
			DocumentKind::Markdown => "markdown",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"pdf" => Some(DocumentKind::Pdf),
			"docx" => Some(DocumentKind::Docx),
			"text" => Some(DocumentKind::Text),
			"markdown" => Some(DocumentKind::Markdown),
			_ => None,
		}
	}

	pub fn mime_type(self) -> &'static str {
		match self {
			DocumentKind::Pdf => "application/pdf",
			DocumentKind::Docx => DOCX_MIME,
			DocumentKind::Text => "text/plain",
			DocumentKind::Markdown => "text/markdown",
		}
	}
}

/// Detects the document kind from the declared MIME type, falling back to the file extension.
pub fn detect_kind(content_type: Option<&str>, file_name: &str) -> Result<DocumentKind> {
	if let Some(kind) = content_type.and_then(kind_from_mime) {
		return Ok(kind);
	}

	let extension = Path::new(file_name)
		.extension()
		.and_then(|ext| ext.to_str())
		.map(|ext| ext.to_ascii_lowercase());

	match extension.as_deref() {
		Some("pdf") => Ok(DocumentKind::Pdf),
		Some("docx") => Ok(DocumentKind::Docx),
		Some("txt") => Ok(DocumentKind::Text),
		Some("md" | "markdown") => Ok(DocumentKind::Markdown),
		_ => Err(Error::UnsupportedType { file_name: file_name.to_string() }),
	}
}

/// Extracts normalized plain text from a document body.
pub fn extract_text(kind: DocumentKind, bytes: &[u8]) -> Result<String> {
	let raw = match kind {
		DocumentKind::Pdf => extract_pdf(bytes)?,
		DocumentKind::Docx => extract_docx(bytes)?,
		DocumentKind::Text | DocumentKind::Markdown =>
			String::from_utf8_lossy(bytes).trim_start_matches('\u{feff}').to_string(),
	};
	let text = normalize_text(&raw);

	if text.is_empty() {
		return Err(Error::Empty);
	}

	Ok(text)
}

/// Trims every line and collapses runs of blank lines into one.
pub fn normalize_text(raw: &str) -> String {
	let unified = raw.replace("\r\n", "\n").replace(['\r', '\u{c}'], "\n");
	let mut out = String::with_capacity(unified.len());
	let mut pending_blank = false;

	for line in unified.lines() {
		let line = line.trim();

		if line.is_empty() {
			pending_blank = !out.is_empty();

			continue;
		}
		if !out.is_empty() {
			out.push('\n');

			if pending_blank {
				out.push('\n');
			}
		}

		pending_blank = false;

		out.push_str(line);
	}

	out
}

fn kind_from_mime(content_type: &str) -> Option<DocumentKind> {
	let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();

	match essence.as_str() {
		"application/pdf" => Some(DocumentKind::Pdf),
		DOCX_MIME => Some(DocumentKind::Docx),
		"text/plain" => Some(DocumentKind::Text),
		"text/markdown" | "text/x-markdown" => Some(DocumentKind::Markdown),
		_ => None,
	}
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
	// pdf-extract panics on some malformed inputs.
	match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
		Ok(Ok(text)) => Ok(text),
		Ok(Err(err)) => Err(Error::Pdf { message: err.to_string() }),
		Err(_) => {
			tracing::warn!("PDF parser panicked while extracting text.");

			Err(Error::Pdf { message: "PDF parser aborted on malformed input.".to_string() })
		},
	}
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
	let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
	let mut xml = String::new();

	archive.by_name(DOCX_BODY_PART)?.read_to_string(&mut xml)?;

	Ok(docx_body_text(&xml))
}

/// Joins `<w:t>` runs per `<w:p>` paragraph, one paragraph per line.
fn docx_body_text(xml: &str) -> String {
	let mut out = String::new();
	let mut paragraph = String::new();
	let mut rest = xml;

	while let Some(open) = rest.find('<') {
		let after = &rest[open + 1..];
		let Some(close) = after.find('>') else {
			break;
		};
		let tag = &after[..close];

		rest = &after[close + 1..];

		let (closing, body) = match tag.strip_prefix('/') {
			Some(body) => (true, body),
			None => (false, tag),
		};
		let self_closing = body.ends_with('/');
		let name = body.split(|c: char| c.is_whitespace() || c == '/').next().unwrap_or_default();

		match (closing, name) {
			(false, "w:t") if !self_closing =>
				if let Some(end) = rest.find("</w:t>") {
					paragraph.push_str(&unescape_xml(&rest[..end]));

					rest = &rest[end + "</w:t>".len()..];
				},
			(false, "w:tab") => paragraph.push('\t'),
			(false, "w:br" | "w:cr") => paragraph.push('\n'),
			(true, "w:p") => flush_paragraph(&mut out, &mut paragraph),
			(false, "w:p") if self_closing => flush_paragraph(&mut out, &mut paragraph),
			_ => {},
		}
	}

	flush_paragraph(&mut out, &mut paragraph);

	out
}

fn flush_paragraph(out: &mut String, paragraph: &mut String) {
	if !out.is_empty() {
		out.push('\n');
	}

	out.push_str(paragraph);
	paragraph.clear();
}

fn unescape_xml(raw: &str) -> String {
	if !raw.contains('&') {
		return raw.to_string();
	}

	let mut out = String::with_capacity(raw.len());
	let mut rest = raw;

	while let Some(amp) = rest.find('&') {
		out.push_str(&rest[..amp]);

		let entity_rest = &rest[amp..];
		let decoded = entity_rest.find(';').and_then(|semi| {
			let entity = &entity_rest[1..semi];
			let ch = match entity {
				"lt" => Some('<'),
				"gt" => Some('>'),
				"amp" => Some('&'),
				"quot" => Some('"'),
				"apos" => Some('\''),
				_ => entity
					.strip_prefix("#x")
					.or_else(|| entity.strip_prefix("#X"))
					.and_then(|hex| u32::from_str_radix(hex, 16).ok())
					.or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
					.and_then(char::from_u32),
			};

			ch.map(|ch| (ch, semi))
		});

		match decoded {
			Some((ch, semi)) => {
				out.push(ch);

				rest = &entity_rest[semi + 1..];
			},
			None => {
				out.push('&');

				rest = &entity_rest[1..];
			},
		}
	}

	out.push_str(rest);

	out
}
