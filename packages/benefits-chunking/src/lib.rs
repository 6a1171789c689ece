use unicode_segmentation::UnicodeSegmentation;

#[derive(Clone, Debug)]
pub struct ChunkingConfig {
	pub chunk_chars: u32,
	pub overlap_chars: u32,
}

#[derive(Clone, Debug)]
pub struct Chunk {
	pub chunk_index: i32,
	/// Byte offsets into the source text; `text == source[start_offset..end_offset]`.
	pub start_offset: usize,
	pub end_offset: usize,
	pub text: String,
}

/// Splits text into windows of at most `chunk_chars` grapheme clusters.
///
/// A window end is pulled back to whitespace found in the final fifth of the window so words are
/// not cut in half. Consecutive windows share `overlap_chars` graphemes.
pub fn split_text(text: &str, cfg: &ChunkingConfig) -> Vec<Chunk> {
	let size = cfg.chunk_chars as usize;

	if size == 0 {
		tracing::warn!("Chunk size is zero. Nothing to split.");

		return Vec::new();
	}

	let graphemes: Vec<(usize, &str)> = text.grapheme_indices(true).collect();
	let total = graphemes.len();
	let byte_at = |idx: usize| graphemes.get(idx).map(|(offset, _)| *offset).unwrap_or(text.len());
	let overlap = cfg.overlap_chars as usize;
	let mut chunks = Vec::new();
	let mut start = 0_usize;
	let mut chunk_index = 0_i32;

	while start < total {
		let mut end = (start + size).min(total);

		if end < total {
			let floor = (end - size / 5).max(start + 1);

			if let Some(boundary) = (floor..=end).rev().find(|idx| is_whitespace(graphemes[*idx].1)) {
				end = boundary;
			}
		}

		let start_byte = byte_at(start);
		let end_byte = byte_at(end);
		let window = &text[start_byte..end_byte];
		let trimmed = window.trim();

		if !trimmed.is_empty() {
			let leading = window.len() - window.trim_start().len();

			chunks.push(Chunk {
				chunk_index,
				start_offset: start_byte + leading,
				end_offset: start_byte + leading + trimmed.len(),
				text: trimmed.to_string(),
			});

			chunk_index += 1;
		}
		if end >= total {
			break;
		}

		start = end.saturating_sub(overlap).max(start + 1);
	}

	chunks
}

fn is_whitespace(grapheme: &str) -> bool {
	grapheme.chars().all(char::is_whitespace)
}
