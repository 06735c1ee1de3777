use crate::config::ChunkingConfig;
use crate::error::{ErrorKind, PipelineError};
use crate::models::{Chunk, Page};
use regex::Regex;
use std::collections::VecDeque;
use std::sync::OnceLock;

/// Collapses horizontal whitespace and runs of blank lines, keeping
/// paragraph and line breaks intact for the splitter.
pub fn normalize_text(text: &str) -> String {
    static HORIZONTAL: OnceLock<Regex> = OnceLock::new();
    static BLANK_LINES: OnceLock<Regex> = OnceLock::new();

    let horizontal = HORIZONTAL.get_or_init(|| Regex::new(r"[ \t\u{a0}\r]+").expect("valid regex"));
    let blank_lines = BLANK_LINES.get_or_init(|| Regex::new(r"\n( ?\n)+").expect("valid regex"));

    let collapsed = horizontal.replace_all(text, " ");
    let lines = collapsed
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    blank_lines.replace_all(&lines, "\n\n").trim().to_string()
}

/// Splits pages into overlapping chunks, numbering them in reading order.
pub fn chunk_pages(pages: &[Page], config: &ChunkingConfig) -> Result<Vec<Chunk>, PipelineError> {
    if config.size == 0 || config.overlap >= config.size {
        return Err(PipelineError::invalid_config(format!(
            "invalid chunking config: size={} overlap={}",
            config.size, config.overlap
        )));
    }

    let splitter = Splitter { config };
    let mut chunks = Vec::new();
    let mut cursor = 0u64;

    for page in pages {
        for text in splitter.split(&page.text, &config.separators) {
            chunks.push(Chunk {
                text,
                source_page: page.number,
                chunk_index: cursor,
            });
            cursor += 1;
        }
    }

    if chunks.is_empty() {
        return Err(PipelineError::new(
            ErrorKind::EmptyInput,
            "document yielded no extractable chunks",
        ));
    }

    Ok(chunks)
}

struct Splitter<'a> {
    config: &'a ChunkingConfig,
}

impl Splitter<'_> {
    fn split(&self, text: &str, separators: &[String]) -> Vec<String> {
        let (separator, remaining) = pick_separator(text, separators);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(index, ch)| &text[index..index + ch.len_utf8()])
                .collect()
        } else {
            text.split(separator.as_str()).collect()
        };

        let mut output = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in pieces.into_iter().filter(|piece| !piece.is_empty()) {
            if char_len(piece) < self.config.size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                output.extend(self.merge(&fitting, &separator));
                fitting.clear();
            }

            if remaining.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    output.push(trimmed.to_string());
                }
            } else {
                output.extend(self.split(piece, remaining));
            }
        }

        if !fitting.is_empty() {
            output.extend(self.merge(&fitting, &separator));
        }

        output
    }

    /// Greedily packs pieces up to `size`, carrying up to `overlap`
    /// characters of trailing pieces into the next chunk.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let size = self.config.size;
        let overlap = self.config.overlap;
        let separator_len = char_len(separator);

        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joiner = if window.is_empty() { 0 } else { separator_len };

            if total + len + joiner > size && !window.is_empty() {
                push_joined(&mut chunks, &window, separator);

                while total > overlap
                    || (total > 0 && total + len + joiner_for(&window, separator_len) > size)
                {
                    let Some((_, removed)) = window.pop_front() else {
                        break;
                    };
                    total -= removed + if window.is_empty() { 0 } else { separator_len };
                }
            }

            let joiner = joiner_for(&window, separator_len);
            window.push_back((piece, len));
            total += len + joiner;
        }

        push_joined(&mut chunks, &window, separator);
        chunks
    }
}

fn pick_separator<'s>(text: &str, separators: &'s [String]) -> (String, &'s [String]) {
    for (position, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return (String::new(), &[]);
        }
        if text.contains(separator.as_str()) {
            return (separator.clone(), &separators[position + 1..]);
        }
    }

    match separators.last() {
        Some(last) => (last.clone(), &[]),
        None => (String::new(), &[]),
    }
}

fn joiner_for(window: &VecDeque<(&str, usize)>, separator_len: usize) -> usize {
    if window.is_empty() {
        0
    } else {
        separator_len
    }
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>, separator: &str) {
    let joined = window
        .iter()
        .map(|(piece, _)| *piece)
        .collect::<Vec<_>>()
        .join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            size,
            overlap,
            ..ChunkingConfig::default()
        }
    }

    fn page(number: u32, text: &str) -> Page {
        Page {
            number,
            text: text.to_string(),
        }
    }

    fn sample_text(words: usize, seed: usize) -> String {
        const VOCAB: [&str; 8] = [
            "chlorophyll", "light", "energy", "glucose", "leaf", "carbon", "water", "cell",
        ];
        let mut text = String::new();
        for index in 0..words {
            if index > 0 {
                text.push(if index % 40 == 0 { '\n' } else { ' ' });
            }
            text.push_str(VOCAB[(index * 7 + seed) % VOCAB.len()]);
        }
        text
    }

    #[test]
    fn text_is_normalized_without_losing_paragraphs() {
        let input = "A  \t  lot\nof   spacing\n\n\n\nNext\u{a0}para";
        assert_eq!(normalize_text(input), "A lot\nof spacing\n\nNext para");
    }

    #[test]
    fn short_page_is_a_single_chunk() {
        let chunks = chunk_pages(&[page(1, "Cells divide.")], &config(100, 10)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Cells divide.");
        assert_eq!(chunks[0].source_page, 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn paragraph_breaks_are_preferred() {
        let text = format!("{}\n\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = chunk_pages(&[page(1, &text)], &config(40, 5)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "a".repeat(30));
        assert_eq!(chunks[1].text, "b".repeat(30));
    }

    #[test]
    fn no_chunk_exceeds_the_size() {
        let text = sample_text(900, 3);
        for (size, overlap) in [(50, 10), (120, 30), (1_000, 200)] {
            let chunks = chunk_pages(&[page(1, &text)], &config(size, overlap)).unwrap();
            assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= size));
        }
    }

    #[test]
    fn long_token_falls_back_to_characters() {
        let token = "x".repeat(95);
        let chunks = chunk_pages(&[page(1, &token)], &config(40, 0)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= 40));
        assert_eq!(chunks.iter().map(|chunk| chunk.text.len()).sum::<usize>(), 95);
    }

    #[test]
    fn oversized_token_is_kept_whole_without_character_fallback() {
        let text = format!("short {} tail", "y".repeat(60));
        let cfg = ChunkingConfig {
            size: 20,
            overlap: 0,
            separators: vec![" ".to_string()],
        };
        let chunks = chunk_pages(&[page(1, &text)], &cfg).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text.len(), 60);
    }

    #[test]
    fn adjacent_chunks_share_overlap() {
        let text = (0..60).map(|n| format!("w{n:02}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk_pages(&[page(1, &text)], &config(40, 12)).unwrap();
        assert!(chunks.len() > 2);

        for pair in chunks.windows(2) {
            let previous: Vec<&str> = pair[0].text.split(' ').collect();
            let next: Vec<&str> = pair[1].text.split(' ').collect();
            let shared = previous
                .iter()
                .rev()
                .take_while(|word| next.contains(word))
                .count();
            assert!(shared > 0, "no overlap between {:?} and {:?}", pair[0], pair[1]);
            let carried = previous[previous.len() - shared..].join(" ");
            assert!(pair[1].text.starts_with(&carried));
            assert!(carried.chars().count() <= 12);
        }
    }

    #[test]
    fn indices_are_contiguous_across_pages() {
        let pages = vec![
            page(1, &sample_text(200, 1)),
            page(2, &sample_text(50, 2)),
            page(3, &sample_text(300, 5)),
        ];
        let chunks = chunk_pages(&pages, &config(200, 40)).unwrap();
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, position as u64);
        }
        let pages_seen: Vec<u32> = chunks.iter().map(|chunk| chunk.source_page).collect();
        let mut sorted = pages_seen.clone();
        sorted.sort_unstable();
        assert_eq!(pages_seen, sorted);
    }

    #[test]
    fn chunking_is_deterministic() {
        let pages: Vec<Page> = (1..=3)
            .map(|number| {
                let mut text = sample_text(400, number as usize);
                text.truncate(2_500);
                page(number, &text)
            })
            .collect();

        let first = chunk_pages(&pages, &config(1_000, 200)).unwrap();
        let second = chunk_pages(&pages, &config(1_000, 200)).unwrap();
        assert_eq!(first, second);
        assert!(first.len() >= 9);
    }

    #[test]
    fn blank_document_is_empty_input() {
        let error = chunk_pages(&[page(1, "  \n\n ")], &config(100, 10)).unwrap_err();
        assert_eq!(error.kind, ErrorKind::EmptyInput);
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        let error = chunk_pages(&[page(1, "text")], &config(10, 10)).unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidConfig);
    }
}
