//! File-type-aware text chunker.
//!
//! Splits source files into [`ChunkRecord`]s using one of three strategies:
//!
//! - **code** — split at definition boundaries (function, class, method),
//!   detected with a line-start pattern that covers the common languages.
//! - **markdown** — split at headers, so each section stays together.
//! - **text** — fixed-size line windows with overlap.
//!
//! All strategies respect a token ceiling (estimated at ~4 chars per token)
//! and carry line-range metadata. Chunk ids are UUID v5 over
//! `repository/path:start-end`, so re-chunking unchanged content is
//! idempotent.

use std::path::Path;

use regex::Regex;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::models::{ChunkKind, ChunkRecord};
use crate::traits::FileChunker;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Files larger than this are never treated as text.
pub const MAX_TEXT_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Extensions accepted as text content.
const TEXT_EXTENSIONS: &[&str] = &[
    // documentation
    "txt", "md", "rst", "adoc", "asciidoc",
    // web
    "html", "htm", "css", "scss", "sass", "less", "js", "jsx", "ts", "tsx", "vue", "svelte",
    // config
    "json", "xml", "yaml", "yml", "toml", "ini", "cfg", "conf", "properties", "env",
    "gitignore", "gitconfig", "gitattributes",
    // code
    "py", "java", "c", "cpp", "h", "hpp", "cs", "rb", "php", "go", "rs", "swift", "kt",
    "scala", "sh", "bash", "zsh", "fish", "sql", "graphql", "proto", "cmake", "mk",
    // structured data
    "csv", "tsv",
];

const CODE_EXTENSIONS: &[&str] = &[
    "py", "java", "c", "cpp", "h", "hpp", "cs", "js", "jsx", "ts", "tsx", "php", "rb", "go",
    "rs", "swift", "kt", "scala", "sh", "bash", "zsh", "sql",
];

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "rst", "txt", "html", "htm"];

/// True if the path's extension is on the text allowlist.
pub fn is_text_path(path: &str) -> bool {
    extension(path).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
}

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// True if a content sample looks binary: NUL bytes, or more than 10%
/// control characters outside the whitespace range.
fn looks_binary(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 9 || (b > 13 && b < 32))
        .count();
    control * 10 > sample.len()
}

/// Chunker for repository source files.
pub struct TextChunker {
    /// Line-count scale; a chunk holds at most `chunk_size / 10` lines.
    chunk_size: usize,
    /// Overlap scale; `chunk_overlap / 10` lines carry into the next chunk.
    chunk_overlap: usize,
    /// Hard token ceiling per chunk.
    max_tokens: usize,
    code_boundary: Regex,
    markdown_header: Regex,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, max_tokens: usize) -> Self {
        // Definition starts across the common languages. Not a parser; close
        // enough to keep related lines together.
        let code_boundary = Regex::new(
            r"^\s*(def|function|class|fn|impl|struct|enum|trait|public|private|protected|async|static)\s+\w+|^\s*[\w\*]+\s+[\w\*]+\s*\(.*\)|^\s*(var|let|const|pub)\s+\w+",
        )
        .expect("code boundary pattern is valid");
        let markdown_header = Regex::new(r"^#{1,6}\s+\S").expect("header pattern is valid");

        Self {
            chunk_size,
            chunk_overlap,
            max_tokens,
            code_boundary,
            markdown_header,
        }
    }

    fn estimate_tokens(text_len: usize) -> usize {
        text_len / CHARS_PER_TOKEN
    }

    /// Chunk already-decoded content using the strategy for `rel_path`'s
    /// extension.
    pub fn chunk_content(
        &self,
        content: &str,
        rel_path: &str,
        repository: &str,
    ) -> Vec<ChunkRecord> {
        let ext = extension(rel_path).unwrap_or_default();

        if CODE_EXTENSIONS.contains(&ext.as_str()) {
            self.chunk_lines(content, rel_path, repository, ChunkKind::Code, |line| {
                self.code_boundary.is_match(line)
            })
        } else if MARKDOWN_EXTENSIONS.contains(&ext.as_str()) {
            self.chunk_lines(content, rel_path, repository, ChunkKind::Markdown, |line| {
                self.markdown_header.is_match(line)
            })
        } else {
            self.chunk_lines(content, rel_path, repository, ChunkKind::Text, |_| false)
        }
    }

    /// Accumulate lines into chunks, flushing at strategy boundaries and at
    /// the size ceiling. Keeps `chunk_overlap / 10` trailing lines as context
    /// for the next chunk after a size flush.
    fn chunk_lines(
        &self,
        content: &str,
        rel_path: &str,
        repository: &str,
        kind: ChunkKind,
        is_boundary: impl Fn(&str) -> bool,
    ) -> Vec<ChunkRecord> {
        let max_lines = (self.chunk_size / 10).max(1);
        let overlap_lines = self.chunk_overlap / 10;
        let lines: Vec<&str> = content.lines().collect();

        let mut chunks = Vec::new();
        let mut section: Vec<&str> = Vec::new();
        let mut section_chars = 0usize;
        let mut section_start = 0usize;

        for (i, &line) in lines.iter().enumerate() {
            if is_boundary(line) && !section.is_empty() {
                chunks.push(self.make_chunk(
                    &section.join("\n"),
                    repository,
                    rel_path,
                    kind,
                    section_start,
                    i - 1,
                ));
                section.clear();
                section_chars = 0;
                section_start = i;
            }

            section.push(line);
            section_chars += line.len() + 1;

            if Self::estimate_tokens(section_chars) > self.max_tokens || section.len() >= max_lines
            {
                let end = section_start + section.len() - 1;
                chunks.push(self.make_chunk(
                    &section.join("\n"),
                    repository,
                    rel_path,
                    kind,
                    section_start,
                    end,
                ));

                // Keep a tail for context, always advancing past at least one
                // line so the loop makes progress.
                let keep = overlap_lines.min(section.len() - 1);
                section_start = section_start + section.len() - keep;
                section = section[section.len() - keep..].to_vec();
                section_chars = section.iter().map(|l| l.len() + 1).sum();
            }
        }

        if !section.is_empty() {
            let end = section_start + section.len() - 1;
            chunks.push(self.make_chunk(
                &section.join("\n"),
                repository,
                rel_path,
                kind,
                section_start,
                end,
            ));
        }

        chunks
    }

    fn make_chunk(
        &self,
        content: &str,
        repository: &str,
        rel_path: &str,
        kind: ChunkKind,
        start: usize,
        end: usize,
    ) -> ChunkRecord {
        let mut content = content.to_string();

        // Hard ceiling for the embedding model; truncate proportionally.
        let tokens = Self::estimate_tokens(content.len());
        if tokens > self.max_tokens {
            eprintln!(
                "Warning: truncating oversized chunk for {} ({} tokens > {})",
                rel_path, tokens, self.max_tokens
            );
            let lines: Vec<&str> = content.lines().collect();
            let keep = (lines.len() * self.max_tokens / tokens).max(1);
            content = lines[..keep].join("\n");
        }

        let start_line = (start + 1) as u32;
        let end_line = (end + 1) as u32;
        let id = Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            format!("{}/{}:{}-{}", repository, rel_path, start_line, end_line).as_bytes(),
        )
        .to_string();

        ChunkRecord {
            id,
            repository: repository.to_string(),
            file_path: rel_path.to_string(),
            kind,
            start_line: Some(start_line),
            end_line: Some(end_line),
            content,
            embedding: None,
        }
    }
}

impl FileChunker for TextChunker {
    fn chunk_file(
        &self,
        path: &Path,
        rel_path: &str,
        repository: &str,
    ) -> Result<Vec<ChunkRecord>> {
        let bytes = std::fs::read(path)?;

        let sample_len = bytes.len().min(1024);
        if looks_binary(&bytes[..sample_len]) {
            return Err(Error::decode(rel_path, "content looks binary"));
        }

        // Non-UTF-8 text (typically latin-1) is salvaged lossily rather than
        // dropped.
        let content = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };

        Ok(self.chunk_content(&content, rel_path, repository))
    }

    fn chunk_tree(&self, root: &Path, repository: &str) -> Result<Vec<ChunkRecord>> {
        let mut chunks = Vec::new();

        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|e| Error::Chunk(format!("walk failed: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            if !is_text_path(&rel) {
                continue;
            }
            if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_TEXT_FILE_SIZE {
                eprintln!("Skipping large file (> 5MB): {}", rel);
                continue;
            }

            match self.chunk_file(path, &rel, repository) {
                Ok(file_chunks) => chunks.extend(file_chunks),
                Err(e) if e.is_decode() => {
                    eprintln!("Skipping undecodable file: {}", rel);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> TextChunker {
        TextChunker::new(1000, 100, 7000)
    }

    #[test]
    fn test_small_file_single_chunk() {
        let chunks = chunker().chunk_content("hello world\n", "notes.csv", "a/b");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Text);
        assert_eq!(chunks[0].start_line, Some(1));
    }

    #[test]
    fn test_markdown_splits_at_headers() {
        let text = "# One\nbody one\n\n# Two\nbody two\n\n# Three\nbody three";
        let chunks = chunker().chunk_content(text, "README.md", "a/b");
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].content.contains("body one"));
        assert!(chunks[1].content.starts_with("# Two"));
        assert_eq!(chunks.iter().filter(|c| c.kind == ChunkKind::Markdown).count(), 3);
    }

    #[test]
    fn test_code_splits_at_definitions() {
        let code = "def alpha():\n    return 1\n\ndef beta():\n    return 2\n";
        let chunks = chunker().chunk_content(code, "util.py", "a/b");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.contains("alpha"));
        assert!(chunks[1].content.contains("beta"));
        assert_eq!(chunks[0].kind, ChunkKind::Code);
    }

    #[test]
    fn test_rust_definitions_are_boundaries() {
        let code = "fn first() {\n    1;\n}\n\nfn second() {\n    2;\n}\n";
        let chunks = chunker().chunk_content(code, "lib.rs", "a/b");
        assert!(chunks.len() >= 2);
    }

    #[test]
    fn test_long_text_splits_with_line_budget() {
        // chunk_size 50 → 5 lines per chunk
        let chunker = TextChunker::new(50, 0, 7000);
        let text = (0..23).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let chunks = chunker.chunk_content(&text, "data.csv", "a/b");
        assert!(chunks.len() >= 4);

        // Line ranges cover the file in order
        assert_eq!(chunks[0].start_line, Some(1));
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line > pair[0].start_line);
        }
        assert_eq!(chunks.last().unwrap().end_line, Some(23));
    }

    #[test]
    fn test_overlap_carries_context() {
        // 5 lines per chunk, 2 lines of overlap
        let chunker = TextChunker::new(50, 20, 7000);
        let text = (0..12).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let chunks = chunker.chunk_content(&text, "data.csv", "a/b");
        assert!(chunks.len() >= 2);
        let first_end = chunks[0].end_line.unwrap();
        let second_start = chunks[1].start_line.unwrap();
        assert!(second_start <= first_end, "second chunk overlaps the first");
    }

    #[test]
    fn test_deterministic_ids() {
        let text = "# Title\n\nSome body text.";
        let a = chunker().chunk_content(text, "doc.md", "a/b");
        let b = chunker().chunk_content(text, "doc.md", "a/b");
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.content, y.content);
        }
    }

    #[test]
    fn test_ids_differ_across_repositories() {
        let text = "content";
        let a = chunker().chunk_content(text, "doc.csv", "a/b");
        let b = chunker().chunk_content(text, "doc.csv", "c/d");
        assert_ne!(a[0].id, b[0].id);
    }

    #[test]
    fn test_oversized_chunk_is_truncated() {
        let chunker = TextChunker::new(1_000_000, 0, 10);
        let text = (0..50).map(|i| format!("word{i} word word word")).collect::<Vec<_>>().join("\n");
        let chunks = chunker.chunk_content(&text, "data.csv", "a/b");
        for c in &chunks {
            assert!(
                c.content.len() / CHARS_PER_TOKEN <= 12,
                "chunk stayed near the ceiling"
            );
        }
    }

    #[test]
    fn test_is_text_path() {
        assert!(is_text_path("src/main.rs"));
        assert!(is_text_path("README.md"));
        assert!(is_text_path("a/b/config.YAML"));
        assert!(!is_text_path("logo.png"));
        assert!(!is_text_path("bin/tool"));
    }

    #[test]
    fn test_looks_binary() {
        assert!(looks_binary(b"\x00\x01\x02"));
        assert!(looks_binary(&[0x01; 100]));
        assert!(!looks_binary(b"plain text\nwith lines\n"));
        assert!(!looks_binary(b""));
    }

    #[test]
    fn test_chunk_file_rejects_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.csv");
        std::fs::write(&path, [0u8, 159, 146, 150]).unwrap();

        let err = chunker().chunk_file(&path, "blob.csv", "a/b").unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_chunk_tree_skips_binary_and_non_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.md"), "# Hi\n\ntext").unwrap();
        std::fs::write(dir.path().join("bad.csv"), [0u8, 1, 2, 3]).unwrap();
        std::fs::write(dir.path().join("image.png"), [137u8, 80, 78, 71]).unwrap();

        let chunks = chunker().chunk_tree(dir.path(), "a/b").unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.file_path == "good.md"));
    }
}
