use std::sync::Arc;

use crate::chunk::tokens::TokenCounter;
use crate::error::{Error, Result};

const PARAGRAPH_DELIMITER: &str = "\n\n";
const SENTENCE_TERMINATORS: &[char] = &['.', '?', '!', ';'];

/// Fenced blocks up to this many budgets are emitted whole.
const FENCE_BUDGET_FACTOR: usize = 2;

/// A contiguous slice of the input document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub text: &'a str,
    pub tokens: usize,
    /// Set for an indivisible unit (a fenced block, or a single character)
    /// that exceeds the budget on its own and was emitted whole.
    pub oversize: bool,
}

impl<'a> Chunk<'a> {
    pub fn as_str(&self) -> &'a str {
        self.text
    }
}

/// Byte range of the input plus its token count.
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    tokens: usize,
    oversize: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Plain,
    Fenced,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    start: usize,
    end: usize,
    kind: BlockKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence {
    marker: u8,
    len: usize,
}

/// Splits a document into token-bounded chunks whose concatenation is the
/// document, byte for byte.
///
/// Paragraphs (text up to and including a blank line) are the primary unit.
/// A fenced code block is one atomic unit, even across blank lines, and is
/// kept whole up to twice the budget. Units above the budget are split by line, then by sentence, then by
/// a character cut. A final pass packs consecutive pieces into as few chunks
/// as the budget allows without reordering anything.
#[derive(Clone)]
pub struct ChunkSplitter {
    counter: Arc<dyn TokenCounter>,
}

impl ChunkSplitter {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    pub fn split<'a>(&self, text: &'a str, budget: usize) -> Result<Vec<Chunk<'a>>> {
        if budget == 0 {
            return Err(Error::InvalidBudget(budget));
        }
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let mut pieces = Vec::new();
        for block in fence_blocks(text) {
            let tokens = self.count(&text[block.start..block.end])?;
            if tokens <= budget {
                pieces.push(Piece {
                    start: block.start,
                    end: block.end,
                    tokens,
                    oversize: false,
                });
            } else if block.kind == BlockKind::Fenced
                && tokens <= budget.saturating_mul(FENCE_BUDGET_FACTOR)
            {
                pieces.push(Piece {
                    start: block.start,
                    end: block.end,
                    tokens,
                    oversize: true,
                });
            } else {
                self.split_lines(text, block.start, block.end, budget, &mut pieces)?;
            }
        }

        self.regroup(text, &pieces, budget)
    }

    fn count(&self, text: &str) -> Result<usize> {
        self.counter.count(text)
    }

    fn split_lines(
        &self,
        text: &str,
        start: usize,
        end: usize,
        budget: usize,
        out: &mut Vec<Piece>,
    ) -> Result<()> {
        for (line_start, line_end) in split_after_chars(text, start, end, &['\n']) {
            let tokens = self.count(&text[line_start..line_end])?;
            if tokens <= budget {
                out.push(Piece {
                    start: line_start,
                    end: line_end,
                    tokens,
                    oversize: false,
                });
            } else {
                self.split_sentences(text, line_start, line_end, budget, out)?;
            }
        }
        Ok(())
    }

    fn split_sentences(
        &self,
        text: &str,
        start: usize,
        end: usize,
        budget: usize,
        out: &mut Vec<Piece>,
    ) -> Result<()> {
        for (sentence_start, sentence_end) in split_after_chars(text, start, end, SENTENCE_TERMINATORS) {
            let tokens = self.count(&text[sentence_start..sentence_end])?;
            if tokens <= budget {
                out.push(Piece {
                    start: sentence_start,
                    end: sentence_end,
                    tokens,
                    oversize: false,
                });
            } else {
                self.cut(text, sentence_start, sentence_end, budget, out)?;
            }
        }
        Ok(())
    }

    /// Last resort: take `budget` characters, halving until the piece fits.
    fn cut(&self, text: &str, start: usize, end: usize, budget: usize, out: &mut Vec<Piece>) -> Result<()> {
        let mut pos = start;
        while pos < end {
            let rest = &text[pos..end];
            let mut take = budget;
            loop {
                let piece_end = pos + char_prefix_len(rest, take);
                let tokens = self.count(&text[pos..piece_end])?;
                if tokens <= budget || take <= 1 {
                    out.push(Piece {
                        start: pos,
                        end: piece_end,
                        tokens,
                        oversize: tokens > budget,
                    });
                    pos = piece_end;
                    break;
                }
                take /= 2;
            }
        }
        Ok(())
    }

    /// Next-fit packing of consecutive pieces. Token sums pick the groups;
    /// each multi-piece group is recounted so the reported count is exact.
    fn regroup<'a>(&self, text: &'a str, pieces: &[Piece], budget: usize) -> Result<Vec<Chunk<'a>>> {
        let mut chunks = Vec::with_capacity(pieces.len());
        let mut group: Vec<Piece> = Vec::new();
        let mut group_tokens = 0usize;

        for piece in pieces {
            if piece.oversize {
                self.flush_group(text, &mut group, budget, &mut chunks)?;
                group_tokens = 0;
                chunks.push(Chunk {
                    text: &text[piece.start..piece.end],
                    tokens: piece.tokens,
                    oversize: true,
                });
                continue;
            }
            if !group.is_empty() && group_tokens + piece.tokens > budget {
                self.flush_group(text, &mut group, budget, &mut chunks)?;
                group_tokens = 0;
            }
            group_tokens += piece.tokens;
            group.push(*piece);
        }
        self.flush_group(text, &mut group, budget, &mut chunks)?;

        Ok(chunks)
    }

    fn flush_group<'a>(
        &self,
        text: &'a str,
        group: &mut Vec<Piece>,
        budget: usize,
        chunks: &mut Vec<Chunk<'a>>,
    ) -> Result<()> {
        let (first, last) = match (group.first(), group.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Ok(()),
        };

        if group.len() == 1 {
            chunks.push(Chunk {
                text: &text[first.start..first.end],
                tokens: first.tokens,
                oversize: false,
            });
            group.clear();
            return Ok(());
        }

        let tokens = self.count(&text[first.start..last.end])?;
        if tokens <= budget {
            chunks.push(Chunk {
                text: &text[first.start..last.end],
                tokens,
                oversize: false,
            });
            group.clear();
            return Ok(());
        }

        // The counter is not additive for this text; grow one piece at a time
        // with exact counts instead.
        let mut current = first;
        for piece in &group[1..] {
            let merged = self.count(&text[current.start..piece.end])?;
            if merged <= budget {
                current.end = piece.end;
                current.tokens = merged;
            } else {
                chunks.push(Chunk {
                    text: &text[current.start..current.end],
                    tokens: current.tokens,
                    oversize: false,
                });
                current = *piece;
            }
        }
        chunks.push(Chunk {
            text: &text[current.start..current.end],
            tokens: current.tokens,
            oversize: false,
        });
        group.clear();
        Ok(())
    }
}

impl std::fmt::Debug for ChunkSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSplitter").finish_non_exhaustive()
    }
}

/// Paragraph units, each keeping its trailing blank-line delimiter.
fn paragraphs(text: &str) -> Vec<(usize, usize)> {
    let mut units = Vec::new();
    let mut start = 0;
    for (idx, delim) in text.match_indices(PARAGRAPH_DELIMITER) {
        let end = idx + delim.len();
        units.push((start, end));
        start = end;
    }
    if start < text.len() {
        units.push((start, text.len()));
    }
    units
}

/// Paragraph blocks, with every fenced code span (opening marker line
/// through closing marker line) carved out as its own block. Prose sharing a
/// paragraph with a fence stays plain on either side of it.
fn fence_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut open: Option<(Fence, usize)> = None;

    for (start, end) in paragraphs(text) {
        let mut plain_from = start;
        let mut pos = start;
        for line in text[start..end].split_inclusive('\n') {
            let line_start = pos;
            pos += line.len();
            let Some((fence, bare)) = fence_line(line) else {
                continue;
            };
            match open {
                None => {
                    if plain_from < line_start {
                        blocks.push(Block {
                            start: plain_from,
                            end: line_start,
                            kind: BlockKind::Plain,
                        });
                    }
                    open = Some((fence, line_start));
                }
                Some((current, fence_start))
                    if bare && fence.marker == current.marker && fence.len >= current.len =>
                {
                    blocks.push(Block {
                        start: fence_start,
                        end: pos,
                        kind: BlockKind::Fenced,
                    });
                    open = None;
                    plain_from = pos;
                }
                Some(_) => {}
            }
        }

        if open.is_none() && plain_from < end {
            blocks.push(Block {
                start: plain_from,
                end,
                kind: BlockKind::Plain,
            });
        }
    }

    // Unterminated fence runs to the end of the document.
    if let Some((_, fence_start)) = open {
        blocks.push(Block {
            start: fence_start,
            end: text.len(),
            kind: BlockKind::Fenced,
        });
    }

    blocks
}

/// Recognise a ``` or ~~~ fence line. The flag is true when nothing but
/// whitespace follows the marker, which is required to close a fence.
fn fence_line(line: &str) -> Option<(Fence, bool)> {
    let trimmed = line.trim_start_matches([' ', '\t']);
    let marker = match trimmed.as_bytes().first() {
        Some(b'`') => b'`',
        Some(b'~') => b'~',
        _ => return None,
    };
    let len = trimmed.bytes().take_while(|&b| b == marker).count();
    if len < 3 {
        return None;
    }
    let bare = trimmed[len..].trim().is_empty();
    Some((Fence { marker, len }, bare))
}

/// Split `text[start..end]` after every occurrence of one of `delims`.
fn split_after_chars(text: &str, start: usize, end: usize, delims: &[char]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut from = start;
    for (idx, ch) in text[start..end].char_indices() {
        if delims.contains(&ch) {
            let to = start + idx + ch.len_utf8();
            ranges.push((from, to));
            from = to;
        }
    }
    if from < end {
        ranges.push((from, end));
    }
    ranges
}

/// Byte length of the first `n` characters of `s` (all of `s` if shorter).
fn char_prefix_len(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(idx, _)| idx)
}
