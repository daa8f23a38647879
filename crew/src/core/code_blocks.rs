//! Fenced code block extraction for the preservation guard.

/// A fenced code block, including its opening and closing fence lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock<'a> {
    /// Exact source text from the opening fence through the closing fence.
    pub raw: &'a str,
    /// Info string after the opening fence (e.g. `python`), trimmed.
    pub info: &'a str,
}

/// Extract every fenced block (```` ``` ```` or `~~~`) in document order.
///
/// A block closes at the first line made of the same fence character, at
/// least as long as the opener, with only trailing whitespace. An unclosed
/// fence runs to the end of the text.
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, char, usize, &str)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let content = line.trim_end_matches(['\n', '\r']);
        let stripped = content.trim_start_matches(' ');
        // Fences may be indented by at most three spaces.
        if content.len() - stripped.len() > 3 {
            continue;
        }

        match open {
            None => {
                if let Some((ch, len)) = fence_marker(stripped) {
                    let info = stripped[len..].trim();
                    if ch == '`' && info.contains('`') {
                        continue;
                    }
                    open = Some((line_start, ch, len, info));
                }
            }
            Some((start, ch, len, info)) => {
                if let Some((close_ch, close_len)) = fence_marker(stripped)
                    && close_ch == ch
                    && close_len >= len
                    && stripped[close_len..].trim().is_empty()
                {
                    let end = line_start + content.len();
                    blocks.push(FencedBlock {
                        raw: &text[start..end],
                        info,
                    });
                    open = None;
                }
            }
        }
    }

    if let Some((start, _, _, info)) = open {
        blocks.push(FencedBlock {
            raw: text[start..].trim_end_matches(['\n', '\r']),
            info,
        });
    }
    blocks
}

/// Blocks of `source` that do not appear verbatim anywhere in `candidate`.
pub fn missing_blocks<'a>(source: &'a str, candidate: &str) -> Vec<FencedBlock<'a>> {
    fenced_blocks(source)
        .into_iter()
        .filter(|block| !candidate.contains(block.raw))
        .collect()
}

fn fence_marker(line: &str) -> Option<(char, usize)> {
    let ch = line.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let len = line.chars().take_while(|c| *c == ch).count();
    (len >= 3).then_some((ch, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = "Set it like this:\n\n```python\nclient.chat.completions.create(\n    model=\"gpt-4o\",\n    temperature=0.2,\n)\n```\n\nDone.\n";

    #[test]
    fn extracts_block_with_info_string() {
        let blocks = fenced_blocks(ANSWER);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].info, "python");
        assert!(blocks[0].raw.starts_with("```python\n"));
        assert!(blocks[0].raw.ends_with("\n```"));
        assert!(blocks[0].raw.contains("    temperature=0.2,"));
    }

    #[test]
    fn closing_fence_must_match_opener() {
        let text = "~~~~\n```\ninner\n```\n~~~~\n";
        let blocks = fenced_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].raw, "~~~~\n```\ninner\n```\n~~~~");
    }

    #[test]
    fn unclosed_fence_runs_to_end() {
        let blocks = fenced_blocks("intro\n```\nlet x = 1;\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].raw, "```\nlet x = 1;");
    }

    #[test]
    fn inline_backticks_are_not_fences() {
        assert!(fenced_blocks("use ```x``` inline").is_empty());
        assert!(fenced_blocks("plain `code` only").is_empty());
    }

    #[test]
    fn missing_blocks_detects_whitespace_changes() {
        let edited = ANSWER.replace("    temperature", "  temperature");
        let missing = missing_blocks(ANSWER, &edited);
        assert_eq!(missing.len(), 1);

        let reworded = ANSWER.replace("Set it like this:", "Here is how:");
        assert!(missing_blocks(ANSWER, &reworded).is_empty());
    }
}
