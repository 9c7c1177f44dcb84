//! Sentence splitter
//!
//! Turns the LLM's token deltas into whole-sentence units for TTS. Text
//! accumulates until a sentence-final mark; fragments shorter than the
//! minimum flush length stay buffered and merge into the next sentence so
//! TTS never gets a two-character stub. Tool-call deltas pass through
//! untouched, in order.

use voicelink_core::{ChatDelta, ToolCall};

/// Sentence-final punctuation, ASCII and CJK.
const TERMINATORS: [char; 7] = ['.', '!', '?', '。', '！', '？', '；'];

/// One unit of splitter output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitterItem {
    Sentence(String),
    ToolCalls(Vec<ToolCall>),
}

pub struct SentenceSplitter {
    min_sentence_chars: usize,
    buffer: String,
}

impl SentenceSplitter {
    pub fn new(min_sentence_chars: usize) -> Self {
        Self {
            min_sentence_chars: min_sentence_chars.max(1),
            buffer: String::new(),
        }
    }

    /// Feed one delta; returns everything that became emittable.
    pub fn push(&mut self, delta: &ChatDelta) -> Vec<SplitterItem> {
        let mut out = Vec::new();
        if !delta.tool_calls.is_empty() {
            out.push(SplitterItem::ToolCalls(delta.tool_calls.clone()));
        }
        if let Some(text) = &delta.text {
            for sentence in self.push_text(text) {
                out.push(SplitterItem::Sentence(sentence));
            }
        }
        out
    }

    fn push_text(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut sentences = Vec::new();
        let mut pending = String::new();
        let mut consumed = 0usize;

        for (idx, ch) in self.buffer.char_indices() {
            if TERMINATORS.contains(&ch) {
                let end = idx + ch.len_utf8();
                pending.push_str(&self.buffer[consumed..end]);
                consumed = end;
                // Too-short fragments wait for the next boundary.
                if pending.trim().chars().count() >= self.min_sentence_chars {
                    sentences.push(pending.trim().to_string());
                    pending.clear();
                }
            }
        }

        let remainder = self.buffer[consumed..].to_string();
        self.buffer = pending;
        self.buffer.push_str(&remainder);
        sentences
    }

    /// Stream closed: whatever is buffered becomes the final sentence.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(t: &str) -> ChatDelta {
        ChatDelta::text(t)
    }

    fn sentences(items: Vec<SplitterItem>) -> Vec<String> {
        items
            .into_iter()
            .filter_map(|i| match i {
                SplitterItem::Sentence(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_emits_on_sentence_final_punctuation() {
        let mut splitter = SentenceSplitter::new(4);
        assert!(splitter.push(&text("北京今天")).is_empty());
        let out = sentences(splitter.push(&text("晴，25度。")));
        assert_eq!(out, vec!["北京今天晴，25度。"]);
    }

    #[test]
    fn test_short_fragment_merges_into_next_sentence() {
        let mut splitter = SentenceSplitter::new(4);
        // "好。" trims to 2 chars, below the minimum: buffered.
        assert!(sentences(splitter.push(&text("好。"))).is_empty());
        let out = sentences(splitter.push(&text("今天天气不错！")));
        assert_eq!(out, vec!["好。今天天气不错！"]);
    }

    #[test]
    fn test_multiple_sentences_in_one_delta() {
        let mut splitter = SentenceSplitter::new(4);
        let out = sentences(splitter.push(&text("今天天气晴朗。适合出门走走！要带伞吗？")));
        assert_eq!(
            out,
            vec!["今天天气晴朗。", "适合出门走走！", "要带伞吗？"]
        );
    }

    #[test]
    fn test_ascii_terminators() {
        let mut splitter = SentenceSplitter::new(4);
        let out = sentences(splitter.push(&text("Sure thing. What else can I do?")));
        assert_eq!(out, vec!["Sure thing.", "What else can I do?"]);
    }

    #[test]
    fn test_flush_emits_remainder() {
        let mut splitter = SentenceSplitter::new(4);
        splitter.push(&text("没有标点的结尾"));
        assert_eq!(splitter.flush(), Some("没有标点的结尾".to_string()));
        assert_eq!(splitter.flush(), None);
    }

    #[test]
    fn test_tool_calls_pass_through_in_order() {
        let mut splitter = SentenceSplitter::new(4);
        let call = ToolCall {
            id: "call_1".into(),
            name: "get_weather".into(),
            arguments: "{}".into(),
        };
        let items = splitter.push(&ChatDelta {
            text: Some("马上查询。".into()),
            tool_calls: vec![call.clone()],
        });
        assert_eq!(
            items,
            vec![
                SplitterItem::ToolCalls(vec![call]),
                SplitterItem::Sentence("马上查询。".into()),
            ]
        );
    }

    #[test]
    fn test_ordering_preserved_across_deltas() {
        let mut splitter = SentenceSplitter::new(2);
        let mut all = Vec::new();
        for chunk in ["第一句", "。第二", "句。第三句。"] {
            all.extend(sentences(splitter.push(&text(chunk))));
        }
        assert_eq!(all, vec!["第一句。", "第二句。", "第三句。"]);
    }
}
