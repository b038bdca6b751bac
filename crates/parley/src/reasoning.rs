//! Streaming removal of `<think>...</think>` reasoning sections
//!
//! Models may emit private reasoning inline. [`ReasoningFilter`] deletes those
//! spans from text that arrives in arbitrary chunks, including chunks that
//! split a tag's own characters, while holding back at most one tag's worth
//! of text.

pub const OPEN_TAG: &str = "<think>";
pub const CLOSE_TAG: &str = "</think>";

/// Per-stream filter state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    /// True while inside a reasoning section
    pub suppressing: bool,
    /// Suffix of the input that may be the start of a tag
    pub carry: String,
}

/// Stateful filter for one streamed reply.
///
/// Feed chunks in arrival order with [`push`](Self::push), then call
/// [`finish`](Self::finish) once. The concatenated output is the input with
/// every reasoning span removed, independent of how the input was chunked.
#[derive(Debug, Default)]
pub struct ReasoningFilter {
    state: FilterState,
}

impl ReasoningFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    /// Filter the next chunk and return the text that is safe to emit
    pub fn push(&mut self, chunk: &str) -> String {
        let mut text = std::mem::take(&mut self.state.carry);
        text.push_str(chunk);
        self.process(&text, false)
    }

    /// Flush the end of the stream.
    ///
    /// A dangling partial tag is plain text unless we are inside a
    /// reasoning section, in which case it is dropped.
    pub fn finish(mut self) -> String {
        let text = std::mem::take(&mut self.state.carry);
        self.process(&text, true)
    }

    fn process(&mut self, text: &str, is_final: bool) -> String {
        let mut output = String::new();
        let mut rest = text;

        while !rest.is_empty() {
            if self.state.suppressing {
                match rest.find(CLOSE_TAG) {
                    Some(idx) => {
                        rest = &rest[idx + CLOSE_TAG.len()..];
                        self.state.suppressing = false;
                    }
                    None => {
                        if !is_final {
                            let keep = partial_tag_len(rest, CLOSE_TAG);
                            self.state.carry = rest[rest.len() - keep..].to_string();
                        }
                        break;
                    }
                }
            } else {
                match rest.find(OPEN_TAG) {
                    Some(idx) => {
                        output.push_str(&rest[..idx]);
                        rest = &rest[idx + OPEN_TAG.len()..];
                        self.state.suppressing = true;
                    }
                    None => {
                        let keep = if is_final {
                            0
                        } else {
                            partial_tag_len(rest, OPEN_TAG)
                        };
                        let split = rest.len() - keep;
                        output.push_str(&rest[..split]);
                        self.state.carry = rest[split..].to_string();
                        break;
                    }
                }
            }
        }

        output
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
///
/// Tags are ASCII, so a matching suffix always starts on a char boundary.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&n| text.ends_with(&tag[..n]))
        .unwrap_or(0)
}

/// Remove reasoning sections from a complete reply
pub fn strip_reasoning(text: &str) -> String {
    let mut filter = ReasoningFilter::new();
    let mut output = filter.push(text);
    output.push_str(&filter.finish());
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_chunks(chunks: &[&str]) -> String {
        let mut filter = ReasoningFilter::new();
        let mut output = String::new();
        for chunk in chunks {
            output.push_str(&filter.push(chunk));
        }
        output.push_str(&filter.finish());
        output
    }

    /// Every way of cutting `input` into two or three pieces
    fn all_splits(input: &str) -> Vec<Vec<String>> {
        let bounds: Vec<usize> = input
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(input.len()))
            .collect();

        let mut splits = Vec::new();
        for &a in &bounds {
            splits.push(vec![input[..a].to_string(), input[a..].to_string()]);
            for &b in bounds.iter().filter(|&&b| b >= a) {
                splits.push(vec![
                    input[..a].to_string(),
                    input[a..b].to_string(),
                    input[b..].to_string(),
                ]);
            }
        }
        splits
    }

    #[test]
    fn test_single_block() {
        assert_eq!(
            strip_reasoning("<think>plan the answer</think>The answer is 4."),
            "The answer is 4."
        );
    }

    #[test]
    fn test_text_around_multiple_sections() {
        assert_eq!(
            strip_reasoning("a<think>x</think>b<think>y</think>c"),
            "abc"
        );
    }

    #[test]
    fn test_no_tags_passes_through() {
        assert_eq!(strip_reasoning("plain < text > here"), "plain < text > here");
    }

    #[test]
    fn test_open_tag_split_across_chunks() {
        assert_eq!(run_chunks(&["<th", "ink>secret</think>done"]), "done");
    }

    #[test]
    fn test_close_tag_split_across_chunks() {
        assert_eq!(run_chunks(&["<think>secret</th", "ink>", "done"]), "done");
    }

    #[test]
    fn test_tag_split_one_char_per_chunk() {
        let input = "before<think>hidden</think>after";
        let chunks: Vec<String> = input.chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        assert_eq!(run_chunks(&refs), "beforeafter");
    }

    #[test]
    fn test_unterminated_section_truncates() {
        assert_eq!(run_chunks(&["visible ", "<think>never closed"]), "visible ");
        assert_eq!(strip_reasoning("ok<think>dangling </thi"), "ok");
    }

    #[test]
    fn test_partial_open_tag_at_finish_is_text() {
        assert_eq!(run_chunks(&["hi <thi"]), "hi <thi");
        assert_eq!(run_chunks(&["hi ", "<", "thi"]), "hi <thi");
    }

    #[test]
    fn test_carry_is_bounded() {
        let mut filter = ReasoningFilter::new();
        let emitted = filter.push("some long text that ends with <thin");
        assert_eq!(emitted, "some long text that ends with ");
        assert_eq!(filter.state().carry, "<thin");

        filter.push("k>");
        assert!(filter.state().suppressing);
        filter.push(&"x".repeat(10_000));
        assert!(filter.state().carry.len() < CLOSE_TAG.len());
    }

    #[test]
    fn test_false_start_is_released() {
        let mut filter = ReasoningFilter::new();
        assert_eq!(filter.push("a <th"), "a ");
        assert_eq!(filter.push("e end"), "<the end");
        assert_eq!(filter.finish(), "");
    }

    #[test]
    fn test_multibyte_text() {
        assert_eq!(
            run_chunks(&["안녕<thi", "nk>생각</think>하세요 ✓"]),
            "안녕하세요 ✓"
        );
    }

    #[test]
    fn test_every_segmentation_matches_whole_input() {
        let inputs = [
            "hello <think>hidden</think> world",
            "<think>a</think><think>b</think>end",
            "x<think>y",
            "tail <thi",
            "a </think> b",
            "한<think>생각</think>글 <t",
        ];

        for input in inputs {
            let expected = strip_reasoning(input);
            for split in all_splits(input) {
                let refs: Vec<&str> = split.iter().map(String::as_str).collect();
                assert_eq!(run_chunks(&refs), expected, "input {input:?} split {split:?}");
            }
        }
    }

    #[test]
    fn test_whole_input_expectations() {
        assert_eq!(strip_reasoning("hello <think>hidden</think> world"), "hello  world");
        assert_eq!(strip_reasoning("x<think>y"), "x");
        assert_eq!(strip_reasoning("tail <thi"), "tail <thi");
        assert_eq!(strip_reasoning("a </think> b"), "a </think> b");
    }
}
