use crate::error::Result;

/// Bookmark totals live outside the tree store.
pub trait BookmarkCounter: Send + Sync {
    fn count(&self, page_id: &str) -> Result<u64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullBookmarkCounter;

impl BookmarkCounter for NullBookmarkCounter {
    fn count(&self, _page_id: &str) -> Result<u64> {
        Ok(0)
    }
}

pub trait BodySummarizer: Send + Sync {
    fn summarize(&self, body: &str, max_chars: usize) -> String;
}

/// First non-heading text of the body, whitespace collapsed and cut at a
/// character boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadingTextSummarizer;

impl BodySummarizer for LeadingTextSummarizer {
    fn summarize(&self, body: &str, max_chars: usize) -> String {
        let text = body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect::<Vec<_>>()
            .join(" ");
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() <= max_chars {
            return collapsed;
        }
        let mut out: String = collapsed.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarizer_skips_headings_and_truncates() {
        let body = "# Title\n\nFirst   line\nsecond line\n## Sub\nthird";
        let summary = LeadingTextSummarizer.summarize(body, 200);
        assert_eq!(summary, "First line second line third");

        let short = LeadingTextSummarizer.summarize(body, 5);
        assert_eq!(short, "First…");
    }

    #[test]
    fn summarizer_counts_characters_not_bytes() {
        let summary = LeadingTextSummarizer.summarize("ünïcödé text", 7);
        assert_eq!(summary, "ünïcödé…");
    }
}
