//! Post composition
//!
//! Turns a [`FeedItem`] and the title resolved from its page into a
//! [`PostContent`], and renders that content as text for a network.
//!
//! Rendered posts look like:
//!
//! ```text
//! 🔖 "Page title" https://example.com/article #laco_feed
//! Source title "Page title" https://example.com/article #laco_feed
//! ```
//!
//! The second form is used when the page title and the source title
//! diverge, so readers see both.

use crate::types::{FeedItem, PostContent};

/// Prefix used in place of a note
pub const DEFAULT_PREFIX: &str = "🔖";

const ELLIPSIS: char = '…';

/// Twitter counts every link as this many characters
const TWITTER_URL_WEIGHT: usize = 23;
const TWITTER_MAX_WEIGHT: usize = 280;

/// Build the post for an item
///
/// An empty `resolved_title` means the page title is unknown, and the
/// source title is used as is. Otherwise the page title becomes the
/// headline and the source title is kept as a note when the two are not
/// [`is_similar`].
pub fn compose(item: &FeedItem, resolved_title: &str) -> PostContent {
    let resolved = resolved_title.trim();
    let source = item.title.trim();

    if resolved.is_empty() {
        let title = if source.is_empty() { item.url.as_str() } else { source };
        return PostContent {
            title: title.to_string(),
            url: item.url.clone(),
            note: None,
        };
    }

    let note = (!is_similar(resolved, source)).then(|| source.to_string());
    PostContent {
        title: resolved.to_string(),
        url: item.url.clone(),
        note,
    }
}

/// Whether two titles name the same thing
///
/// Titles are similar when one contains the other, or when their edit
/// distance is less than half the length of the shorter one. Lengths and
/// distances are counted in characters.
pub fn is_similar(a: &str, b: &str) -> bool {
    if a.contains(b) || b.contains(a) {
        return true;
    }
    let shorter = a.chars().count().min(b.chars().count());
    2 * levenshtein(a, b) < shorter
}

/// Levenshtein distance over characters
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Render a post as `{note or 🔖} "{title}" {url} #tag...`
pub fn render_text(post: &PostContent, tags: &[String]) -> String {
    let prefix = post.note.as_deref().unwrap_or(DEFAULT_PREFIX);
    let mut text = format!("{} \"{}\" {}", prefix, post.title, post.url);
    for tag in tags {
        let tag = tag.trim().trim_start_matches('#');
        if !tag.is_empty() {
            text.push_str(" #");
            text.push_str(tag);
        }
    }
    text
}

/// Length limit of a network's posts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextBudget {
    /// Plain character count
    Chars(usize),
    /// Twitter's weighted count: links count 23, wide characters count 2
    Twitter,
}

impl TextBudget {
    pub fn limit(&self) -> usize {
        match self {
            TextBudget::Chars(limit) => *limit,
            TextBudget::Twitter => TWITTER_MAX_WEIGHT,
        }
    }

    /// Length of `text` as the network counts it
    pub fn measure(&self, text: &str, url: &str) -> usize {
        match self {
            TextBudget::Chars(_) => text.chars().count(),
            TextBudget::Twitter => {
                if !url.is_empty() && text.contains(url) {
                    twitter_weight(&text.replacen(url, "", 1)) + TWITTER_URL_WEIGHT
                } else {
                    twitter_weight(text)
                }
            }
        }
    }

    pub fn fits(&self, text: &str, url: &str) -> bool {
        self.measure(text, url) <= self.limit()
    }
}

fn twitter_weight(text: &str) -> usize {
    text.chars()
        .map(|c| match c as u32 {
            0..=4351 | 8192..=8205 | 8208..=8223 | 8242..=8247 => 1,
            _ => 2,
        })
        .sum()
}

/// Render a post shortened to fit `budget`
///
/// The title is shortened first, then the note. The URL and tags are never
/// cut; if they alone exceed the budget the full text is returned and the
/// network will reject it.
pub fn fit_text(post: &PostContent, tags: &[String], budget: TextBudget) -> String {
    let text = render_text(post, tags);
    if budget.fits(&text, &post.url) {
        return text;
    }

    let mut shortened = post.clone();
    let title: Vec<char> = post.title.chars().collect();
    for keep in (0..title.len()).rev() {
        shortened.title = truncate_chars(&title, keep);
        let text = render_text(&shortened, tags);
        if budget.fits(&text, &post.url) {
            return text;
        }
    }

    if let Some(note) = &post.note {
        let note: Vec<char> = note.chars().collect();
        for keep in (0..note.len()).rev() {
            shortened.note = Some(truncate_chars(&note, keep));
            let text = render_text(&shortened, tags);
            if budget.fits(&text, &post.url) {
                return text;
            }
        }
    }

    text
}

fn truncate_chars(chars: &[char], keep: usize) -> String {
    let mut truncated: String = chars[..keep].iter().collect();
    truncated.push(ELLIPSIS);
    truncated
}
