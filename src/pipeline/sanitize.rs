//! Text preparation for email bodies.
//!
//! Two shapes:
//! - `prepare_prompt_body()`: one flat line for the classifier prompt.
//! - `html_to_text()`: readable plain text kept on the task.

use std::sync::LazyLock;

use regex::Regex;

/// Prompt bodies longer than this are cut and suffixed with `...`.
pub const PROMPT_BODY_MAX_CHARS: usize = 1500;

static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static NON_TEXT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:style|script|head)\b[^>]*>.*?</(?:style|script|head)\s*>").unwrap()
});
static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static BR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?p(?:\s[^>]*)?>").unwrap());
static DIV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</?div(?:\s[^>]*)?>").unwrap());
static LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(?:ul|ol)(?:\s[^>]*)?>").unwrap());
static LI_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<li(?:\s[^>]*)?>").unwrap());
static LI_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</li\s*>").unwrap());
static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));").unwrap());
static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip tags, collapse whitespace, cap at `PROMPT_BODY_MAX_CHARS`.
pub fn prepare_prompt_body(raw: &str) -> String {
    let no_tags = ANY_TAG.replace_all(raw, " ");
    let flat = WHITESPACE.replace_all(&no_tags, " ");
    let flat = flat.trim();

    if flat.chars().count() > PROMPT_BODY_MAX_CHARS {
        let mut cut: String = flat.chars().take(PROMPT_BODY_MAX_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        flat.to_string()
    }
}

/// Convert an HTML email body into plain text.
///
/// Paragraphs become blank-line breaks, `<br>` and `<div>` become newlines,
/// `<li>` becomes a `• ` bullet line, other tags are dropped, entities are
/// decoded and runs of 3+ newlines collapse to 2.
pub fn html_to_text(html: &str) -> String {
    let text = html.replace("\r\n", "\n");
    let text = NON_TEXT_BLOCK.replace_all(&text, "");
    let text = COMMENT.replace_all(&text, "");
    let text = BR.replace_all(&text, "\n");
    let text = PARAGRAPH.replace_all(&text, "\n\n");
    let text = DIV.replace_all(&text, "\n");
    let text = LIST.replace_all(&text, "\n");
    let text = LI_OPEN.replace_all(&text, "\n• ");
    let text = LI_CLOSE.replace_all(&text, "");
    let text = ANY_TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// `&amp;` goes last so `&amp;lt;` decodes to `&lt;`, not `<`.
fn decode_entities(text: &str) -> String {
    let text = text
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">");

    let text = NUMERIC_ENTITY.replace_all(&text, |caps: &regex::Captures<'_>| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, Some(dec)) => dec.as_str().parse().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    text.replace("&amp;", "&")
}
