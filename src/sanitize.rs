//! HTML and media cleanup for card field text. Five fixed stages: media
//! removal, inline formatting conversion, entity decoding, tag stripping,
//! whitespace normalization. The whole transform is idempotent on its own
//! output and never transcodes non-ASCII content.

use std::sync::OnceLock;

use regex::Regex;

fn media_regexes() -> &'static [Regex; 4] {
    static CELL: OnceLock<[Regex; 4]> = OnceLock::new();
    CELL.get_or_init(|| {
        [
            Regex::new(r"(?is)<img\b[^>]*>").unwrap(),
            Regex::new(
                r"(?is)(?:<audio\b[^>]*>.*?</audio\s*>)|(?:<video\b[^>]*>.*?</video\s*>)|(?:<object\b[^>]*>.*?</object\s*>)",
            )
            .unwrap(),
            Regex::new(r"(?is)<(?:source|embed)\b[^>]*>").unwrap(),
            Regex::new(r"\[sound:[^\]]*\]").unwrap(),
        ]
    })
}

// (pattern, marker-open, marker-close) for the inline formatting whitelist.
// [^<]* keeps each match innermost so nesting composes by repetition.
fn format_regexes() -> &'static Vec<(Regex, &'static str, &'static str)> {
    static CELL: OnceLock<Vec<(Regex, &'static str, &'static str)>> = OnceLock::new();
    CELL.get_or_init(|| {
        let pair = |tags: &str| format!(r"(?is)<(?:{tags})\b[^>]*>([^<]*)</(?:{tags})\s*>");
        vec![
            (Regex::new(&pair("b|strong")).unwrap(), "**", "**"),
            (Regex::new(&pair("i|em")).unwrap(), "*", "*"),
            (Regex::new(&pair("u")).unwrap(), "_", "_"),
            (Regex::new(&pair("s|strike|del")).unwrap(), "~~", "~~"),
            (Regex::new(&pair("sub")).unwrap(), "[", "]"),
            (Regex::new(&pair("sup")).unwrap(), "^", "^"),
        ]
    })
}

fn entity_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"&(#x?[0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);").unwrap())
}

fn block_tag_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(
            r"(?is)</?(?:p|div|br|li|ul|ol|table|tr|td|th|h[1-6]|blockquote|pre|hr)\b[^>]*>",
        )
        .unwrap()
    })
}

fn any_tag_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"(?s)(?:<!--.*?-->)|(?:</?[a-zA-Z][^>]*>)").unwrap())
}

/// The HTML 4 core named entities. Anything not listed here passes through
/// verbatim (numeric references are decoded separately).
fn named_entity(name: &str) -> Option<&'static str> {
    let decoded = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "copy" => "©",
        "reg" => "®",
        "trade" => "™",
        "hellip" => "…",
        "mdash" => "—",
        "ndash" => "–",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "«",
        "raquo" => "»",
        "middot" => "·",
        "bull" => "•",
        "dagger" => "†",
        "deg" => "°",
        "plusmn" => "±",
        "times" => "×",
        "divide" => "÷",
        "minus" => "−",
        "frac12" => "½",
        "frac14" => "¼",
        "frac34" => "¾",
        "sup2" => "²",
        "sup3" => "³",
        "micro" => "µ",
        "para" => "¶",
        "sect" => "§",
        "cent" => "¢",
        "pound" => "£",
        "yen" => "¥",
        "euro" => "€",
        "permil" => "‰",
        "prime" => "′",
        "Prime" => "″",
        "larr" => "←",
        "rarr" => "→",
        "uarr" => "↑",
        "darr" => "↓",
        "harr" => "↔",
        "infin" => "∞",
        "ne" => "≠",
        "le" => "≤",
        "ge" => "≥",
        "alpha" => "α",
        "beta" => "β",
        "gamma" => "γ",
        "delta" => "δ",
        "epsilon" => "ε",
        "theta" => "θ",
        "lambda" => "λ",
        "mu" => "μ",
        "pi" => "π",
        "sigma" => "σ",
        "omega" => "ω",
        "Omega" => "Ω",
        "szlig" => "ß",
        "agrave" => "à",
        "aacute" => "á",
        "auml" => "ä",
        "ccedil" => "ç",
        "egrave" => "è",
        "eacute" => "é",
        "ecirc" => "ê",
        "ntilde" => "ñ",
        "ouml" => "ö",
        "uuml" => "ü",
        _ => return None,
    };
    Some(decoded)
}

/// Cleans one raw HTML field into plain text.
pub fn clean_html(raw: &str) -> String {
    let text = strip_media(raw);
    let text = convert_formatting(&text);
    let text = decode_entities(&text);
    let text = strip_tags(&text);
    normalize_whitespace(&text)
}

/// Stage 1: remove media elements and `[sound:...]` markers with no residue.
pub fn strip_media(text: &str) -> String {
    let mut result = text.to_string();
    for re in media_regexes() {
        if re.is_match(&result) {
            result = re.replace_all(&result, "").into_owned();
        }
    }
    result
}

/// Stage 2: convert the inline formatting whitelist to plain-text markers,
/// innermost first so nested elements compose.
fn convert_formatting(text: &str) -> String {
    let mut result = text.to_string();
    loop {
        let mut changed = false;
        for (re, open, close) in format_regexes() {
            let replaced = re
                .replace_all(&result, |captures: &regex::Captures| {
                    format!("{}{}{}", open, &captures[1], close)
                })
                .into_owned();
            if replaced != result {
                result = replaced;
                changed = true;
            }
        }
        if !changed {
            return result;
        }
    }
}

/// Stage 3: decode named, decimal, and hex entities in one left-to-right
/// pass. Unknown names and invalid code points pass through verbatim.
fn decode_entities(text: &str) -> String {
    entity_regex()
        .replace_all(text, |captures: &regex::Captures| {
            let body = &captures[1];
            if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                return u32::from_str_radix(hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| captures[0].to_string());
            }
            if let Some(dec) = body.strip_prefix('#') {
                return dec
                    .parse::<u32>()
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| captures[0].to_string());
            }
            named_entity(body).map(String::from).unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

/// Stage 4: drop every remaining tag; block-level elements leave a newline.
fn strip_tags(text: &str) -> String {
    let with_breaks = block_tag_regex().replace_all(text, "\n");
    any_tag_regex().replace_all(&with_breaks, "").into_owned()
}

/// Stage 5: collapse space/tab runs, cap newline runs at two, trim line and
/// overall edges.
fn normalize_whitespace(text: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static NEWLINES: OnceLock<Regex> = OnceLock::new();
    let spaces = SPACES.get_or_init(|| Regex::new(r"[ \t\u{00a0}]+").unwrap());
    let newlines = NEWLINES.get_or_init(|| Regex::new(r"\n{3,}").unwrap());

    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = spaces.replace_all(&unified, " ");
    let trimmed_lines: Vec<&str> = collapsed.split('\n').map(str::trim).collect();
    let joined = trimmed_lines.join("\n");
    newlines.replace_all(&joined, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_removal() {
        assert_eq!(clean_html(r#"before <img src="a.jpg"> after"#), "before after");
        assert_eq!(clean_html("before [sound:audio_file.mp3] after"), "before after");
        assert_eq!(
            clean_html(r#"x <audio controls><source src="a.ogg"></audio> y"#),
            "x y"
        );
        assert_eq!(clean_html(r#"<video src="v.mp4">fallback</video>done"#), "done");
    }

    #[test]
    fn test_formatting_markers() {
        assert_eq!(clean_html("<b>bold</b>"), "**bold**");
        assert_eq!(clean_html("<strong>bold</strong>"), "**bold**");
        assert_eq!(clean_html("<i>italic</i> and <em>emphasis</em>"), "*italic* and *emphasis*");
        assert_eq!(clean_html("<u>under</u>"), "_under_");
        assert_eq!(clean_html("<s>gone</s> <del>also</del>"), "~~gone~~ ~~also~~");
        assert_eq!(clean_html("H<sub>2</sub>O and x<sup>2</sup>"), "H[2]O and x^2^");
    }

    #[test]
    fn test_nested_formatting_composes() {
        assert_eq!(clean_html("<b><i>both</i></b>"), "***both***");
        assert_eq!(clean_html("<u><b>deep</b></u>"), "_**deep**_");
    }

    #[test]
    fn test_entity_decoding() {
        assert_eq!(clean_html("a &amp; b"), "a & b");
        // Decoded brackets that form a tag-shaped run are swept by stage 4.
        assert_eq!(clean_html("&lt;b&gt;not bold&lt;/b&gt;"), "not bold");
        assert_eq!(clean_html("2 &lt; 3"), "2 < 3");
        assert_eq!(clean_html("&#233;t&#xE9;"), "été");
        assert_eq!(clean_html("caf&eacute;"), "café");
        // Unknown names pass through verbatim.
        assert_eq!(clean_html("&notarealentity;"), "&notarealentity;");
    }

    #[test]
    fn test_block_tags_become_newlines() {
        assert_eq!(clean_html("<p>one</p><p>two</p>"), "one\n\ntwo");
        assert_eq!(clean_html("line<br>break"), "line\nbreak");
        assert_eq!(clean_html("<div>a</div><div>b</div>"), "a\n\nb");
        assert_eq!(clean_html("<span>inline</span> kept"), "inline kept");
    }

    #[test]
    fn test_whitespace_normalization() {
        assert_eq!(clean_html("a  \t  b"), "a b");
        assert_eq!(clean_html("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_html("  padded  "), "padded");
        assert_eq!(clean_html("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_idempotence() {
        let samples = [
            r#"<div><b>Bold</b> &amp; <i>italic</i><br><img src="x.png">[sound:a.mp3]</div>"#,
            "plain text stays plain",
            "<p>one</p>\n<p>two &lt;three&gt;</p>",
            "H<sub>2</sub>O at 100&deg;",
        ];
        for sample in samples {
            let once = clean_html(sample);
            assert_eq!(clean_html(&once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_non_ascii_preserved() {
        assert_eq!(clean_html("<b>日本語</b>のテキスト"), "**日本語**のテキスト");
        assert_eq!(clean_html("Ω ≠ ω"), "Ω ≠ ω");
    }

    #[test]
    fn test_plain_angle_brackets_survive() {
        assert_eq!(clean_html("3 < 4 and 5 > 4"), "3 < 4 and 5 > 4");
    }
}
