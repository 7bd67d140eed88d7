//! Reference material loader.
//!
//! Turns a free-form notes file (usually Markdown listing the people, groups
//! and terms that appear in a video) into a compact keyword list and a
//! source-name to target-name map. The result primes the transcriber and is
//! embedded into every translation request.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, info, warn};

const MAX_KEYWORD_CHARS: usize = 40;
const MAX_KEYWORD_WORDS: usize = 4;
const ARROWS: [&str; 3] = ["->", "=>", "→"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceContext {
    pub keywords: BTreeSet<String>,
    pub name_map: BTreeMap<String, String>,
}

impl ReferenceContext {
    /// Load a reference file. A missing or unreadable file is not fatal: the
    /// pipeline simply runs without reference material.
    pub async fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let context = Self::parse(&content);
                info!(
                    "Loaded reference material from {}: {} keywords, {} name mappings",
                    path.display(),
                    context.keywords.len(),
                    context.name_map.len()
                );
                context
            }
            Err(e) => {
                warn!("Reference file {} not usable ({}), continuing without it", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut context = Self::default();
        let mut in_comment = false;
        let lines: Vec<&str> = content.lines().map(str::trim).collect();

        for (i, &line) in lines.iter().enumerate() {
            if in_comment {
                if line.contains("-->") {
                    in_comment = false;
                }
                continue;
            }
            if line.starts_with("<!--") {
                in_comment = !line.contains("-->");
                continue;
            }
            if line.is_empty() || line.starts_with('#') || is_table_separator(line) {
                continue;
            }

            if line.starts_with('|') {
                // header row
                if lines.get(i + 1).is_some_and(|next| is_table_separator(next)) {
                    continue;
                }
                context.parse_table_row(line);
                continue;
            }

            let line = strip_markdown(line);
            if line.is_empty() {
                continue;
            }

            if let Some((source, target)) = split_mapping(&line) {
                context.add_mapping(source, target);
            } else if let Some((label, value)) = split_label(&line) {
                if has_hangul(label) && has_latin(value) && !has_hangul(value) {
                    context.add_mapping(label, value);
                } else {
                    context.add_fragments(value);
                }
            } else {
                context.add_fragments(&line);
            }
        }

        debug!("Reference keywords: {:?}", context.keywords);
        context
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.name_map.is_empty()
    }

    /// Priming text for the transcriber: the initial prompt followed by as
    /// many keywords as fit in `limit` characters, source-language names first.
    pub fn whisper_prompt(&self, initial_prompt: &str, limit: usize) -> String {
        let mut ordered: Vec<&str> = self.name_map.keys().map(String::as_str).collect();
        let (hangul, other): (Vec<&String>, Vec<&String>) = self
            .keywords
            .iter()
            .filter(|k| !self.name_map.contains_key(k.as_str()))
            .partition(|k| has_hangul(k));
        ordered.extend(hangul.into_iter().map(String::as_str));
        ordered.extend(other.into_iter().map(String::as_str));

        let mut listed = String::new();
        for keyword in ordered {
            let extra = if listed.is_empty() { keyword.chars().count() } else { keyword.chars().count() + 2 };
            if listed.chars().count() + extra > limit {
                break;
            }
            if !listed.is_empty() {
                listed.push_str(", ");
            }
            listed.push_str(keyword);
        }

        if listed.is_empty() {
            initial_prompt.to_string()
        } else {
            format!("{} Context: {}", initial_prompt, listed)
        }
    }

    /// The reference section of a translation prompt. Empty when there is no
    /// reference material.
    pub fn prompt_block(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut block = String::new();
        if !self.name_map.is_empty() {
            block.push_str("Names (source => required rendering):\n");
            for (source, target) in &self.name_map {
                block.push_str(&format!("- {} => {}\n", source, target));
            }
        }
        if !self.keywords.is_empty() {
            let keywords: Vec<&str> = self.keywords.iter().map(String::as_str).collect();
            block.push_str(&format!("Keywords: {}\n", keywords.join(", ")));
        }
        block
    }

    fn add_mapping(&mut self, source: &str, target: &str) {
        let source = clean_fragment(source);
        let target = clean_fragment(target);
        if source.is_empty() || target.is_empty() {
            return;
        }
        self.keywords.insert(source.to_string());
        self.keywords.insert(target.to_string());
        self.name_map.insert(source.to_string(), target.to_string());
    }

    fn add_fragments(&mut self, text: &str) {
        for fragment in text.split([',', '、', ';', '/', '|']) {
            let fragment = clean_fragment(fragment);
            if is_keyword(fragment) {
                self.keywords.insert(fragment.to_string());
            }
        }
    }

    fn parse_table_row(&mut self, line: &str) {
        let cells: Vec<&str> = line
            .split('|')
            .map(|cell| clean_fragment(cell))
            .filter(|cell| !cell.is_empty())
            .collect();

        let source = cells.iter().find(|c| has_hangul(c) && !has_latin(c));
        let target = cells.iter().find(|c| has_latin(c) && !has_hangul(c));
        match (source, target) {
            (Some(source), Some(target)) => self.add_mapping(source, target),
            _ => self.add_fragments(&cells.join(",")),
        }
    }
}

/// `source -> target` or `source (target)` / `target (source)`.
fn split_mapping(line: &str) -> Option<(&str, &str)> {
    for arrow in ARROWS {
        if let Some((left, right)) = line.split_once(arrow) {
            if !left.trim().is_empty() && !right.trim().is_empty() {
                return Some((left, right));
            }
        }
    }

    let open = line.find('(')?;
    let inner = line[open + 1..].strip_suffix(')')?;
    let outer = &line[..open];
    if has_hangul(outer) && has_latin(inner) && !has_hangul(inner) {
        Some((outer, inner))
    } else if has_hangul(inner) && has_latin(outer) && !has_hangul(outer) {
        Some((inner, outer))
    } else {
        None
    }
}

fn split_label(line: &str) -> Option<(&str, &str)> {
    let (label, value) = line.split_once(':').or_else(|| line.split_once('：'))?;
    if label.trim().is_empty() || value.trim().is_empty() {
        None
    } else {
        Some((label, value))
    }
}

fn strip_markdown(line: &str) -> String {
    let mut line = line.trim_start_matches(['-', '*', '+', '>']).trim_start();
    if let Some(dot) = line.find(". ") {
        if line[..dot].chars().all(|c| c.is_ascii_digit()) && dot > 0 {
            line = &line[dot + 2..];
        }
    }
    line.replace("**", "").replace("__", "").replace('`', "").trim().to_string()
}

fn clean_fragment(fragment: &str) -> &str {
    fragment.trim().trim_matches(|c: char| matches!(c, '.' | '"' | '\'' | '*' | '_'))
        .trim()
}

fn is_keyword(fragment: &str) -> bool {
    !fragment.is_empty()
        && fragment.chars().count() <= MAX_KEYWORD_CHARS
        && fragment.split_whitespace().count() <= MAX_KEYWORD_WORDS
}

fn is_table_separator(line: &str) -> bool {
    line.starts_with('|') && line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

pub fn has_hangul(text: &str) -> bool {
    text.chars().any(|c| {
        ('\u{AC00}'..='\u{D7A3}').contains(&c)
            || ('\u{1100}'..='\u{11FF}').contains(&c)
            || ('\u{3130}'..='\u{318F}').contains(&c)
    })
}

fn has_latin(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# tripleS

<!-- internal notes
     not part of the reference -->

## Members
- 윤서연 -> Yoon SeoYeon
- 정하연 (Jeong HyeRin)
- Kim YooYeon (김유연)
- 이지우: Lee JiWoo

| Korean | Stage name | Unit |
|--------|-----------|------|
| 김채연 | Kim ChaeYeon | Acid Angel |

Units: Acid Angel from Asia, +(KR)ystal Eyes, LOVElution
This is a long sentence describing the group that should not become a keyword at all.
"#;

    #[test]
    fn test_parse_recognises_mapping_forms() {
        let context = ReferenceContext::parse(SAMPLE);

        assert_eq!(context.name_map.get("윤서연").map(String::as_str), Some("Yoon SeoYeon"));
        assert_eq!(context.name_map.get("정하연").map(String::as_str), Some("Jeong HyeRin"));
        assert_eq!(context.name_map.get("김유연").map(String::as_str), Some("Kim YooYeon"));
        assert_eq!(context.name_map.get("이지우").map(String::as_str), Some("Lee JiWoo"));
        assert_eq!(context.name_map.get("김채연").map(String::as_str), Some("Kim ChaeYeon"));
        assert_eq!(context.name_map.len(), 5);
    }

    #[test]
    fn test_parse_collects_keywords_and_skips_prose() {
        let context = ReferenceContext::parse(SAMPLE);

        assert!(context.keywords.contains("Acid Angel from Asia"));
        assert!(context.keywords.contains("LOVElution"));
        assert!(context.keywords.contains("윤서연"));
        assert!(context.keywords.contains("Yoon SeoYeon"));
        assert!(!context.keywords.iter().any(|k| k.contains("long sentence")));
        assert!(!context.keywords.iter().any(|k| k.contains("internal notes")));
        assert!(!context.keywords.contains("Members"));
        assert!(!context.keywords.contains("Stage name"));
    }

    #[test]
    fn test_whisper_prompt_puts_names_first_and_respects_limit() {
        let context = ReferenceContext::parse("- 윤서연 -> Yoon SeoYeon\nLOVElution, Acid Angel");

        let prompt = context.whisper_prompt("Korean talk.", 400);
        assert!(prompt.starts_with("Korean talk. Context: 윤서연"));
        assert!(prompt.contains("LOVElution"));

        let short = context.whisper_prompt("Korean talk.", 3);
        assert_eq!(short, "Korean talk. Context: 윤서연");

        let none = ReferenceContext::default().whisper_prompt("Korean talk.", 400);
        assert_eq!(none, "Korean talk.");
    }

    #[test]
    fn test_prompt_block_lists_names_and_keywords() {
        let context = ReferenceContext::parse("윤서연 -> Yoon SeoYeon");
        let block = context.prompt_block();
        assert!(block.contains("- 윤서연 => Yoon SeoYeon"));
        assert!(block.contains("Keywords: "));
        assert!(ReferenceContext::default().prompt_block().is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_file_yields_empty_context() {
        let context = ReferenceContext::load("/definitely/not/here.md").await;
        assert!(context.is_empty());
    }
}
