use crate::utils::Result;
use std::collections::HashMap;
use std::path::Path;

/// Rules that apply to every request, regardless of glossary content.
/// Glossary rules are rendered ahead of these and take priority.
const GENERAL_RULES: &[&str] = &[
    "Keep all numerals exactly as they appear in the source.",
    "Keep measurements with unit suffixes (such as \"20 mW\") unchanged.",
    "Keep all-caps acronyms unchanged.",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermRule {
    /// The glossary mandates this exact translation.
    Translate(String),
    /// The term must be preserved verbatim, including case.
    Preserve,
}

#[derive(Debug, Clone)]
struct GlossaryTerm {
    term: String,
    rules: HashMap<String, TermRule>,
}

/// A user-supplied term table. The first CSV column holds the base-language
/// term; every other column is keyed by a target-language code, where a
/// non-empty cell mandates that translation and an empty cell marks the term
/// as do-not-translate for that language. A language with no column carries
/// no rule at all.
#[derive(Debug, Clone, Default)]
pub struct Glossary {
    terms: Vec<GlossaryTerm>,
}

impl Glossary {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let languages: Vec<String> = headers.iter().skip(1).cloned().collect();

        let mut terms = Vec::new();
        for result in reader.records() {
            let record = result?;
            let term = record.get(0).unwrap_or("").trim().to_string();
            if term.is_empty() {
                continue;
            }

            let mut rules = HashMap::new();
            for (i, lang) in languages.iter().enumerate() {
                let cell = record.get(i + 1).unwrap_or("").trim();
                let rule = if cell.is_empty() {
                    TermRule::Preserve
                } else {
                    TermRule::Translate(cell.to_string())
                };
                rules.insert(lang.clone(), rule);
            }

            terms.push(GlossaryTerm { term, rules });
        }

        Ok(Self { terms })
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Rules triggered by `text` for `target_lang`. Matching is whole-word
    /// and case-sensitive.
    pub fn matching_rules(&self, text: &str, target_lang: &str) -> Vec<(String, TermRule)> {
        self.terms
            .iter()
            .filter(|t| contains_whole_word(text, &t.term))
            .filter_map(|t| {
                t.rules
                    .get(target_lang)
                    .map(|rule| (t.term.clone(), rule.clone()))
            })
            .collect()
    }
}

/// Renders the instruction block for one translation unit: matched glossary
/// rules first, then the general formatting rules. With no glossary (or no
/// matches) only the general rules remain.
pub fn render_instructions(text: &str, target_lang: &str, glossary: Option<&Glossary>) -> String {
    let mut lines: Vec<String> = Vec::new();

    if let Some(glossary) = glossary {
        for (term, rule) in glossary.matching_rules(text, target_lang) {
            match rule {
                TermRule::Translate(translation) => lines.push(format!(
                    "Always translate \"{}\" as \"{}\".",
                    term, translation
                )),
                TermRule::Preserve => lines.push(format!(
                    "Do not translate \"{}\"; preserve it verbatim including case.",
                    term
                )),
            }
        }
    }

    for rule in GENERAL_RULES {
        lines.push((*rule).to_string());
    }

    format!("Follow these rules: {}", lines.join(" "))
}

fn contains_whole_word(text: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }

    let mut search_from = 0;
    while let Some(pos) = text[search_from..].find(term) {
        let start = search_from + pos;
        let end = start + term.len();

        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());

        if before_ok && after_ok {
            return true;
        }
        search_from = end;
    }

    false
}
