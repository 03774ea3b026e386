//! Deterministic lexical rules behind tier classification, language and entity extraction.

use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;

use super::{Language, Tier};

/// Queries with more words than this are never treated as simple lookups.
const SIMPLE_MAX_WORDS: usize = 12;

const GREETING_TOKENS: &str = r"oi+|ol[aá]|e a[ií]|hi+|hello|hey|bom dia|boa tarde|boa noite|good (?:morning|afternoon|evening)|obrigad[oa]|valeu|thanks|thank you|tchau|bye|ok|tudo (?:bem|bom)|how are you";

/// One or two greetings in a row, optionally addressed ("hi there", "oi, tudo bem?").
static GREETING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?:{GREETING_TOKENS})(?:[\s!.,?]+(?:{GREETING_TOKENS}))?(?:\s+(?:there|all|everyone|folks|pessoal|gente))?[\s!.,?]*$"
    ))
    .expect("greeting regex is valid")
});

static META_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^((list|show)( me)?( all)?( of)?( my)? (documents|files|docs)|(what|which) (documents|files) (do i have|have i uploaded|are (there|available))|(quais|que) (s[aã]o )?(os )?(meus )?(documentos|arquivos)|(listar|liste|mostre|mostrar)( todos)?( os)?( meus)? (documentos|arquivos)|(who|what) are you|quem [eé] voc[eê]|o que voc[eê] (faz|pode fazer)|what can you do|help|ajuda)[\s!.,?]*$",
    )
    .expect("meta regex is valid")
});

static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(summar(y|i[sz]e)|overview|tl;?dr|resum(o|a|ir|e)|vis[aã]o geral|sintetiz\w*)\b")
        .expect("summary regex is valid")
});

static COMPLEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(compar\w*|versus|vs\.?|difference(s)? between|diferen[cç]as? entre|all (the |my )?documents|across (all )?(the )?documents|todos os (meus )?documentos|em todos os|aggregate|consolidat\w+|consolid(ar|e|ado))(\s|$|[.,;:!?])",
    )
    .expect("complex regex is valid")
});

static INTERROGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(what|when|who|where|which|how (much|many|long)|is|are|does|did|qual|quais|quando|quem|onde|quanto|quantos|quantas|existe|h[aá])\b",
    )
    .expect("interrogative regex is valid")
});

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["“]([^"”]{2,80})["”]"#).expect("quoted regex is valid"));

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:19|20)\d{2}\b|\b\d+(?:[.,]\d+)*%?")
        .expect("number regex is valid")
});

const PT_MARKERS: &[&str] = &[
    "o", "a", "os", "as", "de", "do", "da", "dos", "das", "em", "no", "na", "que", "qual", "quais",
    "quanto", "quando", "como", "para", "com", "por", "não", "nao", "uma", "um", "é", "são",
    "meus", "minhas", "documento", "documentos", "oi", "olá", "ola", "obrigado", "obrigada",
    "foi", "tem", "sobre",
];

const EN_MARKERS: &[&str] = &[
    "the", "of", "and", "to", "in", "on", "is", "are", "was", "what", "which", "how", "when",
    "who", "my", "document", "documents", "hi", "hello", "for", "with", "about", "does", "did",
    "this", "that", "thanks",
];

pub fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn word_count(query: &str) -> usize {
    query.split_whitespace().count()
}

pub fn is_greeting(query: &str) -> bool {
    GREETING_RE.is_match(&normalize(query))
}

pub fn is_meta(query: &str) -> bool {
    META_RE.is_match(&normalize(query))
}

pub fn is_summary_request(query: &str) -> bool {
    SUMMARY_RE.is_match(query)
}

pub fn is_comparison(query: &str) -> bool {
    COMPLEX_RE.is_match(query)
}

fn is_factual_question(query: &str) -> bool {
    query.trim_end().ends_with('?') || INTERROGATIVE_RE.is_match(query.trim_start())
}

/// Maps a query to its processing tier. Pure: same inputs, same tier.
///
/// Greetings and meta requests are trivial; comparison and aggregation
/// wording is complex; a short factual question against exactly one attached
/// document is simple; everything else is medium.
pub fn classify_tier(query: &str, attached_documents: usize) -> Tier {
    let normalized = normalize(query);
    if normalized.is_empty() || is_greeting(&normalized) || is_meta(&normalized) {
        return Tier::Trivial;
    }
    if is_comparison(&normalized) {
        return Tier::Complex;
    }
    if attached_documents == 1
        && word_count(&normalized) <= SIMPLE_MAX_WORDS
        && is_factual_question(&normalized)
    {
        return Tier::Simple;
    }
    Tier::Medium
}

/// Stop-word vote between Portuguese and English; ties go to English.
pub fn detect_language(query: &str) -> Language {
    let lowered = query.to_lowercase();
    let mut pt = 0usize;
    let mut en = 0usize;

    for word in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        if PT_MARKERS.contains(&word) {
            pt = pt.saturating_add(1);
        }
        if EN_MARKERS.contains(&word) {
            en = en.saturating_add(1);
        }
    }

    if lowered.chars().any(|c| "ãõçâêôáéíóú".contains(c)) {
        pt = pt.saturating_add(2);
    }

    if pt > en {
        Language::Pt
    } else {
        Language::En
    }
}

/// Quoted phrases, capitalized runs that do not open a sentence, and numbers or years.
pub fn extract_entities(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();
    let mut push = |candidate: &str| {
        let trimmed = candidate.trim_matches(|c: char| !c.is_alphanumeric() && c != '%');
        if !trimmed.is_empty() && seen.insert(trimmed.to_lowercase()) {
            entities.push(trimmed.to_string());
        }
    };

    for capture in QUOTED_RE.captures_iter(query) {
        if let Some(phrase) = capture.get(1) {
            push(phrase.as_str());
        }
    }

    let mut run: Vec<&str> = Vec::new();
    let mut sentence_start = true;
    for token in query.split_whitespace() {
        let word = token.trim_matches(|c: char| !c.is_alphanumeric());
        let capitalized = word.chars().next().is_some_and(char::is_uppercase);
        if capitalized && !sentence_start {
            run.push(word);
        } else if !run.is_empty() {
            push(&run.join(" "));
            run.clear();
        }
        sentence_start = token.ends_with(['.', '!', '?']);
    }
    if !run.is_empty() {
        push(&run.join(" "));
    }

    for number in NUMBER_RE.find_iter(query) {
        push(number.as_str());
    }

    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greetings_and_meta_are_trivial() {
        for query in [
            "oi",
            "Oi!",
            "hello",
            "bom dia",
            "oi, tudo bem?",
            "hi there",
            "hello, how are you?",
            "list my documents",
            "Quais são os meus documentos?",
        ] {
            assert_eq!(classify_tier(query, 0), Tier::Trivial, "{query}");
        }
        assert_eq!(classify_tier("   ", 0), Tier::Trivial);
    }

    #[test]
    fn comparison_wording_is_complex() {
        for query in [
            "compare the 2022 and 2023 revenue",
            "contract A versus contract B",
            "what is the difference between both policies",
            "resuma todos os documentos",
            "comparar os relatórios de janeiro e fevereiro",
            "how has revenue changed compared to last year",
            "show comparisons of the quarterly margins",
        ] {
            assert_eq!(classify_tier(query, 0), Tier::Complex, "{query}");
        }
    }

    #[test]
    fn short_question_with_one_attachment_is_simple() {
        assert_eq!(classify_tier("What is the contract end date?", 1), Tier::Simple);
        assert_eq!(classify_tier("What is the contract end date?", 0), Tier::Medium);
        assert_eq!(classify_tier("What is the contract end date?", 2), Tier::Medium);
        assert_eq!(
            classify_tier("Explain in detail every clause related to termination and penalties for late payment in this agreement", 1),
            Tier::Medium
        );
    }

    #[test]
    fn classification_is_stable() {
        let query = "qual o valor total da nota?";
        let first = classify_tier(query, 1);
        for _ in 0..10 {
            assert_eq!(classify_tier(query, 1), first);
        }
    }

    #[test]
    fn detects_portuguese_and_english() {
        assert_eq!(detect_language("qual é o prazo do contrato?"), Language::Pt);
        assert_eq!(detect_language("oi"), Language::Pt);
        assert_eq!(detect_language("what is the contract deadline?"), Language::En);
        assert_eq!(detect_language("EBITDA"), Language::En);
    }

    #[test]
    fn extracts_quoted_capitalized_and_numeric_entities() {
        let entities =
            extract_entities(r#"What did Acme Corp report for "net revenue" in 2023 versus 12,5%?"#);
        assert!(entities.contains(&"net revenue".to_string()));
        assert!(entities.contains(&"Acme Corp".to_string()));
        assert!(entities.contains(&"2023".to_string()));
        assert!(entities.contains(&"12,5%".to_string()));
        assert!(!entities.contains(&"What".to_string()));
    }

    #[test]
    fn summary_requests_are_recognised() {
        assert!(is_summary_request("give me a summary of the report"));
        assert!(is_summary_request("faça um resumo do contrato"));
        assert!(!is_summary_request("what is the total?"));
    }
}
