use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "am", "an", "and", "any", "are", "as", "at", "be", "by", "can", "could",
    "do", "does", "for", "from", "have", "how", "i", "i'm", "im", "in", "is", "it", "its", "let",
    "me", "my", "need", "of", "on", "or", "our", "please", "so", "some", "that", "the", "their",
    "them", "then", "there", "this", "to", "up", "us", "want", "was", "we", "what", "when",
    "where", "which", "who", "whos", "why", "will", "with", "would", "you", "your",
];

/// Lowercases, maps punctuation to spaces and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || character == '#' {
            sanitized.extend(character.to_lowercase());
        } else if character == '\'' || character == '\u{2019}' {
            continue;
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text).split(' ').filter(|token| !token.is_empty()).map(str::to_string).collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Content tokens (no stopwords) as a set.
pub fn content_tokens(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().filter(|token| !is_stopword(token)).collect()
}

/// Whether `phrase` occurs in `normalized` starting at a word boundary.
/// Phrases act as stems: "validat" matches "validated" and "validation".
pub fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let phrase = normalize(phrase);
    if phrase.is_empty() {
        return false;
    }
    normalized.match_indices(phrase.as_str()).any(|(index, _)| {
        index == 0 || normalized[..index].chars().next_back().is_some_and(|c| !c.is_alphanumeric())
    })
}

pub fn jaccard(left: &BTreeSet<String>, right: &BTreeSet<String>) -> f64 {
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let intersection = left.intersection(right).count() as f64;
    let union = left.union(right).count() as f64;
    intersection / union
}

/// "client_name" -> "client name".
pub fn humanize_key(key: &str) -> String {
    key.replace(['_', '.'], " ")
}

pub fn join_with_or(items: &[String]) -> String {
    join_with(items, "or")
}

pub fn join_with_and(items: &[String]) -> String {
    join_with(items, "and")
}

fn join_with(items: &[String], conjunction: &str) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{first} {conjunction} {second}"),
        [rest @ .., last] => format!("{}, {conjunction} {last}", rest.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_phrase, content_tokens, jaccard, join_with_or, normalize};

    #[test]
    fn normalize_strips_punctuation_and_apostrophes() {
        assert_eq!(normalize("Who's the President of USA?"), "whos the president of usa");
        assert_eq!(normalize("  Wave-#3,  client: ACME "), "wave #3 client acme");
    }

    #[test]
    fn phrase_matching_requires_word_start() {
        let text = normalize("I already validated documents");
        assert!(contains_phrase(&text, "validat"));
        assert!(!contains_phrase(&text, "lidat"));
        assert!(contains_phrase(&normalize("send the e-mails"), "e-mail"));
    }

    #[test]
    fn jaccard_of_reworded_questions() {
        let first = content_tokens("Which client is this for?");
        let second = content_tokens("Which client is this for, exactly?");
        assert!(jaccard(&first, &second) >= 0.5);
        assert_eq!(jaccard(&content_tokens(""), &content_tokens("")), 1.0);
    }

    #[test]
    fn joins_lists_naturally() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(join_with_or(&items), "a, b, or c");
        assert_eq!(join_with_or(&items[..2]), "a or b");
    }
}
