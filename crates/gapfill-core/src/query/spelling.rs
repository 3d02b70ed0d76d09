//! Vocabulary-based spelling correction
//!
//! Only alphabetic words of five or more letters are candidates; shorter
//! words are too ambiguous to correct safely. Quoted text is left alone, as
//! are capitalised words inside a facility name ("Parkland Memorial
//! Hospital"): proper names are not typos.

use crate::registry::{FACILITY_NOUNS, VOCABULARY};

/// Shortest word considered for correction
const MIN_WORD_LEN: usize = 5;

#[derive(Debug)]
enum Piece {
    Word { text: String, quoted: bool },
    Other(char),
}

/// Correct misspelled words in `text` against the query vocabulary.
///
/// Whitespace, punctuation and capitalisation are preserved.
pub fn correct(text: &str) -> String {
    let pieces = split(text);
    let mut out = String::with_capacity(text.len());

    for (i, piece) in pieces.iter().enumerate() {
        match piece {
            Piece::Other(ch) => out.push(*ch),
            Piece::Word { text, quoted } => {
                let keep = *quoted || in_facility_name(&pieces[i..]);
                match (!keep).then(|| suggest(text)).flatten() {
                    Some(replacement) => out.push_str(&match_case(text, &replacement)),
                    None => out.push_str(text),
                }
            }
        }
    }
    out
}

fn split(text: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut in_quotes = false;
    let mut word = String::new();

    for ch in text.chars() {
        if ch.is_alphabetic() {
            word.push(ch);
            continue;
        }
        if !word.is_empty() {
            pieces.push(Piece::Word {
                text: std::mem::take(&mut word),
                quoted: in_quotes,
            });
        }
        if ch == '"' {
            in_quotes = !in_quotes;
        }
        pieces.push(Piece::Other(ch));
    }
    if !word.is_empty() {
        pieces.push(Piece::Word {
            text: word,
            quoted: in_quotes,
        });
    }
    pieces
}

fn is_capitalised(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
}

/// True when `pieces` starts a run of capitalised words that goes on to
/// name a facility, e.g. "Parkland Memorial Hospital"
fn in_facility_name(pieces: &[Piece]) -> bool {
    let mut seen_word = false;
    for piece in pieces {
        match piece {
            Piece::Word { text, .. } => {
                if !is_capitalised(text) {
                    return false;
                }
                let lower = text.to_lowercase();
                // the noun itself may be the misspelling ("Mayo Clnic")
                if seen_word && FACILITY_NOUNS.contains(&lower.as_str()) {
                    return true;
                }
                seen_word = true;
            }
            Piece::Other(ch) if ch.is_whitespace() || matches!(*ch, '\'' | '&' | '.' | '-') => {}
            Piece::Other(_) => return false,
        }
    }
    false
}

/// Nearest vocabulary word for `word`, if it needs correcting
pub fn suggest(word: &str) -> Option<String> {
    let len = word.chars().count();
    if len < MIN_WORD_LEN {
        return None;
    }

    let lower = word.to_lowercase();
    if VOCABULARY.iter().any(|w| *w == lower) {
        return None;
    }

    let max_distance = if len >= 8 { 2 } else { 1 };
    let mut best: Option<(&String, usize)> = None;
    for candidate in VOCABULARY.iter() {
        let distance = levenshtein_distance(&lower, candidate);
        if distance > max_distance {
            continue;
        }
        // strict comparison keeps the earliest word on ties
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((candidate, distance));
        }
    }

    best.map(|(w, _)| w.clone())
}

/// Apply the capitalisation pattern of `original` to `replacement`
fn match_case(original: &str, replacement: &str) -> String {
    let letters: Vec<char> = original.chars().collect();
    if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) {
        return replacement.to_uppercase();
    }
    if letters.first().is_some_and(|c| c.is_uppercase()) {
        let mut chars = replacement.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    replacement.to_string()
}

/// Levenshtein distance implementation
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut matrix = vec![vec![0usize; b_len + 1]; a_len + 1];

    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, val) in matrix[0].iter_mut().enumerate() {
        *val = j;
    }

    for (i, a_char) in a_chars.iter().enumerate() {
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = if a_char == b_char { 0 } else { 1 };
            matrix[i + 1][j + 1] = (matrix[i][j + 1] + 1)
                .min(matrix[i + 1][j] + 1)
                .min(matrix[i][j] + cost);
        }
    }

    matrix[a_len][b_len]
}
