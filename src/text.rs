//! Text normalization helpers
//!
//! Questions arrive in French or English, with or without accents, in any case.
//! Every stage that compares words goes through [`normalize`] so that
//! "Région de Tiapoum" and "REGION DE TIAPOUM" look the same.

/// Fold a single character to its unaccented upper-case ASCII form when one exists.
fn fold_char(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' | 'À' | 'Á' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'A',
        'ç' | 'Ç' => 'C',
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ñ' | 'Ñ' => 'N',
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' | 'Ò' | 'Ó' | 'Ô' | 'Ö' | 'Õ' => 'O',
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ÿ' | 'Ÿ' => 'Y',
        'œ' | 'Œ' => 'O',
        other => other.to_ascii_uppercase(),
    }
}

/// Combining diacritical marks, as left by decomposed (NFD) input
fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036F}').contains(&c)
}

/// Accent-fold, upper-case and reduce punctuation to single spaces.
///
/// `"N'Zi, Sous-Préfecture"` becomes `"N ZI SOUS PREFECTURE"`.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;

    for c in input.chars() {
        if is_combining_mark(c) {
            continue;
        }
        let folded = fold_char(c);
        if folded.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(folded);
        } else {
            pending_space = true;
        }
    }

    out
}

/// Normalized words of the input, in order.
pub fn words(input: &str) -> Vec<String> {
    normalize(input)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// True when `phrase` (already normalized) occurs in `haystack` (already normalized)
/// on word boundaries.
pub fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let padded_haystack = format!(" {} ", haystack);
    let padded_phrase = format!(" {} ", phrase);
    padded_haystack.contains(&padded_phrase)
}
