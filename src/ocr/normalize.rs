//! Cleanup of raw OCR text before grammar matching.

/// Returns true if the character is a dash-like character OCR emits for `-`.
fn is_dash_char(c: char) -> bool {
    matches!(
        c,
        '-' | '\u{2010}' // hyphen ‐
            | '\u{2011}' // non-breaking hyphen ‑
            | '\u{2012}' // figure dash ‒
            | '\u{2013}' // en-dash –
            | '\u{2014}' // em-dash —
            | '\u{2015}' // horizontal bar ―
            | '\u{2212}' // minus sign −
            | '\u{2500}' // box drawing horizontal ─
            | '_'
    )
}

/// Digit and letter forms of an OCR-confusable character.
fn confusable_forms(c: char) -> Option<(char, char)> {
    match c {
        '0' | 'O' | 'Q' => Some(('0', 'O')),
        '1' | 'I' | 'L' => Some(('1', 'I')),
        '5' | 'S' => Some(('5', 'S')),
        '2' | 'Z' => Some(('2', 'Z')),
        '8' | 'B' => Some(('8', 'B')),
        '6' | 'G' => Some(('6', 'G')),
        _ => None,
    }
}

/// Uppercases, unifies dashes, drops noise and collapses whitespace.
///
/// The result only contains `A-Z`, `0-9`, `-` and single spaces.
pub fn clean(raw: &str) -> String {
    let mapped: String = raw
        .to_uppercase()
        .chars()
        .map(|c| match c {
            c if is_dash_char(c) => '-',
            '|' => 'I',
            'A'..='Z' | '0'..='9' => c,
            _ => ' ',
        })
        .collect();

    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolves confusable characters from their immediate neighbors.
///
/// Every decision reads the same frozen copy of the input, so a
/// substitution never influences the decision for the next character.
/// Neighbors that are not alphanumeric are ignored; with only letters
/// around, digits become letters, with only digits around, letters become
/// digits, anything else is left alone.
pub fn resolve_confusables(text: &str) -> String {
    let snapshot: Vec<char> = text.chars().collect();

    snapshot
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let Some((digit, letter)) = confusable_forms(c) else {
                return c;
            };

            let left = i.checked_sub(1).and_then(|j| snapshot.get(j));
            let right = snapshot.get(i + 1);
            let neighbors: Vec<char> = [left, right]
                .into_iter()
                .flatten()
                .copied()
                .filter(|n| n.is_ascii_alphanumeric())
                .collect();

            if neighbors.is_empty() {
                c
            } else if neighbors.iter().all(|n| n.is_ascii_alphabetic()) {
                if c.is_ascii_digit() { letter } else { c }
            } else if neighbors.iter().all(|n| n.is_ascii_digit()) {
                if c.is_ascii_alphabetic() { digit } else { c }
            } else {
                c
            }
        })
        .collect()
}

/// Full normalization: [`clean`] followed by [`resolve_confusables`].
pub fn normalize(raw: &str) -> String {
    resolve_confusables(&clean(raw))
}
