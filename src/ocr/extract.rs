use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Characters stripped from manually typed codes.
const UNSAFE_MANUAL_CHARS: &[char] = &['<', '>', '"', '\'', '&'];

/// Four-segment code format: `<PREFIX>-<PRODUCT>-<BODY>-<CHECK>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeGrammar {
    pub prefix: String,
    pub product: String,
    pub body_min: usize,
    pub body_max: usize,
}

impl Default for CodeGrammar {
    fn default() -> Self {
        Self {
            prefix: "NEEXT".to_string(),
            product: "GC".to_string(),
            body_min: 5,
            body_max: 16,
        }
    }
}

impl CodeGrammar {
    /// Rejects grammars no code could satisfy.
    pub fn validate(&self) -> Result<()> {
        for (name, token) in [("prefix", &self.prefix), ("product", &self.product)] {
            if token.is_empty() || !token.chars().all(is_code_char) {
                return Err(anyhow!(
                    "Grammar {} must be non-empty uppercase alphanumeric, got {:?}",
                    name,
                    token
                ));
            }
        }
        if self.body_min == 0 || self.body_min > self.body_max {
            return Err(anyhow!(
                "Invalid body length range {}..={}",
                self.body_min,
                self.body_max
            ));
        }
        Ok(())
    }

    /// Returns true if `code` is exactly in canonical form.
    pub fn is_canonical(&self, code: &str) -> bool {
        let parts: Vec<&str> = code.split('-').collect();
        let [prefix, product, body, check] = parts.as_slice() else {
            return false;
        };

        *prefix == self.prefix
            && *product == self.product
            && (self.body_min..=self.body_max).contains(&body.len())
            && body.chars().all(is_code_char)
            && check.len() == 1
            && check.chars().all(is_code_char)
    }

    fn canonical(&self, body: &str, check: &str) -> String {
        format!("{}-{}-{}-{}", self.prefix, self.product, body, check)
    }
}

fn is_code_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit()
}

/// Regex character class accepting the OCR confusions of `c`.
fn confusable_class(c: char) -> String {
    let class = match c {
        'E' | '3' => "[E3]",
        'O' | '0' | 'Q' => "[O0Q]",
        'I' | '1' | 'L' => "[I1L]",
        'S' | '5' => "[S5]",
        'Z' | '2' => "[Z2]",
        'B' | '8' => "[B8]",
        'G' | '6' => "[G6]",
        _ => return regex::escape(&c.to_string()),
    };
    class.to_string()
}

/// Text a pass is matched against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Haystack {
    /// Normalized text as given.
    Normalized,
    /// Normalized text with every non-alphanumeric character removed.
    Collapsed,
}

/// One grammar pattern. Capture 1 is the body, capture 2 the check character.
struct MatchPass {
    name: &'static str,
    pattern: Regex,
    haystack: Haystack,
}

impl MatchPass {
    fn try_match(&self, normalized: &str, collapsed: &str) -> Option<(String, String)> {
        let text = match self.haystack {
            Haystack::Normalized => normalized,
            Haystack::Collapsed => collapsed,
        };
        let caps = self.pattern.captures(text)?;
        let body = caps.get(1)?.as_str().to_string();
        let check = caps.get(2)?.as_str().to_string();
        Some((body, check))
    }
}

/// Matches normalized OCR text against the code grammar.
///
/// Passes run from most to least specific and the first hit wins:
/// - strict: literal tokens with `-` separators
/// - fuzzy: confusable token letters, flexible or missing separators
/// - collapsed: all separators removed, anchored on the literal tokens;
///   this is what reads a body split by stray spaces
pub struct CodeMatcher {
    grammar: CodeGrammar,
    passes: Vec<MatchPass>,
}

impl CodeMatcher {
    pub fn new(grammar: CodeGrammar) -> Result<Self> {
        grammar.validate()?;

        let prefix = regex::escape(&grammar.prefix);
        let product = regex::escape(&grammar.product);
        let fuzzy_prefix: String = grammar.prefix.chars().map(confusable_class).collect();
        let fuzzy_product: String = grammar.product.chars().map(confusable_class).collect();
        let (min, max) = (grammar.body_min, grammar.body_max);

        let passes = vec![
            MatchPass {
                name: "strict",
                pattern: Regex::new(&format!(
                    r"{prefix}\s*-\s*{product}\s*-\s*([A-Z0-9]{{{min},{max}}})\s*-\s*([A-Z0-9])"
                ))?,
                haystack: Haystack::Normalized,
            },
            MatchPass {
                name: "fuzzy",
                pattern: Regex::new(&format!(
                    r"{fuzzy_prefix}[-\s:]*{fuzzy_product}[-\s:]*([A-Z0-9]{{{min},{max}}})[-\s:]*([A-Z0-9])"
                ))?,
                haystack: Haystack::Normalized,
            },
            MatchPass {
                name: "collapsed",
                pattern: Regex::new(&format!(
                    r"{prefix}{product}([A-Z0-9]{{{min},{max}}})([A-Z0-9])"
                ))?,
                haystack: Haystack::Collapsed,
            },
        ];

        Ok(Self { grammar, passes })
    }

    /// Returns the canonical code found in `normalized`, if any.
    pub fn match_code(&self, normalized: &str) -> Option<String> {
        let collapsed: String = normalized
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        self.passes.iter().find_map(|pass| {
            let (body, check) = pass.try_match(normalized, &collapsed)?;
            let code = self.grammar.canonical(&body, &check);
            debug!("Matched {} with {} pattern", mask_code(&code), pass.name);
            Some(code)
        })
    }
}

/// Cleans a code typed by hand and returns it if it is canonical.
pub fn sanitize_manual_code(input: &str, grammar: &CodeGrammar) -> Option<String> {
    let cleaned: String = input
        .chars()
        .filter(|c| !UNSAFE_MANUAL_CHARS.contains(c))
        .collect::<String>()
        .trim()
        .to_uppercase();

    grammar.is_canonical(&cleaned).then_some(cleaned)
}

/// Hides everything after the first four characters of a code for logs.
pub fn mask_code(code: &str) -> String {
    let head: String = code.chars().take(4).collect();
    format!("{}****", head)
}
