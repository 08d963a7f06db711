//! Reply Grammar
//!
//! Each selection kind accepts a small fixed grammar. Parsing is total: every
//! input maps to exactly one [`ReplyChoice`]. Numeric parsing always runs first,
//! so a reply that is both a valid index and a token is read as an index.

use once_cell::sync::Lazy;
use regex::Regex;

static GRID_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([UV])([1-4])$").expect("grid token regex"));

/// Typed result of parsing one reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyChoice {
    /// Zero-based item index (users type 1-based numbers)
    Index(usize),
    /// Canonical (uppercase) token or action label
    Action(String),
    All,
    Text(String),
    Invalid,
}

/// Grammar accepted by a selection kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grammar {
    /// `1..=count`
    Index { count: usize },
    /// `1..=count` or `all`
    IndexOrAll { count: usize },
    /// Fixed token set, matched case-insensitively
    Tokens {
        tokens: Vec<String>,
        tolerate_free_text: bool,
    },
    /// `1..=count`, any action label, or one of `extra`
    IndexOrActions {
        count: usize,
        actions: Vec<String>,
        extra: Vec<String>,
    },
    /// Any non-empty text
    FreeText,
}

impl Grammar {
    /// `U1..U4` and `V1..V4`
    pub fn grid_tokens(upscale: bool, vary: bool, tolerate_free_text: bool) -> Self {
        let mut tokens = Vec::new();
        for (enabled, prefix) in [(upscale, 'U'), (vary, 'V')] {
            if enabled {
                tokens.extend((1..=4).map(|n| format!("{}{}", prefix, n)));
            }
        }
        Self::Tokens {
            tokens,
            tolerate_free_text,
        }
    }

    pub fn parse(&self, input: &str) -> ReplyChoice {
        let text = input.trim();
        if text.is_empty() {
            return ReplyChoice::Invalid;
        }

        match self {
            Self::Index { count } => parse_index(text, *count).unwrap_or(ReplyChoice::Invalid),

            Self::IndexOrAll { count } => {
                if let Some(choice) = parse_index(text, *count) {
                    return choice;
                }
                if text.eq_ignore_ascii_case("all") {
                    ReplyChoice::All
                } else {
                    ReplyChoice::Invalid
                }
            }

            Self::Tokens { tokens, .. } => match_token(text, tokens.iter())
                .map(ReplyChoice::Action)
                .unwrap_or(ReplyChoice::Invalid),

            Self::IndexOrActions { count, actions, extra } => {
                if let Some(choice) = parse_index(text, *count) {
                    return choice;
                }
                match_token(text, actions.iter().chain(extra.iter()))
                    .map(ReplyChoice::Action)
                    .unwrap_or(ReplyChoice::Invalid)
            }

            Self::FreeText => ReplyChoice::Text(text.to_string()),
        }
    }

    /// Whether unmatched input is silently ignored rather than answered
    pub fn tolerates_free_text(&self) -> bool {
        match self {
            Self::Tokens { tolerate_free_text, .. } => *tolerate_free_text,
            Self::FreeText => true,
            _ => false,
        }
    }

    /// Guidance shown for invalid input
    pub fn hint(&self) -> String {
        match self {
            Self::Index { count } => format!("❌ Invalid selection. Reply with a number (1–{}).", count),
            Self::IndexOrAll { count } => {
                format!("❌ Invalid selection. Reply with a number (1–{}) or \"all\".", count)
            }
            Self::Tokens { tokens, .. } => {
                format!("❌ Invalid input. Reply with {}.", join_options(tokens))
            }
            Self::IndexOrActions { count, actions, extra } => {
                let mut options: Vec<String> = actions.clone();
                options.extend(extra.iter().cloned());
                options.dedup();
                if options.is_empty() {
                    format!("❌ Invalid input. Reply with 1–{}.", count)
                } else {
                    format!(
                        "❌ Invalid input. Reply with 1–{} or an action ({}).",
                        count,
                        options.join(", ")
                    )
                }
            }
            Self::FreeText => "❌ Please reply with some text.".to_string(),
        }
    }
}

/// Parse a `U1`/`V3` style token into (upscale?, zero-based slot)
pub fn grid_slot(token: &str) -> Option<(char, usize)> {
    let upper = token.trim().to_uppercase();
    let caps = GRID_TOKEN.captures(&upper)?;
    let op = caps.get(1)?.as_str().chars().next()?;
    let slot: usize = caps.get(2)?.as_str().parse().ok()?;
    Some((op, slot - 1))
}

/// `Some(Index)` for an in-range number, `Some(Invalid)` for an out-of-range
/// number, `None` when the text is not plain ASCII digits
fn parse_index(text: &str, count: usize) -> Option<ReplyChoice> {
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match text.parse::<usize>() {
        Ok(n) if n >= 1 && n <= count => Some(ReplyChoice::Index(n - 1)),
        _ => Some(ReplyChoice::Invalid),
    }
}

fn match_token<'a>(text: &str, mut tokens: impl Iterator<Item = &'a String>) -> Option<String> {
    tokens
        .find(|t| t.eq_ignore_ascii_case(text))
        .map(|t| t.to_uppercase())
}

fn join_options(tokens: &[String]) -> String {
    match tokens.len() {
        0 => String::new(),
        1 => tokens[0].clone(),
        n => format!("{}, or {}", tokens[..n - 1].join(", "), tokens[n - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_bounds() {
        let g = Grammar::Index { count: 3 };
        assert_eq!(g.parse("1"), ReplyChoice::Index(0));
        assert_eq!(g.parse(" 3 "), ReplyChoice::Index(2));
        assert_eq!(g.parse("0"), ReplyChoice::Invalid);
        assert_eq!(g.parse("4"), ReplyChoice::Invalid);
        assert_eq!(g.parse("-1"), ReplyChoice::Invalid);
        assert_eq!(g.parse("two"), ReplyChoice::Invalid);
        assert_eq!(g.parse(""), ReplyChoice::Invalid);
        assert_eq!(g.parse("99999999999999999999"), ReplyChoice::Invalid);
    }

    #[test]
    fn test_index_rejects_signs_and_separators() {
        let g = Grammar::Index { count: 3 };
        for input in ["+2", "2.0", "1_0", "２", "0x2"] {
            assert_eq!(g.parse(input), ReplyChoice::Invalid, "input {:?}", input);
        }

        // a signed number is not numeric, so it may still match a token
        let g = Grammar::IndexOrActions {
            count: 4,
            actions: vec!["+2".into()],
            extra: vec![],
        };
        assert_eq!(g.parse("+2"), ReplyChoice::Action("+2".into()));
    }

    #[test]
    fn test_index_or_all() {
        let g = Grammar::IndexOrAll { count: 4 };
        assert_eq!(g.parse("ALL"), ReplyChoice::All);
        assert_eq!(g.parse("2"), ReplyChoice::Index(1));
        assert_eq!(g.parse("5"), ReplyChoice::Invalid);
        assert_eq!(g.parse("everything"), ReplyChoice::Invalid);
    }

    #[test]
    fn test_grid_tokens_case_insensitive() {
        let g = Grammar::grid_tokens(true, true, true);
        assert_eq!(g.parse("u2"), ReplyChoice::Action("U2".into()));
        assert_eq!(g.parse("V4"), ReplyChoice::Action("V4".into()));
        assert_eq!(g.parse("U5"), ReplyChoice::Invalid);
        assert!(g.tolerates_free_text());

        let strict = Grammar::grid_tokens(true, false, false);
        assert_eq!(strict.parse("v1"), ReplyChoice::Invalid);
        assert!(!strict.tolerates_free_text());
        assert_eq!(strict.hint(), "❌ Invalid input. Reply with U1, U2, U3, or U4.");
    }

    #[test]
    fn test_actions_with_numeric_precedence() {
        let g = Grammar::IndexOrActions {
            count: 4,
            actions: vec!["U1".into(), "U2".into(), "🔄".into()],
            extra: vec!["REROLL".into()],
        };
        assert_eq!(g.parse("3"), ReplyChoice::Index(2));
        assert_eq!(g.parse("u1"), ReplyChoice::Action("U1".into()));
        assert_eq!(g.parse("reroll"), ReplyChoice::Action("REROLL".into()));
        assert_eq!(g.parse("u9"), ReplyChoice::Invalid);
        assert_eq!(g.parse("7"), ReplyChoice::Invalid);
    }

    #[test]
    fn test_numeric_label_reads_as_index() {
        let g = Grammar::IndexOrActions {
            count: 4,
            actions: vec!["2".into()],
            extra: vec![],
        };
        assert_eq!(g.parse("2"), ReplyChoice::Index(1));
    }

    #[test]
    fn test_free_text() {
        let g = Grammar::FreeText;
        assert_eq!(g.parse("  tell me more "), ReplyChoice::Text("tell me more".into()));
        assert_eq!(g.parse("   "), ReplyChoice::Invalid);
    }

    #[test]
    fn test_grid_slot() {
        assert_eq!(grid_slot("U1"), Some(('U', 0)));
        assert_eq!(grid_slot("v4"), Some(('V', 3)));
        assert_eq!(grid_slot("U0"), None);
        assert_eq!(grid_slot("X1"), None);
    }
}
