/// Recognizes gift commands aimed at the companion bot:
///
///   `xgift @target <anything> <item> x <amount>`
///
/// The prefix and item aliases come from configuration. Matching is
/// case-insensitive and the item alias may appear anywhere after the target.
#[derive(Debug, Clone)]
pub struct GiftMatcher {
    prefix: String,
    item_aliases: Vec<String>,
}

impl GiftMatcher {
    pub fn new<I, S>(prefix: &str, item_aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefix: prefix.trim().to_lowercase(),
            item_aliases: item_aliases
                .into_iter()
                .map(|a| a.as_ref().trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    /// Amount of items the command gifts, or None when the text is not a
    /// well-formed gift command with a positive amount.
    pub fn parse_amount(&self, text: &str) -> Option<u64> {
        let lower = text.trim().to_lowercase();
        let rest = lower.strip_prefix(self.prefix.as_str())?;

        // The prefix must be followed by whitespace and a target token.
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let rest = rest.trim_start();
        let target_end = rest.find(char::is_whitespace)?;
        if rest[..target_end].trim_start_matches('@').is_empty() {
            return None;
        }
        let tail = rest[target_end..].trim_start();

        // Leftmost position where `<alias> x <digits>` matches.
        for (i, _) in tail.char_indices() {
            for alias in &self.item_aliases {
                if let Some(after) = tail[i..].strip_prefix(alias.as_str())
                    && let Some(amount) = parse_quantity(after)
                {
                    return (amount > 0).then_some(amount);
                }
            }
        }
        None
    }
}

/// Parse `\s*x\s*<digits>` at the start of `s`.
fn parse_quantity(s: &str) -> Option<u64> {
    let s = s.trim_start().strip_prefix('x')?.trim_start();
    let digits_end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    if digits_end == 0 {
        return None;
    }
    s[..digits_end].parse().ok()
}
