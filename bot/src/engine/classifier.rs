/// What a companion-bot message says about the latest gift attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Success,
    Failure,
    Unrecognized,
}

/// Turns free text from the companion bot into a [`Signal`].
///
/// The companion's wording is outside our control, so the matching rules live
/// behind this trait and are built from configuration.
pub trait SignalClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Signal;
}

/// Substring classifier over configurable phrase lists.
/// A failure phrase wins over a success phrase when both appear.
#[derive(Debug, Clone)]
pub struct PhraseClassifier {
    success: Vec<String>,
    failure: Vec<String>,
}

impl PhraseClassifier {
    pub fn new<I, J, S, T>(success: I, failure: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            success: normalize_phrases(success),
            failure: normalize_phrases(failure),
        }
    }
}

impl SignalClassifier for PhraseClassifier {
    fn classify(&self, text: &str) -> Signal {
        let clean = normalize_signal(text);
        if clean.is_empty() {
            return Signal::Unrecognized;
        }

        if self.failure.iter().any(|p| clean.contains(p.as_str())) {
            Signal::Failure
        } else if self.success.iter().any(|p| clean.contains(p.as_str())) {
            Signal::Success
        } else {
            Signal::Unrecognized
        }
    }
}

fn normalize_phrases<I, S>(phrases: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    phrases
        .into_iter()
        .map(|p| p.as_ref().trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Lowercase, trim and drop custom emoji tokens (`<:name:id>`, `<a:name:id>`).
pub fn normalize_signal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let is_emoji = tail.starts_with("<:") || tail.starts_with("<a:");
        match tail.find('>') {
            Some(end) if is_emoji => rest = &tail[end + 1..],
            _ => {
                out.push('<');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);

    out.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> PhraseClassifier {
        PhraseClassifier::new(
            ["sacrificado", "emperium", "¿has visto aquella torre"],
            ["supera la que posees", "no posees ese item"],
        )
    }

    #[test]
    fn test_success_phrase() {
        let c = classifier();
        assert_eq!(c.classify("Has SACRIFICADO 5 objetos"), Signal::Success);
        assert_eq!(
            c.classify("¿Has visto aquella torre por las montañas?"),
            Signal::Success
        );
    }

    #[test]
    fn test_failure_phrase() {
        let c = classifier();
        assert_eq!(
            c.classify("La cantidad supera la que posees"),
            Signal::Failure
        );
    }

    #[test]
    fn test_failure_wins_over_success() {
        let c = classifier();
        assert_eq!(
            c.classify("No posees ese item: Emperium"),
            Signal::Failure
        );
    }

    #[test]
    fn test_unrelated_text() {
        let c = classifier();
        assert_eq!(c.classify("buenos días nekitos"), Signal::Unrecognized);
        assert_eq!(c.classify("   "), Signal::Unrecognized);
    }

    #[test]
    fn test_emoji_tokens_do_not_trigger() {
        // The emoji name contains a success phrase but is not message text.
        let c = classifier();
        assert_eq!(c.classify("<:emperium:123456> hola"), Signal::Unrecognized);
        assert_eq!(c.classify("<a:emperium:1> <:x:2>"), Signal::Unrecognized);
    }

    #[test]
    fn test_normalize_keeps_plain_angle_brackets() {
        assert_eq!(normalize_signal("a < b > c"), "a < b > c");
        assert_eq!(normalize_signal("<:unterminated"), "<:unterminated");
        assert_eq!(normalize_signal("  <:e:1>Hola "), "hola");
    }

    #[test]
    fn test_blank_phrases_are_ignored() {
        let c = PhraseClassifier::new(["", "  "], Vec::<String>::new());
        assert_eq!(c.classify("anything"), Signal::Unrecognized);
    }

    #[test]
    fn test_swappable_behind_trait() {
        struct Always(Signal);
        impl SignalClassifier for Always {
            fn classify(&self, _: &str) -> Signal {
                self.0
            }
        }
        let boxed: Box<dyn SignalClassifier> = Box::new(Always(Signal::Failure));
        assert_eq!(boxed.classify("sacrificado"), Signal::Failure);
    }
}
