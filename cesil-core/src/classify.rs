/// The role a single byte plays under a fixed dialect.
///
/// The state machine never looks at raw bytes; every byte is first mapped
/// to its class through a [`Classifier`]. Bytes that play no role in the
/// dialect all collapse into [`CharClass::Other`], which keeps the
/// transition table small.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CharClass {
    /// The value separator.
    Separator = 0,
    /// The byte that opens and closes a quoted value, when it is distinct
    /// from the in-quote escape byte.
    QuoteStart = 1,
    /// The in-quote escape byte, when it is distinct from the quote.
    QuoteEscape = 2,
    /// The quote byte when it doubles as its own escape (the common
    /// quote-doubling dialect).
    QuoteStartAndEscape = 3,
    /// The comment sigil.
    Comment = 4,
    /// `\r`.
    CarriageReturn = 5,
    /// `\n`.
    LineFeed = 6,
    /// ASCII space or tab.
    Whitespace = 7,
    /// Any byte with no dialect meaning.
    Other = 8,
}

/// The number of distinct character classes.
pub(crate) const CLASS_COUNT: usize = 9;

/// Maps each of the 256 possible bytes to its [`CharClass`].
///
/// Built once per dialect; classification is a single table index.
#[derive(Clone)]
pub struct Classifier {
    classes: [CharClass; 256],
}

impl Classifier {
    /// Build a classifier for the given dialect bytes.
    ///
    /// Dialect bytes override the built-in classes, so a tab separator is
    /// classified `Separator`, not `Whitespace`. Callers are responsible
    /// for rejecting conflicting dialects before building.
    pub fn new(
        separator: u8,
        quote: Option<u8>,
        escape: Option<u8>,
        comment: Option<u8>,
    ) -> Classifier {
        let mut classes = [CharClass::Other; 256];
        classes[b' ' as usize] = CharClass::Whitespace;
        classes[b'\t' as usize] = CharClass::Whitespace;
        classes[b'\r' as usize] = CharClass::CarriageReturn;
        classes[b'\n' as usize] = CharClass::LineFeed;
        if let Some(c) = comment {
            classes[c as usize] = CharClass::Comment;
        }
        if let Some(q) = quote {
            classes[q as usize] = match escape {
                Some(e) if e == q => CharClass::QuoteStartAndEscape,
                _ => CharClass::QuoteStart,
            };
            if let Some(e) = escape {
                if e != q {
                    classes[e as usize] = CharClass::QuoteEscape;
                }
            }
        }
        classes[separator as usize] = CharClass::Separator;
        Classifier { classes }
    }

    /// Return the class of `b`.
    #[inline(always)]
    pub fn classify(&self, b: u8) -> CharClass {
        self.classes[b as usize]
    }
}

impl core::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "Classifier(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::{CharClass, Classifier};

    #[test]
    fn plain_dialect() {
        let c = Classifier::new(b',', Some(b'"'), Some(b'"'), None);
        assert_eq!(CharClass::Separator, c.classify(b','));
        assert_eq!(CharClass::QuoteStartAndEscape, c.classify(b'"'));
        assert_eq!(CharClass::CarriageReturn, c.classify(b'\r'));
        assert_eq!(CharClass::LineFeed, c.classify(b'\n'));
        assert_eq!(CharClass::Whitespace, c.classify(b' '));
        assert_eq!(CharClass::Whitespace, c.classify(b'\t'));
        assert_eq!(CharClass::Other, c.classify(b'a'));
        assert_eq!(CharClass::Other, c.classify(b'#'));
        assert_eq!(CharClass::Other, c.classify(0xE9));
    }

    #[test]
    fn distinct_escape_and_comment() {
        let c = Classifier::new(b',', Some(b'"'), Some(b'\\'), Some(b'#'));
        assert_eq!(CharClass::QuoteStart, c.classify(b'"'));
        assert_eq!(CharClass::QuoteEscape, c.classify(b'\\'));
        assert_eq!(CharClass::Comment, c.classify(b'#'));
    }

    #[test]
    fn dialect_bytes_override_builtins() {
        let c = Classifier::new(b'\t', Some(b'"'), None, None);
        assert_eq!(CharClass::Separator, c.classify(b'\t'));
        assert_eq!(CharClass::Whitespace, c.classify(b' '));
        assert_eq!(CharClass::QuoteStart, c.classify(b'"'));
    }

    #[test]
    fn no_quote_no_comment() {
        let c = Classifier::new(b';', None, None, None);
        assert_eq!(CharClass::Other, c.classify(b'"'));
        assert_eq!(CharClass::Other, c.classify(b'\\'));
        assert_eq!(CharClass::Other, c.classify(b'#'));
    }
}
