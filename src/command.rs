//! Command vocabulary
//!
//! The bridge accepts a closed set of text commands and maps each to the
//! single payload byte written on the bus. Anything outside the vocabulary is
//! unrecognized, which is an expected outcome rather than an error.

/// A recognized bus command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusCommand {
    Lock,
    Unlock,
}

impl BusCommand {
    /// Decode a whitespace-trimmed token, case-insensitively.
    ///
    /// Returns `None` for anything that is not exactly `lock` or `unlock`,
    /// including the empty string and partial matches.
    pub fn decode(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("lock") {
            Some(BusCommand::Lock)
        } else if token.eq_ignore_ascii_case("unlock") {
            Some(BusCommand::Unlock)
        } else {
            None
        }
    }

    /// The payload byte transmitted on the bus
    pub const fn code(self) -> u8 {
        match self {
            BusCommand::Lock => 0x30,
            BusCommand::Unlock => 0x31,
        }
    }
}

impl std::fmt::Display for BusCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusCommand::Lock => write!(f, "LOCK"),
            BusCommand::Unlock => write!(f, "UNLOCK"),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::BusCommand;

    #[test_case("lock", Some(BusCommand::Lock); "lowercase lock")]
    #[test_case("LOCK", Some(BusCommand::Lock); "uppercase lock")]
    #[test_case("LoCk", Some(BusCommand::Lock); "mixed case lock")]
    #[test_case("unlock", Some(BusCommand::Unlock); "lowercase unlock")]
    #[test_case("UNLOCK", Some(BusCommand::Unlock); "uppercase unlock")]
    #[test_case("", None; "empty string")]
    #[test_case("open", None; "outside vocabulary")]
    #[test_case("loc", None; "partial match")]
    #[test_case("lockk", None; "trailing garbage")]
    #[test_case("lo ck", None; "embedded whitespace")]
    #[test_case("lock unlock", None; "two tokens")]
    #[test_case(" lock", None; "caller must trim")]
    fn decode_vocabulary(token: &str, expected: Option<BusCommand>) {
        assert_eq!(BusCommand::decode(token), expected);
    }

    #[test]
    fn decode_is_idempotent() {
        assert_eq!(BusCommand::decode("Lock"), BusCommand::decode("Lock"));
    }

    #[test]
    fn codes_are_distinct() {
        assert_ne!(BusCommand::Lock.code(), BusCommand::Unlock.code());
        assert_eq!(BusCommand::Lock.code(), 0x30);
        assert_eq!(BusCommand::Unlock.code(), 0x31);
    }

    proptest! {
        #[test]
        fn decode_matches_case_folding(token in "\\PC{0,12}") {
            let expected = match token.to_ascii_lowercase().as_str() {
                "lock" => Some(BusCommand::Lock),
                "unlock" => Some(BusCommand::Unlock),
                _ => None,
            };
            prop_assert_eq!(BusCommand::decode(&token), expected);
        }

        #[test]
        fn random_casing_of_lock_decodes(mask in proptest::collection::vec(any::<bool>(), 4)) {
            let token: String = "lock"
                .chars()
                .zip(mask)
                .map(|(c, upper)| if upper { c.to_ascii_uppercase() } else { c })
                .collect();
            prop_assert_eq!(BusCommand::decode(&token), Some(BusCommand::Lock));
        }
    }
}
