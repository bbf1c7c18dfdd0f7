//! Identifier and value types for the ranking engine.
//!
//! All types use smart constructors so that a constructed value is always
//! valid. Code that receives an `ItemId`, `UserId`, `Category` or
//! `WatchSeconds` never has to re-check it.

use nutype::nutype;
use uuid::Uuid;

/// Identity of a rankable content item.
///
/// Ordering follows the underlying UUID and is what breaks score ties in
/// every ranking produced by this crate.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Deref,
    Display,
    From,
    Into,
    Serialize,
    Deserialize
))]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generates a fresh, time-ordered identifier.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Identity of the user an interaction or preference belongs to.
///
/// Non-empty after trimming and at most 255 characters.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct UserId(String);

/// A content category supplied by an external catalog or chosen by a user.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Category(String);

/// Watch duration carried by a `watch_time` event.
///
/// Always finite and strictly positive.
#[nutype(
    validate(finite, greater = 0.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into, Serialize, Deserialize)
)]
pub struct WatchSeconds(f64);

impl WatchSeconds {
    /// Whole seconds credited to the integer `watch_time` counters.
    ///
    /// The fractional part is dropped; the score contribution still uses the
    /// full value.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn whole_seconds(self) -> u64 {
        let seconds: f64 = self.into_inner();
        seconds.trunc() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn user_id_accepts_valid_strings(s in "[a-zA-Z0-9_-]{1,255}") {
            let user = UserId::try_new(s.clone());
            prop_assert!(user.is_ok());
            let user = user.unwrap();
            prop_assert_eq!(user.as_ref(), &s);
        }

        #[test]
        fn user_id_trims_whitespace(s in " {0,10}[a-z0-9]{1,200} {0,10}") {
            let user = UserId::try_new(s.clone()).unwrap();
            prop_assert_eq!(user.as_ref(), s.trim());
        }

        #[test]
        fn watch_seconds_accepts_positive_values(v in 0.001f64..1.0e9) {
            prop_assert!(WatchSeconds::try_new(v).is_ok());
        }
    }

    #[test]
    fn user_id_rejects_blank_strings() {
        assert!(UserId::try_new("").is_err());
        assert!(UserId::try_new("   ").is_err());
    }

    #[test]
    fn category_rejects_overlong_names() {
        assert!(Category::try_new("x".repeat(256)).is_err());
        assert!(Category::try_new("music").is_ok());
    }

    #[test]
    fn watch_seconds_rejects_zero_negative_and_non_finite() {
        assert!(WatchSeconds::try_new(0.0).is_err());
        assert!(WatchSeconds::try_new(-3.0).is_err());
        assert!(WatchSeconds::try_new(f64::NAN).is_err());
        assert!(WatchSeconds::try_new(f64::INFINITY).is_err());
    }

    #[test]
    fn whole_seconds_truncates_fraction() {
        assert_eq!(WatchSeconds::try_new(59.9).unwrap().whole_seconds(), 59);
        assert_eq!(WatchSeconds::try_new(0.5).unwrap().whole_seconds(), 0);
    }

    #[test]
    fn generated_item_ids_are_unique() {
        assert_ne!(ItemId::generate(), ItemId::generate());
    }
}
