use openworld_model::{Email, Tag, TagSet, MAX_TAGS};
use proptest::prelude::*;
use proptest::test_runner::Config;

proptest! {
    #![proptest_config(Config::with_cases(128))]
    #[test]
    fn valid_tag_charset_always_parses(raw in "[A-Za-z0-9_-]{1,40}") {
        let tag = Tag::parse(&raw).expect("tag");
        prop_assert_eq!(tag.as_str(), raw.to_ascii_lowercase());
    }

    #[test]
    fn tag_parse_is_idempotent(raw in "[a-z0-9_-]{1,40}") {
        let once = Tag::parse(&raw).expect("tag");
        let twice = Tag::parse(once.as_str()).expect("tag");
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn csv_round_trip_preserves_tag_set(tags in proptest::collection::vec("[a-z0-9_]{1,20}", 0..8)) {
        let csv = tags.join(",");
        let parsed = TagSet::parse_csv(&csv).expect("tags");
        prop_assert!(parsed.len() <= MAX_TAGS);
        let reparsed = TagSet::parse_csv(&parsed.to_csv()).expect("tags");
        prop_assert_eq!(parsed, reparsed);
    }

    #[test]
    fn email_normalization_is_idempotent(
        local in "[a-z0-9]{1,16}",
        domain in "[a-z0-9]{1,16}",
        tld in "[a-z]{2,6}"
    ) {
        let raw = format!("{local}@{domain}.{tld}");
        let email = Email::parse(&raw).expect("email");
        let again = Email::parse(email.as_str()).expect("email");
        prop_assert_eq!(email, again);
    }
}
