//! Property-based tests for Gramps date parsing and media path handling.

use chrono::Datelike;
use proptest::prelude::*;
use rootsync::import::media::{bare_name, normalize_media_path};
use rootsync::util::time::parse_gramps_date;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..Default::default()
    })]

    /// Full dates parse to exactly the given day.
    #[test]
    fn full_dates_parse(year in 1000i32..=2999, month in 1u32..=12, day in 1u32..=28) {
        let text = format!("{year:04}-{month:02}-{day:02}");
        let date = parse_gramps_date(&text).expect("valid date");
        prop_assert_eq!((date.year(), date.month(), date.day()), (year, month, day));
    }

    /// Partial dates fill in the first of the missing units.
    #[test]
    fn partial_dates_default_to_first(year in 1000i32..=2999, month in 1u32..=12) {
        let year_only = parse_gramps_date(&format!("{year:04}")).expect("year");
        prop_assert_eq!((year_only.month(), year_only.day()), (1, 1));

        let month_only = parse_gramps_date(&format!("{year:04}-{month:02}")).expect("month");
        prop_assert_eq!((month_only.month(), month_only.day()), (month, 1));
    }

    /// Impossible months never produce a date.
    #[test]
    fn invalid_months_are_rejected(year in 1000i32..=2999, month in 13u32..=99) {
        let year_month = format!("{year:04}-{month:02}");
        let year_month_day = format!("{year:04}-{month:02}-01");
        prop_assert!(parse_gramps_date(&year_month).is_none());
        prop_assert!(parse_gramps_date(&year_month_day).is_none());
    }

    /// Arbitrary text never panics.
    #[test]
    fn arbitrary_text_does_not_panic(text in "\\PC{0,16}") {
        let _ = parse_gramps_date(&text);
    }

    /// Absolute paths from any platform reduce to their file name.
    #[test]
    fn absolute_paths_reduce_to_file_name(
        segments in prop::collection::vec("[a-zA-Z0-9 _-]{1,8}", 1..4),
        name in "[a-zA-Z0-9_]{1,10}\\.(jpg|png)",
        windows in any::<bool>(),
    ) {
        let src = if windows {
            format!("C:\\{}\\{name}", segments.join("\\"))
        } else {
            format!("/{}/{name}", segments.join("/"))
        };
        prop_assert_eq!(normalize_media_path(&src), name);
    }

    /// Relative paths keep their segments with forward slashes.
    #[test]
    fn relative_paths_use_forward_slashes(
        segments in prop::collection::vec("[a-zA-Z0-9_]{1,8}", 1..4),
        name in "[a-zA-Z0-9_]{1,10}\\.jpg",
    ) {
        let backslashed = format!("{}\\{name}", segments.join("\\"));
        let expected = format!("{}/{name}", segments.join("/"));
        let normalized = normalize_media_path(&backslashed);
        prop_assert_eq!(&normalized, &expected);
        prop_assert_eq!(normalize_media_path(&format!("./{expected}")), expected.clone());
        prop_assert_eq!(bare_name(&normalized), name.as_str());
    }
}
