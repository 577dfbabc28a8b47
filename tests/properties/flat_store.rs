//! Property tests for the flat store format, property paths, and the
//! store's merge operations.

use std::collections::BTreeMap;
use std::path::Path;

use proptest::prelude::*;

use drover::store::{persist, ConfigStore, PropertyPath, PropertyValue};

// Path segments avoid '.', '=', '#', and whitespace; everything else the
// format has to take care of lives in the values.
fn segment() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-z][a-z0-9_-]{0,11}").unwrap()
}

fn leaf_value() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        proptest::string::string_regex("[ -~]{0,24}")
            .unwrap()
            .prop_map(PropertyValue::from),
        proptest::collection::vec(
            proptest::string::string_regex("[ -~]{0,12}").unwrap(),
            0..4
        )
        .prop_map(PropertyValue::from),
    ]
}

// Fixed-depth paths: distinct triples can never be ancestors of each other,
// so building the tree cannot hit a leaf/subtree conflict.
fn entries() -> impl Strategy<Value = BTreeMap<(String, String, String), PropertyValue>> {
    proptest::collection::btree_map((segment(), segment(), segment()), leaf_value(), 1..12)
}

fn build_tree<'a>(
    entries: impl IntoIterator<Item = (&'a (String, String, String), &'a PropertyValue)>,
) -> PropertyValue {
    let mut tree = PropertyValue::tree();
    for ((a, b, c), value) in entries {
        let path = PropertyPath::parse(&format!("{a}.{b}.{c}")).expect("generated path parses");
        tree.set(&path, value.clone())
            .expect("fixed-depth paths never conflict");
    }
    tree
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: `parse_flat(to_flat_string(tree))` reproduces the tree,
    /// whatever quoting the values force on the format.
    #[test]
    fn property_flat_form_round_trips(entries in entries()) {
        let tree = build_tree(&entries);
        let flat = persist::to_flat_string(&tree);

        let parsed = persist::parse_flat(&flat, Path::new("generated.cfg"));
        prop_assert!(parsed.is_ok(), "generated flat form failed to parse: {:?}", parsed.err());
        prop_assert_eq!(&parsed.unwrap(), &tree);
    }

    /// PROPERTY: the fingerprint depends on content only, never on the
    /// order properties were set in.
    #[test]
    fn property_fingerprint_ignores_insertion_order(entries in entries()) {
        let forward = build_tree(&entries);
        let backward = build_tree(entries.iter().rev());

        let fingerprint = persist::fingerprint(&forward);
        prop_assert!(fingerprint.starts_with("sha256:"));
        prop_assert_eq!(fingerprint, persist::fingerprint(&backward));
    }

    /// PROPERTY: `parse_flat` never panics on arbitrary text; it answers
    /// with a tree or a line-numbered error.
    #[test]
    fn property_parse_flat_never_panics(
        lines in proptest::collection::vec("[ -~]{0,40}", 0..8)
    ) {
        let content = lines.join("\n");
        let _ = persist::parse_flat(&content, Path::new("fuzz.cfg"));
    }

    /// PROPERTY: a dotted path parses back to its segments and displays
    /// as the original string.
    #[test]
    fn property_path_display_round_trips(
        segments in proptest::collection::vec(segment(), 1..5)
    ) {
        let dotted = segments.join(".");
        let path = PropertyPath::parse(&dotted);
        prop_assert!(path.is_ok(), "'{}' failed to parse: {:?}", dotted, path.err());
        let path = path.unwrap();
        prop_assert_eq!(path.to_string(), dotted);
        prop_assert_eq!(path.segments().len(), segments.len());
    }

    /// PROPERTY: empty segments are rejected wherever they appear.
    #[test]
    fn property_path_rejects_empty_segments(a in segment(), b in segment()) {
        let double_sep = format!("{a}..{b}");
        let leading_sep = format!(".{a}");
        let trailing_sep = format!("{a}.");
        prop_assert!(PropertyPath::parse(&double_sep).is_err());
        prop_assert!(PropertyPath::parse(&leading_sep).is_err());
        prop_assert!(PropertyPath::parse(&trailing_sep).is_err());
    }

    /// PROPERTY: overriding a subtree twice leaves the tree exactly as one
    /// application does, whatever was there before.
    #[test]
    fn property_override_subtree_is_idempotent(
        base in entries(),
        patch in entries(),
        root in segment(),
    ) {
        let mut store = ConfigStore::from_explicit(build_tree(&base));
        let path = PropertyPath::parse(&root).expect("generated segment parses");
        let patch_tree = build_tree(&patch);

        store.override_subtree(&path, &patch_tree).expect("first override applies");
        let once = store.explicit().clone();
        store.override_subtree(&path, &patch_tree).expect("second override applies");
        prop_assert_eq!(store.explicit(), &once);
    }

    /// PROPERTY: appending the same items again changes nothing.
    #[test]
    fn property_append_is_idempotent(
        items in proptest::collection::vec("[ -~]{0,12}", 0..6),
        a in segment(),
        b in segment(),
    ) {
        let mut store = ConfigStore::new();
        let path = PropertyPath::parse(&format!("{a}.{b}")).expect("generated path parses");

        store.append(&path, &items).expect("first append applies");
        let once = store.explicit().clone();
        store.append(&path, &items).expect("second append applies");
        prop_assert_eq!(store.explicit(), &once);
    }
}
