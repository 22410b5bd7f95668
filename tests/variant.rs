use switchroot_depot::variant::{MatchKind, VariantMatcher, companion_suffix};

fn candidates() -> VariantMatcher {
    VariantMatcher::new(
        ["14.0.0-arm64", "14.0.0-arm64-ATV", "16.0.0-arm64-ATV"]
            .iter()
            .map(|name| name.to_string())
            .collect(),
    )
}

#[test]
fn exact_match_for_tv_variant() {
    let matcher = candidates();
    let found = matcher.find("14", "arm64-ATV").unwrap();
    assert_eq!(found.name, "14.0.0-arm64-ATV");
    assert_eq!(found.kind, MatchKind::Exact);
}

#[test]
fn missing_version_has_no_match() {
    assert!(candidates().find("15", "arm64-ATV").is_none());
}

#[test]
fn tablet_profile_takes_plain_arm64() {
    let matcher = candidates();
    let found = matcher.find("14", companion_suffix("nx_tab")).unwrap();
    assert_eq!(found.name, "14.0.0-arm64");
}

#[test]
fn point_release_matches_by_pattern() {
    let matcher = VariantMatcher::new(vec![
        "13.0.0-arm64".to_string(),
        "15.1.2-arm64-ATV".to_string(),
    ]);
    let found = matcher.find("15", "arm64-ATV").unwrap();
    assert_eq!(found.name, "15.1.2-arm64-ATV");
    assert_eq!(found.kind, MatchKind::Pattern);
}

#[test]
fn empty_listing_never_matches() {
    let matcher = VariantMatcher::new(Vec::new());
    assert!(matcher.is_empty());
    assert!(matcher.find("14", "arm64").is_none());
}
