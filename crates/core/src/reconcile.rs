//! Reconciliation of local and embedded annotation sets.
//!
//! A burn re-embeds exactly the local annotations that existed at burn time,
//! so after a reload both copies are present. [`merge`] keeps the local copy
//! and drops every embedded record that duplicates one, either by id or by
//! geometry (and text, when there is any) within a small tolerance that
//! absorbs the burn pipeline's rounding drift.

use crate::annotation::Annotation;
use crate::coords::DocRect;
use tracing::trace;

/// Maximum per-component bbox difference, in points, for two records to be
/// considered the same annotation. Comparison is strict.
pub const DEFAULT_MERGE_TOLERANCE: f32 = 2.0;

/// Merge local and embedded sets with the default tolerance.
///
/// Pure and deterministic: the result is every local record in input order,
/// followed by the embedded records that duplicate none of them, in input
/// order.
pub fn merge(local: &[Annotation], embedded: &[Annotation]) -> Vec<Annotation> {
    merge_with_tolerance(local, embedded, DEFAULT_MERGE_TOLERANCE)
}

pub fn merge_with_tolerance(
    local: &[Annotation],
    embedded: &[Annotation],
    tolerance: f32,
) -> Vec<Annotation> {
    let mut merged = Vec::with_capacity(local.len() + embedded.len());
    merged.extend_from_slice(local);

    for candidate in embedded {
        let duplicate = local.iter().any(|existing| is_duplicate(existing, candidate, tolerance));
        if duplicate {
            trace!(id = ?candidate.id, page = candidate.page, "embedded record shadowed by local copy");
        } else {
            merged.push(candidate.clone());
        }
    }

    merged
}

/// Whether `embedded` is another representation of `local`.
///
/// Only records on the same page and of the same kind are compared. Then an
/// exact id match, or a bbox match within `tolerance` on all four components
/// (with equal trimmed text whenever either side has text) makes a duplicate.
pub fn is_duplicate(local: &Annotation, embedded: &Annotation, tolerance: f32) -> bool {
    if local.page != embedded.page || local.kind() != embedded.kind() {
        return false;
    }

    if let (Some(a), Some(b)) = (local.id(), embedded.id()) {
        if a == b {
            return true;
        }
    }

    bbox_within(&local.effective_bbox(), &embedded.effective_bbox(), tolerance)
        && text_matches(local, embedded)
}

fn bbox_within(a: &DocRect, b: &DocRect, tolerance: f32) -> bool {
    (a.x - b.x).abs() < tolerance
        && (a.y - b.y).abs() < tolerance
        && (a.width - b.width).abs() < tolerance
        && (a.height - b.height).abs() < tolerance
}

/// Equal after trimming; two empty texts match (geometry decides alone).
fn text_matches(a: &Annotation, b: &Annotation) -> bool {
    a.trimmed_text() == b.trimmed_text()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Stroke;
    use crate::coords::DocPoint;
    use proptest::prelude::*;

    fn highlight(id: &str, x: f32, y: f32, text: &str) -> Annotation {
        Annotation::highlight(1, DocRect::new(x, y, 100.0, 12.0), text, Stroke::highlight())
            .with_id(id)
    }

    fn burned(mut annotation: Annotation) -> Annotation {
        annotation.burned = true;
        annotation
    }

    #[test]
    fn test_exact_id_match_discards_embedded() {
        let local = vec![highlight("a", 10.0, 10.0, "alpha")];
        // Same id, moved far away: still the same annotation.
        let embedded = vec![burned(highlight("a", 300.0, 400.0, "other"))];

        let merged = merge(&local, &embedded);
        assert_eq!(merged.len(), 1);
        assert!(!merged[0].burned);
    }

    #[test]
    fn test_geometric_match_with_equal_trimmed_text() {
        let local = vec![highlight("local", 10.0, 10.0, "alpha beta")];
        let embedded = vec![burned(highlight("embedded", 11.5, 8.5, "  alpha beta\n"))];

        let merged = merge(&local, &embedded);
        assert_eq!(merged, local);
    }

    #[test]
    fn test_geometric_match_with_different_text_is_distinct() {
        let local = vec![highlight("local", 10.0, 10.0, "alpha")];
        let embedded = vec![burned(highlight("embedded", 10.0, 10.0, "beta"))];

        assert_eq!(merge(&local, &embedded).len(), 2);
    }

    #[test]
    fn test_text_on_one_side_only_is_distinct() {
        let local = vec![highlight("local", 10.0, 10.0, "")];
        let embedded = vec![burned(highlight("embedded", 10.0, 10.0, "alpha"))];

        assert_eq!(merge(&local, &embedded).len(), 2);
    }

    #[test]
    fn test_untagged_ink_matches_on_geometry_alone() {
        let points = vec![DocPoint::new(10.0, 10.0), DocPoint::new(60.0, 42.0)];
        let local = vec![Annotation::ink(1, points.clone(), Stroke::ink()).with_id("l")];
        let shifted: Vec<DocPoint> =
            points.iter().map(|p| DocPoint::new(p.x + 0.5, p.y - 0.5)).collect();
        let embedded = vec![burned(Annotation::ink(1, shifted, Stroke::ink()).with_id("e"))];

        assert_eq!(merge(&local, &embedded).len(), 1);
    }

    #[test]
    fn test_degenerate_ink_bbox_uses_points() {
        let points = vec![DocPoint::new(10.0, 10.0), DocPoint::new(60.0, 42.0)];
        let local = vec![Annotation::ink(1, points.clone(), Stroke::ink())];
        let mut embedded = burned(Annotation::ink(1, points, Stroke::ink()));
        embedded.bbox = DocRect::default();

        assert_eq!(merge(&local, &[embedded]).len(), 1);
    }

    #[test]
    fn test_different_page_or_kind_is_distinct() {
        let local = vec![highlight("a", 10.0, 10.0, "alpha")];

        let mut other_page = burned(highlight("b", 10.0, 10.0, "alpha"));
        other_page.page = 2;
        let other_kind = burned(
            Annotation::note(1, DocPoint::new(10.0, 10.0), "alpha").with_id("c"),
        );

        assert_eq!(merge(&local, &[other_page, other_kind]).len(), 3);
    }

    #[test]
    fn test_tolerance_boundary_is_strict() {
        let local = vec![highlight("local", 10.0, 10.0, "alpha")];
        let at_threshold = burned(highlight("embedded", 12.0, 10.0, "alpha"));
        let just_inside = burned(highlight("embedded-2", 11.99, 10.0, "alpha"));

        let merged = merge(&local, &[at_threshold.clone()]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1], at_threshold);

        assert_eq!(merge(&local, &[just_inside]).len(), 1);
    }

    #[test]
    fn test_records_without_ids_never_match_by_id() {
        let mut a = highlight("x", 10.0, 10.0, "alpha");
        let mut b = burned(highlight("y", 200.0, 10.0, "alpha"));
        a.id = None;
        b.id = None;

        assert!(!is_duplicate(&a, &b, DEFAULT_MERGE_TOLERANCE));
    }

    #[test]
    fn test_output_order_is_local_then_embedded() {
        let local = vec![highlight("a", 10.0, 10.0, "a"), highlight("b", 10.0, 50.0, "b")];
        let embedded = vec![
            burned(highlight("c", 10.0, 300.0, "c")),
            burned(highlight("a", 10.0, 10.0, "a")),
            burned(highlight("d", 10.0, 400.0, "d")),
        ];

        let merged = merge(&local, &embedded);
        let ids: Vec<&str> = merged.iter().filter_map(|a| a.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    fn arb_highlight(prefix: &'static str) -> impl Strategy<Value = Annotation> {
        (1u32..3, 0.0f32..50.0, 0.0f32..50.0, prop::sample::select(vec!["", "alpha", "beta"]), 0u32..1000)
            .prop_map(move |(page, x, y, text, n)| {
                let mut a = Annotation::highlight(
                    page,
                    DocRect::new(x, y, 40.0, 10.0),
                    text,
                    Stroke::highlight(),
                )
                .with_id(format!("{prefix}-{n}"));
                a.created_at = 0;
                a
            })
    }

    proptest! {
        #[test]
        fn prop_merge_is_idempotent(
            local in prop::collection::vec(arb_highlight("l"), 0..6),
            embedded in prop::collection::vec(arb_highlight("e"), 0..6),
        ) {
            let embedded: Vec<Annotation> = embedded.into_iter().map(burned).collect();
            let once = merge(&local, &embedded);
            let twice = merge(&local, &once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_near_duplicates_never_grow_the_set(
            local in prop::collection::vec(arb_highlight("l"), 1..6),
            dx in -1.9f32..1.9,
            dy in -1.9f32..1.9,
        ) {
            let embedded: Vec<Annotation> = local
                .iter()
                .map(|a| {
                    let mut copy = a.clone();
                    copy.id = Some(format!("burned-{}", a.id().unwrap_or_default()));
                    copy.bbox.x += dx;
                    copy.bbox.y += dy;
                    burned(copy)
                })
                .collect();

            let merged = merge(&local, &embedded);
            prop_assert_eq!(merged.len(), local.len());
            prop_assert!(merged.iter().all(|a| !a.burned));
        }

        #[test]
        fn prop_merge_is_deterministic(
            local in prop::collection::vec(arb_highlight("l"), 0..5),
            embedded in prop::collection::vec(arb_highlight("e"), 0..5),
        ) {
            prop_assert_eq!(merge(&local, &embedded), merge(&local, &embedded));
        }
    }
}
