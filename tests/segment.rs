use visium_search::payload_storage::filters::Filter;
use visium_search::ranking::page::RankRange;
use visium_search::segment::segment::Segment;
use visium_search::utils::errors::SearchError;
use visium_search::utils::metadata::{Metadata, MetadataValue};

fn vecf(v: &[f32]) -> Vec<f32> {
    v.to_vec()
}

fn tagged(is_ai: bool) -> Metadata {
    Metadata::default().with("is_ai", MetadataValue::Bool(is_ai))
}

fn all_ranks() -> RankRange {
    RankRange {
        first: 1,
        last: 100,
    }
}

#[test]
fn test_segment_insert_and_get() {
    let mut segment = Segment::new(2).unwrap();
    let id = segment.insert(vecf(&[1.0, 0.0]), tagged(true)).unwrap();

    assert_eq!(segment.get_vector(id), Some(&vecf(&[1.0, 0.0])));
    assert_eq!(segment.get_metadata(id), Some(&tagged(true)));
    assert_eq!(segment.len(), 1);
}

#[test]
fn test_segment_ids_are_sequential() {
    let mut segment = Segment::new(2).unwrap();
    let a = segment.insert(vecf(&[1.0, 0.0]), Metadata::default()).unwrap();
    let b = segment.insert(vecf(&[0.0, 1.0]), Metadata::default()).unwrap();
    assert_eq!(b, a + 1);
}

#[test]
fn test_segment_zero_dimension_rejected() {
    assert!(matches!(Segment::new(0), Err(SearchError::Validation(_))));
}

#[test]
fn test_segment_rejects_wrong_dimension_without_writing() {
    let mut segment = Segment::new(3).unwrap();
    let err = segment
        .insert(vecf(&[1.0, 0.0]), Metadata::default())
        .unwrap_err();

    assert!(matches!(err, SearchError::Validation(_)));
    assert!(segment.is_empty());
}

#[test]
fn test_segment_rejects_non_finite_vector() {
    let mut segment = Segment::new(2).unwrap();
    let err = segment
        .insert(vecf(&[f32::NAN, 1.0]), Metadata::default())
        .unwrap_err();
    assert!(matches!(err, SearchError::Validation(_)));
    assert!(segment.is_empty());
}

#[test]
fn test_segment_deletion_hides_entity() {
    let mut segment = Segment::new(2).unwrap();
    let id = segment.insert(vecf(&[1.0, 0.0]), Metadata::default()).unwrap();
    segment.insert(vecf(&[0.0, 1.0]), Metadata::default()).unwrap();

    assert!(segment.delete(id));
    assert!(segment.is_deleted(id));
    assert_eq!(segment.get_vector(id), None);

    let results = segment.nearest(&[1.0, 0.0], 10).unwrap();
    assert!(results.iter().all(|n| n.id != id));
    assert_eq!(segment.len(), 1);
}

#[test]
fn test_segment_delete_twice_is_noop() {
    let mut segment = Segment::new(2).unwrap();
    let id = segment.insert(vecf(&[1.0, 0.0]), Metadata::default()).unwrap();

    assert!(segment.delete(id));
    assert!(!segment.delete(id));
    assert!(!segment.delete(9999));
}

#[test]
fn test_segment_purges_after_enough_deletions() {
    let mut segment = Segment::new(2).unwrap();
    let ids: Vec<_> = (0..200)
        .map(|i| {
            segment
                .insert(vecf(&[1.0, i as f32]), Metadata::default())
                .unwrap()
        })
        .collect();

    for id in &ids[..99] {
        segment.delete(*id);
    }
    assert_eq!(segment.pending_deletions(), 99);

    segment.delete(ids[99]);
    assert_eq!(segment.pending_deletions(), 0);
    assert_eq!(segment.len(), 100);
}

#[test]
fn test_segment_nearest_orders_by_distance_then_id() {
    let mut segment = Segment::new(2).unwrap();
    let far = segment.insert(vecf(&[0.0, 1.0]), Metadata::default()).unwrap();
    let tie_a = segment.insert(vecf(&[1.0, 0.0]), Metadata::default()).unwrap();
    let tie_b = segment.insert(vecf(&[2.0, 0.0]), Metadata::default()).unwrap();

    let ids: Vec<_> = segment
        .nearest(&[1.0, 0.0], 3)
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(ids, vec![tie_a, tie_b, far]);
}

#[test]
fn test_segment_ranked_applies_filter_before_ranking() {
    let mut segment = Segment::new(2).unwrap();
    segment.insert(vecf(&[1.0, 0.0]), tagged(true)).unwrap();
    let human = segment.insert(vecf(&[0.9, 0.1]), tagged(false)).unwrap();
    let other = segment.insert(vecf(&[0.5, 0.5]), tagged(false)).unwrap();

    let filter = Filter::matches("is_ai", false);
    let ranked = segment
        .ranked(&[1.0, 0.0], 0.0, Some(&filter), all_ranks())
        .unwrap();

    let got: Vec<_> = ranked.iter().map(|r| (r.id, r.rank)).collect();
    assert_eq!(got, vec![(human, 1), (other, 2)]);
}

#[test]
fn test_segment_ranked_selects_range() {
    let mut segment = Segment::new(2).unwrap();
    for i in 0..5 {
        segment
            .insert(vecf(&[1.0, i as f32 * 0.1]), Metadata::default())
            .unwrap();
    }

    let ranked = segment
        .ranked(&[1.0, 0.0], 0.0, None, RankRange { first: 3, last: 4 })
        .unwrap();
    let ranks: Vec<_> = ranked.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![3, 4]);
}

#[test]
fn test_segment_query_dimension_mismatch() {
    let segment = Segment::new(3).unwrap();
    assert!(segment.nearest(&[1.0, 0.0], 1).is_err());
}
