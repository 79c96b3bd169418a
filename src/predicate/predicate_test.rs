use std::sync::Arc;

use super::*;
use crate::test_utils::pod;
use crate::test_utils::Pod;
use crate::Event;

fn versioned(
    name: &str,
    resource_version: u64,
    generation: u64,
) -> Pod {
    let mut p = pod("ns", name);
    p.metadata.resource_version = resource_version;
    p.metadata.generation = generation;
    p
}

#[test]
fn empty_predicate_list_accepts_everything() {
    let predicates: Vec<Arc<dyn Predicate<Pod>>> = vec![];
    assert!(evaluate_all(&predicates, &Event::created(pod("ns", "a"))));
}

#[test]
fn predicate_list_is_conjunction() {
    let accept: Arc<dyn Predicate<Pod>> = Arc::new(PredicateFn::new(|_: &Event<Pod>| true));
    let reject: Arc<dyn Predicate<Pod>> = Arc::new(PredicateFn::new(|_: &Event<Pod>| false));
    let event = Event::created(pod("ns", "a"));

    assert!(evaluate_all(&[accept.clone(), accept.clone()], &event));
    assert!(!evaluate_all(&[accept, reject], &event));
}

#[test]
fn funcs_only_filter_configured_kinds() {
    let funcs = Funcs::<Pod>::new().on_create(|p| p.metadata.name.starts_with("keep"));

    assert!(funcs.evaluate(&Event::created(pod("ns", "keep-me"))));
    assert!(!funcs.evaluate(&Event::created(pod("ns", "drop-me"))));
    // No delete closure set
    assert!(funcs.evaluate(&Event::deleted(pod("ns", "drop-me"))));
}

#[test]
fn funcs_update_sees_old_and_new() {
    let funcs = Funcs::<Pod>::new().on_update(|old, new| old.spec.image != new.spec.image);
    let old = pod("ns", "a");
    let mut new = pod("ns", "a");

    assert!(!funcs.evaluate(&Event::updated(old.clone(), new.clone())));
    new.spec.image = "nginx".into();
    assert!(funcs.evaluate(&Event::updated(old, new)));
}

#[test]
fn resource_version_changed_drops_resync_updates() {
    let same = Arc::new(versioned("a", 3, 1));
    let resync = Event::Updated {
        old: same.clone(),
        new: same,
    };
    let real = Event::updated(versioned("a", 3, 1), versioned("a", 4, 1));

    assert!(!Predicate::<Pod>::evaluate(&ResourceVersionChanged, &resync));
    assert!(Predicate::<Pod>::evaluate(&ResourceVersionChanged, &real));
    assert!(Predicate::<Pod>::evaluate(
        &ResourceVersionChanged,
        &Event::created(versioned("a", 1, 1))
    ));
}

#[test]
fn generation_changed_ignores_metadata_only_updates() {
    let metadata_only = Event::updated(versioned("a", 3, 1), versioned("a", 4, 1));
    let spec_change = Event::updated(versioned("a", 4, 1), versioned("a", 5, 2));

    assert!(!Predicate::<Pod>::evaluate(&GenerationChanged, &metadata_only));
    assert!(Predicate::<Pod>::evaluate(&GenerationChanged, &spec_change));
}

#[test]
fn labels_match_checks_current_object() {
    let predicate = LabelsMatch::default().label("app", "web");
    let mut labeled = pod("ns", "a");
    labeled.metadata.labels.insert("app".into(), "web".into());

    assert!(Predicate::<Pod>::evaluate(
        &predicate,
        &Event::created(labeled.clone())
    ));
    assert!(!Predicate::<Pod>::evaluate(
        &predicate,
        &Event::created(pod("ns", "b"))
    ));
    // Label removed by the update
    assert!(!Predicate::<Pod>::evaluate(
        &predicate,
        &Event::updated(labeled, pod("ns", "a"))
    ));
}

#[test]
fn combinators_compose() {
    let yes: Arc<dyn Predicate<Pod>> = Arc::new(PredicateFn::new(|_: &Event<Pod>| true));
    let no: Arc<dyn Predicate<Pod>> = Arc::new(PredicateFn::new(|_: &Event<Pod>| false));
    let event = Event::generic(pod("ns", "a"));

    assert!(!And(vec![yes.clone(), no.clone()]).evaluate(&event));
    assert!(Or(vec![yes.clone(), no.clone()]).evaluate(&event));
    assert!(!Or::<Pod>(vec![]).evaluate(&event));
    assert!(Not(no).evaluate(&event));
    assert!(!Not(yes).evaluate(&event));
}
