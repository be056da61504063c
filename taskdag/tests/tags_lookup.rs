use std::error::Error;

use taskdag::{Scheduler, SchedulerConfig, TagRegistry};
use taskdag_test_utils::ScriptedAction;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn tags_with_the_same_name_are_equal() {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let x1 = scheduler.create_tag("x");
    let x2 = scheduler.create_tag("x");
    let y = scheduler.create_tag("y");

    assert_eq!(x1, x2);
    assert_ne!(x1, y);
    assert_eq!(x1.name(), "x");
}

#[test]
fn unreferenced_tags_are_reclaimed_from_the_registry() {
    let registry = TagRegistry::new();

    let held = registry.create("held");
    let dropped = registry.create("dropped");
    drop(dropped);

    assert!(registry.get("held").is_some());
    assert!(registry.get("dropped").is_none());
    assert_eq!(registry.len(), 1);

    drop(held);
    assert!(registry.is_empty());
}

#[test]
fn creating_a_task_registers_it_under_its_action_tags() -> TestResult {
    let registry = TagRegistry::new();
    let scheduler = Scheduler::with_registry(SchedulerConfig::default(), registry.clone());

    let startup = registry.create("startup");

    let a = ScriptedAction::builder("A").tags(vec![startup.clone()]).build();
    let ta = scheduler.create(a)?;

    let tagged = scheduler.get_activities(true, &[startup.clone()]);
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].id(), ta.id());

    Ok(())
}

#[test]
fn untagged_lookup_includes_transitive_dependencies() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let reporting = scheduler.create_tag("reporting");

    let a = ScriptedAction::succeeding("A");
    let b = ScriptedAction::succeeding("B");
    let c = ScriptedAction::builder("C").tags(vec![reporting.clone()]).build();

    let ta = scheduler.create(a)?;
    let tb = scheduler.create(b)?;
    let tc = scheduler.create(c)?;

    scheduler.before(&ta, &[tb.clone()])?;
    scheduler.before(&tb, &[tc.clone()])?;

    let tagged_only = scheduler.get_activities(true, &[reporting.clone()]);
    assert_eq!(tagged_only.len(), 1);
    assert_eq!(tagged_only[0].id(), tc.id());

    // With tagged_only false, everything C transitively depends on comes
    // along, in discovery order.
    let with_deps = scheduler.get_activities(false, &[reporting.clone()]);
    let ids: Vec<_> = with_deps.iter().map(|t| t.id()).collect();
    assert_eq!(ids, vec![tc.id(), tb.id(), ta.id()]);

    Ok(())
}

#[test]
fn untagging_removes_the_association() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let tag = scheduler.create_tag("bulk");

    let a = ScriptedAction::succeeding("A");
    let ta = scheduler.create(a)?;

    ta.tag(&[tag.clone()])?;
    assert_eq!(scheduler.get_activities(true, &[tag.clone()]).len(), 1);

    ta.untag(&[tag.clone()])?;
    assert!(scheduler.get_activities(true, &[tag.clone()]).is_empty());

    Ok(())
}

#[test]
fn removing_a_task_untags_it() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let tag = scheduler.create_tag("cleanup");

    let a = ScriptedAction::builder("A").tags(vec![tag.clone()]).build();
    let ta = scheduler.create(a)?;
    scheduler.add(&[ta.clone()]);

    assert!(scheduler.remove(&ta));
    assert!(scheduler.get_activities(true, &[tag.clone()]).is_empty());

    // Already gone.
    assert!(!scheduler.remove(&ta));

    Ok(())
}

#[test]
fn get_action_only_answers_for_queued_tasks() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::succeeding("A");
    let ta = scheduler.create(a)?;

    assert!(scheduler.get_action(&ta).is_none());

    scheduler.add(&[ta.clone()]);
    let action = scheduler.get_action(&ta).expect("task is queued");
    assert_eq!(action.name(), "A");

    Ok(())
}
