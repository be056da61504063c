use std::error::Error;

use taskdag::{Scheduler, SchedulerConfig};
use taskdag_test_utils::ScriptedAction;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn cyclic_dependencies_abort_the_pass_before_any_task_runs() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::succeeding("A");
    let b = ScriptedAction::succeeding("B");
    let c = ScriptedAction::succeeding("C");

    let ta = scheduler.create(a.clone())?;
    let tb = scheduler.create(b.clone())?;
    let tc = scheduler.create(c.clone())?;

    scheduler.before(&ta, &[tb.clone()])?;
    scheduler.before(&tb, &[tc.clone()])?;
    scheduler.before(&tc, &[ta.clone()])?;

    let err = scheduler.execute_all(true).unwrap_err();
    assert!(matches!(err, taskdag::Error::CyclicDependencies(_)));

    let err = scheduler.execute_all(false).unwrap_err();
    assert!(matches!(err, taskdag::Error::CyclicDependencies(_)));

    assert_eq!(a.performs(), 0);
    assert_eq!(b.performs(), 0);
    assert_eq!(c.performs(), 0);

    Ok(())
}

#[test]
fn removing_a_cycle_member_makes_the_graph_executable_again() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::succeeding("A");
    let b = ScriptedAction::succeeding("B");
    let c = ScriptedAction::succeeding("C");

    let ta = scheduler.create(a.clone())?;
    let tb = scheduler.create(b.clone())?;
    let tc = scheduler.create(c.clone())?;

    scheduler.before(&ta, &[tb.clone()])?;
    scheduler.before(&tb, &[tc.clone()])?;
    scheduler.before(&tc, &[ta.clone()])?;

    assert!(scheduler.execute_all(false).is_err());

    // Removing B re-stitches A -> C, but C -> A already connects the two,
    // so no self-loop or duplicate is created and the rest still runs.
    assert!(scheduler.remove(&tb));

    scheduler.execute_all(false)?;

    assert_eq!(a.performs(), 1);
    assert_eq!(b.performs(), 0);
    assert_eq!(c.performs(), 1);

    Ok(())
}

#[test]
fn a_task_cannot_be_ordered_against_itself() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::succeeding("A");
    let ta = scheduler.create(a)?;

    let err = scheduler.before(&ta, &[ta.clone()]).unwrap_err();
    assert!(matches!(err, taskdag::Error::SelfDependency(_)));

    let err = scheduler.after(&ta, &[ta.clone()]).unwrap_err();
    assert!(matches!(err, taskdag::Error::SelfDependency(_)));

    Ok(())
}
