use std::error::Error;
use std::time::Duration;

use taskdag::{Scheduler, SchedulerConfig};
use taskdag_test_utils::{init_tracing, ExecLog, ScriptedAction};

type TestResult = Result<(), Box<dyn Error>>;

/// A -> B, A -> C, B -> D, C -> D.
///
/// A completes before B and C start; D starts only after both B and C have
/// completed; B and C run concurrently.
#[test]
fn diamond_respects_barriers_and_overlaps_siblings() -> TestResult {
    init_tracing();

    let log = ExecLog::new();
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::builder("A").log(log.clone()).build();
    let b = ScriptedAction::builder("B")
        .log(log.clone())
        .delay(Duration::from_millis(150))
        .build();
    let c = ScriptedAction::builder("C")
        .log(log.clone())
        .delay(Duration::from_millis(150))
        .build();
    let d = ScriptedAction::builder("D").log(log.clone()).build();

    let ta = scheduler.create(a.clone())?;
    let tb = scheduler.create(b.clone())?;
    let tc = scheduler.create(c.clone())?;
    let td = scheduler.create(d.clone())?;

    scheduler.before(&ta, &[tb.clone(), tc.clone()])?;
    scheduler.before(&tb, &[td.clone()])?;
    scheduler.before(&tc, &[td.clone()])?;

    scheduler.execute_all(true)?;

    assert!(log.finished_before_started("A", "B"));
    assert!(log.finished_before_started("A", "C"));
    assert!(log.finished_before_started("B", "D"));
    assert!(log.finished_before_started("C", "D"));

    // The two middle tasks share a level and sleep long enough that they
    // must have been inside perform at the same time.
    assert!(log.overlapped("B", "C"));

    assert_eq!(a.performs(), 1);
    assert_eq!(b.performs(), 1);
    assert_eq!(c.performs(), 1);
    assert_eq!(d.performs(), 1);

    Ok(())
}
