use std::error::Error;
use std::sync::Arc;

use taskdag::{Outcome, Scheduler, SchedulerConfig};
use taskdag_test_utils::{init_tracing, ScriptedAction};

type TestResult = Result<(), Box<dyn Error>>;

/// A -> B -> C, A -> D. A fails once without retry; every dependent is
/// disabled without its perform being called.
#[test]
fn failing_task_disables_its_transitive_dependents() -> TestResult {
    init_tracing();

    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::builder("A").then(Outcome::Failure).build();
    let b = ScriptedAction::succeeding("B");
    let c = ScriptedAction::succeeding("C");
    let d = ScriptedAction::succeeding("D");

    let ta = scheduler.create(a.clone())?;
    let tb = scheduler.create(b.clone())?;
    let tc = scheduler.create(c.clone())?;
    let td = scheduler.create(d.clone())?;

    scheduler.before(&ta, &[tb.clone(), td.clone()])?;
    scheduler.before(&tb, &[tc.clone()])?;

    // Individual task failures never fail the pass itself.
    scheduler.execute_all(true)?;

    assert_eq!(a.performs(), 1);
    assert_eq!(b.performs(), 0);
    assert_eq!(c.performs(), 0);
    assert_eq!(d.performs(), 0);

    assert!(!ta.is_enabled());
    assert!(!tb.is_enabled());
    assert!(!tc.is_enabled());
    assert!(!td.is_enabled());

    Ok(())
}

#[test]
fn an_error_from_the_action_counts_as_a_failure() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::builder("A").then_error("disk on fire").build();
    let b = ScriptedAction::succeeding("B");

    let ta = scheduler.create(a.clone())?;
    let tb = scheduler.create(b.clone())?;
    scheduler.before(&ta, &[tb.clone()])?;

    scheduler.execute_all(false)?;

    assert_eq!(a.performs(), 1);
    assert_eq!(b.performs(), 0);
    assert!(!ta.is_enabled());
    assert!(!tb.is_enabled());

    Ok(())
}

#[test]
fn failure_then_success_with_retry_keeps_the_task_enabled() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::builder("A")
        .then(Outcome::Failure)
        .then(Outcome::Success)
        .retryable(true)
        .build();

    let ta = scheduler.create(a.clone())?;
    scheduler.add(&[ta.clone()]);

    scheduler.execute_all(true)?;

    assert_eq!(a.performs(), 2);
    assert!(ta.is_enabled());

    Ok(())
}

#[test]
fn retries_are_capped_at_the_configured_maximum() -> TestResult {
    let config = SchedulerConfig {
        max_retries: 3,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(config);

    let a = ScriptedAction::builder("A")
        .default_outcome(Outcome::Failure)
        .retryable(true)
        .build();

    let ta = scheduler.create(a.clone())?;
    scheduler.add(&[ta.clone()]);

    scheduler.execute_all(false)?;

    // One initial attempt plus three retries.
    assert_eq!(a.performs(), 4);
    assert!(!ta.is_enabled());

    Ok(())
}

#[test]
fn disable_outcome_disables_the_task_and_its_dependents() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::builder("A").then(Outcome::Disable).build();
    let b = ScriptedAction::succeeding("B");

    let ta = scheduler.create(a.clone())?;
    let tb = scheduler.create(b.clone())?;
    scheduler.before(&ta, &[tb.clone()])?;

    scheduler.execute_all(true)?;

    assert_eq!(a.performs(), 1);
    assert_eq!(b.performs(), 0);
    assert!(!ta.is_enabled());
    assert!(!tb.is_enabled());

    Ok(())
}

#[test]
fn disable_once_is_restored_between_passes() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::builder("A").then(Outcome::DisableOnce).build();
    let b = ScriptedAction::succeeding("B");

    let ta = scheduler.create(a.clone())?;
    let tb = scheduler.create(b.clone())?;
    scheduler.before(&ta, &[tb.clone()])?;

    scheduler.execute_all(true)?;

    // The dependent sat out the pass, but the task itself is enabled again.
    assert_eq!(a.performs(), 1);
    assert_eq!(b.performs(), 0);
    assert!(ta.is_enabled());
    assert!(!tb.is_enabled());

    // On the next pass the task runs again; the dependent stays disabled.
    scheduler.execute_all(true)?;

    assert_eq!(a.performs(), 2);
    assert_eq!(b.performs(), 0);
    assert!(ta.is_enabled());

    Ok(())
}

#[test]
fn a_disabled_action_reports_disable_without_performing() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::builder("A").action_disabled().build();
    let b = ScriptedAction::succeeding("B");

    let ta = scheduler.create(a.clone())?;
    let tb = scheduler.create(b.clone())?;
    scheduler.before(&ta, &[tb.clone()])?;

    scheduler.execute_all(false)?;

    assert_eq!(a.performs(), 0);
    assert_eq!(b.performs(), 0);
    assert!(!ta.is_enabled());
    assert!(!tb.is_enabled());

    Ok(())
}

#[test]
fn cancellation_aborts_the_pass() -> TestResult {
    for parallel in [false, true] {
        let scheduler = Scheduler::new(SchedulerConfig::default());

        let a = ScriptedAction::builder("A").then_cancel().build();
        let ta = scheduler.create(a.clone())?;
        scheduler.add(&[ta.clone()]);

        let err = scheduler.execute_all(parallel).unwrap_err();
        assert!(matches!(err, taskdag::Error::Cancelled));
        assert_eq!(a.performs(), 1);
    }

    Ok(())
}

#[test]
fn an_action_with_an_empty_name_is_rejected() {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let err = scheduler
        .create(ScriptedAction::succeeding(""))
        .unwrap_err();
    assert!(matches!(err, taskdag::Error::InvalidAction(_)));
}

#[test]
fn concurrent_execution_of_one_task_is_a_caller_bug() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::builder("A")
        .delay(std::time::Duration::from_millis(200))
        .build();
    let ta = scheduler.create(a.clone())?;

    let worker = {
        let ta = ta.clone();
        std::thread::spawn(move || ta.execute())
    };

    std::thread::sleep(std::time::Duration::from_millis(50));
    let err = ta.execute().unwrap_err();
    assert!(matches!(err, taskdag::Error::AlreadyExecuting(_)));

    assert!(worker.join().expect("executor thread panicked").is_ok());
    assert_eq!(a.performs(), 1);

    Ok(())
}

#[test]
fn a_panicking_action_surfaces_as_a_task_failure_in_parallel_mode() -> TestResult {
    struct Exploding;

    impl taskdag::Action for Exploding {
        fn perform(&self) -> Result<Outcome, taskdag::ActionError> {
            panic!("boom");
        }

        fn name(&self) -> String {
            "exploding".to_string()
        }
    }

    let scheduler = Scheduler::new(SchedulerConfig::default());
    let ta = scheduler.create(Arc::new(Exploding))?;
    scheduler.add(&[ta.clone()]);

    let err = scheduler.execute_all(true).unwrap_err();
    assert!(matches!(err, taskdag::Error::TaskFailed { .. }));

    Ok(())
}
