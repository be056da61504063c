use std::collections::BTreeSet;
use std::error::Error;

use taskdag::dag::Graph;
use taskdag::{Scheduler, SchedulerConfig};
use taskdag_test_utils::ScriptedAction;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn adding_the_same_value_twice_creates_one_vertex() {
    let mut graph: Graph<u32> = Graph::new();

    let first = graph.add_vertex(7);
    let second = graph.add_vertex(7);

    assert_eq!(first, second);
    assert_eq!(graph.len(), 1);
}

#[test]
fn before_and_after_declare_the_same_ordering() -> TestResult {
    let mut graph: Graph<u32> = Graph::new();
    let a = graph.add_vertex(1);
    let b = graph.add_vertex(2);

    graph.before(a, b)?;
    // The reverse declaration of the same constraint; the duplicate edge is
    // permitted and does not disturb the sort.
    graph.after(b, a)?;

    let sorted = graph.topo_sort(&[a, b])?;
    assert_eq!(sorted, vec![a, b]);

    Ok(())
}

#[test]
fn removing_a_middle_vertex_preserves_reachability() -> TestResult {
    let mut graph: Graph<u32> = Graph::new();
    let p = graph.add_vertex(1);
    let u = graph.add_vertex(2);
    let s = graph.add_vertex(3);

    graph.before(p, u)?;
    graph.before(u, s)?;

    graph.remove_vertex(u);

    let dependents = graph.dependents(&[p, s]);
    assert_eq!(dependents[&1], BTreeSet::from([3]));

    let sorted = graph.topo_sort(&[p, s])?;
    assert_eq!(sorted, vec![p, s]);

    Ok(())
}

#[test]
fn restitching_does_not_duplicate_existing_edges() -> TestResult {
    // a -> b, a -> c, b -> d, c -> d.
    let mut graph: Graph<u32> = Graph::new();
    let a = graph.add_vertex(1);
    let b = graph.add_vertex(2);
    let c = graph.add_vertex(3);
    let d = graph.add_vertex(4);

    graph.before(a, b)?;
    graph.before(a, c)?;
    graph.before(b, d)?;
    graph.before(c, d)?;

    // Removing b adds a -> d; removing c then finds that edge (in either
    // direction) and must not create another.
    graph.remove_vertex(b);
    graph.remove_vertex(c);

    let dependents = graph.dependents(&[a, d]);
    assert_eq!(dependents[&1], BTreeSet::from([4]));

    let sorted = graph.topo_sort(&[a, d])?;
    assert_eq!(sorted, vec![a, d]);

    Ok(())
}

#[test]
fn a_failed_sort_leaves_the_graph_reusable() -> TestResult {
    let mut graph: Graph<u32> = Graph::new();
    let a = graph.add_vertex(1);
    let b = graph.add_vertex(2);
    let c = graph.add_vertex(3);

    graph.before(a, b)?;
    graph.before(b, c)?;
    graph.before(c, b)?;

    assert!(graph.topo_sort(&[a, b, c]).is_err());

    // The removed marks were cleared, so a filter that sidesteps the cycle
    // sorts cleanly.
    let sorted = graph.topo_sort(&[a, c])?;
    assert_eq!(sorted.len(), 2);

    Ok(())
}

#[test]
fn reset_returns_the_scheduler_to_its_initial_state() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let tag = scheduler.create_tag("t");

    let a = ScriptedAction::builder("A").tags(vec![tag.clone()]).build();
    let b = ScriptedAction::succeeding("B");

    let ta = scheduler.create(a.clone())?;
    let tb = scheduler.create(b.clone())?;
    scheduler.before(&ta, &[tb.clone()])?;

    scheduler.reset();

    scheduler.execute_all(true)?;
    assert_eq!(a.performs(), 0);
    assert_eq!(b.performs(), 0);

    assert!(scheduler.get_activities(true, &[tag.clone()]).is_empty());
    assert!(!scheduler.remove(&ta));

    Ok(())
}

#[test]
fn remove_all_dependencies_detaches_the_task() -> TestResult {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let a = ScriptedAction::succeeding("A");
    let b = ScriptedAction::succeeding("B");
    let c = ScriptedAction::builder("C").build();

    let ta = scheduler.create(a.clone())?;
    let tb = scheduler.create(b.clone())?;
    let tc = scheduler.create(c.clone())?;

    ta.before(&[tb.clone()])?;
    tb.before(&[tc.clone()])?;

    assert!(tb.remove_all_dependencies()?);

    scheduler.execute_all(false)?;

    // A and C still ran, in the re-stitched order; B is gone.
    assert_eq!(a.performs(), 1);
    assert_eq!(b.performs(), 0);
    assert_eq!(c.performs(), 1);

    Ok(())
}
