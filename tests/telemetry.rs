//! Integration tests for rendering events and error chains through
//! `PlainFormatter` (spec §6/§7).

use wesley::event_bus::Event;
use wesley::operation::{OperationId, Phase};
use wesley::telemetry::{PlainFormatter, TelemetryFormatter};
use wesley::{ErrorClass, WesleyError};

#[test]
fn render_event_tags_context_with_scope_label() {
    let fmt = PlainFormatter::new();
    let event = Event::phase_started("plan-a", Phase::Transactional);
    let render = fmt.render_event(&event);
    assert_eq!(render.context.as_deref(), Some("execution"));
    assert!(render.join_lines().contains("PHASE_STARTED"));
}

#[test]
fn render_event_op_failed_carries_remediation() {
    let fmt = PlainFormatter::new();
    let event = Event::op_failed(
        "plan-a",
        OperationId(7),
        ErrorClass::ConstraintViolation,
        "duplicate key value violates unique constraint",
        0,
        ErrorClass::ConstraintViolation.remediation_hint(),
    );
    let render = fmt.render_event(&event);
    let joined = render.join_lines();
    assert!(joined.contains("backfill or relax it first"));
}

#[test]
fn render_error_walks_the_source_chain() {
    let fmt = PlainFormatter::new();
    let dep_err = wesley::error::WesleyError::from(
        wesley::dependency::DependencyError::CircularDependency(vec![OperationId(0), OperationId(1)]),
    );
    let render = fmt.render_error(&dep_err);
    let joined = render.join_lines();
    assert!(joined.contains(&format!("exit {}", dep_err.exit_code())));
    assert!(joined.contains("circular dependency"));
}

#[test]
fn render_error_context_is_fixed_scope_label() {
    let fmt = PlainFormatter::new();
    let err = WesleyError::from(wesley::dependency::DependencyError::CircularDependency(vec![
        OperationId(0),
    ]));
    let render = fmt.render_error(&err);
    assert!(render.context.unwrap().contains("wesley"));
}
