/// Execute an aggregate command deterministically (no IO, no async).
///
/// 1. **Decide**: calls `aggregate.handle(command)` (pure, no mutation)
/// 2. **Evolve**: applies each decided event via `aggregate.apply(event)`
///
/// If `handle` rejects the command the aggregate is left untouched, which is
/// what lets the engine treat a rejected transition as a no-op.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: wms_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
