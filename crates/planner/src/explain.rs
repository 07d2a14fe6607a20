use crate::join_planner::{BroadcastSide, JoinPlan, PlannedJoin};

/// Render a planned join as one human-readable line.
pub fn explain_join(planned: &PlannedJoin) -> String {
    let spec = planned.spec();
    let side = |h: &mfq_storage::DatasetHandle| {
        format!(
            "{}[{}, ~{} rows]",
            h.name(),
            h.layout(),
            h.estimated_row_count()
        )
    };
    let detail = match planned.plan() {
        JoinPlan::BroadcastJoin { broadcast_side } => {
            let (build, probe) = match broadcast_side {
                BroadcastSide::Left => (&spec.left, &spec.right),
                BroadcastSide::Right => (&spec.right, &spec.left),
            };
            format!("broadcast={} probe={}", side(build), side(probe))
        }
        JoinPlan::BucketedMergeJoin { .. } | JoinPlan::ShuffleHashJoin { .. } => {
            format!("left={} right={}", side(&spec.left), side(&spec.right))
        }
    };
    let degraded = if planned.plan().is_degraded() {
        " [DEGRADED]"
    } else {
        ""
    };
    format!(
        "{} {detail} on [{}] -> {}{degraded}",
        planned.plan(),
        spec.keys.join(", "),
        planned.output_layout()
    )
}
