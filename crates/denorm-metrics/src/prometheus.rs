//! Prometheus text exposition format.
//!
//! Renders control-loop counters and per-shape priority gauges for
//! scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use crate::telemetry::TelemetrySnapshot;

/// Priority of one query shape at render time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityGauge {
    pub query: String,
    pub priority: i64,
    pub samples: u64,
}

/// Render telemetry, shape priorities and rule counts per status.
pub fn render_prometheus(
    telemetry: &TelemetrySnapshot,
    shapes: &[PriorityGauge],
    rule_counts: &[(&str, usize)],
) -> String {
    let mut out = String::new();

    counter(
        &mut out,
        "denorm_determination_cycles_total",
        "Completed rule determination cycles.",
        telemetry.determination_cycles,
    );
    counter(
        &mut out,
        "denorm_rules_submitted_total",
        "Rules synthesized and submitted as PENDING.",
        telemetry.rules_submitted,
    );
    counter(
        &mut out,
        "denorm_rules_adopted_total",
        "Existing repository rules adopted by a shape.",
        telemetry.rules_adopted,
    );
    counter(
        &mut out,
        "denorm_rules_refused_total",
        "Promotions refused at the outstanding-rule capacity.",
        telemetry.rules_refused,
    );
    counter(
        &mut out,
        "denorm_submission_failures_total",
        "Rule submissions that failed.",
        telemetry.submission_failures,
    );
    counter(
        &mut out,
        "denorm_revocations_total",
        "Revocation decisions recorded (never applied).",
        telemetry.revocations,
    );

    if let Some(threshold) = telemetry.threshold {
        out.push_str("# HELP denorm_promotion_threshold Priority threshold of the last cycle.\n");
        out.push_str("# TYPE denorm_promotion_threshold gauge\n");
        let _ = writeln!(out, "denorm_promotion_threshold {threshold}");
    }

    counter(
        &mut out,
        "denorm_coordinator_cycles_total",
        "Completed lifecycle coordinator cycles.",
        telemetry.coordinator_cycles,
    );
    counter(
        &mut out,
        "denorm_rules_accepted_total",
        "Rules moved from PENDING to ACCEPTED.",
        telemetry.rules_accepted,
    );
    counter(
        &mut out,
        "denorm_rules_bootstrapped_total",
        "Rules moved from ACCEPTED to BOOTSTRAPPING.",
        telemetry.rules_bootstrapped,
    );
    counter(
        &mut out,
        "denorm_bootstrap_batches_total",
        "Bootstrap batches written to the namespace.",
        telemetry.bootstrap_batches,
    );
    counter(
        &mut out,
        "denorm_bootstrap_batch_failures_total",
        "Bootstrap batch writes that failed.",
        telemetry.batch_failures,
    );
    counter(
        &mut out,
        "denorm_status_conflicts_total",
        "Status transitions lost to a concurrent writer.",
        telemetry.cas_conflicts,
    );
    counter(
        &mut out,
        "denorm_coordinator_failures_total",
        "Fatal coordinator failures.",
        telemetry.coordinator_failures,
    );

    out.push_str("# HELP denorm_rules Rules in the repository by status.\n");
    out.push_str("# TYPE denorm_rules gauge\n");
    for (status, count) in rule_counts {
        let _ = writeln!(out, "denorm_rules{{status=\"{}\"}} {count}", escape_label(status));
    }

    out.push_str("# HELP denorm_query_priority Current priority of a query shape.\n");
    out.push_str("# TYPE denorm_query_priority gauge\n");
    for s in shapes {
        let _ = writeln!(
            out,
            "denorm_query_priority{{query=\"{}\"}} {}",
            escape_label(&s.query),
            s.priority
        );
    }

    out.push_str("# HELP denorm_query_samples_total Samples recorded for a query shape.\n");
    out.push_str("# TYPE denorm_query_samples_total counter\n");
    for s in shapes {
        let _ = writeln!(
            out,
            "denorm_query_samples_total{{query=\"{}\"}} {}",
            escape_label(&s.query),
            s.samples
        );
    }

    out
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

/// Escape a label value: backslash, double quote and newline.
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
