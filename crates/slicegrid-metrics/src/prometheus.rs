//! Prometheus text exposition format.
//!
//! Renders node reports into the Prometheus text exposition format for
//! scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use crate::sink::NodeReport;

/// Escape a label value per the exposition format.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Render node reports and the pending-request gauge into Prometheus
/// text format.
pub fn render_prometheus(reports: &[&NodeReport], pending: u64) -> String {
    let mut out = String::new();

    out.push_str("# HELP slicegrid_gpu_slices_total Slots per accelerator by status.\n");
    out.push_str("# TYPE slicegrid_gpu_slices_total gauge\n");
    for r in reports {
        for s in &r.slots {
            for (status, value) in [("used", s.used), ("free", s.free)] {
                let _ = writeln!(
                    out,
                    "slicegrid_gpu_slices_total{{node=\"{}\",gpu_id=\"{}\",slot_status=\"{}\"}} {}",
                    escape(&r.node),
                    escape(&s.accelerator),
                    status,
                    value
                );
            }
        }
    }

    out.push_str("# HELP slicegrid_deployed_pod_total Slots held by each allocated workload.\n");
    out.push_str("# TYPE slicegrid_deployed_pod_total gauge\n");
    for r in reports {
        for a in &r.allocations {
            let _ = writeln!(
                out,
                "slicegrid_deployed_pod_total{{node=\"{}\",gpu_id=\"{}\",namespace=\"{}\",podname=\"{}\",profile=\"{}\"}} {}",
                escape(&r.node),
                escape(&a.accelerator),
                escape(&a.namespace),
                escape(&a.workload),
                escape(&a.profile),
                a.size
            );
        }
    }

    out.push_str("# HELP slicegrid_compatible_profiles Slices of each profile that still fit on a node.\n");
    out.push_str("# TYPE slicegrid_compatible_profiles gauge\n");
    for r in reports {
        for (profile, count) in &r.compatible {
            let _ = writeln!(
                out,
                "slicegrid_compatible_profiles{{node=\"{}\",profile=\"{}\"}} {}",
                escape(&r.node),
                escape(profile),
                count
            );
        }
    }

    out.push_str("# HELP slicegrid_pending_gpu_slice_requests Gated workloads waiting for a slice.\n");
    out.push_str("# TYPE slicegrid_pending_gpu_slice_requests gauge\n");
    let _ = writeln!(out, "slicegrid_pending_gpu_slice_requests {pending}");

    out
}
