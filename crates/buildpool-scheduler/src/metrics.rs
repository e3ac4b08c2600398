//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;

use crate::pool::PoolStats;
use crate::scheduler::Scheduler;

/// Collect per-pool metrics and format as Prometheus text.
pub fn collect_metrics(scheduler: &Scheduler) -> String {
    let stats: Vec<(String, PoolStats)> = scheduler
        .pools()
        .map(|pool| (pool.name().to_string(), pool.stats()))
        .collect();

    let mut output = String::new();
    collect_worker_metrics(&stats, &mut output);
    collect_job_metrics(&stats, &mut output);
    output
}

fn collect_worker_metrics(stats: &[(String, PoolStats)], output: &mut String) {
    writeln!(
        output,
        "# HELP buildpool_workers Number of registered workers by state"
    )
    .ok();
    writeln!(output, "# TYPE buildpool_workers gauge").ok();
    for (pool, s) in stats {
        writeln!(
            output,
            "buildpool_workers{{pool=\"{pool}\",state=\"active\"}} {}",
            s.workers_active
        )
        .ok();
        writeln!(
            output,
            "buildpool_workers{{pool=\"{pool}\",state=\"paused\"}} {}",
            s.workers_paused
        )
        .ok();
    }

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP buildpool_capacity Total job slots across registered workers"
    )
    .ok();
    writeln!(output, "# TYPE buildpool_capacity gauge").ok();
    for (pool, s) in stats {
        writeln!(output, "buildpool_capacity{{pool=\"{pool}\"}} {}", s.capacity).ok();
    }
}

fn collect_job_metrics(stats: &[(String, PoolStats)], output: &mut String) {
    writeln!(output).ok();
    writeln!(output, "# HELP buildpool_jobs_queued Queued jobs by priority").ok();
    writeln!(output, "# TYPE buildpool_jobs_queued gauge").ok();
    for (pool, s) in stats {
        writeln!(
            output,
            "buildpool_jobs_queued{{pool=\"{pool}\",priority=\"urgent\"}} {}",
            s.queued_urgent
        )
        .ok();
        writeln!(
            output,
            "buildpool_jobs_queued{{pool=\"{pool}\",priority=\"normal\"}} {}",
            s.queued_normal
        )
        .ok();
    }

    writeln!(output).ok();
    writeln!(output, "# HELP buildpool_jobs_running Jobs bound to a worker").ok();
    writeln!(output, "# TYPE buildpool_jobs_running gauge").ok();
    for (pool, s) in stats {
        writeln!(output, "buildpool_jobs_running{{pool=\"{pool}\"}} {}", s.running).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_collect_metrics_empty_pools() {
        let scheduler = Scheduler::new(&Config {
            pools: vec!["linux".into()],
            ..Config::default()
        });
        let output = collect_metrics(&scheduler);

        assert!(output.contains("# TYPE buildpool_workers gauge"));
        assert!(output.contains("buildpool_workers{pool=\"linux\",state=\"active\"} 0"));
        assert!(output.contains("buildpool_jobs_queued{pool=\"linux\",priority=\"urgent\"} 0"));
        assert!(output.contains("buildpool_jobs_running{pool=\"linux\"} 0"));
    }
}
