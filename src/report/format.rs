//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the estimation code stays clean and testable
//! - output changes are localized

use crate::app::pipeline::RunOutput;
use crate::domain::{EffectType, EstimateConfig};
use crate::estimation::BootstrapSummary;
use crate::evaluation::{BalanceTable, SMD_THRESHOLD};
use crate::models::Classifier;

/// Format the full run summary (dataset stats + propensity diagnostics + effects).
pub fn format_run_summary(run: &RunOutput, config: &EstimateConfig) -> String {
    let mut out = String::new();
    let stats = run.dataset().stats();
    let diag = run.estimator.learner().diagnostics();

    out.push_str("=== ipw - Inverse Propensity Weighting ===\n");
    out.push_str(&format!("Data: {}\n", config.data_path.display()));
    out.push_str(&format!(
        "Units: n={} | treated={} | control={} | features={}\n",
        stats.n_units, stats.n_treated, stats.n_control, stats.n_features
    ));
    out.push_str(&format!(
        "Rows: read={} | censored={} | errors={}\n",
        run.loaded.rows_read,
        run.loaded.rows_censored,
        run.loaded.row_errors.len()
    ));

    out.push_str("\nPropensity model:\n");
    out.push_str(&format!(
        "- {}(max_iter={}, C={}, tol={:e})\n",
        run.estimator.learner().name(),
        config.max_iter,
        config.c,
        config.tol
    ));
    out.push_str(&format!(
        "- iterations={} converged={} |grad|/n={:.2e}\n",
        diag.n_iter, diag.converged, diag.grad_norm
    ));
    let (p_min, p_max) = min_max(&run.propensity);
    out.push_str(&format!("- P(A=1|X) range: [{p_min:.4}, {p_max:.4}]\n"));
    let (w_min, w_max) = min_max(&run.weights);
    out.push_str(&format!(
        "- weights: [{w_min:.3}, {w_max:.3}]{}{}\n",
        if config.use_stabilized { " (stabilized)" } else { "" },
        fmt_clip(config.clip_min, config.clip_max),
    ));

    out.push_str("\nPopulation outcomes:\n");
    out.push_str(&format!(
        "{:<8} {:>12} {:>12}\n",
        "arm", "weighted", "naive"
    ));
    for (&arm, &value) in &run.outcomes.by_arm {
        let naive = if arm == 1 { stats.y_mean_treated } else { stats.y_mean_control };
        let ci = run
            .bootstrap
            .as_ref()
            .and_then(|b| b.outcomes.get(&arm))
            .map(|ci| format!("  [{:.4}, {:.4}]", ci.lower, ci.upper))
            .unwrap_or_default();
        out.push_str(&format!("{arm:<8} {value:>12.4} {naive:>12.4}{ci}\n"));
    }

    out.push_str("\nEffect (1 vs 0):\n");
    for (&kind, &value) in &run.effect.values {
        out.push_str(&format!("- {:<6} {value:.4}", kind.display_name()));
        if let Some(boot) = &run.bootstrap {
            out.push_str(&fmt_effect_ci(boot, kind));
        }
        out.push('\n');
    }
    if let Some(boot) = &run.bootstrap {
        out.push_str(&format!(
            "  ({:.0}% percentile bootstrap, {} replicates, {} failed, seed={})\n",
            boot.confidence * 100.0,
            boot.n_boot,
            boot.n_failed,
            config.seed
        ));
    }

    out
}

/// Format the covariate balance table.
pub fn format_balance(table: &BalanceTable) -> String {
    let mut out = String::new();
    out.push_str("Covariate balance (absolute standardized mean difference):\n");
    out.push_str(
        format!("{:<20} {:>12} {:>12}\n", "covariate", "unweighted", "weighted")
            .as_str(),
    );
    out.push_str(format!("{:-<20} {:-<12} {:-<12}\n", "", "", "").as_str());
    for row in &table.rows {
        let flag = if row.is_imbalanced() { " *" } else { "" };
        out.push_str(&format!(
            "{:<20} {:>12.4} {:>12.4}{flag}\n",
            truncate(&row.feature, 20),
            row.unweighted_smd,
            row.weighted_smd
        ));
    }
    out.push_str(&format!(
        "max: {:.4} -> {:.4}  (* weighted ASMD > {SMD_THRESHOLD})\n",
        table.max_unweighted_smd(),
        table.max_weighted_smd()
    ));
    out
}

fn fmt_effect_ci(boot: &BootstrapSummary, kind: EffectType) -> String {
    match (boot.effects.get(&kind), boot.effect_se.get(&kind)) {
        (Some(ci), Some(se)) => format!("  [{:.4}, {:.4}] se={se:.4}", ci.lower, ci.upper),
        _ => "  [n/a]".to_string(),
    }
}

fn fmt_clip(lo: Option<f64>, hi: Option<f64>) -> String {
    match (lo, hi) {
        (None, None) => String::new(),
        (lo, hi) => format!(
            " (clip {}..{})",
            lo.map(|v| v.to_string()).unwrap_or_else(|| "0".into()),
            hi.map(|v| v.to_string()).unwrap_or_else(|| "1".into())
        ),
    }
}

fn min_max(v: &[f64]) -> (f64, f64) {
    v.iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::CovariateBalance;

    #[test]
    fn balance_table_flags_imbalance() {
        let table = BalanceTable {
            rows: vec![
                CovariateBalance {
                    feature: "age".into(),
                    unweighted_smd: 0.28,
                    weighted_smd: 0.02,
                },
                CovariateBalance {
                    feature: "smokeintensity^2".into(),
                    unweighted_smd: 0.3,
                    weighted_smd: 0.15,
                },
            ],
        };
        let text = format_balance(&table);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[3].starts_with("age"));
        assert!(!lines[3].ends_with('*'));
        assert!(lines[4].ends_with('*'));
        assert!(lines[5].contains("0.3000 -> 0.1500"));
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd.");
    }

    #[test]
    fn clip_description() {
        assert_eq!(fmt_clip(None, None), "");
        assert_eq!(fmt_clip(Some(0.01), None), " (clip 0.01..1)");
    }
}
