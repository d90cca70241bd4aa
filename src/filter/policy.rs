// policy.rs — Keep/reject decision for a scored candidate.

use anyhow::bail;

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Scores at or below this are not paraphrases.
    pub lower: f32,
    /// Scores above this are near-duplicates of the source.
    pub upper: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            lower: config::filter::DEFAULT_LOWER_THRESHOLD,
            upper: config::filter::DEFAULT_UPPER_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn new(lower: f32, upper: f32) -> anyhow::Result<Self> {
        for (name, value) in [("lower", lower), ("upper", upper)] {
            if !(-1.0..=1.0).contains(&value) {
                bail!("{name} threshold must be within [-1, 1], got {value}");
            }
        }
        if lower >= upper {
            bail!("lower threshold ({lower}) must be below upper threshold ({upper})");
        }
        Ok(Self { lower, upper })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FilterPolicy {
    /// Keep paraphrase-like candidates that are not near-duplicates: lower < score <= upper.
    #[default]
    Selection,
    /// Keep semantically related candidates: score > lower.
    Filtering,
    /// Drop near-duplicates: score <= upper.
    Deduplication,
}

impl FilterPolicy {
    pub fn keeps(self, score: f32, thresholds: &Thresholds) -> bool {
        match self {
            FilterPolicy::Selection => score > thresholds.lower && score <= thresholds.upper,
            FilterPolicy::Filtering => score > thresholds.lower,
            FilterPolicy::Deduplication => score <= thresholds.upper,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterPolicy::Selection => "selection",
            FilterPolicy::Filtering => "filtering",
            FilterPolicy::Deduplication => "deduplication",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let t = Thresholds::default();
        assert_eq!(t.lower, 0.5);
        assert_eq!(t.upper, 0.95);
    }

    #[test]
    fn test_filtering_lower_bound_is_strict() {
        let t = Thresholds::default();
        assert!(!FilterPolicy::Filtering.keeps(0.5, &t));
        assert!(FilterPolicy::Filtering.keeps(0.50001, &t));
        assert!(FilterPolicy::Filtering.keeps(1.0, &t));
    }

    #[test]
    fn test_selection_bounds() {
        let t = Thresholds::default();
        assert!(!FilterPolicy::Selection.keeps(0.96, &t));
        assert!(!FilterPolicy::Selection.keeps(0.5, &t));
        assert!(FilterPolicy::Selection.keeps(0.95, &t));
        assert!(FilterPolicy::Selection.keeps(0.7, &t));
    }

    #[test]
    fn test_deduplication_upper_bound_is_inclusive() {
        let t = Thresholds::default();
        assert!(FilterPolicy::Deduplication.keeps(0.95, &t));
        assert!(!FilterPolicy::Deduplication.keeps(0.9501, &t));
        assert!(!FilterPolicy::Deduplication.keeps(1.0, &t));
        assert!(FilterPolicy::Deduplication.keeps(-0.3, &t));
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Thresholds::new(0.2, 0.8).is_ok());
        assert!(Thresholds::new(0.8, 0.8).is_err());
        assert!(Thresholds::new(0.9, 0.1).is_err());
        assert!(Thresholds::new(-1.5, 0.5).is_err());
        assert!(Thresholds::new(0.5, 1.2).is_err());
    }
}
