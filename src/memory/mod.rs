use tracing::warn;

/// Something that can say how many bytes a run may use.
pub trait MemoryBudget {
    fn available(&self) -> usize;
}

/// A budget fixed up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBudget(pub usize);

impl MemoryBudget for FixedBudget {
    fn available(&self) -> usize {
        self.0
    }
}

/// What a node asks for: a floor plus a weight for sharing what is left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryContract {
    pub minimum: usize,
    pub fraction: f64,
}

/// Bytes the framework keeps for itself when running `phases` phases.
pub fn framework_overhead(phases: usize, per_phase: usize) -> usize {
    phases.saturating_mul(per_phase)
}

/// Splits `budget` between the nodes of one phase.
///
/// The minimums are reserved first and the remainder is shared in proportion
/// to the fractions. If the minimums alone do not fit, every node gets just
/// its minimum and a warning is logged; the run carries on degraded.
pub fn distribute(contracts: &[MemoryContract], budget: usize) -> Vec<usize> {
    let minimums: Vec<usize> = contracts.iter().map(|c| c.minimum).collect();
    let sum_minimum = minimums.iter().fold(0_usize, |a, m| a.saturating_add(*m));
    if budget < sum_minimum {
        warn!(
            budget,
            required = sum_minimum,
            "not enough memory for this phase, assigning minimums only"
        );
        return minimums;
    }

    let weights: Vec<f64> = contracts.iter().map(|c| weight(c.fraction)).collect();
    let total_weight: f64 = weights.iter().sum();
    if total_weight <= 0.0 {
        return minimums;
    }

    let remainder = budget - sum_minimum;
    let mut left = remainder;
    minimums
        .iter()
        .zip(weights)
        .map(|(min, w)| {
            let share = ((remainder as f64) * w / total_weight).floor() as usize;
            // Rounding must never hand out more than the remainder.
            let share = share.min(left);
            left -= share;
            min + share
        })
        .collect()
}

fn weight(fraction: f64) -> f64 {
    if fraction.is_finite() && fraction > 0.0 {
        fraction
    } else {
        0.0
    }
}
