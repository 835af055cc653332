//! # Interval Budget
//!
//! Token bucket measured in bytes. Refilled from a target rate as time
//! passes, drained as packets go out. The balance may go negative (debt) by
//! at most one window's worth, which is what lets a single large packet leave
//! even when the per-tick allowance is smaller than the packet.

/// Length of the window that bounds both credit and debt.
const WINDOW_MS: i64 = 500;

/// Byte allowance refilled at a target rate.
#[derive(Debug, Clone)]
pub struct IntervalBudget {
    target_rate_kbps: i64,
    max_bytes_in_budget: i64,
    bytes_remaining: i64,
    can_build_up_underuse: bool,
}

impl IntervalBudget {
    pub fn new(initial_target_rate_kbps: u32) -> Self {
        Self::with_underuse(initial_target_rate_kbps, false)
    }

    /// With `can_build_up_underuse`, unused allowance carries over between
    /// intervals (up to the window) instead of being reset every refill.
    pub fn with_underuse(initial_target_rate_kbps: u32, can_build_up_underuse: bool) -> Self {
        let mut budget = IntervalBudget {
            target_rate_kbps: 0,
            max_bytes_in_budget: 0,
            bytes_remaining: 0,
            can_build_up_underuse,
        };
        budget.set_target_rate_kbps(initial_target_rate_kbps);
        budget
    }

    pub fn set_target_rate_kbps(&mut self, target_rate_kbps: u32) {
        self.target_rate_kbps = i64::from(target_rate_kbps);
        self.max_bytes_in_budget = (WINDOW_MS * self.target_rate_kbps) / 8;
        self.bytes_remaining = self
            .bytes_remaining
            .clamp(-self.max_bytes_in_budget, self.max_bytes_in_budget);
    }

    /// Add the allowance accrued over `delta_time_ms`.
    pub fn increase_budget(&mut self, delta_time_ms: i64) {
        let bytes = self.target_rate_kbps * delta_time_ms.max(0) / 8;
        if self.bytes_remaining < 0 || self.can_build_up_underuse {
            // Pay off debt (or bank underuse) first.
            self.bytes_remaining = (self.bytes_remaining + bytes).min(self.max_bytes_in_budget);
        } else {
            self.bytes_remaining = bytes.min(self.max_bytes_in_budget);
        }
    }

    pub fn use_budget(&mut self, bytes: usize) {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        self.bytes_remaining = self
            .bytes_remaining
            .saturating_sub(bytes)
            .max(-self.max_bytes_in_budget);
    }

    /// Spendable bytes; zero while in debt.
    pub fn bytes_remaining(&self) -> usize {
        self.bytes_remaining.max(0) as usize
    }

    /// Outstanding debt in bytes; zero while in credit.
    pub fn debt(&self) -> usize {
        (-self.bytes_remaining).max(0) as usize
    }

    /// Signed balance as a fraction of the window (`-1.0 ..= 1.0`).
    pub fn budget_ratio(&self) -> f64 {
        if self.max_bytes_in_budget == 0 {
            return 0.0;
        }
        self.bytes_remaining as f64 / self.max_bytes_in_budget as f64
    }

    pub fn target_rate_kbps(&self) -> u32 {
        self.target_rate_kbps as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET_KBPS: u32 = 100;
    // 100 kbps over the 500 ms window.
    const WINDOW_BYTES: usize = 6250;

    fn time_to_bytes(kbps: u32, ms: i64) -> usize {
        (i64::from(kbps) * ms / 8) as usize
    }

    #[test]
    fn initial_state() {
        let budget = IntervalBudget::new(TARGET_KBPS);
        assert_eq!(budget.budget_ratio(), 0.0);
        assert_eq!(budget.bytes_remaining(), 0);
    }

    #[test]
    fn underuse() {
        let mut budget = IntervalBudget::new(TARGET_KBPS);
        let delta_ms = 50;
        budget.increase_budget(delta_ms);
        assert_eq!(budget.bytes_remaining(), time_to_bytes(TARGET_KBPS, delta_ms));
        assert!((budget.budget_ratio() - delta_ms as f64 / WINDOW_MS as f64).abs() < 1e-9);
    }

    #[test]
    fn underuse_is_not_carried_over_by_default() {
        let mut budget = IntervalBudget::new(TARGET_KBPS);
        budget.increase_budget(50);
        budget.increase_budget(50);
        assert_eq!(budget.bytes_remaining(), time_to_bytes(TARGET_KBPS, 50));
    }

    #[test]
    fn underuse_carried_over_when_allowed() {
        let mut budget = IntervalBudget::with_underuse(TARGET_KBPS, true);
        budget.increase_budget(50);
        budget.increase_budget(50);
        assert_eq!(budget.bytes_remaining(), time_to_bytes(TARGET_KBPS, 100));
    }

    #[test]
    fn underuse_capped_at_window() {
        let mut budget = IntervalBudget::with_underuse(TARGET_KBPS, true);
        budget.increase_budget(WINDOW_MS);
        budget.increase_budget(WINDOW_MS);
        assert_eq!(budget.bytes_remaining(), WINDOW_BYTES);
        assert_eq!(budget.budget_ratio(), 1.0);
    }

    #[test]
    fn overuse_creates_debt() {
        let mut budget = IntervalBudget::new(TARGET_KBPS);
        budget.increase_budget(10);
        budget.use_budget(1000);
        assert_eq!(budget.bytes_remaining(), 0);
        assert_eq!(budget.debt(), 1000 - time_to_bytes(TARGET_KBPS, 10));
        assert!(budget.budget_ratio() < 0.0);
    }

    #[test]
    fn debt_is_paid_before_new_allowance() {
        let mut budget = IntervalBudget::new(TARGET_KBPS);
        budget.use_budget(250);
        // 10 ms at 100 kbps = 125 bytes, still 125 in debt.
        budget.increase_budget(10);
        assert_eq!(budget.debt(), 125);
        budget.increase_budget(20);
        assert_eq!(budget.debt(), 0);
        assert_eq!(budget.bytes_remaining(), 125);
    }

    #[test]
    fn debt_floored_at_window() {
        let mut budget = IntervalBudget::new(TARGET_KBPS);
        budget.use_budget(WINDOW_BYTES * 4);
        assert_eq!(budget.debt(), WINDOW_BYTES);
        assert_eq!(budget.budget_ratio(), -1.0);
    }

    #[test]
    fn rate_change_clamps_balance() {
        let mut budget = IntervalBudget::with_underuse(TARGET_KBPS, true);
        budget.increase_budget(WINDOW_MS);
        assert_eq!(budget.bytes_remaining(), WINDOW_BYTES);

        budget.set_target_rate_kbps(TARGET_KBPS / 10);
        assert_eq!(budget.bytes_remaining(), WINDOW_BYTES / 10);
    }

    #[test]
    fn zero_rate_never_accrues() {
        let mut budget = IntervalBudget::new(0);
        budget.increase_budget(1000);
        assert_eq!(budget.bytes_remaining(), 0);
        assert_eq!(budget.budget_ratio(), 0.0);
    }
}
