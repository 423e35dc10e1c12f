//! Streaming aggregation of evaluation results.

use serde::Serialize;
use std::fmt;

use super::evaluator::EvaluationResult;

/// Notional balance every run starts from.
pub const START_BALANCE: f64 = 100.0;

/// Running aggregate over a stream of results.
///
/// Each result lands in exactly one of failed, ambiguous, profit, loss or
/// flat. Only profit and loss results touch the balance: commission is taken
/// first, then the relative ROI is compounded.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    commission_pct: f64,
    balance: f64,
    total: usize,
    profit: usize,
    loss: usize,
    flat: usize,
    ambiguous: usize,
    failed: usize,
    high_rois: Vec<f64>,
    low_rois: Vec<f64>,
}

/// Finalised statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub balance: f64,
    pub roi: f64,
    pub avg_roi: f64,
    pub success_ratio: f64,
    pub risk_reward_ratio: f64,
    pub avg_high_roi: f64,
    pub avg_low_roi: f64,
    pub count: usize,
    pub total: usize,
    pub profit: usize,
    pub loss: usize,
    pub flat: usize,
    pub ambiguous: usize,
    pub failed: usize,
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

fn mean(values: &[f64]) -> f64 {
    ratio(values.iter().sum(), values.len() as f64)
}

impl Summary {
    pub fn new(commission_pct: f64) -> Self {
        Summary {
            commission_pct,
            balance: START_BALANCE,
            total: 0,
            profit: 0,
            loss: 0,
            flat: 0,
            ambiguous: 0,
            failed: 0,
            high_rois: Vec::new(),
            low_rois: Vec::new(),
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn add(&mut self, result: &EvaluationResult) {
        self.total += 1;
        if !result.valid_entry_price {
            self.failed += 1;
            return;
        }
        if result.ambiguous {
            self.ambiguous += 1;
            return;
        }
        let (Some(roi), Some(relative)) = (result.roi, result.relative_roi) else {
            self.failed += 1;
            return;
        };
        if roi == 0.0 {
            self.flat += 1;
            return;
        }
        if roi > 0.0 {
            self.profit += 1;
        } else {
            self.loss += 1;
        }

        self.balance -= self.balance * self.commission_pct / 100.0;
        self.balance *= 1.0 + relative / 100.0;

        if let Some(high) = result.high_roi {
            self.high_rois.push(high);
        }
        if let Some(low) = result.low_roi {
            self.low_rois.push(low);
        }
    }

    pub fn extend<'r>(&mut self, results: impl IntoIterator<Item = &'r EvaluationResult>) {
        for result in results {
            self.add(result);
        }
    }

    pub fn finalize(&self) -> SummaryStats {
        let count = self.profit + self.loss;
        let avg_high_roi = mean(&self.high_rois);
        let avg_low_roi = mean(&self.low_rois);
        SummaryStats {
            balance: self.balance,
            roi: if count == 0 { 0.0 } else { self.balance - START_BALANCE },
            avg_roi: ratio(self.balance - START_BALANCE, count as f64),
            success_ratio: ratio(self.profit as f64, count as f64) * 100.0,
            risk_reward_ratio: ratio(avg_high_roi, avg_low_roi).abs(),
            avg_high_roi,
            avg_low_roi,
            count,
            total: self.total,
            profit: self.profit,
            loss: self.loss,
            flat: self.flat,
            ambiguous: self.ambiguous,
            failed: self.failed,
        }
    }
}

impl fmt::Display for SummaryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Results:        {}", self.total)?;
        writeln!(f, "  counted:      {}", self.count)?;
        writeln!(f, "  profit:       {}", self.profit)?;
        writeln!(f, "  loss:         {}", self.loss)?;
        writeln!(f, "  flat:         {}", self.flat)?;
        writeln!(f, "  ambiguous:    {}", self.ambiguous)?;
        writeln!(f, "  failed:       {}", self.failed)?;
        writeln!(f, "Balance:        {:.4}", self.balance)?;
        writeln!(f, "ROI:            {:.4}%", self.roi)?;
        writeln!(f, "Avg ROI:        {:.4}%", self.avg_roi)?;
        writeln!(f, "Success ratio:  {:.2}%", self.success_ratio)?;
        write!(f, "Risk/reward:    {:.4}", self.risk_reward_ratio)
    }
}
