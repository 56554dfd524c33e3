use std::collections::HashMap;
use std::sync::Mutex;

/// Running sum of unapplied changelog impact per campaign. Reset when a
/// rebuild completes; rehydrated from the store at boot.
#[derive(Default)]
pub struct ImpactAccumulator {
    sums: Mutex<HashMap<String, f64>>,
}

impl ImpactAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add impact for a campaign and return the new running sum.
    pub fn add(&self, campaign_id: &str, impact: f64) -> f64 {
        let mut sums = self.sums.lock().unwrap();
        let sum = sums.entry(campaign_id.to_string()).or_insert(0.0);
        *sum += impact;
        *sum
    }

    pub fn get(&self, campaign_id: &str) -> f64 {
        self.sums
            .lock()
            .unwrap()
            .get(campaign_id)
            .copied()
            .unwrap_or(0.0)
    }

    /// Overwrite the sum (used when rehydrating from persisted entries).
    pub fn set(&self, campaign_id: &str, impact: f64) {
        self.sums
            .lock()
            .unwrap()
            .insert(campaign_id.to_string(), impact);
    }

    pub fn reset(&self, campaign_id: &str) {
        self.sums.lock().unwrap().remove(campaign_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_campaign() {
        let acc = ImpactAccumulator::new();
        assert_eq!(acc.add("c1", 1.2), 1.2);
        assert_eq!(acc.add("c1", 1.5), 2.7);
        assert_eq!(acc.add("c2", 3.0), 3.0);
        assert_eq!(acc.get("c1"), 2.7);
    }

    #[test]
    fn reset_zeroes_only_that_campaign() {
        let acc = ImpactAccumulator::new();
        acc.add("c1", 5.7);
        acc.add("c2", 1.0);
        acc.reset("c1");
        assert_eq!(acc.get("c1"), 0.0);
        assert_eq!(acc.get("c2"), 1.0);
    }
}
