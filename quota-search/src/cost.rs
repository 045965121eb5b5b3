// Copyright (c) Facebook, Inc. and its affiliates.
use quota_search_intf::{CostKind, ResourceVector};

/// Ranks feasible quotas. Must be a pure function of the quota.
pub trait CostFunction: Sync {
    fn cost(&self, v: &ResourceVector) -> f64;
}

impl<F> CostFunction for F
where
    F: Fn(&ResourceVector) -> f64 + Sync,
{
    fn cost(&self, v: &ResourceVector) -> f64 {
        self(v)
    }
}

fn generic_cost(v: &ResourceVector) -> f64 {
    (v.cpu * 3.0 - 2.0)
        + (v.mem as f64 / 1024.0 * 0.23 - 3.8)
        + v.llc as f64 / 1024.0
        + v.mba as f64 / 10.0
}

fn mysql_cost(v: &ResourceVector) -> f64 {
    // memory under 20MiB weighs ten times as much
    let mem = if v.mem >= 20480 {
        v.mem as f64 / 1024.0
    } else {
        v.mem as f64 / 102.4
    };
    (v.cpu * 3.0 - 2.0) + mem + v.llc as f64 / 1024.0 + v.mba as f64 / 10.0
}

fn kafka_cost(v: &ResourceVector) -> f64 {
    let cpu = if v.cpu < 1.0 { v.cpu * 5.0 } else { v.cpu };
    let mem = if v.mem < 51200 {
        v.mem as f64 * 5.0
    } else {
        v.mem as f64
    };
    cpu + mem / 1024.0 + v.llc as f64 / 1024.0 + v.mba as f64 / 10.0
}

impl CostFunction for CostKind {
    fn cost(&self, v: &ResourceVector) -> f64 {
        match self {
            CostKind::Generic => generic_cost(v),
            CostKind::Mysql => mysql_cost(v),
            CostKind::Kafka => kafka_cost(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_generic_cost() {
        let v = ResourceVector::new(4.0, 60000, 11264, 100);
        assert!(close(CostKind::Generic.cost(&v), 40.6765625));
    }

    #[test]
    fn test_mysql_cost_threshold() {
        let above = ResourceVector::new(6.0, 512000, 11264, 100);
        assert!(close(CostKind::Mysql.cost(&above), 537.0));

        let at = ResourceVector::new(1.0, 20480, 1024, 10);
        assert!(close(CostKind::Mysql.cost(&at), 1.0 + 20.0 + 1.0 + 1.0));

        // Just below the threshold the memory term jumps tenfold.
        let below = ResourceVector::new(1.0, 19456, 1024, 10);
        assert!(close(CostKind::Mysql.cost(&below), 1.0 + 190.0 + 1.0 + 1.0));
        assert!(CostKind::Mysql.cost(&below) > CostKind::Mysql.cost(&at));
    }

    #[test]
    fn test_kafka_cost_scaling() {
        let small = ResourceVector::new(0.8, 10240, 1024, 10);
        assert!(close(CostKind::Kafka.cost(&small), 4.0 + 50.0 + 1.0 + 1.0));

        let max = ResourceVector::new(2.0, 102400, 11264, 100);
        assert!(close(CostKind::Kafka.cost(&max), 2.0 + 100.0 + 11.0 + 10.0));
    }

    #[test]
    fn test_closure_cost() {
        let by_cpu = |v: &ResourceVector| v.cpu;
        assert_eq!(by_cpu.cost(&ResourceVector::new(1.5, 0, 0, 0)), 1.5);
    }
}
