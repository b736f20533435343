use std::fmt;

const BUCKETS: usize = 24;
const FACTOR: f64 = 1.5;

/// Log-bucketed latency histogram for the engine tests. Values are in
/// microseconds.
pub struct Histogram {
    buckets: [usize; BUCKETS],
    sum: f64,
    count: usize,
}

impl Histogram {
    pub fn new() -> Histogram {
        Histogram {
            buckets: [0; BUCKETS],
            sum: 0.0,
            count: 0,
        }
    }

    pub fn add(&mut self, micros: f64) {
        let idx = if micros <= 1.0 {
            0
        } else {
            (micros.log(FACTOR).floor() as usize).min(BUCKETS - 1)
        };
        self.buckets[idx] += 1;
        self.sum += micros;
        self.count += 1;
    }

    pub fn clear(&mut self) {
        *self = Histogram::new();
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bar = |n: usize| "+".repeat(n / 5);
        for (i, count) in self.buckets.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            writeln!(f, "{:>8.0}us: {:>5} {}", FACTOR.powi(i as i32), count, bar(*count))?;
        }
        writeln!(f, "      ({:.1}us mean, {} total)", self.mean(), self.count)
    }
}
