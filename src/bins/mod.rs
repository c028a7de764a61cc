use std::collections::HashMap;

/// Ordered (tag name, tag value) pairs identifying one aggregate series.
///
/// Order is supplied by the caller and must be stable: the grouping key is
/// the concatenation of the values in this order.
pub type TagSet = Vec<(String, String)>;

/// One reduced data point: aggregate value plus its tag combination.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub value: f64,
    pub tags: TagSet,
}

/// Concatenates tag values into the canonical grouping key.
fn tag_key(tags: &TagSet) -> String {
    let mut key = String::new();
    for (_, value) in tags {
        key.push_str(value);
        key.push('\u{1f}');
    }
    key
}

struct Grouped<T> {
    tags: TagSet,
    acc: T,
}

/// A half-open aggregation interval [start, end) collecting tag-grouped
/// values under several reduction semantics.
///
/// All four reductions accumulate commutatively, so reduced results are
/// independent of the order in which values were added.
pub struct TimeBin {
    pub start: i64,
    pub end: i64,
    sums: HashMap<String, Grouped<f64>>,
    job_averages: HashMap<String, Grouped<(f64, u64)>>,
    time_averages: HashMap<String, Grouped<(f64, f64)>>,
    ratios: HashMap<String, Grouped<(f64, f64)>>,
}

impl TimeBin {
    /// Creates an empty bin over [start, end).
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            sums: HashMap::new(),
            job_averages: HashMap::new(),
            time_averages: HashMap::new(),
            ratios: HashMap::new(),
        }
    }

    /// Bin width in seconds.
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    /// Adds a value to the running total for its tag combination.
    pub fn add_to_sum(&mut self, value: f64, tags: TagSet) {
        let entry = self
            .sums
            .entry(tag_key(&tags))
            .or_insert(Grouped { tags, acc: 0.0 });
        entry.acc += value;
    }

    /// Adds one job's contribution to a per-job average.
    pub fn add_to_job_average(&mut self, value: f64, tags: TagSet) {
        let entry = self
            .job_averages
            .entry(tag_key(&tags))
            .or_insert(Grouped {
                tags,
                acc: (0.0, 0),
            });
        entry.acc.0 += value;
        entry.acc.1 += 1;
    }

    /// Adds a duration-weighted contribution to a time average.
    pub fn add_to_time_average(&mut self, value: f64, tags: TagSet, duration: f64) {
        let entry = self
            .time_averages
            .entry(tag_key(&tags))
            .or_insert(Grouped {
                tags,
                acc: (0.0, 0.0),
            });
        entry.acc.0 += value * duration;
        entry.acc.1 += duration;
    }

    /// Adds numerator and denominator contributions to a ratio of sums.
    pub fn add_to_ratio_of_sums(&mut self, numerator: f64, denominator: f64, tags: TagSet) {
        let entry = self.ratios.entry(tag_key(&tags)).or_insert(Grouped {
            tags,
            acc: (0.0, 0.0),
        });
        entry.acc.0 += numerator;
        entry.acc.1 += denominator;
    }

    /// Reduces sums: one point per tag combination, value = running total.
    pub fn reduce_sum(&self) -> Vec<Point> {
        self.sums
            .values()
            .map(|g| Point {
                value: g.acc,
                tags: g.tags.clone(),
            })
            .collect()
    }

    /// Reduces job averages: total divided by contribution count.
    pub fn reduce_job_average(&self) -> Vec<Point> {
        self.job_averages
            .values()
            .map(|g| Point {
                value: g.acc.0 / g.acc.1 as f64,
                tags: g.tags.clone(),
            })
            .collect()
    }

    /// Reduces time averages: sum(value * duration) / sum(duration).
    ///
    /// Combinations whose total duration is zero carry no information and
    /// are omitted.
    pub fn reduce_time_average(&self) -> Vec<Point> {
        self.time_averages
            .values()
            .filter(|g| g.acc.1 != 0.0)
            .map(|g| Point {
                value: g.acc.0 / g.acc.1,
                tags: g.tags.clone(),
            })
            .collect()
    }

    /// Reduces ratios of sums: sum(numerator) / sum(denominator).
    ///
    /// Combinations whose denominator total is zero are omitted.
    pub fn reduce_ratio_of_sums(&self) -> Vec<Point> {
        self.ratios
            .values()
            .filter(|g| g.acc.1 != 0.0)
            .map(|g| Point {
                value: g.acc.0 / g.acc.1,
                tags: g.tags.clone(),
            })
            .collect()
    }
}

/// Computes the contiguous fixed-width bins [start + k*width, start + (k+1)*width)
/// whose end does not pass `now`.
pub fn elapsed_bins(start: i64, width: i64, now: i64) -> Vec<(i64, i64)> {
    let mut bins = Vec::new();
    if width <= 0 {
        return bins;
    }

    let mut t = start;
    while t + width <= now {
        bins.push((t, t + width));
        t += width;
    }
    bins
}
