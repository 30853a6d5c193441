use std::time::Duration;

use chrono::{DateTime, Utc};
use fileferry_core::{LearningAggregate, OutcomeRecord, TransferClass};

/// Running sums for one class; averages are derived on read.
#[derive(Debug, Clone)]
pub(crate) struct Accumulator {
    attempts: u64,
    successes: u64,
    duration_total: Duration,
    compression_samples: u64,
    compression_total: f64,
    last_updated: DateTime<Utc>,
}

impl Accumulator {
    pub(crate) const fn new(at: DateTime<Utc>) -> Self {
        Self {
            attempts: 0,
            successes: 0,
            duration_total: Duration::ZERO,
            compression_samples: 0,
            compression_total: 0.0,
            last_updated: at,
        }
    }

    pub(crate) fn fold(&mut self, record: &OutcomeRecord) {
        self.attempts += 1;
        if record.success {
            self.successes += 1;
        }
        self.duration_total = self.duration_total.saturating_add(record.duration);
        if let Some(ratio) = record.compression_ratio.filter(|ratio| ratio.is_finite()) {
            self.compression_samples += 1;
            self.compression_total += ratio;
        }
        self.last_updated = self.last_updated.max(record.recorded_at);
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn aggregate(&self, class: TransferClass) -> LearningAggregate {
        let average_duration = (self.attempts > 0).then(|| {
            let nanos = self.duration_total.as_nanos() / u128::from(self.attempts);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        });
        let average_compression_ratio = (self.compression_samples > 0)
            .then(|| self.compression_total / self.compression_samples as f64);
        LearningAggregate {
            class,
            attempts: self.attempts,
            successes: self.successes,
            average_duration,
            average_compression_ratio,
            last_updated: self.last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileferry_core::{Protocol, SizeBucket};

    fn record(success: bool, millis: u64, ratio: Option<f64>) -> OutcomeRecord {
        OutcomeRecord {
            class: TransferClass::new(Protocol::Sftp, SizeBucket::Small),
            success,
            duration: Duration::from_millis(millis),
            compression_ratio: ratio,
            bytes_transferred: 10,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn averages_cover_attempts_and_compressed_runs() {
        let class = TransferClass::new(Protocol::Sftp, SizeBucket::Small);
        let mut acc = Accumulator::new(Utc::now());
        acc.fold(&record(true, 100, Some(0.2)));
        acc.fold(&record(false, 300, None));
        acc.fold(&record(true, 200, Some(0.4)));
        let aggregate = acc.aggregate(class);
        assert_eq!(aggregate.attempts, 3);
        assert_eq!(aggregate.successes, 2);
        assert_eq!(aggregate.average_duration, Some(Duration::from_millis(200)));
        let ratio = aggregate.average_compression_ratio.unwrap_or_default();
        assert!((ratio - 0.3).abs() < 1e-9);
    }

    #[test]
    fn empty_accumulator_has_no_averages() {
        let aggregate = Accumulator::new(Utc::now())
            .aggregate(TransferClass::new(Protocol::Ftp, SizeBucket::Large));
        assert_eq!(aggregate.average_duration, None);
        assert_eq!(aggregate.success_rate(), None);
    }
}
