use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deliveries at or under this bound count as on time.
pub const ON_TIME_LIMIT_MINUTES: i64 = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Busy,
}

/// One completed delivery. `earnings` is the delivery charge only; the tip
/// is tracked separately so the aggregate never counts it twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub order_id: Uuid,
    /// Captured when the record is appended, so aggregate recomputation
    /// stays a pure function of the history.
    pub order_placed_at: DateTime<Utc>,
    pub rating: Option<u8>,
    pub tip: f64,
    pub earnings: f64,
    pub comment: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Earnings {
    pub total: f64,
    pub tips: f64,
    pub delivery_charges: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Ratings {
    pub average: f64,
    pub total: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub total_deliveries: u32,
    pub completion_rate: f64,
    pub on_time_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateSnapshot {
    pub earnings: Earnings,
    pub ratings: Ratings,
    pub performance: Performance,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryWorker {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub availability: Availability,
    pub registered_at: DateTime<Utc>,
    pub deliveries: Vec<DeliveryRecord>,
    pub earnings: Earnings,
    pub ratings: Ratings,
    pub performance: Performance,
}

impl DeliveryWorker {
    pub fn new(
        name: String,
        email: String,
        phone: String,
        password_hash: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            phone,
            password_hash,
            availability: Availability::Available,
            registered_at: Utc::now(),
            deliveries: Vec::new(),
            earnings: Earnings::default(),
            ratings: Ratings::default(),
            performance: Performance::default(),
        }
    }

    pub fn has_delivered(&self, order_id: Uuid) -> bool {
        self.deliveries.iter().any(|record| record.order_id == order_id)
    }

    pub fn apply_snapshot(&mut self, snapshot: AggregateSnapshot) {
        self.earnings = snapshot.earnings;
        self.ratings = snapshot.ratings;
        self.performance = snapshot.performance;
    }
}

/// Recomputes all aggregate groups from the full history.
///
/// Pure and idempotent: the same history always yields the same snapshot,
/// and no record is ever counted twice. An empty history yields the zeroed
/// defaults. `completion_rate` is a constant 100 for non-empty histories;
/// cancelled deliveries are not tracked per record yet.
pub fn recompute(history: &[DeliveryRecord]) -> AggregateSnapshot {
    if history.is_empty() {
        return AggregateSnapshot::default();
    }

    let ratings_present: Vec<u32> = history
        .iter()
        .filter_map(|record| record.rating.map(u32::from))
        .collect();
    let total: u32 = ratings_present.iter().sum();
    let count = ratings_present.len() as u32;
    let ratings = Ratings {
        average: if count > 0 { f64::from(total) / f64::from(count) } else { 0.0 },
        total,
        count,
    };

    let tips: f64 = history.iter().map(|record| record.tip).sum();
    let delivery_charges: f64 = history.iter().map(|record| record.earnings).sum();
    let earnings = Earnings {
        total: tips + delivery_charges,
        tips,
        delivery_charges,
    };

    let on_time_limit = Duration::minutes(ON_TIME_LIMIT_MINUTES);
    let on_time = history
        .iter()
        .filter(|record| record.delivered_at - record.order_placed_at <= on_time_limit)
        .count();
    let performance = Performance {
        total_deliveries: history.len() as u32,
        completion_rate: 100.0,
        on_time_rate: (on_time as f64 / history.len() as f64) * 100.0,
    };

    AggregateSnapshot { earnings, ratings, performance }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{recompute, AggregateSnapshot, DeliveryRecord};

    fn record(rating: Option<u8>, tip: f64, earnings: f64, minutes: i64) -> DeliveryRecord {
        let placed_at = Utc::now();
        DeliveryRecord {
            order_id: Uuid::new_v4(),
            order_placed_at: placed_at,
            rating,
            tip,
            earnings,
            comment: None,
            delivered_at: placed_at + Duration::minutes(minutes),
        }
    }

    #[test]
    fn empty_history_yields_zeroed_snapshot() {
        assert_eq!(recompute(&[]), AggregateSnapshot::default());
    }

    #[test]
    fn single_on_time_delivery() {
        let history = vec![record(Some(5), 2.0, 8.0, 30)];
        let snapshot = recompute(&history);

        assert_eq!(snapshot.ratings.average, 5.0);
        assert_eq!(snapshot.ratings.count, 1);
        assert_eq!(snapshot.earnings.total, 10.0);
        assert_eq!(snapshot.earnings.tips, 2.0);
        assert_eq!(snapshot.earnings.delivery_charges, 8.0);
        assert_eq!(snapshot.performance.total_deliveries, 1);
        assert_eq!(snapshot.performance.on_time_rate, 100.0);
        assert_eq!(snapshot.performance.completion_rate, 100.0);
    }

    #[test]
    fn unrated_records_do_not_enter_ratings() {
        let history = vec![
            record(Some(4), 0.0, 5.0, 20),
            record(None, 1.0, 5.0, 20),
            record(Some(2), 0.0, 5.0, 20),
        ];
        let snapshot = recompute(&history);

        assert_eq!(snapshot.ratings.count, 2);
        assert_eq!(snapshot.ratings.total, 6);
        assert_eq!(snapshot.ratings.average, 3.0);
    }

    #[test]
    fn earnings_total_is_tips_plus_charges() {
        let history = vec![
            record(None, 2.5, 7.5, 20),
            record(Some(5), 0.0, 6.0, 50),
        ];
        let snapshot = recompute(&history);

        assert_eq!(
            snapshot.earnings.total,
            snapshot.earnings.tips + snapshot.earnings.delivery_charges
        );
        assert_eq!(snapshot.earnings.total, 16.0);
    }

    #[test]
    fn forty_five_minute_boundary_counts_as_on_time() {
        let history = vec![record(None, 0.0, 5.0, 45), record(None, 0.0, 5.0, 46)];
        let snapshot = recompute(&history);

        assert_eq!(snapshot.performance.on_time_rate, 50.0);
    }

    #[test]
    fn recompute_is_idempotent() {
        let history = vec![record(Some(3), 1.0, 4.0, 10), record(None, 0.0, 6.0, 60)];

        let first = recompute(&history);
        let second = recompute(&history);

        assert_eq!(first, second);
    }
}
