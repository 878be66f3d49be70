//! Lag arithmetic for both replication mechanisms.
//!
//! Pure functions over catalog rows; the sampler supplies the rows and the
//! previous sample.

use chrono::Duration as ChronoDuration;

use replwatch_pg::{SubscriptionInfo, WalSenderInfo};
use replwatch_state::{LagBasis, Lsn, ReplicationMetricSample, Timestamp};

/// Lag figures of one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct LagFigures {
    pub lag_bytes: u64,
    pub lag_seconds: f64,
    pub basis: LagBasis,
    pub wal_position: Option<Lsn>,
    pub synced_tables: Option<u32>,
    pub total_tables: Option<u32>,
    pub backfill_progress: Option<f64>,
}

impl LagFigures {
    pub fn into_sample(self, stream_id: uuid::Uuid, timestamp: Timestamp) -> ReplicationMetricSample {
        ReplicationMetricSample {
            stream_id,
            timestamp,
            lag_bytes: self.lag_bytes,
            lag_seconds: self.lag_seconds,
            lag_seconds_basis: self.basis,
            wal_position: self.wal_position,
            synced_tables: self.synced_tables,
            total_tables: self.total_tables,
            backfill_progress: self.backfill_progress,
        }
    }
}

fn seconds(d: ChronoDuration) -> f64 {
    (d.num_milliseconds().max(0) as f64) / 1000.0
}

fn table_count(n: i64) -> u32 {
    u32::try_from(n.max(0)).unwrap_or(u32::MAX)
}

/// Logical stream lag.
///
/// Bytes: publisher's current WAL position minus the position the
/// subscriber last confirmed. Seconds: time since the last confirmed
/// transaction, zero once nothing is outstanding.
pub fn logical_lag(publisher_lsn: Lsn, subscription: &SubscriptionInfo, now: Timestamp) -> LagFigures {
    let confirmed = subscription.latest_end_lsn.or(subscription.received_lsn);
    let lag_bytes = confirmed.map_or(0, |lsn| publisher_lsn.bytes_ahead_of(lsn));

    let (lag_seconds, basis) = match (lag_bytes, subscription.latest_end_time) {
        (0, _) if confirmed.is_some() => (0.0, LagBasis::Reported),
        (_, Some(at)) => (seconds(now - at), LagBasis::Reported),
        _ => (0.0, LagBasis::Unavailable),
    };

    let total = table_count(subscription.total_tables);
    let synced = table_count(subscription.synced_tables);
    let backfill_progress =
        (total > 0).then(|| (f64::from(synced) / f64::from(total) * 100.0).min(100.0));

    LagFigures {
        lag_bytes,
        lag_seconds,
        basis,
        wal_position: confirmed,
        synced_tables: Some(synced),
        total_tables: Some(total),
        backfill_progress,
    }
}

/// Physical stream lag, seen from the sending server.
///
/// Bytes: sent minus flushed on the standby. Seconds: the server's replay
/// lag when it reports one; otherwise estimated from how fast the flush
/// position advanced since `previous`. Without a previous sample there is
/// no rate yet and the value is zero with basis `Unavailable`.
pub fn physical_lag(
    sender: &WalSenderInfo,
    previous: Option<&ReplicationMetricSample>,
    now: Timestamp,
) -> LagFigures {
    let lag_bytes = match (sender.sent_lsn, sender.flush_lsn) {
        (Some(sent), Some(flush)) => sent.bytes_ahead_of(flush),
        _ => 0,
    };

    let (lag_seconds, basis) = if let Some(reported) = sender.replay_lag_secs {
        (reported.max(0.0), LagBasis::Reported)
    } else if lag_bytes == 0 {
        (0.0, LagBasis::Estimated)
    } else {
        match previous {
            Some(prev) => estimate(lag_bytes, sender.flush_lsn, prev, now),
            None => (0.0, LagBasis::Unavailable),
        }
    };

    LagFigures {
        lag_bytes,
        lag_seconds,
        basis,
        wal_position: sender.flush_lsn,
        synced_tables: None,
        total_tables: None,
        backfill_progress: None,
    }
}

fn estimate(
    lag_bytes: u64,
    flush: Option<Lsn>,
    previous: &ReplicationMetricSample,
    now: Timestamp,
) -> (f64, LagBasis) {
    let elapsed = seconds(now - previous.timestamp);
    let (Some(flush), Some(prev_flush)) = (flush, previous.wal_position) else {
        return (0.0, LagBasis::Unavailable);
    };
    if elapsed <= 0.0 {
        return (previous.lag_seconds, previous.lag_seconds_basis);
    }
    let rate = flush.bytes_ahead_of(prev_flush) as f64 / elapsed;
    if rate > 0.0 {
        (lag_bytes as f64 / rate, LagBasis::Estimated)
    } else {
        // Standby made no progress: it fell further behind by the interval.
        (previous.lag_seconds + elapsed, LagBasis::Estimated)
    }
}
