//! Compute cost estimates from generation wall time and an hourly price.

use crate::types::HistoryRecord;

/// Cost of a whole batch: wall time billed at `price_per_hour`.
pub fn batch_cost(batch_total_sec: f64, price_per_hour: f64) -> Option<f64> {
    if price_per_hour <= 0.0 || batch_total_sec <= 0.0 {
        return None;
    }
    Some(batch_total_sec / 3600.0 * price_per_hour)
}

/// Cost attributed to a single gallery image.
///
/// Parallel batches split the batch wall time evenly; sequential batches and
/// single images are billed their own duration. Multi-image batches that
/// have not finished yet have no cost.
pub fn image_cost(record: &HistoryRecord, price_per_hour: f64) -> Option<f64> {
    if price_per_hour <= 0.0 {
        return None;
    }
    let count = record.batch_count.max(1);
    let total = record.batch_total_sec.filter(|t| *t > 0.0);
    if total.is_none() && count > 1 {
        return None;
    }
    match total {
        Some(total) if record.parallel && count > 1 => {
            Some(total / 3600.0 * price_per_hour / count as f64)
        }
        _ if record.duration_sec > 0.0 => Some(record.duration_sec / 3600.0 * price_per_hour),
        _ => None,
    }
}

/// Two decimals, or `<0.01` below one cent.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        "<0.01".to_string()
    } else {
        format!("{:.2}", cost)
    }
}
