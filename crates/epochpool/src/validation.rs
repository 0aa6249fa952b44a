//! Periodic validation sweep.
//!
//! Connections used within the validation interval are trusted as-is. A
//! stale idle connection is closed while the pool holds more than its
//! minimum, otherwise it must pass the validation query. A stale pinned
//! connection is always validated, never closed, because a caller owns it.
//!
//! The first failed validation query retires the epoch and ends the sweep.

use tokio::time::Instant;

use crate::connection::PooledConnection;
use crate::pool::PoolInner;

/// Outcome of one validation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Connections used recently enough to skip validation.
    pub fresh: usize,
    /// Stale connections that passed the validation query.
    pub validated: usize,
    /// Stale idle connections closed because the pool held more than its
    /// minimum.
    pub shed: usize,
    /// Whether a validation query failed and cut the sweep short.
    pub failed: bool,
}

enum Check {
    Fresh,
    Validated,
    Shed,
    Failed,
}

impl PoolInner {
    /// Sweep the idle queue, then the pinned connections.
    pub(crate) async fn validate_connections(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let settings = self.settings();
        let Some(cutoff) = Instant::now().checked_sub(settings.validation_interval) else {
            return report;
        };
        let min = settings.min_connections as usize;

        let queued = self.idle().len();
        for _ in 0..queued {
            let Some(mut conn) = self.idle().poll() else {
                break;
            };
            match self.check(&mut conn, cutoff, Some(min)).await {
                Check::Fresh => {
                    report.fresh += 1;
                    self.place(conn);
                }
                Check::Validated => {
                    report.validated += 1;
                    self.place(conn);
                }
                Check::Shed => {
                    report.shed += 1;
                    self.close_connection(conn).await;
                }
                Check::Failed => {
                    report.failed = true;
                    self.close_connection(conn).await;
                    self.record_validation(true);
                    return report;
                }
            }
        }

        for slot in self.pinned().slots() {
            // Skip connections their owner is using right now.
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let Some(conn) = &mut *guard else {
                continue;
            };
            match self.check(conn, cutoff, None).await {
                Check::Fresh => report.fresh += 1,
                Check::Validated => report.validated += 1,
                Check::Shed => {}
                Check::Failed => {
                    report.failed = true;
                    break;
                }
            }
        }

        self.record_validation(report.failed);
        report
    }

    /// Classify one connection. `shed_above` is the minimum for idle
    /// connections, `None` for pinned ones.
    async fn check(
        &self,
        conn: &mut PooledConnection,
        cutoff: Instant,
        shed_above: Option<usize>,
    ) -> Check {
        if !conn.unused_since(cutoff) {
            return Check::Fresh;
        }
        if let Some(min) = shed_above {
            // The connection being checked counts as held.
            let held = self.idle().len() + self.pinned().len() + 1;
            if held > min {
                tracing::debug!(connection = %conn.id(), held, min, "shedding stale connection");
                return Check::Shed;
            }
        }
        match self.run_validation_query(conn).await {
            Ok(()) => Check::Validated,
            Err(e) => {
                tracing::warn!(connection = %conn.id(), error = %e, "validation failed");
                self.disconnect_database(conn.epoch());
                Check::Failed
            }
        }
    }
}
