use crate::domain::fare::Fare;
use crate::domain::ids::{ChairId, UserId};
use crate::domain::ride::RideStatus;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// Final state of one ride, as printed at the end of a scenario run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RideReportRow {
    /// Label the scenario gave the ride.
    pub ride: String,
    pub user: UserId,
    pub chair: Option<ChairId>,
    pub status: RideStatus,
    pub fare: Fare,
    pub evaluation: Option<u8>,
}

/// Writes ride report rows as CSV with a header line.
pub struct RideWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> RideWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rides(&mut self, rows: impl IntoIterator<Item = RideReportRow>) -> Result<()> {
        let mut wrote_any = false;
        for row in rows {
            self.writer.serialize(row)?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer
                .write_record(["ride", "user", "chair", "status", "fare", "evaluation"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
