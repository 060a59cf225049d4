use crate::domain::coordinate::Coordinate;
use crate::error::{DispatchError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioOp {
    User,
    Chair,
    Coupon,
    Token,
    Setting,
    Ride,
    Estimate,
    Match,
    Move,
    Status,
    Evaluate,
    Activity,
}

/// One row of a scenario file: `op,subject,target,x1,y1,x2,y2,value`.
///
/// Which columns matter depends on `op`; unused ones are left empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScenarioStep {
    pub op: ScenarioOp,
    #[serde(default)]
    pub subject: String,
    pub target: Option<String>,
    pub x1: Option<i32>,
    pub y1: Option<i32>,
    pub x2: Option<i32>,
    pub y2: Option<i32>,
    pub value: Option<String>,
}

impl ScenarioStep {
    pub fn first_point(&self) -> Result<Coordinate> {
        point(self.x1, self.y1, "x1/y1")
    }

    pub fn second_point(&self) -> Result<Coordinate> {
        point(self.x2, self.y2, "x2/y2")
    }

    pub fn target(&self) -> Result<&str> {
        self.target
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DispatchError::ValidationError(format!("{:?} step requires a target", self.op)))
    }

    pub fn value(&self) -> Result<&str> {
        self.value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DispatchError::ValidationError(format!("{:?} step requires a value", self.op)))
    }
}

fn point(lat: Option<i32>, lon: Option<i32>, columns: &str) -> Result<Coordinate> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok(Coordinate::new(lat, lon)),
        _ => Err(DispatchError::ValidationError(format!("missing coordinate in {}", columns))),
    }
}

/// Reads scenario steps from a CSV source.
///
/// Fields are trimmed and rows may omit trailing empty columns.
pub struct ScenarioReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes steps; a malformed row yields an error and the
    /// rest of the file is still read.
    pub fn steps(self) -> impl Iterator<Item = Result<ScenarioStep>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(DispatchError::from))
    }
}
