/*
    Pontos, trajectory optimization for vehicle motion primitives
    Copyright (C) 2024-onwards Pontos Contributors

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::linalg::DVector;
use crate::opti::{OcpSolution, SolverOpts};
use serde::de::DeserializeOwned;
use serde::Serialize;
use snafu::prelude::*;

use std::fmt::Debug;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("failed to read configuration file: {source}"))]
    ReadError { source: std::io::Error },
    #[snafu(display("failed to parse YAML configuration: {source}"))]
    ParseError { source: serde_yaml::Error },
    #[snafu(display("failed to write CSV file: {source}"))]
    CsvError { source: csv::Error },
    #[snafu(display("failed to flush CSV file: {source}"))]
    FlushError { source: std::io::Error },
    #[snafu(display("invalid configuration: {details}"))]
    InvalidConfig { details: String },
}

/// Marks a structure as loadable from a YAML file or string.
pub trait ConfigRepr: Debug + Sized + Serialize + DeserializeOwned {
    /// Builds the configuration representation from the path to a YAML file.
    fn load<P>(path: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
    {
        let file = File::open(path).context(ReadSnafu)?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader).context(ParseSnafu)
    }

    /// Builds the configuration representation from a YAML string.
    fn loads(data: &str) -> Result<Self, ConfigError> {
        debug!("Loading YAML:\n{data}");
        serde_yaml::from_str(data).context(ParseSnafu)
    }

    /// Serializes the configuration to a YAML string.
    fn dumps(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).context(ParseSnafu)
    }
}

impl ConfigRepr for SolverOpts {}

/// Writes `(t, vector)` samples to a CSV file with a `t` column followed by
/// one column per vector component, named from `headers`.
pub fn write_samples_csv<P: AsRef<Path>>(
    path: P,
    headers: &[&str],
    samples: &[(f64, DVector<f64>)],
) -> Result<(), ConfigError> {
    let mut wtr = csv::Writer::from_path(path).context(CsvSnafu)?;
    let mut header_row = Vec::with_capacity(headers.len() + 1);
    header_row.push("t".to_string());
    header_row.extend(headers.iter().map(|h| h.to_string()));
    wtr.write_record(&header_row).context(CsvSnafu)?;
    for (t, vec) in samples {
        let mut row = Vec::with_capacity(vec.len() + 1);
        row.push(format!("{t:.6}"));
        row.extend(vec.iter().map(|v| format!("{v:.9}")));
        wtr.write_record(&row).context(CsvSnafu)?;
    }
    wtr.flush().context(FlushSnafu)?;
    Ok(())
}

/// Writes a solution's node states and interval controls to a pair of CSV
/// files, the usual hand-off format toward plotting or a downstream motion
/// planner.
pub fn export_solution_csv<P: AsRef<Path>>(
    solution: &OcpSolution,
    state_headers: &[&str],
    control_headers: &[&str],
    states_path: P,
    controls_path: P,
) -> Result<(), ConfigError> {
    write_samples_csv(states_path, state_headers, &solution.states)?;
    write_samples_csv(controls_path, control_headers, &solution.controls)?;
    info!(
        "exported {} state and {} control samples",
        solution.states.len(),
        solution.controls.len()
    );
    Ok(())
}
