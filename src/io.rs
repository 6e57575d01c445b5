/**
 * BprReco
 * Copyright (C) 2018 Sebastian Schelter
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

use std::fs::File;
use std::io::prelude::*;
use std::io::stdout;
use std::path::Path;
use std::str::FromStr;

use serde_json::json;
use tracing::warn;

use crate::engine::TrainingEngine;
use crate::error::{Error, Result};
use crate::factors::{FactorMatrix, LatentFactorModel};
use crate::incidence::IncidenceStore;
use crate::stats::IdMapping;

/// Reads a CSV input file. We expect NO headers, and a user-item tuple per line
/// with tab separation. Additional columns (e.g. timestamps) are ignored.
pub fn csv_reader<P: AsRef<Path>>(file: P) -> Result<csv::Reader<File>> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .from_path(file)?;

    Ok(reader)
}

fn user_and_item(record: &csv::StringRecord) -> Result<(&str, &str)> {
    let line = record.position().map_or(0, |position| position.line() as usize);

    match (record.get(0), record.get(1)) {
        (Some(user), Some(item)) => Ok((user.trim(), item.trim())),
        _ => Err(Error::Parse { line, message: "expected a user and an item".to_string() }),
    }
}

fn parse_id(value: &str, record: &csv::StringRecord) -> Result<u32> {
    value.parse().map_err(|_| Error::Parse {
        line: record.position().map_or(0, |position| position.line() as usize),
        message: format!("'{}' is not a numeric id", value),
    })
}

/// Adds all interactions with numeric user and item ids to `store`, returns the number of new
/// edges. Repeated interactions are only stored once.
pub fn read_interactions<R: Read>(
    reader: &mut csv::Reader<R>,
    store: &mut IncidenceStore,
) -> Result<usize> {

    let mut num_added = 0;

    for result in reader.records() {
        let record = result?;
        let (user, item) = user_and_item(&record)?;

        if store.add(parse_id(user, &record)?, parse_id(item, &record)?) {
            num_added += 1;
        }
    }

    Ok(num_added)
}

/// Like `read_interactions`, but for arbitrary string identifiers, which `mapping` translates to
/// consecutive integer ids.
pub fn read_named_interactions<R: Read>(
    reader: &mut csv::Reader<R>,
    mapping: &mut IdMapping,
    store: &mut IncidenceStore,
) -> Result<usize> {

    let mut num_added = 0;

    for result in reader.records() {
        let record = result?;
        let (user, item) = user_and_item(&record)?;

        let user_index = mapping.intern_user(user);
        let item_index = mapping.intern_item(item);

        if store.add(user_index, item_index) {
            num_added += 1;
        }
    }

    Ok(num_added)
}

fn write_matrix<W: Write>(matrix: &FactorMatrix, out: &mut W) -> Result<()> {
    writeln!(out, "{} {}", matrix.num_rows(), matrix.num_cols())?;
    for row in 0..matrix.num_rows() {
        for (col, value) in matrix.row(row).iter().enumerate() {
            writeln!(out, "{} {} {}", row, col, value)?;
        }
    }
    writeln!(out)?;
    Ok(())
}

/// Writes the model as plain text: the user factors, the item biases and the item factors.
/// Floating point values are written in their shortest representation that parses back to the
/// identical value.
pub fn write_model<W: Write>(model: &LatentFactorModel, out: &mut W) -> Result<()> {
    write_matrix(model.user_factors(), out)?;

    let biases = model.item_biases();
    writeln!(out, "{}", biases.len())?;
    for bias in biases {
        writeln!(out, "{}", bias)?;
    }

    write_matrix(model.item_factors(), out)
}

/// Line oriented reader over a model dump which remembers line numbers for error messages.
struct ModelLines<L> {
    lines: L,
    line: usize,
}

impl<L: Iterator<Item=std::io::Result<String>>> ModelLines<L> {

    fn next_line(&mut self) -> Result<String> {
        loop {
            match self.lines.next() {
                Some(line) => {
                    let line = line?;
                    self.line += 1;
                    if !line.trim().is_empty() {
                        return Ok(line);
                    }
                },
                None => return Err(self.error("unexpected end of input".to_string())),
            }
        }
    }

    fn next_values<T: FromStr>(&mut self, expected: usize) -> Result<Vec<T>> {
        let line = self.next_line()?;

        let values = line.split_whitespace()
            .map(|token| token.parse::<T>())
            .collect::<std::result::Result<Vec<T>, _>>()
            .map_err(|_| self.error(format!("cannot parse '{}'", line.trim())))?;

        if values.len() != expected {
            return Err(self.error(
                format!("expected {} values, found {}", expected, values.len())));
        }

        Ok(values)
    }

    fn error(&self, message: String) -> Error {
        Error::Parse { line: self.line, message }
    }

    fn read_matrix(&mut self) -> Result<FactorMatrix> {
        let header = self.next_values::<usize>(2)?;
        let (num_rows, num_cols) = (header[0], header[1]);

        if num_cols == 0 && num_rows > 0 {
            return Err(self.error("matrix rows without columns".to_string()));
        }

        let num_entries = num_rows.checked_mul(num_cols)
            .ok_or_else(|| self.error(format!("{} x {} entries overflow", num_rows, num_cols)))?;

        // Grows with the lines actually present, the header alone is not trusted
        let mut entries = Vec::new();

        for _ in 0..num_entries {
            let line = self.next_line()?;
            let tokens: Vec<&str> = line.split_whitespace().collect();

            let entry = match tokens.as_slice() {
                [row, col, value] => match (row.parse::<usize>(), col.parse::<usize>(),
                                           value.parse::<f64>()) {
                    (Ok(row), Ok(col), Ok(value)) => Some((row, col, value)),
                    _ => None,
                },
                _ => None,
            };

            match entry {
                Some((row, col, value)) if row < num_rows && col < num_cols => {
                    entries.push((row * num_cols + col, value));
                },
                _ => return Err(self.error(format!("invalid matrix entry '{}'", line.trim()))),
            }
        }

        let mut values = vec![0.0; num_entries];
        for (index, value) in entries {
            values[index] = value;
        }

        Ok(FactorMatrix::from_values(num_rows, num_cols, values))
    }

    fn read_vector(&mut self) -> Result<Vec<f64>> {
        let length = self.next_values::<usize>(1)?[0];

        let mut values = Vec::new();
        for _ in 0..length {
            values.push(self.next_values::<f64>(1)?[0]);
        }

        Ok(values)
    }
}

/// Reads a model written by `write_model`, checking that the parts fit together.
pub fn read_model<R: BufRead>(reader: &mut R) -> Result<LatentFactorModel> {
    let mut lines = ModelLines { lines: reader.lines(), line: 0 };

    let user_factors = lines.read_matrix()?;
    let item_bias = lines.read_vector()?;
    let item_factors = lines.read_matrix()?;

    if user_factors.num_cols() != item_factors.num_cols() {
        return Err(Error::DimensionMismatch(format!(
            "user factors have {} columns, item factors have {}",
            user_factors.num_cols(), item_factors.num_cols())));
    }

    if item_bias.len() != item_factors.num_rows() {
        return Err(Error::DimensionMismatch(format!(
            "{} item biases for {} item rows", item_bias.len(), item_factors.num_rows())));
    }

    Ok(LatentFactorModel::from_parts(user_factors, item_bias, item_factors))
}

/// Struct used for JSON serialization of recommendations. Field names will be used in JSON.
#[derive(Serialize)]
struct Recommendations<'a> {
    for_user: &'a str,
    recommended_items: Vec<&'a str>,
}

/// Output the top-`n` recommendations for every user in JSON format, using the original
/// identifiers from the inputfile. Items the user already interacted with are left out. If a
/// `recommendations_path` is supplied, we write to a file at the specified path, otherwise, we
/// output to stdout.
pub fn write_recommendations(
    engine: &TrainingEngine,
    mapping: &IdMapping,
    n: usize,
    recommendations_path: Option<String>,
) -> Result<()> {

    let mut out: Box<dyn Write> = match recommendations_path {
        Some(path) => Box::new(File::create(&Path::new(&path))?),
        _ => Box::new(stdout())
    };

    for user_index in 0..mapping.num_users() as u32 {

        let for_user = match mapping.user_name(user_index) {
            Some(name) => name,
            None => continue,
        };

        let recommended_items: Vec<&str> = engine.recommend(user_index, n, true)?
            .iter()
            .filter_map(|scored_item| {
                let name = mapping.item_name(scored_item.item);
                if name.is_none() {
                    warn!("No name for item {}", scored_item.item);
                }
                name
            })
            .collect();

        let recommendations_as_json = json!(
            Recommendations {
                for_user,
                recommended_items
            });

        writeln!(out, "{}", recommendations_as_json.to_string())?;
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {

    use std::io::Cursor;

    use super::*;

    fn model() -> LatentFactorModel {
        LatentFactorModel::from_parts(
            FactorMatrix::from_values(2, 2, vec![0.1, -0.25, 1e-7, 3.0]),
            vec![0.5, -0.125, 0.0],
            FactorMatrix::from_values(3, 2, vec![1.0 / 3.0, 2.0, -0.75, 0.0, 42.0, -1e-12]),
        )
    }

    fn read(text: &str) -> Result<LatentFactorModel> {
        read_model(&mut Cursor::new(text.as_bytes()))
    }

    #[test]
    fn model_round_trip() {
        let model = model();

        let mut out = Vec::new();
        write_model(&model, &mut out).unwrap();

        let restored = read_model(&mut Cursor::new(out)).unwrap();

        assert_eq!(restored, model);
    }

    #[test]
    fn model_layout() {
        let model = LatentFactorModel::from_parts(
            FactorMatrix::from_values(1, 2, vec![0.5, -1.0]),
            vec![0.25],
            FactorMatrix::from_values(1, 2, vec![2.0, 0.0]),
        );

        let mut out = Vec::new();
        write_model(&model, &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(),
            "1 2\n0 0 0.5\n0 1 -1\n\n1\n0.25\n1 2\n0 0 2\n0 1 0\n\n");
    }

    #[test]
    fn mismatched_columns() {
        match read("1 2\n0 0 0.5\n0 1 1\n\n1\n0\n1 1\n0 0 1\n\n") {
            Err(Error::DimensionMismatch(_)) => {},
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn mismatched_bias_length() {
        match read("1 1\n0 0 0.5\n\n2\n0\n0\n1 1\n0 0 1\n\n") {
            Err(Error::DimensionMismatch(_)) => {},
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn malformed_text() {
        match read("1 1\n0 0 zero\n") {
            Err(Error::Parse { line: 2, .. }) => {},
            other => panic!("unexpected result {:?}", other),
        }
        match read("1 1\n0 3 0.5\n") {
            Err(Error::Parse { line: 2, .. }) => {},
            other => panic!("unexpected result {:?}", other),
        }
        match read("1 1\n0 0 0.5\n\n1\n") {
            Err(Error::Parse { .. }) => {},
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn oversized_headers() {
        match read("18446744073709551615 2\n") {
            Err(Error::Parse { line: 1, .. }) => {},
            other => panic!("unexpected result {:?}", other),
        }
        match read("1 1\n0 0 0.5\n\n18446744073709551615\n0\n") {
            Err(Error::Parse { .. }) => {},
            other => panic!("unexpected result {:?}", other),
        }
        match read("1000000 1000000\n0 0 0.5\n") {
            Err(Error::Parse { line: 2, .. }) => {},
            other => panic!("unexpected result {:?}", other),
        }
        match read("3 0\n\n0\n0 0\n\n") {
            Err(Error::Parse { line: 1, .. }) => {},
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn interactions() {
        let input = "0\t1\n2\t3\t1520000000\n0\t1\n";
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(input.as_bytes());

        let mut store = IncidenceStore::new();
        let num_added = read_interactions(&mut reader, &mut store).unwrap();

        assert_eq!(num_added, 2);
        assert!(store.contains(0, 1));
        assert!(store.contains(2, 3));
        assert_eq!(store.max_user_id(), Some(2));
    }

    #[test]
    fn non_numeric_interactions() {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .from_reader("0\t1\nalice\t1\n".as_bytes());

        match read_interactions(&mut reader, &mut IncidenceStore::new()) {
            Err(Error::Parse { line: 2, .. }) => {},
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn named_interactions() {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .from_reader("alice\tapple\nbob\tapple\nalice\tpony\n".as_bytes());

        let mut mapping = IdMapping::new();
        let mut store = IncidenceStore::new();
        read_named_interactions(&mut reader, &mut mapping, &mut store).unwrap();

        assert_eq!(mapping.num_users(), 2);
        assert_eq!(mapping.num_items(), 2);
        assert_eq!(store.size(), 3);

        let apple = mapping.item_index("apple").unwrap();
        assert_eq!(store.users_of(apple).len(), 2);
    }
}
