//! Subcommand implementations.
//!
//! Each function takes plain paths and options so it can be exercised
//! without going through argument parsing.

use std::path::Path;
use std::time::Instant;

use census_radius_dataset::{Dataset, DatasetLayout, DatasetLoader, LoadError, binary};
use census_radius_query::{Query, QueryEngine, QueryError};
use census_radius_server::ServerError;
use census_radius_server_models::ApiPopulation;
use census_radius_store::{MemoryRecordStore, RecordStore, StoreError};

/// Errors reported by the CLI.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Server(#[from] ServerError),

    /// Reading or writing a file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// The arguments do not make sense together.
    #[error("{0}")]
    Usage(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CliError + '_ {
    move |source| CliError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Runs one query and shapes it like the `/api/pop2010` response.
///
/// # Errors
///
/// Returns [`QueryError`] if the query is out of domain or fails.
pub fn run_query(
    engine: &QueryEngine,
    lat: f64,
    lon: f64,
    distance: i64,
) -> Result<ApiPopulation, QueryError> {
    let start = Instant::now();
    let query = Query::new(lat, lon, distance)?;
    let result = engine.query(&query)?;
    Ok(ApiPopulation::new(&result, distance, lat, lon, start.elapsed()))
}

/// Rewrites a text-layout location file as a binary layout.
///
/// The extended layout needs every block's payload, read from the payload
/// CSV at `payloads`. Returns the number of records written.
///
/// # Errors
///
/// Returns [`CliError`] if the input is invalid, a payload is missing or
/// inconsistent, or the output cannot be written.
pub fn convert(
    loader: &DatasetLoader,
    input: &Path,
    payloads: Option<&Path>,
    output: &Path,
    layout: DatasetLayout,
) -> Result<usize, CliError> {
    let bytes = std::fs::read(input).map_err(io_error(input))?;
    let mut records = loader.decode(&bytes, DatasetLayout::Text)?.records().to_vec();

    let encoded = match (layout, payloads) {
        (DatasetLayout::Compact, _) => binary::encode_compact(&records)?,
        (DatasetLayout::Extended, Some(payloads)) => {
            let store = MemoryRecordStore::open_csv(payloads)?;
            for record in &mut records {
                record.demographics = Some(store.get(&record.id)?);
            }
            let dataset = loader.build(records, DatasetLayout::Extended)?;
            binary::encode_extended(dataset.records())?
        }
        (DatasetLayout::Extended, None) => {
            return Err(CliError::Usage(
                "the extended layout needs --payloads".to_string(),
            ));
        }
        (DatasetLayout::Text, _) => {
            return Err(CliError::Usage(
                "convert writes the compact or extended layout".to_string(),
            ));
        }
    };

    std::fs::write(output, &encoded).map_err(io_error(output))?;
    let count = encoded.len() / layout.schema().map_or(1, |schema| schema.record_len);
    log::info!(
        "Wrote {count} {layout} records ({} bytes) to {}",
        encoded.len(),
        output.display()
    );
    Ok(count)
}

/// Summary printed by `verify`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub blocks: usize,
    pub population: u64,
    pub resident_payloads: bool,
    /// Blocks whose payload is missing or disagrees with the dataset.
    pub problems: Vec<String>,
}

impl std::fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "blocks:            {}", self.blocks)?;
        writeln!(f, "population:        {}", self.population)?;
        writeln!(f, "resident payloads: {}", self.resident_payloads)?;
        write!(f, "problems:          {}", self.problems.len())?;
        for problem in &self.problems {
            write!(f, "\n  {problem}")?;
        }
        Ok(())
    }
}

/// Cross-checks a loaded dataset against a payload store.
///
/// Every block must have a payload whose population matches and whose
/// gender and age totals add up.
///
/// # Errors
///
/// Returns [`StoreError`] if the store fails for a reason other than a
/// missing id.
pub fn verify(dataset: &Dataset, store: Option<&dyn RecordStore>) -> Result<VerifyReport, StoreError> {
    let mut report = VerifyReport {
        blocks: dataset.len(),
        population: dataset.total_population(),
        resident_payloads: dataset.has_demographics(),
        problems: Vec::new(),
    };

    let Some(store) = store else {
        return Ok(report);
    };

    for record in dataset.records() {
        let payload = match store.get(&record.id) {
            Ok(payload) => payload,
            Err(StoreError::NotFound(id)) => {
                report.problems.push(format!("{id}: no payload"));
                continue;
            }
            Err(e) => return Err(e),
        };
        if payload.population != record.population {
            report.problems.push(format!(
                "{}: payload population {} but dataset population {}",
                record.id, payload.population, record.population
            ));
        } else if let Err(mismatch) = payload.check_totals() {
            report.problems.push(format!("{}: {mismatch}", record.id));
        }
    }

    Ok(report)
}

/// Writes a `DuckDB` payload store from a payload CSV.
///
/// # Errors
///
/// Returns [`CliError`] if the CSV is invalid or the store cannot be
/// created.
#[cfg(feature = "duckdb")]
pub fn build_store(payloads: &Path, output: &Path) -> Result<u64, CliError> {
    use census_radius_dataset::text;
    use census_radius_store::DuckDbRecordStore;

    let file = std::fs::File::open(payloads).map_err(io_error(payloads))?;
    let rows = text::read_payloads(std::io::BufReader::new(file))?;
    Ok(DuckDbRecordStore::create(output, &rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use census_radius_census_models::{AGE_BRACKET_COUNT, DemographicRecord, LocationRecord};
    use census_radius_dataset::{DatasetSource, LoadOptions, text};
    use census_radius_geodesy::Wgs84;
    use census_radius_query::{PayloadSource, QueryOptions};

    fn loader() -> DatasetLoader {
        DatasetLoader::new(Arc::new(Wgs84::new()))
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("census_radius_cli_{name}"))
    }

    fn payload(population: u32) -> DemographicRecord {
        let mut female_ages = [0; AGE_BRACKET_COUNT];
        female_ages[12] = population;
        DemographicRecord {
            population,
            male_population: 0,
            female_population: population,
            male_ages: [0; AGE_BRACKET_COUNT],
            female_ages,
        }
    }

    fn blocks() -> Vec<LocationRecord> {
        let loader = loader();
        vec![
            loader.locate("060014001", 37.8716, -122.2727, 12, None),
            loader.locate("060014002", 37.8722, -122.2701, 30, None),
        ]
    }

    fn location_lines(records: &[LocationRecord]) -> String {
        records
            .iter()
            .map(|r| {
                let [x, y, z] = r.position;
                format!("{},{},{},{},{x},{y},{z}\n", r.id, r.population, r.lat, r.lon)
            })
            .collect()
    }

    fn payload_lines(records: &[LocationRecord]) -> String {
        records
            .iter()
            .map(|r| text::format_payload(&r.id, &payload(r.population)) + "\n")
            .collect()
    }

    #[test]
    fn convert_text_to_compact() {
        let input = temp_path("compact_input.txt");
        let output = temp_path("compact_output.bin");
        std::fs::write(&input, location_lines(&blocks())).unwrap();

        let count = convert(&loader(), &input, None, &output, DatasetLayout::Compact).unwrap();
        assert_eq!(count, 2);

        let dataset = loader()
            .load(&DatasetSource {
                path: output.clone(),
                layout: DatasetLayout::Compact,
            })
            .unwrap();
        assert_eq!(dataset.records(), blocks().as_slice());

        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&output);
    }

    #[test]
    fn convert_text_and_payloads_to_extended() {
        let input = temp_path("extended_input.txt");
        let payloads = temp_path("extended_payloads.csv");
        let output = temp_path("extended_output.bin");
        std::fs::write(&input, location_lines(&blocks())).unwrap();
        std::fs::write(&payloads, payload_lines(&blocks())).unwrap();

        let count = convert(
            &loader(),
            &input,
            Some(&payloads),
            &output,
            DatasetLayout::Extended,
        )
        .unwrap();
        assert_eq!(count, 2);

        let dataset = loader()
            .load(&DatasetSource {
                path: output.clone(),
                layout: DatasetLayout::Extended,
            })
            .unwrap();
        assert!(dataset.has_demographics());
        assert_eq!(
            dataset.get(1).unwrap().demographics,
            Some(payload(30))
        );

        for path in [&input, &payloads, &output] {
            let _ = std::fs::remove_file(path);
        }
    }

    #[test]
    fn convert_extended_requires_payloads() {
        let input = temp_path("no_payloads_input.txt");
        std::fs::write(&input, location_lines(&blocks())).unwrap();
        let err = convert(
            &loader(),
            &input,
            None,
            &temp_path("never_written.bin"),
            DatasetLayout::Extended,
        )
        .unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
        let _ = std::fs::remove_file(&input);
    }

    #[test]
    fn verify_reports_missing_and_inconsistent_payloads() {
        let loader = loader().with_options(LoadOptions {
            strict_totals: false,
        });
        let dataset = loader.build(blocks(), DatasetLayout::Compact).unwrap();

        let mut wrong = payload(30);
        wrong.population = 31;
        let store = MemoryRecordStore::from_payloads(vec![("060014002".to_string(), wrong)])
            .unwrap();

        let report = verify(&dataset, Some(&store)).unwrap();
        assert_eq!(report.blocks, 2);
        assert_eq!(report.population, 42);
        assert!(!report.resident_payloads);
        assert_eq!(report.problems.len(), 2);
        assert!(report.problems[0].contains("no payload"));
        assert!(report.problems[1].contains("payload population 31"));
        assert!(report.to_string().contains("problems:          2"));

        let clean = verify(&dataset, None).unwrap();
        assert!(clean.problems.is_empty());
    }

    #[test]
    fn query_matches_nearby_blocks() {
        let records: Vec<LocationRecord> = blocks()
            .into_iter()
            .map(|mut r| {
                r.demographics = Some(payload(r.population));
                r
            })
            .collect();
        let dataset = loader().build(records, DatasetLayout::Extended).unwrap();
        let engine = QueryEngine::new(
            Arc::new(dataset),
            PayloadSource::Resident,
            QueryOptions::default(),
        )
        .unwrap();

        let api = run_query(&engine, 37.8716, -122.2727, 1_000).unwrap();
        assert_eq!(api.blocks, 2);
        assert_eq!(api.population, 42);
        assert_eq!(api.distance, 1_000);

        assert!(matches!(
            run_query(&engine, 37.8716, -122.2727, 0),
            Err(QueryError::Validation(_))
        ));
    }
}
