use std::collections::{BTreeSet, HashMap};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::domain::SampleId;
use crate::error::MergeError;
use crate::fs_util;
use crate::manifest::Manifest;
use crate::order::SampleOrder;

/// One tab-separated janno table with a header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTable {
    pub source: Utf8PathBuf,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl MetadataTable {
    pub fn read(path: &Utf8Path) -> Result<Self, MergeError> {
        let file = std::fs::File::open(path.as_std_path())
            .map_err(|err| MergeError::Filesystem(format!("open {path}: {err}")))?;
        Self::parse(path, file)
    }

    pub fn parse<R: io::Read>(source: &Utf8Path, reader: R) -> Result<Self, MergeError> {
        let malformed = |err: csv::Error| MergeError::MalformedTable {
            path: source.to_string(),
            message: err.to_string(),
        };
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .quoting(false)
            .from_reader(reader);

        let columns = reader
            .headers()
            .map_err(malformed)?
            .iter()
            .map(|column| column.trim().to_string())
            .collect::<Vec<_>>();
        let mut seen = BTreeSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(MergeError::MalformedTable {
                    path: source.to_string(),
                    message: format!("column {column} appears twice"),
                });
            }
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(malformed)?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self {
            source: source.to_path_buf(),
            columns,
            rows,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    fn required_column(&self, name: &str) -> Result<usize, MergeError> {
        self.column_index(name)
            .ok_or_else(|| MergeError::MalformedTable {
                path: self.source.to_string(),
                message: format!("missing identifier column {name}"),
            })
    }
}

#[derive(Debug, Clone)]
pub struct MetadataMergeOptions {
    pub strict_columns: bool,
    pub na_sentinel: String,
    pub id_column: String,
    /// When set, rows are matched on `(family, individual)` instead of the
    /// individual id alone.
    pub family_column: Option<String>,
}

impl From<&ResolvedConfig> for MetadataMergeOptions {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            strict_columns: config.strict_columns,
            na_sentinel: config.na_sentinel.clone(),
            id_column: config.id_column.clone(),
            family_column: config.family_column.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl MergedTable {
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.columns.iter().position(|column| column == name)?;
        Some(self.rows.iter().map(|row| row[index].as_str()).collect())
    }

    pub fn render(&self) -> Result<String, MergeError> {
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(QuoteStyle::Never)
            .from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| MergeError::Filesystem(err.to_string()))
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), MergeError> {
        fs_util::write_atomic(path, self.render()?.as_bytes())
    }
}

/// Reads every included table of the metadata manifest and merges them.
pub fn merge_manifest(
    manifest: &Manifest,
    order: &SampleOrder,
    options: &MetadataMergeOptions,
) -> Result<MergedTable, MergeError> {
    let tables = manifest
        .included()
        .flat_map(|(_, files)| files.iter())
        .map(|path| MetadataTable::read(path))
        .collect::<Result<Vec<_>, _>>()?;
    merge_tables(&tables, order, options)
}

/// Aligns columns by name over the union of all tables, fills absent cells
/// with the sentinel and sorts rows into the sample order.
pub fn merge_tables(
    tables: &[MetadataTable],
    order: &SampleOrder,
    options: &MetadataMergeOptions,
) -> Result<MergedTable, MergeError> {
    if tables.is_empty() {
        return Err(MergeError::EmptyInput(
            "no metadata tables to merge".to_string(),
        ));
    }

    if options.strict_columns {
        let expected = tables[0].columns.iter().collect::<BTreeSet<_>>();
        for table in &tables[1..] {
            if table.columns.iter().collect::<BTreeSet<_>>() != expected {
                return Err(MergeError::SchemaMismatch {
                    table: table.source.to_string(),
                    expected: tables[0].columns.clone(),
                    found: table.columns.clone(),
                });
            }
        }
    }

    let mut columns: Vec<String> = Vec::new();
    for table in tables {
        for column in &table.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
    }

    let mut placed: Vec<(usize, Vec<String>)> = Vec::new();
    let mut claimed: HashMap<usize, &Utf8Path> = HashMap::new();
    for table in tables {
        let id_index = table.required_column(&options.id_column)?;
        let family_index = options
            .family_column
            .as_deref()
            .map(|name| table.required_column(name))
            .transpose()?;
        let mapping = columns
            .iter()
            .map(|column| table.column_index(column))
            .collect::<Vec<_>>();

        for row in &table.rows {
            let individual = row[id_index].trim();
            let (label, position) = match family_index {
                Some(family_index) => {
                    let id = SampleId::new(row[family_index].trim(), individual);
                    (id.to_string(), order.position(&id))
                }
                None => match order.positions_of_individual(individual) {
                    [] => (individual.to_string(), None),
                    [position] => (individual.to_string(), Some(*position)),
                    shared => {
                        return Err(MergeError::AmbiguousSample {
                            sample: individual.to_string(),
                            table: table.source.to_string(),
                            matches: shared.len(),
                        });
                    }
                },
            };
            let position = position.ok_or_else(|| MergeError::UnresolvedSample {
                sample: label.clone(),
                table: table.source.to_string(),
            })?;
            if let Some(previous) = claimed.insert(position, table.source.as_path()) {
                return Err(MergeError::DuplicateSample {
                    sample: label,
                    first: previous.to_string(),
                    second: table.source.to_string(),
                });
            }

            let merged_row = mapping
                .iter()
                .map(|index| match index {
                    Some(index) => row[*index].clone(),
                    None => options.na_sentinel.clone(),
                })
                .collect();
            placed.push((position, merged_row));
        }
    }

    let mut by_position = placed.into_iter().collect::<HashMap<_, _>>();
    let mut missing = Vec::new();
    let rows = order
        .samples()
        .iter()
        .enumerate()
        .map(|(position, id)| {
            by_position.remove(&position).unwrap_or_else(|| {
                missing.push(id.to_string());
                placeholder_row(&columns, id, options)
            })
        })
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        warn!(
            samples = missing.len(),
            first = %missing[0],
            "genotyped samples without a metadata row, filled with the sentinel"
        );
    }
    info!(
        tables = tables.len(),
        columns = columns.len(),
        rows = rows.len(),
        "merged metadata"
    );

    Ok(MergedTable { columns, rows })
}

/// Row for a genotyped sample no table describes: its ids, sentinel elsewhere.
fn placeholder_row(
    columns: &[String],
    id: &SampleId,
    options: &MetadataMergeOptions,
) -> Vec<String> {
    columns
        .iter()
        .map(|column| {
            if *column == options.id_column {
                id.individual().to_string()
            } else if options.family_column.as_deref() == Some(column.as_str()) {
                id.family().to_string()
            } else {
                options.na_sentinel.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn table(name: &str, content: &str) -> MetadataTable {
        MetadataTable::parse(Utf8Path::new(name), content.as_bytes()).unwrap()
    }

    fn order_of(records: &str) -> SampleOrder {
        let mut order = SampleOrder::default();
        order
            .append_records(Utf8Path::new("m"), Utf8Path::new("m.fam"), records)
            .unwrap();
        order
    }

    fn options() -> MetadataMergeOptions {
        MetadataMergeOptions {
            strict_columns: false,
            na_sentinel: "n/a".to_string(),
            id_column: "id".to_string(),
            family_column: None,
        }
    }

    #[test]
    fn rows_follow_sample_order_not_table_order() {
        let order = order_of("P S1\nP S2\nP S3\n");
        let tables = vec![
            table("a.janno", "id\tsex\nS3\tF\nS1\tM\n"),
            table("b.janno", "id\tsex\nS2\tF\n"),
        ];

        let merged = merge_tables(&tables, &order, &options()).unwrap();
        assert_eq!(merged.column("id").unwrap(), vec!["S1", "S2", "S3"]);
        assert_eq!(merged.column("sex").unwrap(), vec!["M", "F", "F"]);
    }

    #[test]
    fn columns_are_aligned_by_name() {
        let order = order_of("P S1\nP S2\n");
        let tables = vec![
            table("a.janno", "id\tsex\tage\nS1\tM\t30\n"),
            table("b.janno", "age\tid\tsex\n40\tS2\tF\n"),
        ];

        let merged = merge_tables(&tables, &order, &options()).unwrap();
        assert_eq!(merged.columns, vec!["id", "sex", "age"]);
        assert_eq!(merged.rows[1], vec!["S2", "F", "40"]);
    }

    #[test]
    fn strict_columns_rejects_different_sets() {
        let order = order_of("P S1\nP S2\n");
        let tables = vec![
            table("a.janno", "id\tsex\nS1\tM\n"),
            table("b.janno", "id\tage\nS2\t40\n"),
        ];
        let strict = MetadataMergeOptions {
            strict_columns: true,
            ..options()
        };

        let err = merge_tables(&tables, &order, &strict).unwrap_err();
        assert_matches!(err, MergeError::SchemaMismatch { ref table, .. } if table == "b.janno");
    }

    #[test]
    fn unknown_sample_is_unresolved() {
        let order = order_of("P S1\n");
        let tables = vec![table("a.janno", "id\tsex\nS1\tM\nS9\tF\n")];

        let err = merge_tables(&tables, &order, &options()).unwrap_err();
        assert_matches!(err, MergeError::UnresolvedSample { ref sample, .. } if sample == "S9");
    }

    #[test]
    fn repeated_metadata_row_is_a_duplicate() {
        let order = order_of("P S1\n");
        let tables = vec![
            table("a.janno", "id\nS1\n"),
            table("b.janno", "id\nS1\n"),
        ];

        let err = merge_tables(&tables, &order, &options()).unwrap_err();
        assert_matches!(err, MergeError::DuplicateSample { .. });
    }

    #[test]
    fn family_column_disambiguates_shared_individual_ids() {
        let order = order_of("P1 S1\nP2 S1\n");
        let tables = vec![table("a.janno", "pop\tid\tx\nP2\tS1\tb\nP1\tS1\ta\n")];
        let by_family = MetadataMergeOptions {
            family_column: Some("pop".to_string()),
            ..options()
        };

        let merged = merge_tables(&tables, &order, &by_family).unwrap();
        assert_eq!(merged.column("x").unwrap(), vec!["a", "b"]);

        let err = merge_tables(&tables, &order, &options()).unwrap_err();
        assert_matches!(
            err,
            MergeError::AmbiguousSample { ref sample, matches: 2, .. } if sample == "S1"
        );
    }

    #[test]
    fn genotyped_sample_without_row_gets_placeholder() {
        let order = order_of("P S1\nP S2\nP S3\n");
        let tables = vec![table("a.janno", "id\tsex\nS1\tM\nS3\tF\n")];

        let merged = merge_tables(&tables, &order, &options()).unwrap();
        assert_eq!(merged.column("id").unwrap(), vec!["S1", "S2", "S3"]);
        assert_eq!(merged.column("sex").unwrap(), vec!["M", "n/a", "F"]);
    }

    #[test]
    fn placeholder_fills_family_column_when_configured() {
        let order = order_of("P1 S1\nP2 S2\n");
        let tables = vec![table("a.janno", "id\tpop\tsex\nS1\tP1\tM\n")];
        let by_family = MetadataMergeOptions {
            family_column: Some("pop".to_string()),
            ..options()
        };

        let merged = merge_tables(&tables, &order, &by_family).unwrap();
        assert_eq!(merged.rows[1], vec!["S2", "P2", "n/a"]);
    }

    #[test]
    fn ragged_row_is_malformed() {
        let err = MetadataTable::parse(Utf8Path::new("a.janno"), "id\tsex\nS1\n".as_bytes())
            .unwrap_err();
        assert_matches!(err, MergeError::MalformedTable { .. });
    }

    #[test]
    fn render_is_tab_separated_without_quoting() {
        let merged = MergedTable {
            columns: vec!["id".to_string(), "note".to_string()],
            rows: vec![vec!["S1".to_string(), "a \"b\"".to_string()]],
        };
        assert_eq!(merged.render().unwrap(), "id\tnote\nS1\ta \"b\"\n");
    }
}
