use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::util::group_thousands;

/// Platforms whose runs count as long-read data.
pub const LONG_READ_PLATFORMS: [&str; 2] = ["OXFORD_NANOPORE", "PACBIO_SMRT"];

/// One run row as returned by the portal.
///
/// JSON nulls and non-string scalars are accepted in every field, so a sparse row is still
/// counted rather than dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResultRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub run_accession: String,
    #[serde(deserialize_with = "lenient_string")]
    pub experiment_title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub tax_id: String,
    /// Semicolon-delimited lineage.
    #[serde(deserialize_with = "lenient_string")]
    pub tax_lineage: String,
    #[serde(deserialize_with = "lenient_string")]
    pub scientific_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub library_source: String,
    #[serde(deserialize_with = "lenient_string")]
    pub library_strategy: String,
    #[serde(deserialize_with = "lenient_string")]
    pub instrument_platform: String,
    #[serde(deserialize_with = "lenient_count")]
    pub read_count: Option<u64>,
    #[serde(deserialize_with = "lenient_optional_string")]
    pub first_public: Option<String>,
}

impl ResultRecord {
    /// Maps a TSV row onto fields using the header's column names.
    pub fn from_tsv(columns: &[String], line: &str) -> Self {
        let mut record = ResultRecord::default();
        let line = line.trim_end_matches(['\n', '\r']);
        for (name, value) in columns.iter().zip(line.split('\t')) {
            match name.as_str() {
                "run_accession" => record.run_accession = value.to_string(),
                "experiment_title" => record.experiment_title = value.to_string(),
                "tax_id" => record.tax_id = value.to_string(),
                "tax_lineage" => record.tax_lineage = value.to_string(),
                "scientific_name" => record.scientific_name = value.to_string(),
                "library_source" => record.library_source = value.to_string(),
                "library_strategy" => record.library_strategy = value.to_string(),
                "instrument_platform" => record.instrument_platform = value.to_string(),
                "read_count" => record.read_count = parse_count(value),
                "first_public" => {
                    record.first_public = Some(value.trim())
                        .filter(|v| !v.is_empty())
                        .map(str::to_string)
                }
                _ => {}
            }
        }
        record
    }

    pub fn lineage(&self) -> impl Iterator<Item = &str> {
        self.tax_lineage
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn is_long_read(&self) -> bool {
        let platform = self.instrument_platform.trim().to_ascii_uppercase();
        LONG_READ_PLATFORMS.contains(&platform.as_str())
    }
}

fn parse_count(value: &str) -> Option<u64> {
    let value = value.trim();
    value.parse::<u64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => parse_count(&s),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_optional_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let s = lenient_string(d)?;
    Ok(Some(s).filter(|s| !s.trim().is_empty()))
}

/// Categorical columns tallied in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    LibraryStrategy,
    InstrumentPlatform,
    ScientificName,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::LibraryStrategy,
        Category::InstrumentPlatform,
        Category::ScientificName,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Category::LibraryStrategy => "library_strategy",
            Category::InstrumentPlatform => "instrument_platform",
            Category::ScientificName => "scientific_name",
        }
    }

    fn key(self, record: &ResultRecord) -> String {
        let value = match self {
            Category::LibraryStrategy => record.library_strategy.trim().to_string(),
            Category::InstrumentPlatform => {
                record.instrument_platform.trim().to_ascii_uppercase()
            }
            Category::ScientificName => record.scientific_name.trim().to_string(),
        };
        if value.is_empty() {
            "(none)".to_string()
        } else {
            value
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct OrganismData {
    long_read: bool,
    short_read: bool,
}

/// Counts derived from the record stream. Raw records are never kept.
#[derive(Debug, Clone, Default)]
pub struct SummaryStats {
    total: u64,
    categories: BTreeMap<Category, BTreeMap<String, u64>>,
    organisms: BTreeMap<String, OrganismData>,
    runs_long: u64,
    reads_total: u64,
    reads_long: u64,
}

impl SummaryStats {
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Values of `category`, most frequent first, ties broken by key.
    pub fn ranked(&self, category: Category) -> Vec<(&str, u64)> {
        let mut rows: Vec<(&str, u64)> = self
            .categories
            .get(&category)
            .map(|m| m.iter().map(|(k, v)| (k.as_str(), *v)).collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        rows
    }

    pub fn unique_organisms(&self) -> u64 {
        self.organisms.len() as u64
    }

    pub fn organisms_with_long_read(&self) -> u64 {
        self.organisms.values().filter(|o| o.long_read).count() as u64
    }

    pub fn organisms_with_short_read(&self) -> u64 {
        self.organisms.values().filter(|o| o.short_read).count() as u64
    }

    pub fn runs_long(&self) -> u64 {
        self.runs_long
    }

    pub fn runs_short(&self) -> u64 {
        self.total - self.runs_long
    }

    pub fn reads_total(&self) -> u64 {
        self.reads_total
    }

    pub fn reads_long(&self) -> u64 {
        self.reads_long
    }

    pub fn reads_short(&self) -> u64 {
        self.reads_total.saturating_sub(self.reads_long)
    }

    /// Human-readable report: the long/short-read overview followed by one table per category.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return "No data retrieved. Summary is empty.\n".to_string();
        }

        let rule = "-".repeat(29);
        let mut lines = vec![
            String::new(),
            rule.clone(),
            "ENA Run Metadata Summary".to_string(),
            rule.clone(),
            format!(
                "Total Unique Organisms: {}",
                group_thousands(self.unique_organisms())
            ),
            format!(
                "  - With Long-Read Data: {}",
                group_thousands(self.organisms_with_long_read())
            ),
            format!(
                "  - With Short-Read Data: {}",
                group_thousands(self.organisms_with_short_read())
            ),
            String::new(),
            format!("Total Runs: {}", group_thousands(self.total)),
            format!("  - Long-Read Runs: {}", group_thousands(self.runs_long())),
            format!("  - Short-Read Runs: {}", group_thousands(self.runs_short())),
            String::new(),
            format!("Total Reads: {}", group_thousands(self.reads_total)),
            format!("  - Long-Read Reads: {}", group_thousands(self.reads_long())),
            format!("  - Short-Read Reads: {}", group_thousands(self.reads_short())),
            rule,
        ];

        for category in Category::ALL {
            let rows = self.ranked(category);
            let width = rows
                .iter()
                .map(|(k, _)| k.chars().count())
                .chain([category.column().len()])
                .max()
                .unwrap_or(0);

            lines.push(String::new());
            lines.push(format!("{:<width$}  {:>12}", category.column(), "runs"));
            for (key, count) in rows {
                lines.push(format!("{:<width$}  {:>12}", key, group_thousands(count)));
            }
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    pub fn write_report<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(self.render().as_bytes())?;
        out.flush()
    }
}

/// Builds [`SummaryStats`] one record at a time.
#[derive(Debug, Default)]
pub struct SummaryAggregator {
    tsv_columns: Option<Vec<String>>,
    stats: SummaryStats,
}

impl SummaryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, record: &ResultRecord) {
        let stats = &mut self.stats;
        stats.total += 1;

        for category in Category::ALL {
            *stats
                .categories
                .entry(category)
                .or_default()
                .entry(category.key(record))
                .or_insert(0) += 1;
        }

        let long_read = record.is_long_read();
        let reads = record.read_count.unwrap_or(0);
        stats.reads_total = stats.reads_total.saturating_add(reads);
        if long_read {
            stats.runs_long += 1;
            stats.reads_long = stats.reads_long.saturating_add(reads);
        }

        let tax_id = record.tax_id.trim();
        if !tax_id.is_empty() {
            let organism = stats.organisms.entry(tax_id.to_string()).or_default();
            if long_read {
                organism.long_read = true;
            } else {
                organism.short_read = true;
            }
        }
    }

    /// Accepts raw TSV lines; the first one is taken as the header.
    pub fn observe_tsv_line(&mut self, line: &str) {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        match &self.tsv_columns {
            None => {
                self.tsv_columns =
                    Some(trimmed.split('\t').map(|c| c.trim().to_string()).collect());
            }
            Some(columns) => {
                if trimmed.trim().is_empty() {
                    return;
                }
                let record = ResultRecord::from_tsv(columns, trimmed);
                self.observe(&record);
            }
        }
    }

    pub fn finish(self) -> SummaryStats {
        self.stats
    }
}
