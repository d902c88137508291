use tracing::{info, warn};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::payload::{OutputFormat, RequestPayload};
use crate::query::{QuerySpec, build_query};
use crate::stream::{OutputSink, OutputTarget, StreamStats, StreamWriter};
use crate::summary::{SummaryAggregator, SummaryStats};

/// Everything one invocation needs: what to ask for and where to put it.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub query: QuerySpec,
    pub format: OutputFormat,
    /// Maximum number of records; 0 lets the portal return everything.
    pub limit: u64,
    pub output: OutputTarget,
    pub summary: bool,
    pub progress: bool,
}

#[derive(Debug)]
pub struct RetrievalOutcome {
    pub stats: StreamStats,
    pub retries: u32,
    pub summary: Option<SummaryStats>,
}

impl Retrieval {
    pub fn new(query: QuerySpec, output: OutputTarget) -> Self {
        Self {
            query,
            format: OutputFormat::default(),
            limit: 0,
            output,
            summary: false,
            progress: false,
        }
    }

    /// Rejects option combinations that cannot work, before anything touches the network.
    pub fn validate(&self) -> Result<()> {
        if self.summary && self.output.is_stdout() {
            return Err(Error::Config(
                "a summary cannot be generated while writing results to standard output; \
                 choose an output file"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn payload(&self) -> RequestPayload {
        RequestPayload::new(build_query(&self.query), self.format, self.limit)
    }

    /// Runs the single query and streams the results to the output target.
    ///
    /// The output is only opened once the portal has answered successfully, so transport
    /// failures never leave an empty file behind.
    pub fn run(&self, client: &Client) -> Result<RetrievalOutcome> {
        self.validate()?;

        info!(
            tax_id = self.query.taxonomy_id(),
            strategy = self.query.strategy(),
            operator = self.query.operator().as_str(),
            limit = self.limit,
            format = %self.format,
            output = ?self.output,
            "starting retrieval"
        );

        let payload = self.payload();
        let resp = client.fetch(&payload)?;
        let retries = resp.retries;

        let mut sink = OutputSink::open(&self.output)?;
        let mut aggregator = self.summary.then(SummaryAggregator::new);

        let mut writer = StreamWriter::new(self.format).with_progress(self.progress);
        if let Some(agg) = aggregator.as_mut() {
            writer = writer.with_summary(agg);
        }

        let stats = match writer.write(resp.into_body(), &mut sink) {
            Ok(stats) => stats,
            Err(e) => {
                // Keep whatever prefix was received; it is not rolled back.
                if let Err(close_err) = sink.finish() {
                    warn!("failed to flush partial output: {}", close_err);
                }
                return Err(e);
            }
        };
        sink.finish()?;

        info!(
            lines = stats.lines,
            records = stats.records,
            bytes = stats.bytes,
            "wrote {} lines",
            stats.lines
        );
        if let OutputTarget::File(path) = &self.output {
            info!("output saved to {}", path.display());
        }

        let summary = aggregator.map(SummaryAggregator::finish);
        if summary.as_ref().is_some_and(SummaryStats::is_empty) {
            warn!("no data retrieved; summary is empty");
        }

        Ok(RetrievalOutcome {
            stats,
            retries,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_summary_with_stdout_rejected() {
        let mut retrieval = Retrieval::new(
            QuerySpec::new("562", "RNA-Seq", false).unwrap(),
            OutputTarget::Stdout,
        );
        assert!(retrieval.validate().is_ok());

        retrieval.summary = true;
        assert!(matches!(retrieval.validate(), Err(Error::Config(_))));

        retrieval.output = OutputTarget::File(PathBuf::from("out.tsv"));
        assert!(retrieval.validate().is_ok());
    }

    #[test]
    fn test_payload_from_retrieval() {
        let mut retrieval = Retrieval::new(
            QuerySpec::new("7460", "RNA-Seq", true).unwrap(),
            OutputTarget::Stdout,
        );
        retrieval.format = OutputFormat::Json;
        retrieval.limit = 5;

        let form = retrieval.payload().to_form();
        assert_eq!(
            form,
            vec![
                ("result", "read_run".to_string()),
                ("query", "tax_eq(7460) AND library_strategy=\"RNA-Seq\"".to_string()),
                ("fields", crate::query::fields_param()),
                ("format", "json".to_string()),
                ("limit", "5".to_string()),
            ]
        );
    }
}
