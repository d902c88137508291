//! End-to-end retrieval tests against an in-memory transport.

use enatrieve::{
    Client, Error, OutputFormat, OutputTarget, QuerySpec, RequestPayload, Retrieval, Transport,
    TransportError, TransportResponse,
};
use reqwest::StatusCode;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TSV_HEADER: &str = "run_accession\texperiment_title\ttax_id\ttax_lineage\tscientific_name\tlibrary_source\tlibrary_strategy\tinstrument_platform\tread_count\tfirst_public\n";

/// Replies with a fixed body after an optional run of 503s, recording each request's form.
struct MockPortal {
    failures_before_success: Mutex<u32>,
    body: String,
    requests: Mutex<Vec<Vec<(&'static str, String)>>>,
}

impl MockPortal {
    fn new(body: impl Into<String>) -> Self {
        Self {
            failures_before_success: Mutex::new(0),
            body: body.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing_first(self, n: u32) -> Self {
        *self.failures_before_success.lock().unwrap() = n;
        self
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for MockPortal {
    fn post_form(
        &self,
        _url: &str,
        payload: &RequestPayload,
    ) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(payload.to_form());

        let mut failures = self.failures_before_success.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Ok(TransportResponse {
                status: StatusCode::SERVICE_UNAVAILABLE,
                retry_after: None,
                body: Box::new(Cursor::new(Vec::new())),
            });
        }

        Ok(TransportResponse {
            status: StatusCode::OK,
            retry_after: None,
            body: Box::new(Cursor::new(self.body.clone().into_bytes())),
        })
    }
}

fn client(portal: Arc<MockPortal>) -> Client {
    Client::with_transport("https://portal.invalid/ena/portal/api/search", portal)
        .with_sleeper(Arc::new(|_: Duration| {}))
}

#[test]
fn test_single_tsv_row_end_to_end() {
    let row = "SRR000001\tE. coli RNA-Seq\t562\t1;131567;2;562\tEscherichia coli\tTRANSCRIPTOMIC\tRNA-Seq\tILLUMINA\t42\t2012-05-01\n";
    let portal = Arc::new(MockPortal::new(format!("{TSV_HEADER}{row}")));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("enatrieved_562_RNA-Seq.tsv");

    let mut retrieval = Retrieval::new(
        QuerySpec::new("562", "RNA-Seq", false).unwrap(),
        OutputTarget::File(path.clone()),
    );
    retrieval.limit = 1;
    retrieval.format = OutputFormat::Tsv;

    let outcome = retrieval.run(&client(portal.clone())).unwrap();

    // Lines include the header row; records do not.
    assert_eq!(outcome.stats.lines, 2);
    assert_eq!(outcome.stats.records, 1);
    assert_eq!(outcome.retries, 0);
    assert!(outcome.summary.is_none());

    let requests = portal.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let form = &requests[0];
    assert!(form.contains(&(
        "query",
        "tax_tree(562) AND library_strategy=\"RNA-Seq\"".to_string()
    )));
    assert!(form.contains(&("limit", "1".to_string())));
    assert!(form.contains(&("result", "read_run".to_string())));

    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written, format!("{TSV_HEADER}{row}"));
}

#[test]
fn test_summary_with_stdout_makes_no_request() {
    let portal = Arc::new(MockPortal::new(TSV_HEADER));
    let mut retrieval = Retrieval::new(
        QuerySpec::new("562", "RNA-Seq", false).unwrap(),
        OutputTarget::Stdout,
    );
    retrieval.summary = true;

    let err = retrieval.run(&client(portal.clone())).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(portal.calls(), 0);
}

#[test]
fn test_json_with_summary_after_retries() {
    let body = r#"[{"run_accession":"ERR1","tax_id":"7460","scientific_name":"Apis mellifera","library_strategy":"RNA-Seq","instrument_platform":"ILLUMINA","read_count":"2000"},
{"run_accession":"ERR2","tax_id":"7460","scientific_name":"Apis mellifera","library_strategy":"RNA-Seq","instrument_platform":"OXFORD_NANOPORE","read_count":"300"},
{"run_accession":"ERR3","tax_id":"7425","scientific_name":"Apis cerana","library_strategy":"RNA-Seq","instrument_platform":"ILLUMINA","read_count":"1000"}]"#;
    let portal = Arc::new(MockPortal::new(body).failing_first(2));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bees.json");

    let mut retrieval = Retrieval::new(
        QuerySpec::new("7459", "RNA-Seq", false).unwrap(),
        OutputTarget::File(path.clone()),
    );
    retrieval.format = OutputFormat::Json;
    retrieval.summary = true;

    let outcome = retrieval.run(&client(portal.clone())).unwrap();
    assert_eq!(outcome.retries, 2);
    assert_eq!(portal.calls(), 3);
    assert_eq!(outcome.stats.records, 3);

    let summary = outcome.summary.unwrap();
    assert_eq!(summary.total(), 3);
    assert_eq!(summary.unique_organisms(), 2);
    assert_eq!(summary.organisms_with_long_read(), 1);
    assert_eq!(summary.reads_total(), 3300);
    assert_eq!(summary.reads_long(), 300);

    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 3);
}

#[test]
fn test_transport_failure_leaves_no_file() {
    let portal = Arc::new(MockPortal::new("").failing_first(100));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.tsv");

    let retrieval = Retrieval::new(
        QuerySpec::new("562", "RNA-Seq", true).unwrap(),
        OutputTarget::File(path.clone()),
    );

    let err = retrieval.run(&client(portal.clone())).unwrap_err();
    assert!(matches!(err, Error::RetriesExhausted { retries: 5, .. }));
    assert_eq!(portal.calls(), 6);
    assert!(!path.exists());
}
