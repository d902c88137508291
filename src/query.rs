use crate::error::{Error, Result};

/// Fields requested from the `read_run` result set, in output column order.
pub const FIELDS: [&str; 10] = [
    "run_accession",
    "experiment_title",
    "tax_id",
    "tax_lineage",
    "scientific_name",
    "library_source",
    "library_strategy",
    "instrument_platform",
    "read_count",
    "first_public",
];

/// Taxonomy predicate used in the portal query grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxonomyOperator {
    /// `tax_tree(<id>)`: the taxon and all of its descendants.
    Tree,
    /// `tax_eq(<id>)`: only the taxon itself.
    Exact,
}

impl TaxonomyOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            TaxonomyOperator::Tree => "tax_tree",
            TaxonomyOperator::Exact => "tax_eq",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    taxonomy_id: String,
    strategy: String,
    exact_match: bool,
}

impl QuerySpec {
    /// Creates a query spec. Both the taxonomy id and the strategy must be non-empty.
    ///
    /// Values are trimmed but otherwise passed through untouched; the portal does its own
    /// validation of id syntax.
    pub fn new(
        taxonomy_id: impl Into<String>,
        strategy: impl Into<String>,
        exact_match: bool,
    ) -> Result<Self> {
        let taxonomy_id = taxonomy_id.into().trim().to_string();
        let strategy = strategy.into().trim().to_string();

        if taxonomy_id.is_empty() {
            return Err(Error::Config("taxonomy id must not be empty".to_string()));
        }
        if strategy.is_empty() {
            return Err(Error::Config("library strategy must not be empty".to_string()));
        }

        Ok(Self {
            taxonomy_id,
            strategy,
            exact_match,
        })
    }

    pub fn taxonomy_id(&self) -> &str {
        &self.taxonomy_id
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn exact_match(&self) -> bool {
        self.exact_match
    }

    pub fn operator(&self) -> TaxonomyOperator {
        if self.exact_match {
            TaxonomyOperator::Exact
        } else {
            TaxonomyOperator::Tree
        }
    }
}

/// Builds the portal query expression, e.g. `tax_tree(562) AND library_strategy="RNA-Seq"`.
pub fn build_query(spec: &QuerySpec) -> String {
    format!(
        "{}({}) AND library_strategy=\"{}\"",
        spec.operator().as_str(),
        spec.taxonomy_id,
        spec.strategy
    )
}

/// Comma-joined field list for the `fields` form key.
pub fn fields_param() -> String {
    FIELDS.join(",")
}
