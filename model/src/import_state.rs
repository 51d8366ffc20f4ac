use crate::chain::Chain;
use crate::ranges::{range_exclude, range_merge, Range, RangeBound};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of how far an import has progressed for one import key.
///
/// The JSON form of `import_data` is what lands in the `import_state` table;
/// field names are camel cased to match the stored payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportState {
    pub import_key: String,
    pub import_data: ImportData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ImportData {
    #[serde(rename = "product:investment")]
    ProductInvestment(ProductInvestmentImport),
    #[serde(rename = "product:share-rate")]
    ProductShareRate(ProductShareRateImport),
    #[serde(rename = "oracle:price")]
    OraclePrice(OraclePriceImport),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInvestmentImport {
    pub product_id: i64,
    pub chain: Chain,
    pub contract_created_at_block: u64,
    pub contract_creation_date: DateTime<Utc>,
    pub chain_latest_block_number: u64,
    pub ranges: ImportRanges<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductShareRateImport {
    pub price_feed_id: i64,
    pub product_id: i64,
    pub chain: Chain,
    pub contract_created_at_block: u64,
    pub contract_creation_date: DateTime<Utc>,
    pub chain_latest_block_number: u64,
    pub ranges: ImportRanges<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OraclePriceImport {
    pub price_feed_id: i64,
    pub first_date: DateTime<Utc>,
    pub ranges: ImportRanges<DateTime<Utc>>,
}

/// The covered and to-retry interval sets of one import.
///
/// `covered_ranges` is kept merged and sorted, and `to_retry` never overlaps
/// it: a retried range leaves `to_retry` the moment it succeeds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRanges<T> {
    pub covered_ranges: Vec<Range<T>>,
    pub to_retry: Vec<Range<T>>,
    pub last_import_date: DateTime<Utc>,
}

/// One batch of range outcomes to fold into an [`ImportRanges`].
#[derive(Clone, Debug, Default)]
pub struct RangesUpdate<T> {
    pub covered_ranges: Vec<Range<T>>,
    pub success_ranges: Vec<Range<T>>,
    pub error_ranges: Vec<Range<T>>,
}

impl<T: RangeBound> ImportRanges<T> {
    pub fn new(last_import_date: DateTime<Utc>) -> Self {
        Self {
            covered_ranges: Vec::new(),
            to_retry: Vec::new(),
            last_import_date,
        }
    }

    /// Folds one update into the state:
    /// `covered' = merge(covered ∪ C ∪ S)` and
    /// `to_retry' = merge((to_retry ∪ E) \ S) \ covered'`.
    ///
    /// Subtracting the new covered set keeps the two lists disjoint even when
    /// a caller reports a range as covered without listing it as a success.
    pub fn apply(&mut self, update: RangesUpdate<T>, now: DateTime<Utc>) {
        let mut covered = std::mem::take(&mut self.covered_ranges);
        covered.extend(update.covered_ranges);
        covered.extend(update.success_ranges.iter().copied());
        self.covered_ranges = range_merge(covered);

        let mut retry = std::mem::take(&mut self.to_retry);
        retry.extend(update.error_ranges);
        let retry = range_exclude(&range_merge(retry), &update.success_ranges);
        self.to_retry = range_merge(range_exclude(&retry, &self.covered_ranges));

        self.last_import_date = now;
    }
}

impl ImportData {
    /// The stable text key of the import state row holding this payload.
    pub fn import_key(&self) -> String {
        match self {
            ImportData::ProductInvestment(data) => {
                format!("product:investment:{}", data.product_id)
            }
            ImportData::ProductShareRate(data) => {
                format!("product:share-rate:{}", data.price_feed_id)
            }
            ImportData::OraclePrice(data) => format!("oracle:price:{}", data.price_feed_id),
        }
    }
}
