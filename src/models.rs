// --- Position Models ---

use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One closed position as served by the history source.
///
/// Only `id` and the close block are interpreted here; everything else
/// (pair, size, leverage, pnl, ...) rides along in `details`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosedPosition {
    pub id: String,
    pub close_block_number: u64,
    pub close_block_time: DateTime<Utc>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ClosedPosition {
    pub fn new(id: impl Into<String>, close_block_number: u64, close_block_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            close_block_number,
            close_block_time,
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn detail_f64(&self, key: &str) -> Option<f64> {
        match self.details.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }
}

// --- Subject / Quota Models ---

/// Whose history is being synchronized: a trader address within a protocol context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Subject {
    pub address: Address,
    pub context: String,
}

impl Subject {
    pub fn new(address: Address, context: impl Into<String>) -> Self {
        Self {
            address,
            context: context.into(),
        }
    }

    pub fn parse(address: &str, context: impl Into<String>) -> anyhow::Result<Self> {
        let address: Address = address
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid subject address {}: {}", address, e))?;
        Ok(Self::new(address, context))
    }

    /// Lower-case `0x` hex form, as sent to the history source.
    pub fn account(&self) -> String {
        format!("{:#x}", self.address)
    }

    /// Storage key: 20 address bytes followed by the context name.
    pub fn key(&self) -> Vec<u8> {
        let mut key = self.address.as_bytes().to_vec();
        key.extend_from_slice(self.context.as_bytes());
        key
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quota {
    pub is_unlimited: bool,
    /// Ignored when `is_unlimited`. Zero means no access at all.
    pub max_allowed_records: usize,
}

impl Quota {
    pub fn unlimited() -> Self {
        Self {
            is_unlimited: true,
            max_allowed_records: 0,
        }
    }

    pub fn limited(max_allowed_records: usize) -> Self {
        Self {
            is_unlimited: false,
            max_allowed_records,
        }
    }

    /// Finite record ceiling, or `None` when unlimited.
    pub fn ceiling(&self) -> Option<usize> {
        if self.is_unlimited {
            None
        } else {
            Some(self.max_allowed_records)
        }
    }

    pub fn has_access(&self) -> bool {
        self.is_unlimited || self.max_allowed_records > 0
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self::unlimited()
    }
}

// --- Filter Models ---

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RangeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl RangeFilter {
    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new("close_block_time", SortDirection::Desc)
    }
}

/// Everything that decides which closed positions belong in the dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<RangeFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<RangeFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collateral: Option<RangeFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<RangeFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<RangeFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl: Option<RangeFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_pairs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_pairs: Vec<String>,
    #[serde(default)]
    pub sort: SortSpec,
}

impl FilterState {
    /// Numeric range filters keyed by the detail field they constrain.
    pub fn ranges(&self) -> [(&'static str, Option<&RangeFilter>); 6] {
        [
            ("size", self.size.as_ref()),
            ("leverage", self.leverage.as_ref()),
            ("collateral", self.collateral.as_ref()),
            ("roi", self.roi.as_ref()),
            ("fee", self.fee.as_ref()),
            ("pnl", self.pnl.as_ref()),
        ]
    }
}

// --- Source Models ---

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageMeta {
    pub limit: usize,
    pub offset: usize,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryPage {
    pub data: Vec<ClosedPosition>,
    pub meta: PageMeta,
}

/// Parameters of one history source call.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryQuery {
    pub account: String,
    pub context: String,
    pub limit: usize,
    pub offset: usize,
    /// `None` leaves ordering to the source (newest first).
    pub sort: Option<SortSpec>,
    pub filters: FilterState,
    /// Lower bound (inclusive) on `close_block_number`.
    pub min_close_block: Option<u64>,
}

impl HistoryQuery {
    pub fn new(subject: &Subject, filters: &FilterState) -> Self {
        Self {
            account: subject.account(),
            context: subject.context.clone(),
            limit: 0,
            offset: 0,
            sort: Some(filters.sort.clone()),
            filters: filters.clone(),
            min_close_block: None,
        }
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}
