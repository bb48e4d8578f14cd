use serde::{Deserialize, Serialize};

/// XDR to ICP cross rate built from two USD legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRates {
    pub xdr_to_usd: f64,
    pub icp_to_usd: f64,
    /// `xdr_to_usd / icp_to_usd`
    pub xdr_to_icp: f64,
    pub source: String,
}
